//! JSON response envelope shared by every capability.

use serde_json::{json, Value};
use std::time::{SystemTime, UNIX_EPOCH};

/// What the transport layer sends back: HTTP status, headers, body.
pub type Reply = (u16, Vec<(String, String)>, String);

pub const VALIDATION_ADVICE: &str = "Double check the inputs.";

const ISSUE_TRACKER: &str = "https://github.com/Rafnuss/GeoPressureServer/issues/new";

/// Task identifier included in every envelope, for log correlation.
pub fn task_id() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_secs() as i64)
}

pub fn crash_advice(task_id: i64) -> String {
    format!(
        "An error has occurred. Please try again, and if the problem persists, \
         file an issue on {ISSUE_TRACKER}?body=task_id:{task_id}&labels=crash"
    )
}

fn headers() -> Vec<(String, String)> {
    vec![("Content-Type".to_string(), "application/json".to_string())]
}

pub fn success(task_id: i64, data: Value) -> Reply {
    let body = json!({
        "status": "success",
        "taskID": task_id,
        "data": data,
    });
    (200, headers(), body.to_string())
}

pub fn error(status: u16, task_id: i64, message: &str, advice: &str) -> Reply {
    let body = json!({
        "status": "error",
        "taskID": task_id,
        "errorMessage": message,
        "advice": advice,
    });
    (status, headers(), body.to_string())
}

#[cfg(test)]
mod tests {
    use super::{error, success};
    use serde_json::{json, Value};

    #[test]
    fn envelopes_are_well_formed() {
        let (status, headers, body) = success(42, json!({"x": 1}));
        assert_eq!(status, 200);
        assert_eq!(headers[0].1, "application/json");
        let body: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(body["status"], "success");
        assert_eq!(body["taskID"], 42);
        assert_eq!(body["data"]["x"], 1);

        let (status, _, body) = error(400, 42, "boom", "advice");
        assert_eq!(status, 400);
        let body: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(body["status"], "error");
        assert_eq!(body["errorMessage"], "boom");
        assert_eq!(body["advice"], "advice");
    }
}
