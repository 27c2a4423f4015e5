//! Even-distance sampling of multi-segment paths.

use crate::EngineError;
use geo::{algorithm::HaversineDistance, geometry::Coord, geometry::Point};
use reanalysis::C;

/// One evenly spaced point along a path.
#[derive(Debug, Clone, PartialEq)]
pub struct SamplePoint {
    pub coord: Coord<C>,

    /// Segment index plus the fraction travelled along that segment.
    pub path_position: C,

    /// Distance from the start of the path, meters.
    pub distance: C,
}

/// Decomposes an ordered coordinate path into segments and cuts them
/// into evenly spaced samples.
///
/// Samples are emitted at along-segment distances `0, D, 2D, …`
/// strictly below each segment's length, in every input mode.
/// Zero-length segments (duplicate consecutive vertices) are skipped;
/// a path whose total length is zero yields a single sample at the
/// first vertex.
#[derive(Debug, Clone)]
pub struct PathSampler {
    vertices: Vec<Coord<C>>,
}

impl PathSampler {
    pub fn new(vertices: Vec<Coord<C>>) -> Result<Self, EngineError> {
        if vertices.len() < 2 {
            return Err(EngineError::ShortPath);
        }
        Ok(Self { vertices })
    }

    pub fn from_arrays(lon: &[C], lat: &[C]) -> Result<Self, EngineError> {
        if lon.len() != lat.len() {
            return Err(EngineError::LengthMismatch("lon", "lat"));
        }
        Self::new(
            lon.iter()
                .zip(lat)
                .map(|(&x, &y)| Coord { x, y })
                .collect(),
        )
    }

    pub fn vertices(&self) -> &[Coord<C>] {
        &self.vertices
    }

    /// Sum of all segment lengths, meters.
    pub fn total_length(&self) -> C {
        self.vertices
            .windows(2)
            .map(|pair| segment_length(pair[0], pair[1]))
            .sum()
    }

    pub fn sample(&self, spacing_m: C) -> Result<Vec<SamplePoint>, EngineError> {
        if !(spacing_m > 0.0) {
            return Err(EngineError::InvalidSpacing);
        }
        let mut samples = Vec::new();
        let mut cumulative = 0.0;
        for (segment, pair) in self.vertices.windows(2).enumerate() {
            let (start, end) = (pair[0], pair[1]);
            let length = segment_length(start, end);
            if length == 0.0 {
                continue;
            }
            let mut along = 0.0;
            while along < length {
                let fraction = along / length;
                samples.push(SamplePoint {
                    coord: lerp(start, end, fraction),
                    path_position: segment as C + fraction,
                    distance: cumulative + along,
                });
                along += spacing_m;
            }
            cumulative += length;
        }
        if samples.is_empty() {
            // Degenerate path, every vertex identical.
            samples.push(SamplePoint {
                coord: self.vertices[0],
                path_position: 0.0,
                distance: 0.0,
            });
        }
        Ok(samples)
    }
}

fn segment_length(a: Coord<C>, b: Coord<C>) -> C {
    Point::from(a).haversine_distance(&Point::from(b))
}

fn lerp(a: Coord<C>, b: Coord<C>, fraction: C) -> Coord<C> {
    Coord {
        x: a.x + (b.x - a.x) * fraction,
        y: a.y + (b.y - a.y) * fraction,
    }
}

#[cfg(test)]
mod tests {
    use super::PathSampler;
    use geo::geometry::Coord;

    const ORIGIN: Coord = Coord { x: 0.0, y: 0.0 };
    const ONE_DEG_N: Coord = Coord { x: 0.0, y: 1.0 };

    #[test]
    fn straight_segment_sample_count() {
        let sampler = PathSampler::new(vec![ORIGIN, ONE_DEG_N]).unwrap();
        // One degree of latitude is roughly 111 km.
        let samples = sampler.sample(50_000.0).unwrap();
        assert_eq!(samples.len(), 3);
        for sample in &samples {
            assert!((0.0..1.0).contains(&sample.path_position));
        }
    }

    #[test]
    fn distances_monotonically_non_decreasing() {
        let sampler = PathSampler::new(vec![
            ORIGIN,
            ONE_DEG_N,
            Coord { x: 1.0, y: 1.0 },
        ])
        .unwrap();
        let samples = sampler.sample(30_000.0).unwrap();
        for pair in samples.windows(2) {
            assert!(pair[1].distance >= pair[0].distance);
            assert!(pair[1].path_position > pair[0].path_position);
        }
        assert!(samples.last().unwrap().path_position > 1.0);
    }

    #[test]
    fn duplicate_vertices_do_not_panic() {
        let sampler = PathSampler::new(vec![ORIGIN, ORIGIN, ONE_DEG_N]).unwrap();
        let samples = sampler.sample(50_000.0).unwrap();
        // The zero-length first segment contributes nothing.
        assert_eq!(samples[0].path_position, 1.0);
        assert_eq!(samples.len(), 3);
    }

    #[test]
    fn degenerate_path_yields_single_sample() {
        let sampler = PathSampler::new(vec![ORIGIN, ORIGIN]).unwrap();
        let samples = sampler.sample(1000.0).unwrap();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].distance, 0.0);
    }

    #[test]
    fn too_short_path_is_rejected() {
        assert!(PathSampler::new(vec![ORIGIN]).is_err());
        assert!(PathSampler::from_arrays(&[0.0, 1.0], &[0.0]).is_err());
    }
}
