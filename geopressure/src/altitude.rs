//! Hypsometric (barometric) altitude.

use reanalysis::Raster;

/// Standard temperature lapse rate [K/m].
pub const LB: f64 = -0.0065;

/// Universal gas constant [N·m/(mol·K)].
pub const R: f64 = 8.31432;

/// Gravitational acceleration constant [m/s²].
pub const G0: f64 = 9.80665;

/// Molar mass of Earth's air [kg/mol].
pub const M: f64 = 0.0289644;

/// Altitude of a pressure reading against a matched reanalysis cell.
///
/// `surface_pressure` [Pa] and `temperature` [K] come from the matched
/// snapshot, `reference` [m] is the reanalysis geopotential height of
/// the cell. Observing exactly the surface pressure puts the device at
/// the reference height.
pub fn barometric_altitude(
    pressure: f64,
    surface_pressure: f64,
    temperature: f64,
    reference: f64,
) -> f64 {
    reference
        + (temperature / LB) * ((pressure / surface_pressure).powf(-R * LB / (G0 * M)) - 1.0)
}

/// Per-pixel altitude of one pressure reading. Pixels missing any
/// input stay no-data.
pub fn altitude_raster(
    pressure: f64,
    surface_pressure: &Raster,
    temperature: &Raster,
    geopotential: &Raster,
) -> Raster {
    surface_pressure.zip3_with(temperature, geopotential, |p0, t, h0| {
        barometric_altitude(pressure, p0, t, h0)
    })
}

#[cfg(test)]
mod tests {
    use super::barometric_altitude;
    use approx::assert_relative_eq;

    #[test]
    fn same_pressure_means_reference_height() {
        for p0 in [95_000.0, 101_325.0] {
            for t in [250.0, 288.15, 310.0] {
                assert_relative_eq!(barometric_altitude(p0, p0, t, 123.4), 123.4);
            }
        }
    }

    #[test]
    fn lower_pressure_means_higher_altitude() {
        let at_surface = barometric_altitude(101_325.0, 101_325.0, 288.15, 0.0);
        let above = barometric_altitude(95_000.0, 101_325.0, 288.15, 0.0);
        assert!(above > at_surface);
        // ~540 m for a 6.3 kPa drop in a standard atmosphere.
        assert_relative_eq!(above, 540.0, max_relative = 0.05);
    }
}
