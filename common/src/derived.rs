//! Derived comfort metrics computed from temperature and relative humidity.
//!
//! Both are closed-form approximations of the standard public equations;
//! callers only invoke them when both inputs are available.

/// Heat index in °C from air temperature (°C) and relative humidity (%).
///
/// Rothfusz regression over °F, with the Steadman simple formula used
/// whenever it stays below 79 °F, and the NWS low-humidity / high-humidity
/// adjustments applied in their validity ranges.
pub fn heat_index_c(temperature_c: f32, relative_humidity: f32) -> f32 {
    let t = celsius_to_fahrenheit(temperature_c);
    let rh = relative_humidity;

    let simple = 0.5 * (t + 61.0 + ((t - 68.0) * 1.2) + (rh * 0.094));
    let mut hi = simple;

    if simple >= 79.0 {
        hi = -42.379 + 2.049_015_23 * t + 10.143_331_27 * rh
            - 0.224_755_41 * t * rh
            - 0.006_837_83 * t * t
            - 0.054_817_17 * rh * rh
            + 0.001_228_74 * t * t * rh
            + 0.000_852_82 * t * rh * rh
            - 0.000_001_99 * t * t * rh * rh;

        if rh < 13.0 && (80.0..=112.0).contains(&t) {
            hi -= ((13.0 - rh) * 0.25) * ((17.0 - (t - 95.0).abs()) / 17.0).sqrt();
        } else if rh > 85.0 && (80.0..=87.0).contains(&t) {
            hi += ((rh - 85.0) * 0.1) * ((87.0 - t) * 0.2);
        }
    }

    fahrenheit_to_celsius(hi)
}

/// Dew point in °C via the Magnus formula (17.625 / 243.04 constants).
pub fn dew_point_c(temperature_c: f32, relative_humidity: f32) -> f32 {
    let gamma = (relative_humidity / 100.0).ln()
        + (17.625 * temperature_c) / (243.04 + temperature_c);
    243.04 * gamma / (17.625 - gamma)
}

fn celsius_to_fahrenheit(temp_c: f32) -> f32 {
    temp_c * 9.0 / 5.0 + 32.0
}

fn fahrenheit_to_celsius(temp_f: f32) -> f32 {
    (temp_f - 32.0) * 5.0 / 9.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mild_conditions_use_the_simple_formula() {
        // 25 °C / 50 % stays below the regression threshold.
        let hi = heat_index_c(25.0, 50.0);
        assert!((24.5..=25.3).contains(&hi), "hi was {hi}");
    }

    #[test]
    fn hot_humid_conditions_match_the_nws_table() {
        // NWS chart: 90 °F at 70 % RH reads 105 °F (40.6 °C).
        let hi = heat_index_c(32.22, 70.0);
        assert!((40.0..=41.2).contains(&hi), "hi was {hi}");
    }

    #[test]
    fn heat_index_grows_with_humidity_when_hot() {
        let dry = heat_index_c(34.0, 30.0);
        let humid = heat_index_c(34.0, 80.0);
        assert!(humid > dry);
    }

    #[test]
    fn dew_point_known_value() {
        // 30 °C at 70 % RH gives a dew point just under 24 °C.
        let dp = dew_point_c(30.0, 70.0);
        assert!((23.6..=24.2).contains(&dp), "dp was {dp}");
    }

    #[test]
    fn dew_point_at_saturation_equals_temperature() {
        let dp = dew_point_c(20.0, 100.0);
        assert!((dp - 20.0).abs() < 0.05, "dp was {dp}");
    }

    #[test]
    fn dew_point_is_below_temperature_when_unsaturated() {
        for rh in [20.0, 40.0, 60.0, 80.0] {
            assert!(dew_point_c(22.0, rh) < 22.0);
        }
    }
}
