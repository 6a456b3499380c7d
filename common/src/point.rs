//! Per-cycle sensor sample and the data point shipped to the time-series
//! endpoint, including its line-protocol encoding.

use crate::config::DeviceConfig;
use crate::derived;

/// Quantities gathered in one sampling cycle. `None` means the quantity was
/// unavailable this cycle; values are never carried over between cycles.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SensorSample {
    pub temperature_c: Option<f32>,
    pub humidity_pct: Option<f32>,
    pub pressure_hpa: Option<f32>,
}

impl SensorSample {
    /// Fill this sample's gaps from another sensor's reading. Existing
    /// values win, so wire the primary sensor first.
    pub fn merge(mut self, other: SensorSample) -> SensorSample {
        self.temperature_c = self.temperature_c.or(other.temperature_c);
        self.humidity_pct = self.humidity_pct.or(other.humidity_pct);
        self.pressure_hpa = self.pressure_hpa.or(other.pressure_hpa);
        self
    }

    /// Drop NaN/inf readings; a sensor that answers garbage counts as
    /// unavailable, never as zero.
    pub fn sanitized(self) -> SensorSample {
        SensorSample {
            temperature_c: self.temperature_c.filter(|v| v.is_finite()),
            humidity_pct: self.humidity_pct.filter(|v| v.is_finite()),
            pressure_hpa: self.pressure_hpa.filter(|v| v.is_finite()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.temperature_c.is_none() && self.humidity_pct.is_none() && self.pressure_hpa.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldValue {
    Float(f64),
    Integer(i64),
}

/// One tagged measurement, assembled fresh each cycle and discarded after
/// the write attempt.
#[derive(Debug, Clone)]
pub struct DataPoint {
    measurement: String,
    tags: Vec<(String, String)>,
    fields: Vec<(String, FieldValue)>,
    timestamp_ms: Option<i64>,
}

impl DataPoint {
    pub fn new(measurement: impl Into<String>) -> Self {
        Self {
            measurement: measurement.into(),
            tags: Vec::new(),
            fields: Vec::new(),
            timestamp_ms: None,
        }
    }

    pub fn add_tag(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.tags.push((key.into(), value.into()));
    }

    pub fn add_field_f64(&mut self, key: impl Into<String>, value: f64) {
        self.fields.push((key.into(), FieldValue::Float(value)));
    }

    pub fn add_field_i64(&mut self, key: impl Into<String>, value: i64) {
        self.fields.push((key.into(), FieldValue::Integer(value)));
    }

    pub fn set_timestamp_ms(&mut self, epoch_ms: i64) {
        self.timestamp_ms = Some(epoch_ms);
    }

    pub fn field(&self, key: &str) -> Option<FieldValue> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| *v)
    }

    pub fn has_field(&self, key: &str) -> bool {
        self.field(key).is_some()
    }

    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    /// Encode as one InfluxDB line-protocol record (no trailing newline).
    pub fn to_line_protocol(&self) -> String {
        let mut line = escape_measurement(&self.measurement);

        for (key, value) in &self.tags {
            line.push(',');
            line.push_str(&escape_key(key));
            line.push('=');
            line.push_str(&escape_key(value));
        }

        line.push(' ');
        let mut first = true;
        for (key, value) in &self.fields {
            if !first {
                line.push(',');
            }
            first = false;
            line.push_str(&escape_key(key));
            line.push('=');
            match value {
                FieldValue::Float(v) => line.push_str(&format!("{v}")),
                FieldValue::Integer(v) => line.push_str(&format!("{v}i")),
            }
        }

        if let Some(ts) = self.timestamp_ms {
            line.push(' ');
            line.push_str(&ts.to_string());
        }

        line
    }
}

// Line-protocol escaping: measurements escape commas and spaces; tag keys,
// tag values and field keys additionally escape equals signs.
fn escape_measurement(raw: &str) -> String {
    raw.replace(',', "\\,").replace(' ', "\\ ")
}

fn escape_key(raw: &str) -> String {
    raw.replace(',', "\\,").replace('=', "\\=").replace(' ', "\\ ")
}

/// Assemble the point for one cycle.
///
/// Device and network fields (`rssi`, `uptime`) are always present, so a
/// point ships every cycle even when all sensors failed: liveness stays
/// observable, and a gap in the series means the device itself was down.
/// Sensor fields cover only the available subset; the derived heat-index
/// and dew-point fields appear exactly when temperature and humidity are
/// both available.
pub fn build_cycle_point(
    config: &DeviceConfig,
    device_id: &str,
    network_name: &str,
    rssi_dbm: i32,
    uptime_ms: u64,
    sample: SensorSample,
) -> DataPoint {
    let sample = sample.sanitized();
    let mut point = DataPoint::new(config.measurement.as_str());

    point.add_tag("device", device_id);
    point.add_tag("SSID", network_name);
    point.add_tag("location", config.location.as_str());

    point.add_field_i64("rssi", i64::from(rssi_dbm));
    point.add_field_i64("uptime", uptime_ms as i64);

    if let Some(humidity) = sample.humidity_pct {
        point.add_field_f64(config.fields.humidity.as_str(), f64::from(humidity));
    }
    if let Some(temperature) = sample.temperature_c {
        point.add_field_f64(config.fields.temperature.as_str(), f64::from(temperature));
    }
    if let (Some(temperature), Some(humidity)) = (sample.temperature_c, sample.humidity_pct) {
        let heat_index = derived::heat_index_c(temperature, humidity);
        let dew_point = derived::dew_point_c(temperature, humidity);
        point.add_field_f64(config.fields.heat_index.as_str(), f64::from(heat_index));
        point.add_field_f64(config.fields.dew_point.as_str(), f64::from(dew_point));
    }
    if let Some(pressure) = sample.pressure_hpa {
        point.add_field_f64(config.fields.pressure.as_str(), f64::from(pressure));
    }

    point
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> DeviceConfig {
        DeviceConfig::default()
    }

    #[test]
    fn line_protocol_layout() {
        let mut point = DataPoint::new("temperature");
        point.add_tag("device", "FLUXTEMP-0012ABCD");
        point.add_tag("SSID", "homenet");
        point.add_tag("location", "Living room");
        point.add_field_i64("rssi", -50);
        point.add_field_f64("humidity", 55.5);

        assert_eq!(
            point.to_line_protocol(),
            "temperature,device=FLUXTEMP-0012ABCD,SSID=homenet,location=Living\\ room \
             rssi=-50i,humidity=55.5"
        );
    }

    #[test]
    fn line_protocol_escapes_special_characters() {
        let mut point = DataPoint::new("my measurement");
        point.add_tag("tag,key", "a=b c");
        point.add_field_f64("field key", 1.0);

        assert_eq!(
            point.to_line_protocol(),
            "my\\ measurement,tag\\,key=a\\=b\\ c field\\ key=1"
        );
    }

    #[test]
    fn timestamp_is_appended_when_set() {
        let mut point = DataPoint::new("m");
        point.add_field_i64("uptime", 12);
        point.set_timestamp_ms(1_700_000_000_000);

        assert_eq!(point.to_line_protocol(), "m uptime=12i 1700000000000");
    }

    #[test]
    fn derived_fields_require_both_inputs() {
        let both = build_cycle_point(
            &config(),
            "dev",
            "net",
            -60,
            1_000,
            SensorSample {
                temperature_c: Some(22.0),
                humidity_pct: Some(60.0),
                pressure_hpa: None,
            },
        );
        assert!(both.has_field("heatIndex"));
        assert!(both.has_field("dewPoint"));

        let temp_only = build_cycle_point(
            &config(),
            "dev",
            "net",
            -60,
            1_000,
            SensorSample {
                temperature_c: Some(22.0),
                ..SensorSample::default()
            },
        );
        assert!(temp_only.has_field("temperature"));
        assert!(!temp_only.has_field("heatIndex"));
        assert!(!temp_only.has_field("dewPoint"));

        let humidity_only = build_cycle_point(
            &config(),
            "dev",
            "net",
            -60,
            1_000,
            SensorSample {
                humidity_pct: Some(40.0),
                ..SensorSample::default()
            },
        );
        assert!(!humidity_only.has_field("heatIndex"));
        assert!(!humidity_only.has_field("dewPoint"));
    }

    #[test]
    fn nan_reading_is_omitted_not_zeroed() {
        let point = build_cycle_point(
            &config(),
            "dev",
            "net",
            -55,
            2_000,
            SensorSample {
                temperature_c: Some(f32::NAN),
                humidity_pct: Some(55.0),
                pressure_hpa: None,
            },
        );

        assert!(!point.has_field("temperature"));
        assert!(!point.has_field("heatIndex"));
        assert!(!point.has_field("dewPoint"));
        assert_eq!(point.field("humidity"), Some(FieldValue::Float(55.0)));
        // Device fields still ship, so the write is still worth attempting.
        assert!(point.has_field("rssi"));
        assert!(point.has_field("uptime"));
    }

    #[test]
    fn empty_sample_still_produces_a_publishable_point() {
        let point = build_cycle_point(
            &config(),
            "dev",
            "net",
            -70,
            5_000,
            SensorSample::default(),
        );

        assert_eq!(point.field_count(), 2);
        assert_eq!(point.field("rssi"), Some(FieldValue::Integer(-70)));
        assert_eq!(point.field("uptime"), Some(FieldValue::Integer(5_000)));
    }

    #[test]
    fn field_name_overrides_are_honored() {
        let mut config = config();
        config.fields.temperature = "tempC".to_string();
        config.fields.heat_index = "feelsLike".to_string();

        let point = build_cycle_point(
            &config,
            "dev",
            "net",
            -50,
            100,
            SensorSample {
                temperature_c: Some(30.0),
                humidity_pct: Some(70.0),
                pressure_hpa: None,
            },
        );

        assert!(point.has_field("tempC"));
        assert!(point.has_field("feelsLike"));
        assert!(!point.has_field("temperature"));
    }

    #[test]
    fn merge_prefers_the_first_sensor() {
        let dht = SensorSample {
            temperature_c: Some(21.0),
            humidity_pct: Some(45.0),
            pressure_hpa: None,
        };
        let bmp = SensorSample {
            temperature_c: Some(22.5),
            humidity_pct: None,
            pressure_hpa: Some(1013.2),
        };

        let merged = dht.merge(bmp);
        assert_eq!(merged.temperature_c, Some(21.0));
        assert_eq!(merged.pressure_hpa, Some(1013.2));
    }
}
