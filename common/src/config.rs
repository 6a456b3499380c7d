use serde::{Deserialize, Serialize};

// Byte bounds for persisted string fields. Values longer than the bound are
// truncated (on a char boundary) when the record is written, never rejected.
pub const MAX_URL_LEN: usize = 100;
pub const MAX_TOKEN_LEN: usize = 100;
pub const MAX_NAME_LEN: usize = 50;
pub const MAX_PIN_LEN: usize = 20;

/// Field names used for sensor quantities in published data points.
///
/// These are stored alongside the connection settings so a deployment can
/// rename fields (e.g. `tempC`) without reflashing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldNames {
    pub temperature: String,
    pub humidity: String,
    #[serde(rename = "heatIndex")]
    pub heat_index: String,
    #[serde(rename = "dewPoint")]
    pub dew_point: String,
    pub pressure: String,
}

impl Default for FieldNames {
    fn default() -> Self {
        Self {
            temperature: "temperature".to_string(),
            humidity: "humidity".to_string(),
            heat_index: "heatIndex".to_string(),
            dew_point: "dewPoint".to_string(),
            pressure: "pressure".to_string(),
        }
    }
}

/// Everything the device needs to reach its time-series endpoint, plus the
/// tags and field names it publishes under.
///
/// A key absent from the persisted record takes the compiled default; a key
/// present but empty stays empty. There is no separate "unset" state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    #[serde(rename = "influxUrl")]
    pub influx_url: String,
    #[serde(rename = "influxOrg")]
    pub influx_org: String,
    #[serde(rename = "influxBucket")]
    pub influx_bucket: String,
    #[serde(rename = "influxToken")]
    pub influx_token: String,
    #[serde(rename = "measurementName")]
    pub measurement: String,
    pub location: String,
    #[serde(rename = "setupPin")]
    pub setup_pin: String,
    pub fields: FieldNames,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            influx_url: "https://westeurope-1.azure.cloud2.influxdata.com".to_string(),
            influx_org: String::new(),
            influx_bucket: "data".to_string(),
            influx_token: String::new(),
            measurement: "temperature".to_string(),
            location: "Living room".to_string(),
            setup_pin: String::new(),
            fields: FieldNames::default(),
        }
    }
}

impl DeviceConfig {
    /// Clamp every field to its byte bound. Truncation is silent; the portal
    /// form enforces the same limits client-side, so this only matters for
    /// hand-edited records and programmatic writes.
    pub fn sanitize(&mut self) {
        truncate_to_bytes(&mut self.influx_url, MAX_URL_LEN);
        truncate_to_bytes(&mut self.influx_org, MAX_NAME_LEN);
        truncate_to_bytes(&mut self.influx_bucket, MAX_NAME_LEN);
        truncate_to_bytes(&mut self.influx_token, MAX_TOKEN_LEN);
        truncate_to_bytes(&mut self.measurement, MAX_NAME_LEN);
        truncate_to_bytes(&mut self.location, MAX_NAME_LEN);
        truncate_to_bytes(&mut self.setup_pin, MAX_PIN_LEN);
        truncate_to_bytes(&mut self.fields.temperature, MAX_NAME_LEN);
        truncate_to_bytes(&mut self.fields.humidity, MAX_NAME_LEN);
        truncate_to_bytes(&mut self.fields.heat_index, MAX_NAME_LEN);
        truncate_to_bytes(&mut self.fields.dew_point, MAX_NAME_LEN);
        truncate_to_bytes(&mut self.fields.pressure, MAX_NAME_LEN);
    }

    /// True when the device has enough to publish: a non-blank endpoint URL
    /// and a non-blank access token. Steady-state operation must never be
    /// entered without both.
    pub fn has_publish_target(&self) -> bool {
        !self.influx_url.trim().is_empty() && !self.influx_token.trim().is_empty()
    }
}

fn truncate_to_bytes(value: &mut String, max_bytes: usize) {
    if value.len() <= max_bytes {
        return;
    }
    let mut end = max_bytes;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    value.truncate(end);
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn missing_keys_take_compiled_defaults() {
        let config: DeviceConfig = serde_json::from_str("{}").unwrap();

        assert_eq!(config, DeviceConfig::default());
        assert_eq!(config.influx_bucket, "data");
        assert_eq!(config.measurement, "temperature");
        assert_eq!(config.fields.heat_index, "heatIndex");
    }

    #[test]
    fn present_but_empty_keys_stay_empty() {
        let config: DeviceConfig =
            serde_json::from_str(r#"{"influxBucket": "", "location": ""}"#).unwrap();

        assert_eq!(config.influx_bucket, "");
        assert_eq!(config.location, "");
        // Untouched keys still default.
        assert_eq!(config.measurement, "temperature");
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let config: DeviceConfig = serde_json::from_str(
            r#"{"influxOrg": "my-org", "ntp1": "pool.ntp.org", "legacy": 42}"#,
        )
        .unwrap();

        assert_eq!(config.influx_org, "my-org");
    }

    #[test]
    fn sanitize_truncates_to_byte_bounds() {
        let mut config = DeviceConfig {
            influx_url: "x".repeat(MAX_URL_LEN + 40),
            location: "y".repeat(MAX_NAME_LEN + 1),
            setup_pin: "1".repeat(MAX_PIN_LEN + 5),
            ..DeviceConfig::default()
        };

        config.sanitize();

        assert_eq!(config.influx_url.len(), MAX_URL_LEN);
        assert_eq!(config.location.len(), MAX_NAME_LEN);
        assert_eq!(config.setup_pin.len(), MAX_PIN_LEN);
    }

    #[test]
    fn sanitize_respects_char_boundaries() {
        // 'é' is two bytes; an odd remainder must not split it.
        let mut config = DeviceConfig {
            location: "é".repeat(40),
            ..DeviceConfig::default()
        };

        config.sanitize();

        assert!(config.location.len() <= MAX_NAME_LEN);
        assert!(config.location.chars().all(|c| c == 'é'));
    }

    #[test]
    fn publish_target_requires_url_and_token() {
        let mut config = DeviceConfig::default();
        assert!(!config.has_publish_target());

        config.influx_token = "secret".to_string();
        assert!(config.has_publish_target());

        config.influx_url = "   ".to_string();
        assert!(!config.has_publish_target());
    }
}
