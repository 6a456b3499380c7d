//! Boot-time provisioning decision and setup-session lifecycle.
//!
//! The controller decides once, at boot, whether the device can connect with
//! what it has or must block in interactive setup, and turns the outcome of a
//! setup session into the single next action the platform glue executes.
//! Everything here is pure; radios, portals, filesystems, and restarts live
//! in the target binaries.

use std::time::Duration;

use rand::Rng;
use serde::Deserialize;

use crate::config::DeviceConfig;
use crate::status::Fault;

/// Portal lifetime when setup was entered as a fallback after a failed
/// connect. Deliberate setup (manual trigger, no usable config) has no
/// timeout: a human is expected, and silently falling back would strand them.
pub const FALLBACK_PORTAL_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupReason {
    /// The physical setup trigger was asserted at boot.
    ManualRequest,
    /// No record loaded, or the record lacks an endpoint/token to publish to.
    NoUsableConfig,
    /// Direct connection with a usable config failed within its budget.
    ConnectFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootPath {
    InteractiveSetup(SetupReason),
    DirectConnect,
}

/// Result of the boot sequence, reported once the path has played out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisioningOutcome {
    ConfiguredAndConnected,
    EnteredSetup(SetupReason),
    Failed(Fault),
}

/// How an interactive setup session ended.
#[derive(Debug, Clone)]
pub enum SetupExit {
    Submitted(SetupSubmission),
    TimedOut,
}

/// What the platform glue must do after a setup session concludes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupConclusion {
    /// Persist the updated config, then restart. The new settings take
    /// effect from a clean boot; nothing is reconfigured live.
    SaveAndRestart,
    /// Discard this session's state and restart with the old record intact.
    RestartWithoutSaving,
}

/// Every field the setup form posts back. All fields are copied into the
/// config on submit whether or not they changed. Station credentials are
/// passed through to the WiFi layer and never stored in the config record.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SetupSubmission {
    #[serde(rename = "wifiSsid")]
    pub wifi_ssid: Option<String>,
    #[serde(rename = "wifiPass")]
    pub wifi_pass: Option<String>,
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
    #[serde(rename = "fieldTemperature")]
    pub field_temperature: String,
    #[serde(rename = "fieldHumidity")]
    pub field_humidity: String,
    #[serde(rename = "fieldHeatIndex")]
    pub field_heat_index: String,
    #[serde(rename = "fieldDewPoint")]
    pub field_dew_point: String,
    #[serde(rename = "fieldPressure")]
    pub field_pressure: String,
}

impl SetupSubmission {
    pub fn from_config(config: &DeviceConfig) -> Self {
        Self {
            wifi_ssid: None,
            wifi_pass: None,
            influx_url: config.influx_url.clone(),
            influx_org: config.influx_org.clone(),
            influx_bucket: config.influx_bucket.clone(),
            influx_token: config.influx_token.clone(),
            measurement: config.measurement.clone(),
            location: config.location.clone(),
            setup_pin: config.setup_pin.clone(),
            field_temperature: config.fields.temperature.clone(),
            field_humidity: config.fields.humidity.clone(),
            field_heat_index: config.fields.heat_index.clone(),
            field_dew_point: config.fields.dew_point.clone(),
            field_pressure: config.fields.pressure.clone(),
        }
    }
}

/// First match wins: a human who pressed the trigger is present and must not
/// be timed out; a device with nothing usable has no other option; only a
/// device with a usable record attempts to connect directly.
pub fn boot_path(manual_setup_requested: bool, config_usable: bool) -> BootPath {
    if manual_setup_requested {
        BootPath::InteractiveSetup(SetupReason::ManualRequest)
    } else if !config_usable {
        BootPath::InteractiveSetup(SetupReason::NoUsableConfig)
    } else {
        BootPath::DirectConnect
    }
}

/// Portal timeout by entry reason; `None` means the portal waits forever.
pub fn portal_timeout(reason: SetupReason) -> Option<Duration> {
    match reason {
        SetupReason::ManualRequest | SetupReason::NoUsableConfig => None,
        SetupReason::ConnectFailed => Some(FALLBACK_PORTAL_TIMEOUT),
    }
}

/// Fresh numeric setup PIN from OS entropy. The PIN is regenerated whenever
/// the device boots without a stored config, and shown on the portal form.
pub fn generate_setup_pin() -> String {
    rand::thread_rng().gen_range(1_000_000u32..100_000_000).to_string()
}

#[derive(Debug)]
pub struct ProvisioningController {
    config: DeviceConfig,
    manual_setup_requested: bool,
    config_usable: bool,
}

impl ProvisioningController {
    /// Build from the store's load result and the boot-sampled trigger.
    /// A record without a publish target counts as unusable: steady state
    /// must never start with a blank endpoint or token.
    pub fn new(loaded: Option<DeviceConfig>, manual_setup_requested: bool) -> Self {
        let config_usable = loaded.as_ref().is_some_and(DeviceConfig::has_publish_target);
        let mut config = loaded.unwrap_or_default();
        if config.setup_pin.is_empty() {
            config.setup_pin = generate_setup_pin();
        }
        Self {
            config,
            manual_setup_requested,
            config_usable,
        }
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn boot_path(&self) -> BootPath {
        boot_path(self.manual_setup_requested, self.config_usable)
    }

    /// The fallback path after a failed direct connect.
    pub fn connect_failed(&self) -> BootPath {
        BootPath::InteractiveSetup(SetupReason::ConnectFailed)
    }

    /// Fold a finished setup session into the config and report what to do.
    /// On submit every field is copied back independently and the result is
    /// clamped to the field bounds; the caller persists and restarts. On
    /// timeout nothing is touched.
    pub fn conclude_setup(&mut self, exit: SetupExit) -> SetupConclusion {
        match exit {
            SetupExit::Submitted(submission) => {
                self.apply_submission(&submission);
                SetupConclusion::SaveAndRestart
            }
            SetupExit::TimedOut => SetupConclusion::RestartWithoutSaving,
        }
    }

    fn apply_submission(&mut self, submission: &SetupSubmission) {
        let config = &mut self.config;
        config.influx_url = submission.influx_url.clone();
        config.influx_org = submission.influx_org.clone();
        config.influx_bucket = submission.influx_bucket.clone();
        config.influx_token = submission.influx_token.clone();
        config.measurement = submission.measurement.clone();
        config.location = submission.location.clone();
        config.setup_pin = submission.setup_pin.clone();
        config.fields.temperature = submission.field_temperature.clone();
        config.fields.humidity = submission.field_humidity.clone();
        config.fields.heat_index = submission.field_heat_index.clone();
        config.fields.dew_point = submission.field_dew_point.clone();
        config.fields.pressure = submission.field_pressure.clone();
        config.sanitize();
    }
}
