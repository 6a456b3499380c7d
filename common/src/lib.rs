pub mod config;
pub mod derived;
pub mod point;
pub mod provisioning;
pub mod status;
pub mod store;
pub mod uptime;

pub use config::{DeviceConfig, FieldNames};
pub use point::{build_cycle_point, DataPoint, FieldValue, SensorSample};
pub use provisioning::{
    BootPath, ProvisioningController, ProvisioningOutcome, SetupConclusion, SetupExit, SetupReason,
    SetupSubmission,
};
pub use status::{Fault, StatusSignal};
pub use store::{ConfigStore, StoreError};
pub use uptime::UptimeCounter;

/// Device family name; prefixes the device id, the provisioning AP SSID and
/// the portal page title.
pub const DEVICE_NAME: &str = "FLUXTEMP";

/// Stable per-unit identifier derived from the chip id (ESP) or a host
/// fingerprint. Doubles as the provisioning AP SSID.
pub fn device_id(chip_id: u32) -> String {
    format!("{DEVICE_NAME}-{chip_id:08X}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_id_is_name_plus_hex_chip_id() {
        assert_eq!(device_id(0x0012_ABCD), "FLUXTEMP-0012ABCD");
        assert_eq!(device_id(0), "FLUXTEMP-00000000");
    }
}
