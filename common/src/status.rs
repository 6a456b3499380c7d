use std::fmt;
use std::time::Duration;

/// On/off duration of a single blink edge.
pub const BLINK_INTERVAL: Duration = Duration::from_millis(150);

/// Pause between repetitions of a fatal pattern.
pub const FAULT_PATTERN_GAP: Duration = Duration::from_millis(300);

/// Per-cycle events signalled on the status LED. Each maps to a fixed number
/// of on/off pairs, blinked synchronously.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusSignal {
    /// Start of a measurement cycle.
    MeasureTick,
    /// A sensor read came back unavailable this cycle.
    SensorReadError,
    /// The telemetry write was rejected or never arrived.
    PublishError,
}

impl StatusSignal {
    pub fn blink_count(self) -> u8 {
        match self {
            StatusSignal::MeasureTick => 1,
            StatusSignal::SensorReadError => 2,
            StatusSignal::PublishError => 3,
        }
    }
}

/// Unrecoverable boot faults. The pattern repeats forever; the device needs
/// a power cycle (and likely repair) to leave it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// The config storage medium would not mount.
    Storage,
    /// A sensor bus failed to initialize at boot.
    SensorInit,
}

impl Fault {
    pub fn blink_count(self) -> u8 {
        match self {
            Fault::Storage => 5,
            Fault::SensorInit => 6,
        }
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fault::Storage => write!(f, "config storage unavailable"),
            Fault::SensorInit => write!(f, "sensor bus failed to initialize"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_codes_are_stable() {
        assert_eq!(StatusSignal::MeasureTick.blink_count(), 1);
        assert_eq!(StatusSignal::SensorReadError.blink_count(), 2);
        assert_eq!(StatusSignal::PublishError.blink_count(), 3);
    }

    #[test]
    fn fault_codes_do_not_collide_with_signals() {
        let signals = [
            StatusSignal::MeasureTick.blink_count(),
            StatusSignal::SensorReadError.blink_count(),
            StatusSignal::PublishError.blink_count(),
        ];
        for fault in [Fault::Storage, Fault::SensorInit] {
            assert!(!signals.contains(&fault.blink_count()));
        }
        assert_ne!(Fault::Storage.blink_count(), Fault::SensorInit.blink_count());
    }
}
