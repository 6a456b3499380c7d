/// Widens a free-running 32-bit millisecond tick into a monotonic 64-bit
/// uptime. The platform tick wraps every ~49.7 days; as long as `update` is
/// called at least once per wrap period (the sampling loop runs every few
/// minutes) the 64-bit value never goes backwards.
#[derive(Debug, Default, Clone, Copy)]
pub struct UptimeCounter {
    high: u32,
    last_low: u32,
}

impl UptimeCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the current raw tick; returns the widened uptime in ms.
    pub fn update(&mut self, tick_ms: u32) -> u64 {
        if tick_ms < self.last_low {
            self.high += 1;
        }
        self.last_low = tick_ms;
        (u64::from(self.high) << 32) | u64::from(tick_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passes_raw_ticks_through_before_first_wrap() {
        let mut uptime = UptimeCounter::new();
        assert_eq!(uptime.update(0), 0);
        assert_eq!(uptime.update(1_500), 1_500);
        assert_eq!(uptime.update(300_000), 300_000);
    }

    #[test]
    fn strictly_increases_across_three_rollovers() {
        let mut uptime = UptimeCounter::new();
        let samples: [u32; 10] = [
            0,
            300_000,
            u32::MAX - 10,
            5, // wrap 1
            150_000,
            u32::MAX - 300,
            40, // wrap 2
            900_000,
            u32::MAX - 1,
            0, // wrap 3
        ];

        let mut previous = None;
        for sample in samples {
            let widened = uptime.update(sample);
            if let Some(prev) = previous {
                assert!(widened > prev, "{widened} did not advance past {prev}");
            }
            previous = Some(widened);
        }

        assert_eq!(previous.unwrap(), 3 << 32);
    }

    #[test]
    fn equal_tick_is_not_a_wrap() {
        let mut uptime = UptimeCounter::new();
        uptime.update(42);
        assert_eq!(uptime.update(42), 42);
    }
}
