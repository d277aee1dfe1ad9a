//! Frame timing.

/// Nominal frame duration the simulation constants are tuned for.
pub const REFERENCE_FRAME: f64 = 1.0 / 60.0;

#[derive(Clone, Debug, Default)]
pub struct Ticker {
    previous: Option<f64>,
    delta_time: f64,
    time_scale: f64,
    frame: u64,
}

impl Ticker {
    pub fn new() -> Self {
        Self {
            time_scale: 1.0,
            ..Default::default()
        }
    }

    /// Record a timestamp in seconds. The first call only primes the ticker.
    pub fn tick(&mut self, now: f64) {
        if let Some(previous) = self.previous {
            self.delta_time = (now - previous).max(0.0);
            self.time_scale = self.delta_time / REFERENCE_FRAME;
        }
        self.previous = Some(now);
        self.frame += 1;
    }

    /// Advance by a known step, for fixed-rate rendering.
    pub fn advance(&mut self, dt: f64) {
        let now = self.previous.unwrap_or(0.0) + dt;
        if self.previous.is_none() {
            self.previous = Some(0.0);
        }
        self.tick(now);
    }

    /// Seconds between the last two ticks.
    pub fn delta_time(&self) -> f64 {
        self.delta_time
    }

    /// `delta_time` relative to a 60 Hz frame.
    pub fn time_scale(&self) -> f64 {
        self.time_scale
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_tick_primes() {
        let mut ticker = Ticker::new();
        ticker.tick(10.0);
        assert_eq!(ticker.delta_time(), 0.0);
        assert_eq!(ticker.time_scale(), 1.0);
        assert_eq!(ticker.frame(), 1);
    }

    #[test]
    fn test_time_scale_relative_to_60hz() {
        let mut ticker = Ticker::new();
        ticker.tick(1.0);
        ticker.tick(1.0 + 1.0 / 30.0);
        assert!((ticker.time_scale() - 2.0).abs() < 1e-9);
        ticker.tick(1.0 + 1.0 / 30.0 + 1.0 / 60.0);
        assert!((ticker.time_scale() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_advance_fixed_step() {
        let mut ticker = Ticker::new();
        ticker.advance(REFERENCE_FRAME);
        assert!((ticker.delta_time() - REFERENCE_FRAME).abs() < 1e-12);
        assert!((ticker.time_scale() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_clock_going_backwards_clamps() {
        let mut ticker = Ticker::new();
        ticker.tick(5.0);
        ticker.tick(4.0);
        assert_eq!(ticker.delta_time(), 0.0);
    }
}
