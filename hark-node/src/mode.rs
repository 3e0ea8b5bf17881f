//! Idle/active mode switched by wake-word detections.

use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Idle,
    Active,
}

/// Holds the node active for `window` after a detection. Detections that
/// arrive while active are ignored and do not extend the window.
#[derive(Debug, Clone)]
pub struct ActiveMode {
    window: Duration,
    active_until: Option<Instant>,
    activations: u64,
    ignored: u64,
}

impl ActiveMode {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            active_until: None,
            activations: 0,
            ignored: 0,
        }
    }

    /// Returns `true` if this detection switched the node to active.
    pub fn on_detection(&mut self, now: Instant) -> bool {
        if self.mode(now) == Mode::Active {
            self.ignored += 1;
            return false;
        }
        self.active_until = Some(now + self.window);
        self.activations += 1;
        true
    }

    pub fn mode(&self, now: Instant) -> Mode {
        match self.active_until {
            Some(until) if now < until => Mode::Active,
            _ => Mode::Idle,
        }
    }

    /// Returns `true` once when an active window has run out.
    pub fn expire(&mut self, now: Instant) -> bool {
        match self.active_until {
            Some(until) if now >= until => {
                self.active_until = None;
                true
            }
            _ => false,
        }
    }

    pub fn remaining(&self, now: Instant) -> Duration {
        self.active_until
            .map(|until| until.saturating_duration_since(now))
            .unwrap_or_default()
    }

    pub fn activations(&self) -> u64 {
        self.activations
    }

    pub fn ignored(&self) -> u64 {
        self.ignored
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detection_activates_for_window() {
        let t0 = Instant::now();
        let mut mode = ActiveMode::new(Duration::from_secs(5));
        assert_eq!(mode.mode(t0), Mode::Idle);

        assert!(mode.on_detection(t0));
        assert_eq!(mode.mode(t0 + Duration::from_secs(4)), Mode::Active);
        assert_eq!(mode.remaining(t0 + Duration::from_secs(4)), Duration::from_secs(1));
        assert_eq!(mode.mode(t0 + Duration::from_secs(5)), Mode::Idle);
    }

    #[test]
    fn detections_while_active_are_ignored() {
        let t0 = Instant::now();
        let mut mode = ActiveMode::new(Duration::from_secs(5));
        assert!(mode.on_detection(t0));
        assert!(!mode.on_detection(t0 + Duration::from_secs(3)));

        // The ignored detection did not extend the window.
        assert_eq!(mode.mode(t0 + Duration::from_secs(6)), Mode::Idle);
        assert!(mode.on_detection(t0 + Duration::from_secs(6)));
        assert_eq!(mode.activations(), 2);
        assert_eq!(mode.ignored(), 1);
    }

    #[test]
    fn expire_fires_once() {
        let t0 = Instant::now();
        let mut mode = ActiveMode::new(Duration::from_millis(100));
        assert!(!mode.expire(t0));
        mode.on_detection(t0);
        assert!(!mode.expire(t0 + Duration::from_millis(50)));
        assert!(mode.expire(t0 + Duration::from_millis(100)));
        assert!(!mode.expire(t0 + Duration::from_millis(200)));
    }

    #[test]
    fn zero_window_never_stays_active() {
        let t0 = Instant::now();
        let mut mode = ActiveMode::new(Duration::ZERO);
        assert!(mode.on_detection(t0));
        assert!(mode.on_detection(t0));
        assert_eq!(mode.mode(t0), Mode::Idle);
        assert_eq!(mode.ignored(), 0);
    }
}
