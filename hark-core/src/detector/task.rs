use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use tracing::debug;

use super::state::{CycleOutcome, WakeWordDetectionState};

/// Longest uninterrupted sleep, so a stop request is seen promptly.
const SLEEP_SLICE: Duration = Duration::from_millis(20);

/// Run detection cycles every `interval` until `running` goes false.
///
/// The interval is a fixed pause after each cycle, not a deadline: a slow
/// cycle pushes the next one back instead of causing a burst. An in-flight
/// cycle always completes. `on_cycle` sees every outcome; nothing is called
/// while `state` is not ready.
pub fn run_detection_loop<F>(
    state: &mut WakeWordDetectionState,
    running: &AtomicBool,
    interval: Duration,
    mut on_cycle: F,
) where
    F: FnMut(&CycleOutcome),
{
    debug!(?interval, "detection loop started");

    while running.load(Ordering::Acquire) {
        if let Some(outcome) = state.cycle() {
            on_cycle(&outcome);
        }
        pause(running, interval);
    }

    debug!("detection loop finished");
}

fn pause(running: &AtomicBool, interval: Duration) {
    let deadline = Instant::now() + interval;
    while running.load(Ordering::Acquire) {
        let now = Instant::now();
        if now >= deadline {
            return;
        }
        thread::sleep((deadline - now).min(SLEEP_SLICE));
    }
}
