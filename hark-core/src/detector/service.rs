//! `WakeWordService`: owns the ring, the sampler and the detection task.
//!
//! ## Lifecycle
//!
//! ```text
//! WakeWordService::new()
//!     └─► start(source, channel)  → status = Loading
//!             ring allocated, sampler started, enter_state()
//!             detection thread spawned           → status = Listening
//!         └─► stop()                → loop exits, exit_state(), sampler joined
//!                                                → status = Stopped
//! ```
//!
//! Start-up failures (device, model, shape) are returned from `start()` and
//! leave the service in `Error`, ready to be started again. If the channel
//! closes on its own (a WAV file ran out) the detection thread winds down
//! and the status becomes `Stopped`.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{info, warn};

use super::state::WakeWordDetectionState;
use super::task::run_detection_loop;
use super::{DetectionDiagnostics, DetectionSnapshot, DetectorConfig};
use crate::audio::{
    ChannelConfig, ChannelSource, ProviderDiagnostics, ProviderSnapshot, SampleProvider,
};
use crate::buffering::{create_sample_ring, SAMPLE_RATE};
use crate::error::{HarkError, Result};
use crate::inference::EngineLoader;
use crate::ipc::events::{DetectorStatus, DetectorStatusEvent, WakeEvent};

/// Events buffered per subscriber before the slowest starts lagging.
const BROADCAST_CAP: usize = 64;

/// `Send + Sync`; share it behind an `Arc` if several tasks need it.
pub struct WakeWordService {
    config: DetectorConfig,
    loader: Arc<dyn EngineLoader>,
    running: Arc<AtomicBool>,
    status: Arc<Mutex<DetectorStatus>>,
    wake_tx: broadcast::Sender<WakeEvent>,
    status_tx: broadcast::Sender<DetectorStatusEvent>,
    seq: Arc<AtomicU64>,
    diagnostics: Arc<DetectionDiagnostics>,
    provider_diagnostics: Mutex<Option<Arc<ProviderDiagnostics>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
    /// Serializes the body of `start` against `stop`.
    lifecycle: Mutex<()>,
}

impl WakeWordService {
    /// # Errors
    /// Invalid `config`.
    pub fn new(config: DetectorConfig, loader: Arc<dyn EngineLoader>) -> Result<Self> {
        config.validate()?;
        let (wake_tx, _) = broadcast::channel(BROADCAST_CAP);
        let (status_tx, _) = broadcast::channel(BROADCAST_CAP);

        Ok(Self {
            config,
            loader,
            running: Arc::new(AtomicBool::new(false)),
            status: Arc::new(Mutex::new(DetectorStatus::Idle)),
            wake_tx,
            status_tx,
            seq: Arc::new(AtomicU64::new(0)),
            diagnostics: Arc::new(DetectionDiagnostics::default()),
            provider_diagnostics: Mutex::new(None),
            thread: Mutex::new(None),
            lifecycle: Mutex::new(()),
        })
    }

    /// Open `source`, load the model and begin periodic detection.
    ///
    /// Blocks until the channel is open and the detector is ready. The
    /// running flag is claimed before anything is opened, so of two
    /// concurrent calls exactly one proceeds; the other sees
    /// [`HarkError::AlreadyRunning`].
    ///
    /// # Errors
    /// - [`HarkError::AlreadyRunning`] if already started or starting.
    /// - [`HarkError::InvalidChannelConfig`] if the channel does not run at
    ///   [`SAMPLE_RATE`].
    /// - Channel open failures from the sampler.
    /// - Model load, arena or input-shape failures from `enter_state`.
    pub fn start(&self, source: Box<dyn ChannelSource>, channel: ChannelConfig) -> Result<()> {
        if channel.sample_rate != SAMPLE_RATE {
            return Err(HarkError::InvalidChannelConfig(format!(
                "detector needs {SAMPLE_RATE} Hz audio, channel runs at {} Hz",
                channel.sample_rate
            )));
        }
        let _lifecycle = self.lifecycle.lock();
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(HarkError::AlreadyRunning);
        }

        match self.launch(source, channel) {
            Ok(()) => {
                info!(engine = self.loader.describe().as_str(), "wake word service listening");
                Ok(())
            }
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                self.set_status(DetectorStatus::Error, Some(e.to_string()));
                Err(e)
            }
        }
    }

    /// Everything `start` does once the running flag is claimed. Any error
    /// leaves no sampler or thread behind.
    fn launch(&self, source: Box<dyn ChannelSource>, channel: ChannelConfig) -> Result<()> {
        self.join_finished_thread();

        self.set_status(DetectorStatus::Loading, None);
        self.diagnostics.reset();

        let (writer, ring) = create_sample_ring(self.config.ring_capacity);

        let provider = SampleProvider::new(writer).start(source, channel, None)?;
        *self.provider_diagnostics.lock() = Some(provider.shared_diagnostics());

        let mut state = WakeWordDetectionState::new(
            ring,
            Box::new(Arc::clone(&self.loader)),
            self.config.clone(),
        )?
        .with_diagnostics(Arc::clone(&self.diagnostics));

        // provider drops on error, stopping the sampler
        state.enter_state()?;

        self.set_status(DetectorStatus::Listening, None);

        let running = Arc::clone(&self.running);
        let status = Arc::clone(&self.status);
        let status_tx = self.status_tx.clone();
        let wake_tx = self.wake_tx.clone();
        let seq = Arc::clone(&self.seq);
        let interval = self.config.run_interval();

        let handle = thread::Builder::new()
            .name("hark-detect".into())
            .spawn(move || {
                let mut provider = provider;
                let mut channel_closed = false;

                run_detection_loop(&mut state, &running, interval, |outcome| {
                    if outcome.detected {
                        let _ = wake_tx.send(WakeEvent {
                            seq: seq.fetch_add(1, Ordering::Relaxed),
                            score: outcome.score.unwrap_or_default(),
                            average_latency_ms: outcome.average_latency_ms,
                        });
                    }
                    if !provider.is_running() {
                        channel_closed = true;
                        running.store(false, Ordering::SeqCst);
                    }
                });

                state.exit_state();
                provider.stop();

                if channel_closed {
                    info!("audio channel closed; detection stopped");
                    publish_status(
                        &status,
                        &status_tx,
                        DetectorStatus::Stopped,
                        Some("audio channel closed".into()),
                    );
                }
            })?;

        *self.thread.lock() = Some(handle);
        Ok(())
    }

    /// Stop detection and sampling, waiting for the in-flight cycle.
    ///
    /// # Errors
    /// [`HarkError::NotRunning`] if not started (or already wound down).
    pub fn stop(&self) -> Result<()> {
        // waits out a start that is still loading
        let _lifecycle = self.lifecycle.lock();
        if !self.running.swap(false, Ordering::SeqCst) {
            self.join_finished_thread();
            return Err(HarkError::NotRunning);
        }

        self.join_finished_thread();
        self.set_status(DetectorStatus::Stopped, None);
        info!("wake word service stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> DetectorStatus {
        *self.status.lock()
    }

    pub fn subscribe_wake(&self) -> broadcast::Receiver<WakeEvent> {
        self.wake_tx.subscribe()
    }

    pub fn subscribe_status(&self) -> broadcast::Receiver<DetectorStatusEvent> {
        self.status_tx.subscribe()
    }

    pub fn diagnostics(&self) -> DetectionSnapshot {
        self.diagnostics.snapshot()
    }

    /// Sampler counters for the current or most recent run.
    pub fn provider_diagnostics(&self) -> Option<ProviderSnapshot> {
        self.provider_diagnostics.lock().as_ref().map(|d| d.snapshot())
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    fn join_finished_thread(&self) {
        if let Some(handle) = self.thread.lock().take() {
            if handle.join().is_err() {
                warn!("detection thread panicked");
            }
        }
    }

    fn set_status(&self, new_status: DetectorStatus, detail: Option<String>) {
        publish_status(&self.status, &self.status_tx, new_status, detail);
    }
}

impl Drop for WakeWordService {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.join_finished_thread();
    }
}

fn publish_status(
    status: &Mutex<DetectorStatus>,
    tx: &broadcast::Sender<DetectorStatusEvent>,
    new_status: DetectorStatus,
    detail: Option<String>,
) {
    *status.lock() = new_status;
    let _ = tx.send(DetectorStatusEvent {
        status: new_status,
        detail,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::AudioChannel;
    use crate::inference::StubLoader;
    use crate::spectrogram::SpectrogramConfig;
    use std::time::{Duration, Instant};

    /// Endless low-level noise, paced like a real device.
    struct NoiseSource;

    struct NoiseChannel {
        phase: i32,
    }

    impl ChannelSource for NoiseSource {
        fn describe(&self) -> String {
            "noise".into()
        }

        fn open(self: Box<Self>, _config: &ChannelConfig) -> Result<Box<dyn AudioChannel>> {
            Ok(Box::new(NoiseChannel { phase: 0 }))
        }
    }

    impl AudioChannel for NoiseChannel {
        fn read(&mut self, words: &mut [i32]) -> Result<usize> {
            for w in words.iter_mut() {
                self.phase = (self.phase + 37) % 1_000;
                *w = (self.phase - 500) << 16;
            }
            thread::sleep(Duration::from_millis(1));
            Ok(words.len())
        }
    }

    /// Closes after a fixed number of blocks.
    struct ShortSource {
        blocks: usize,
    }

    struct ShortChannel {
        remaining: usize,
    }

    impl ChannelSource for ShortSource {
        fn describe(&self) -> String {
            "short".into()
        }

        fn open(self: Box<Self>, _config: &ChannelConfig) -> Result<Box<dyn AudioChannel>> {
            Ok(Box::new(ShortChannel {
                remaining: self.blocks,
            }))
        }
    }

    impl AudioChannel for ShortChannel {
        fn read(&mut self, words: &mut [i32]) -> Result<usize> {
            if self.remaining == 0 {
                return Err(HarkError::ChannelClosed);
            }
            self.remaining -= 1;
            words.fill(1 << 16);
            Ok(words.len())
        }
    }

    /// Takes a while to open, like a USB microphone waking up.
    struct SlowSource {
        open_delay: Duration,
    }

    impl ChannelSource for SlowSource {
        fn describe(&self) -> String {
            "slow".into()
        }

        fn open(self: Box<Self>, _config: &ChannelConfig) -> Result<Box<dyn AudioChannel>> {
            thread::sleep(self.open_delay);
            Ok(Box::new(NoiseChannel { phase: 0 }))
        }
    }

    fn test_config() -> DetectorConfig {
        DetectorConfig {
            spectrogram: SpectrogramConfig {
                audio_length: 1_600,
                ..Default::default()
            },
            ring_capacity: 4_096,
            run_interval_ms: 5,
            ..Default::default()
        }
    }

    fn wait_for<F: Fn() -> bool>(what: &str, condition: F) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(Instant::now() < deadline, "timed out waiting for {what}");
            thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn confident_model_emits_wake_events() {
        let config = test_config();
        let loader = Arc::new(StubLoader::new(config.spectrogram.feature_len(), 0.99));
        let service = WakeWordService::new(config, loader).expect("service");
        let mut wake_rx = service.subscribe_wake();

        service
            .start(Box::new(NoiseSource), ChannelConfig::unity_gain(32))
            .expect("start");
        assert_eq!(service.status(), DetectorStatus::Listening);
        assert!(matches!(
            service.start(Box::new(NoiseSource), ChannelConfig::unity_gain(32)),
            Err(HarkError::AlreadyRunning)
        ));

        wait_for("two detections", || service.diagnostics().detections >= 2);
        service.stop().expect("stop");
        assert_eq!(service.status(), DetectorStatus::Stopped);
        assert!(matches!(service.stop(), Err(HarkError::NotRunning)));

        let first = wake_rx.try_recv().expect("first wake event");
        let second = wake_rx.try_recv().expect("second wake event");
        assert_eq!(first.seq + 1, second.seq);
        assert!((first.score - 0.99).abs() < 1e-6);

        let provider = service.provider_diagnostics().expect("provider ran");
        assert!(provider.samples_written > 0);
    }

    #[test]
    fn quiet_model_never_fires() {
        let config = test_config();
        let loader = Arc::new(StubLoader::new(config.spectrogram.feature_len(), 0.2));
        let service = WakeWordService::new(config, loader).expect("service");

        service
            .start(Box::new(NoiseSource), ChannelConfig::unity_gain(32))
            .expect("start");
        wait_for("a few cycles", || service.diagnostics().cycles >= 5);
        service.stop().expect("stop");

        assert_eq!(service.diagnostics().detections, 0);
    }

    #[test]
    fn model_shape_mismatch_fails_start_and_allows_retry() {
        let config = test_config();
        let service =
            WakeWordService::new(config.clone(), Arc::new(StubLoader::new(3, 0.5))).expect("service");
        let mut status_rx = service.subscribe_status();

        let result = service.start(Box::new(NoiseSource), ChannelConfig::unity_gain(32));
        assert!(matches!(result, Err(HarkError::InputShapeMismatch { .. })));
        assert_eq!(service.status(), DetectorStatus::Error);
        assert!(!service.is_running());

        let loading = status_rx.try_recv().expect("loading event");
        assert_eq!(loading.status, DetectorStatus::Loading);
        let failed = status_rx.try_recv().expect("error event");
        assert_eq!(failed.status, DetectorStatus::Error);
        assert!(failed.detail.is_some());
    }

    #[test]
    fn closed_channel_winds_down_to_stopped() {
        let config = test_config();
        let loader = Arc::new(StubLoader::new(config.spectrogram.feature_len(), 0.1));
        let service = WakeWordService::new(config, loader).expect("service");

        service
            .start(Box::new(ShortSource { blocks: 8 }), ChannelConfig::unity_gain(32))
            .expect("start");
        wait_for("service to wind down", || !service.is_running());
        wait_for("stopped status", || service.status() == DetectorStatus::Stopped);
        assert!(matches!(service.stop(), Err(HarkError::NotRunning)));
    }

    #[test]
    fn concurrent_starts_admit_exactly_one() {
        let config = test_config();
        let loader = Arc::new(StubLoader::new(config.spectrogram.feature_len(), 0.1));
        let service = Arc::new(WakeWordService::new(config, loader).expect("service"));

        let starters: Vec<_> = (0..2)
            .map(|_| {
                let service = Arc::clone(&service);
                thread::spawn(move || {
                    service.start(
                        Box::new(SlowSource {
                            open_delay: Duration::from_millis(200),
                        }),
                        ChannelConfig::unity_gain(32),
                    )
                })
            })
            .collect();
        let results: Vec<_> = starters
            .into_iter()
            .map(|h| h.join().expect("starter thread"))
            .collect();

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert_eq!(
            results
                .iter()
                .filter(|r| matches!(r, Err(HarkError::AlreadyRunning)))
                .count(),
            1
        );
        assert_eq!(service.status(), DetectorStatus::Listening);

        service.stop().expect("stop");
        assert!(!service.is_running());
        assert!(matches!(service.stop(), Err(HarkError::NotRunning)));

        // the losing start left nothing behind, so a fresh start works
        service
            .start(Box::new(NoiseSource), ChannelConfig::unity_gain(32))
            .expect("restart");
        service.stop().expect("stop again");
    }

    #[test]
    fn stop_waits_for_a_loading_start() {
        let config = test_config();
        let loader = Arc::new(StubLoader::new(config.spectrogram.feature_len(), 0.1));
        let service = Arc::new(WakeWordService::new(config, loader).expect("service"));

        let starter = {
            let service = Arc::clone(&service);
            thread::spawn(move || {
                service.start(
                    Box::new(SlowSource {
                        open_delay: Duration::from_millis(200),
                    }),
                    ChannelConfig::unity_gain(32),
                )
            })
        };
        wait_for("loading", || service.status() == DetectorStatus::Loading);

        service.stop().expect("stop after start finished loading");
        starter.join().expect("starter thread").expect("start");
        assert!(!service.is_running());
        assert_eq!(service.status(), DetectorStatus::Stopped);
    }

    #[test]
    fn channel_at_wrong_sample_rate_is_rejected() {
        let config = test_config();
        let loader = Arc::new(StubLoader::new(config.spectrogram.feature_len(), 0.99));
        let service = WakeWordService::new(config, loader).expect("service");

        let channel = ChannelConfig {
            sample_rate: 48_000,
            ..ChannelConfig::unity_gain(32)
        };
        assert!(channel.validate().is_ok());

        let result = service.start(Box::new(NoiseSource), channel);
        assert!(matches!(result, Err(HarkError::InvalidChannelConfig(_))));
        assert!(!service.is_running());
        assert_eq!(service.status(), DetectorStatus::Idle);
        assert!(service.provider_diagnostics().is_none());
        assert!(matches!(service.stop(), Err(HarkError::NotRunning)));
    }
}
