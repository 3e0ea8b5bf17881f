use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use hark_core::audio::{ChannelConfig, SampleProvider, WavSource};
use hark_core::buffering::{create_sample_ring, Sample, DEFAULT_RING_CAPACITY, SAMPLE_RATE};
use hark_core::detector::{DetectorConfig, WakeWordDetectionState, WakeWordService};
use hark_core::inference::dense::{Activation, DenseLayer};
use hark_core::inference::{DenseLoader, DenseModel, MODEL_SCHEMA_VERSION};
use hark_core::ipc::events::DetectorStatus;
use hark_core::spectrogram::SpectrogramConfig;
use tempfile::TempDir;

/// Pooled band holding 1 kHz at the default geometry.
const TONE_BAND: usize = 5;

fn tone(len: usize, freq_hz: f32, amplitude: f32) -> Vec<Sample> {
    (0..len)
        .map(|i| {
            let t = i as f32 / SAMPLE_RATE as f32;
            (amplitude * (2.0 * std::f32::consts::PI * freq_hz * t).sin()) as Sample
        })
        .collect()
}

fn write_wav(path: &Path, samples: &[Sample]) {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).expect("create wav");
    for &s in samples {
        writer.write_sample(s).expect("write sample");
    }
    writer.finalize().expect("finalize wav");
}

/// One sigmoid unit that listens to the 1 kHz band in every frame.
fn write_tone_model(dir: &Path) -> PathBuf {
    let config = SpectrogramConfig::default();
    let bands = config.pooled_bins();
    let mut weights = vec![0.0f32; config.feature_len()];
    for frame in 0..config.frame_count() {
        weights[frame * bands + TONE_BAND] = 0.05;
    }
    let model = DenseModel {
        schema_version: MODEL_SCHEMA_VERSION,
        input_len: config.feature_len(),
        layers: vec![DenseLayer {
            weights: vec![weights],
            bias: vec![-1.0],
            activation: Activation::Sigmoid,
        }],
    };
    let path = dir.join("tone.json");
    std::fs::write(&path, serde_json::to_string(&model).expect("serialize")).expect("write model");
    path
}

/// Push a whole WAV file through the sampler into a fresh ring.
fn replay_into_ring(path: &Path) -> hark_core::SampleRing {
    let (writer, ring) = create_sample_ring(DEFAULT_RING_CAPACITY);
    let source = WavSource::new(path).paced(false);
    let handle = SampleProvider::new(writer)
        .start(Box::new(source), ChannelConfig::unity_gain(16), None)
        .expect("start sampler");

    let deadline = Instant::now() + Duration::from_secs(5);
    while handle.is_running() {
        assert!(Instant::now() < deadline, "sampler never reached end of file");
        thread::sleep(Duration::from_millis(2));
    }
    ring
}

#[test]
fn tone_after_silence_is_confirmed_on_second_cycle() {
    let dir = TempDir::new().expect("tempdir");
    let mut audio = vec![0 as Sample; SAMPLE_RATE as usize];
    audio.extend(tone(SAMPLE_RATE as usize, 1_000.0, 8_000.0));
    let wav = dir.path().join("wake.wav");
    write_wav(&wav, &audio);

    let ring = replay_into_ring(&wav);
    assert_eq!(ring.written(), audio.len() as u64);

    let loader = DenseLoader::new(write_tone_model(dir.path()));
    let mut state =
        WakeWordDetectionState::new(ring, Box::new(loader), DetectorConfig::default()).expect("state");
    state.enter_state().expect("enter");

    let first = state.cycle().expect("ready");
    assert!(first.score.expect("score") >= 0.95, "tone scored {:?}", first.score);
    assert!(!first.detected);
    assert_eq!(first.extract.padded, 0);
    assert_eq!(state.consecutive_highs(), 1);

    assert!(state.run(), "second high cycle confirms");
    assert_eq!(state.consecutive_highs(), 0);
    assert_eq!(state.diagnostics().snapshot().detections, 1);
    assert!(state.average_latency_ms() > 0.0);

    state.exit_state();
    assert!(!state.run());
}

#[test]
fn silence_never_triggers() {
    let dir = TempDir::new().expect("tempdir");
    let wav = dir.path().join("quiet.wav");
    write_wav(&wav, &vec![0 as Sample; SAMPLE_RATE as usize]);

    let ring = replay_into_ring(&wav);
    let loader = DenseLoader::new(write_tone_model(dir.path()));
    let mut state =
        WakeWordDetectionState::new(ring, Box::new(loader), DetectorConfig::default()).expect("state");
    state.enter_state().expect("enter");

    for _ in 0..5 {
        let outcome = state.cycle().expect("ready");
        assert!(outcome.score.expect("score") < 0.01);
        assert!(!outcome.detected);
    }
    assert_eq!(state.diagnostics().snapshot().cycles, 5);
    assert_eq!(state.diagnostics().snapshot().detections, 0);
}

#[test]
fn short_recording_is_padded_and_still_scored() {
    let dir = TempDir::new().expect("tempdir");
    let wav = dir.path().join("short.wav");
    write_wav(&wav, &tone(4_000, 1_000.0, 8_000.0));

    let ring = replay_into_ring(&wav);
    let loader = DenseLoader::new(write_tone_model(dir.path()));
    let mut state =
        WakeWordDetectionState::new(ring, Box::new(loader), DetectorConfig::default()).expect("state");
    state.enter_state().expect("enter");

    let outcome = state.cycle().expect("ready");
    assert_eq!(outcome.extract.copied, 4_000);
    assert_eq!(outcome.extract.padded, SAMPLE_RATE as usize - 4_000);
    // A quarter second of tone is not enough to fill the window.
    assert!(outcome.score.expect("score") < 0.95);
}

#[test]
fn service_reports_wake_word_from_live_stream() {
    let dir = TempDir::new().expect("tempdir");
    let wav = dir.path().join("loop.wav");
    write_wav(&wav, &tone(SAMPLE_RATE as usize, 1_000.0, 8_000.0));

    let config = DetectorConfig {
        run_interval_ms: 25,
        ..Default::default()
    };
    let loader = Arc::new(DenseLoader::new(write_tone_model(dir.path())));
    let service = WakeWordService::new(config, loader).expect("service");
    let mut wake_rx = service.subscribe_wake();

    service
        .start(
            Box::new(WavSource::new(&wav).looping(true)),
            ChannelConfig::unity_gain(16),
        )
        .expect("start");
    assert_eq!(service.status(), DetectorStatus::Listening);

    let deadline = Instant::now() + Duration::from_secs(10);
    let event = loop {
        match wake_rx.try_recv() {
            Ok(event) => break event,
            Err(_) => {
                assert!(Instant::now() < deadline, "no wake event within 10 s");
                thread::sleep(Duration::from_millis(10));
            }
        }
    };

    service.stop().expect("stop");
    assert!(event.score >= 0.95);
    assert!(event.average_latency_ms > 0.0);
    assert_eq!(service.status(), DetectorStatus::Stopped);
    assert!(service.diagnostics().detections >= 1);
}
