//! Headless wake-word node.
//!
//! Loads settings, picks an audio source and a model, starts the detector
//! and logs detections until Ctrl-C. A detection switches the node into an
//! active window during which further detections are ignored.

mod mode;
mod settings;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use hark_core::inference::{DenseLoader, EngineLoader, StubLoader};
use hark_core::{ChannelConfig, ChannelSource, DetectorStatus, WakeWordService, WavSource};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use mode::ActiveMode;
use settings::{default_settings_path, load_settings, NodeSettings};

/// How often diagnostics are logged while running.
const DIAGNOSTICS_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Default)]
struct Args {
    settings: Option<PathBuf>,
    wav: Option<PathBuf>,
    looping: bool,
}

fn parse_args() -> anyhow::Result<Args> {
    let mut args = Args::default();
    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--settings" => {
                let value = it.next().context("missing value for --settings")?;
                args.settings = Some(PathBuf::from(value));
            }
            "--wav" => {
                let value = it.next().context("missing value for --wav")?;
                args.wav = Some(PathBuf::from(value));
            }
            "--loop" => args.looping = true,
            "--help" | "-h" => {
                println!("Usage: hark [--settings <file.json>] [--wav <file.wav> [--loop]]");
                std::process::exit(0);
            }
            other => bail!("unknown argument: {other}"),
        }
    }
    Ok(args)
}

fn build_loader(settings: &NodeSettings, feature_len: usize) -> anyhow::Result<Arc<dyn EngineLoader>> {
    match settings.model_kind.as_str() {
        "dense" => {
            let path = settings
                .model_path
                .clone()
                .context("model kind 'dense' needs a model path (HARK_MODEL_PATH)")?;
            Ok(Arc::new(DenseLoader::new(path)))
        }
        #[cfg(feature = "onnx")]
        "onnx" => {
            let path = settings
                .model_path
                .clone()
                .context("model kind 'onnx' needs a model path (HARK_MODEL_PATH)")?;
            Ok(Arc::new(hark_core::inference::OnnxLoader::new(path, feature_len)))
        }
        #[cfg(not(feature = "onnx"))]
        "onnx" => bail!("model kind 'onnx' requires building with the 'onnx' feature"),
        _ => {
            warn!("no classifier configured, using stub model (score {})", settings.stub_score);
            Ok(Arc::new(StubLoader::new(feature_len, settings.stub_score)))
        }
    }
}

fn build_source(settings: &NodeSettings) -> anyhow::Result<(Box<dyn ChannelSource>, ChannelConfig)> {
    if let Some(path) = settings.wav_path.as_ref() {
        let channel = settings
            .channel
            .clone()
            .unwrap_or_else(|| ChannelConfig::unity_gain(16));
        let source = WavSource::new(path).looping(settings.wav_loop);
        return Ok((Box::new(source), channel));
    }

    #[cfg(feature = "audio-cpal")]
    {
        let channel = settings.channel.clone().unwrap_or_default();
        let source = hark_core::CpalSource::new(settings.input_device.clone());
        Ok((Box::new(source), channel))
    }
    #[cfg(not(feature = "audio-cpal"))]
    {
        bail!("no --wav given and microphone capture is not compiled in (feature 'audio-cpal')")
    }
}

/// Start detection on the blocking pool; opening a device and loading a
/// model must not stall the event loop.
async fn start_detector(
    service: &Arc<WakeWordService>,
    source: Box<dyn ChannelSource>,
    channel: ChannelConfig,
) -> anyhow::Result<()> {
    let service = Arc::clone(service);
    tokio::task::spawn_blocking(move || service.start(source, channel))
        .await
        .context("detector start task failed")?
        .context("failed to start wake-word detection")
}

/// Stop detection on the blocking pool; joins the detection thread.
async fn stop_detector(service: &Arc<WakeWordService>) -> anyhow::Result<()> {
    let service = Arc::clone(service);
    tokio::task::spawn_blocking(move || service.stop())
        .await
        .context("detector stop task failed")?
        .context("failed to stop detector")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── Tracing ───────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| {
                    tracing_subscriber::EnvFilter::new("hark_core=info,hark_node=info")
                }),
        )
        .init();

    let args = parse_args()?;
    let settings_path = args.settings.clone().unwrap_or_else(default_settings_path);
    let mut settings = load_settings(&settings_path);
    settings.apply_env_overrides();
    if let Some(wav) = args.wav {
        settings.wav_path = Some(wav);
        settings.wav_loop = args.looping;
    }
    info!(
        settings_path = ?settings_path,
        model_kind = %settings.model_kind,
        threshold = settings.threshold,
        required_consecutive = settings.required_consecutive,
        "settings loaded"
    );

    // ── Detector ──────────────────────────────────────────────────────────
    let config = settings.detector_config();
    let loader = build_loader(&settings, config.spectrogram.feature_len())?;
    info!(model = %loader.describe(), "classifier selected");
    let (source, channel) = build_source(&settings)?;
    info!(source = %source.describe(), "audio source selected");

    let service = Arc::new(WakeWordService::new(config, loader).context("invalid detector config")?);
    let mut wake_rx = service.subscribe_wake();
    let mut status_rx = service.subscribe_status();
    start_detector(&service, source, channel).await?;

    let mut mode = ActiveMode::new(Duration::from_millis(settings.active_window_ms));
    let mut ticker = tokio::time::interval(Duration::from_millis(250));
    let mut last_report = Instant::now();

    // ── Event loop ────────────────────────────────────────────────────────
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown requested");
                break;
            }
            event = wake_rx.recv() => match event {
                Ok(event) => {
                    let now = Instant::now();
                    if mode.on_detection(now) {
                        info!(
                            seq = event.seq,
                            score = event.score,
                            average_latency_ms = event.average_latency_ms,
                            "wake word: entering active mode"
                        );
                    } else {
                        info!(
                            seq = event.seq,
                            remaining_ms = mode.remaining(now).as_millis() as u64,
                            "wake word ignored: already active"
                        );
                    }
                }
                Err(RecvError::Lagged(missed)) => warn!(missed, "wake events dropped"),
                Err(RecvError::Closed) => break,
            },
            status = status_rx.recv() => match status {
                Ok(event) => {
                    info!(status = ?event.status, detail = ?event.detail, "detector status");
                    if matches!(event.status, DetectorStatus::Stopped | DetectorStatus::Error) {
                        break;
                    }
                }
                Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            },
            _ = ticker.tick() => {
                let now = Instant::now();
                if mode.expire(now) {
                    info!("active window elapsed: back to idle");
                }
                if last_report.elapsed() >= DIAGNOSTICS_INTERVAL {
                    last_report = now;
                    let detection = service.diagnostics();
                    let provider = service.provider_diagnostics();
                    info!(
                        mode = ?mode.mode(now),
                        cycles = detection.cycles,
                        detections = detection.detections,
                        inference_errors = detection.inference_errors,
                        samples_lost = detection.samples_lost,
                        samples_written = provider.map(|p| p.samples_written).unwrap_or_default(),
                        "diagnostics"
                    );
                }
            }
        }
    }

    if service.is_running() {
        stop_detector(&service).await?;
    }
    info!(
        activations = mode.activations(),
        ignored = mode.ignored(),
        mode = ?mode.mode(Instant::now()),
        "hark node stopped"
    );
    Ok(())
}
