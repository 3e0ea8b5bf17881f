fn main() {
    if let Err(e) = run() {
        eprintln!("extract_bench failed: {e}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    use hark_core::buffering::{Sample, SAMPLE_RATE};
    use hark_core::inference::{ArenaBudget, DenseLoader, EngineLoader, InferenceEngine, StubLoader};
    use hark_core::spectrogram::{SpectrogramConfig, SpectrogramExtractor};
    use serde::Serialize;
    use std::path::{Path, PathBuf};
    use std::time::Instant;

    #[derive(Debug)]
    struct Args {
        fixtures_dir: PathBuf,
        model: Option<PathBuf>,
        onnx: bool,
        hop_ms: u64,
        threshold: f32,
        output: Option<PathBuf>,
    }

    #[derive(Debug, Clone, Serialize)]
    struct FileResult {
        file: String,
        windows: usize,
        max_score: f32,
        windows_over_threshold: usize,
        avg_extract_ms: f64,
        avg_invoke_ms: f64,
    }

    #[derive(Debug, Clone, Serialize)]
    struct Summary {
        fixtures_dir: String,
        engine: String,
        feature_len: usize,
        hop_ms: u64,
        threshold: f32,
        total_files: usize,
        total_windows: usize,
        p50_extract_ms: f64,
        p95_extract_ms: f64,
        p50_invoke_ms: f64,
        p95_invoke_ms: f64,
        p95_cycle_ms: f64,
        files: Vec<FileResult>,
    }

    fn parse_args() -> Result<Args, String> {
        let mut fixtures_dir: Option<PathBuf> = None;
        let mut model: Option<PathBuf> = None;
        let mut onnx = false;
        let mut hop_ms: u64 = 200;
        let mut threshold: f32 = 0.95;
        let mut output: Option<PathBuf> = None;

        let mut it = std::env::args().skip(1);
        while let Some(arg) = it.next() {
            match arg.as_str() {
                "--fixtures" => {
                    let Some(v) = it.next() else {
                        return Err("missing value for --fixtures".into());
                    };
                    fixtures_dir = Some(PathBuf::from(v));
                }
                "--model" => {
                    let Some(v) = it.next() else {
                        return Err("missing value for --model".into());
                    };
                    model = Some(PathBuf::from(v));
                }
                "--onnx" => onnx = true,
                "--hop-ms" => {
                    let Some(v) = it.next() else {
                        return Err("missing value for --hop-ms".into());
                    };
                    hop_ms = v
                        .parse::<u64>()
                        .map_err(|_| "invalid value for --hop-ms".to_string())?
                        .clamp(10, 1_000);
                }
                "--threshold" => {
                    let Some(v) = it.next() else {
                        return Err("missing value for --threshold".into());
                    };
                    threshold = v
                        .parse::<f32>()
                        .map_err(|_| "invalid value for --threshold".to_string())?
                        .clamp(0.0, 1.0);
                }
                "--output" => {
                    let Some(v) = it.next() else {
                        return Err("missing value for --output".into());
                    };
                    output = Some(PathBuf::from(v));
                }
                "--help" | "-h" => {
                    println!(
                        "Usage: cargo run -p hark-core --bin extract_bench -- \\
  --fixtures <dir> [--model <model.json|model.onnx>] [--onnx] \\
  [--hop-ms <ms>] [--threshold <0..1>] [--output <file.json>]"
                    );
                    std::process::exit(0);
                }
                other => {
                    return Err(format!("unknown argument: {other}"));
                }
            }
        }

        let fixtures_dir = fixtures_dir.unwrap_or_else(|| PathBuf::from("benchmarks/fixtures"));
        Ok(Args {
            fixtures_dir,
            model,
            onnx,
            hop_ms,
            threshold,
            output,
        })
    }

    fn collect_wavs(dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), String> {
        let entries = std::fs::read_dir(dir).map_err(|e| e.to_string())?;
        for entry in entries {
            let path = entry.map_err(|e| e.to_string())?.path();
            if path.is_dir() {
                collect_wavs(&path, out)?;
                continue;
            }
            let is_wav = path
                .extension()
                .and_then(|s| s.to_str())
                .is_some_and(|s| s.eq_ignore_ascii_case("wav"));
            if is_wav {
                out.push(path);
            }
        }
        Ok(())
    }

    /// Mono 16-bit samples at the detector rate.
    fn read_wav_mono_i16(path: &Path) -> Result<Vec<Sample>, String> {
        let mut reader = hound::WavReader::open(path).map_err(|e| e.to_string())?;
        let spec = reader.spec();
        if spec.sample_rate != SAMPLE_RATE {
            return Err(format!(
                "{}: sample rate {} Hz, expected {SAMPLE_RATE} Hz",
                path.display(),
                spec.sample_rate
            ));
        }
        let channels = usize::from(spec.channels.max(1));

        let interleaved: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => reader
                .samples::<f32>()
                .map(|s| s.map(|v| v * f32::from(i16::MAX)).map_err(|e| e.to_string()))
                .collect::<Result<Vec<_>, _>>()?,
            hound::SampleFormat::Int => {
                let shift = spec.bits_per_sample.saturating_sub(16);
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|v| (v >> shift) as f32).map_err(|e| e.to_string()))
                    .collect::<Result<Vec<_>, _>>()?
            }
        };

        Ok(interleaved
            .chunks(channels)
            .map(|frame| {
                let mean = frame.iter().sum::<f32>() / channels as f32;
                mean.clamp(f32::from(i16::MIN), f32::from(i16::MAX)) as Sample
            })
            .collect())
    }

    fn percentile(values: &[f64], p: f64) -> f64 {
        if values.is_empty() {
            return 0.0;
        }
        let mut sorted = values.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let idx = ((sorted.len() - 1) as f64 * p.clamp(0.0, 1.0)).round() as usize;
        sorted[idx.min(sorted.len() - 1)]
    }

    fn mean(values: &[f64]) -> f64 {
        if values.is_empty() {
            0.0
        } else {
            values.iter().sum::<f64>() / values.len() as f64
        }
    }

    let args = parse_args()?;
    if !args.fixtures_dir.exists() {
        return Err(format!(
            "fixtures directory not found: {}",
            args.fixtures_dir.display()
        ));
    }

    let mut wav_files = Vec::new();
    collect_wavs(&args.fixtures_dir, &mut wav_files)?;
    wav_files.sort();
    if wav_files.is_empty() {
        return Err(format!(
            "no .wav fixtures found in {}",
            args.fixtures_dir.display()
        ));
    }

    let config = SpectrogramConfig::default();
    let feature_len = config.feature_len();
    let window = config.audio_length;
    let hop = (SAMPLE_RATE as u64 * args.hop_ms / 1_000) as usize;

    let loader: Box<dyn EngineLoader> = match (&args.model, args.onnx) {
        (Some(path), false) => Box::new(DenseLoader::new(path)),
        #[cfg(feature = "onnx")]
        (Some(path), true) => Box::new(hark_core::inference::OnnxLoader::new(path, feature_len)),
        #[cfg(not(feature = "onnx"))]
        (Some(_), true) => return Err("--onnx requires the 'onnx' feature".into()),
        (None, _) => Box::new(StubLoader::new(feature_len, 0.0)),
    };

    let mut arena = ArenaBudget::default();
    let mut engine: Box<dyn InferenceEngine> =
        loader.load(&mut arena).map_err(|e| e.to_string())?;
    if engine.input_len() != feature_len {
        return Err(format!(
            "model expects {} inputs, features have {feature_len}",
            engine.input_len()
        ));
    }
    let mut extractor = SpectrogramExtractor::new(config).map_err(|e| e.to_string())?;

    println!(
        "Running extraction benchmark on {} fixtures (engine={}, hop={} ms)",
        wav_files.len(),
        loader.describe(),
        args.hop_ms
    );

    let mut extract_ms = Vec::new();
    let mut invoke_ms = Vec::new();
    let mut cycle_ms = Vec::new();
    let mut files = Vec::new();
    let mut padded = vec![0 as Sample; window];

    for wav in &wav_files {
        let samples = read_wav_mono_i16(wav)?;
        let file = wav
            .strip_prefix(&args.fixtures_dir)
            .unwrap_or(wav)
            .display()
            .to_string();

        let mut file_extract = Vec::new();
        let mut file_invoke = Vec::new();
        let mut max_score = 0f32;
        let mut over = 0usize;

        // Window ends advance by one hop, the way the detector sees a live stream.
        let mut end = hop.min(samples.len());
        loop {
            let start = end.saturating_sub(window);
            let available = &samples[start..end];
            padded[..window - available.len()].fill(0);
            padded[window - available.len()..].copy_from_slice(available);

            let started = Instant::now();
            extractor
                .extract_samples(&padded, engine.input_mut())
                .map_err(|e| format!("{file}: {e}"))?;
            let extracted = started.elapsed().as_secs_f64() * 1000.0;

            let started = Instant::now();
            engine.invoke().map_err(|e| format!("{file}: {e}"))?;
            let invoked = started.elapsed().as_secs_f64() * 1000.0;

            let score = engine.output();
            max_score = max_score.max(score);
            if score >= args.threshold {
                over += 1;
            }
            file_extract.push(extracted);
            file_invoke.push(invoked);
            cycle_ms.push(extracted + invoked);

            if end >= samples.len() {
                break;
            }
            end = (end + hop).min(samples.len());
        }

        println!(
            "{file}: {} windows, max score {max_score:.3}, extract {:.2} ms avg",
            file_extract.len(),
            mean(&file_extract)
        );
        files.push(FileResult {
            file,
            windows: file_extract.len(),
            max_score,
            windows_over_threshold: over,
            avg_extract_ms: mean(&file_extract),
            avg_invoke_ms: mean(&file_invoke),
        });
        extract_ms.extend(file_extract);
        invoke_ms.extend(file_invoke);
    }

    let summary = Summary {
        fixtures_dir: args.fixtures_dir.display().to_string(),
        engine: loader.describe(),
        feature_len,
        hop_ms: args.hop_ms,
        threshold: args.threshold,
        total_files: files.len(),
        total_windows: extract_ms.len(),
        p50_extract_ms: percentile(&extract_ms, 0.50),
        p95_extract_ms: percentile(&extract_ms, 0.95),
        p50_invoke_ms: percentile(&invoke_ms, 0.50),
        p95_invoke_ms: percentile(&invoke_ms, 0.95),
        p95_cycle_ms: percentile(&cycle_ms, 0.95),
        files,
    };

    println!(
        "Done. windows={} extract p50={:.2}ms p95={:.2}ms cycle p95={:.2}ms",
        summary.total_windows,
        summary.p50_extract_ms,
        summary.p95_extract_ms,
        summary.p95_cycle_ms
    );

    let json = serde_json::to_string_pretty(&summary).map_err(|e| e.to_string())?;
    if let Some(out) = args.output {
        if let Some(parent) = out.parent() {
            std::fs::create_dir_all(parent).map_err(|e| e.to_string())?;
        }
        std::fs::write(&out, json).map_err(|e| e.to_string())?;
        println!("Wrote benchmark report: {}", out.display());
    } else {
        println!("{json}");
    }

    Ok(())
}
