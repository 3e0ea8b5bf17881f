//! The sampling task: hardware channel → narrowing → sample ring.
//!
//! Runs on a dedicated OS thread so a slow detection cycle can never delay
//! it. The loop never waits on the ring (writes always succeed by
//! overwriting) and only blocks inside [`AudioChannel::read`].

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::Sender;
use tracing::{debug, info, warn};

use super::{narrow_block, AudioChannel, ChannelConfig, ChannelSource};
use crate::buffering::{RingWriter, Sample};
use crate::error::{HarkError, Result};

/// Counters updated by the sampling thread.
#[derive(Default)]
pub struct ProviderDiagnostics {
    pub blocks_read: AtomicUsize,
    pub samples_written: AtomicUsize,
    pub read_errors: AtomicUsize,
}

impl ProviderDiagnostics {
    pub fn reset(&self) {
        self.blocks_read.store(0, Ordering::Relaxed);
        self.samples_written.store(0, Ordering::Relaxed);
        self.read_errors.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ProviderSnapshot {
        ProviderSnapshot {
            blocks_read: self.blocks_read.load(Ordering::Relaxed),
            samples_written: self.samples_written.load(Ordering::Relaxed),
            read_errors: self.read_errors.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderSnapshot {
    pub blocks_read: usize,
    pub samples_written: usize,
    pub read_errors: usize,
}

/// Owns the ring's writer until [`start`](Self::start) moves it onto the
/// sampling thread.
pub struct SampleProvider {
    writer: RingWriter,
}

impl SampleProvider {
    pub fn new(writer: RingWriter) -> Self {
        Self { writer }
    }

    /// Open `source` on a new sampling thread and begin continuous delivery
    /// into the ring.
    ///
    /// Blocks until the channel is confirmed open (or fails). After each
    /// block is written the running sample total is offered to `notify`
    /// with `try_send`; a full or disconnected channel is ignored.
    ///
    /// # Errors
    /// Invalid `config`, any error from [`ChannelSource::open`], or failure
    /// to spawn the thread.
    pub fn start(
        self,
        source: Box<dyn ChannelSource>,
        config: ChannelConfig,
        notify: Option<Sender<u64>>,
    ) -> Result<ProviderHandle> {
        config.validate()?;

        let running = Arc::new(AtomicBool::new(true));
        let diagnostics = Arc::new(ProviderDiagnostics::default());
        let (open_tx, open_rx) = std::sync::mpsc::channel::<Result<()>>();

        let name = source.describe();
        let thread_running = Arc::clone(&running);
        let thread_diagnostics = Arc::clone(&diagnostics);
        let mut writer = self.writer;

        let thread = thread::Builder::new()
            .name("hark-sampler".into())
            .spawn(move || {
                // Open on THIS thread: some backends' streams are thread-bound.
                let mut channel = match source.open(&config) {
                    Ok(channel) => {
                        let _ = open_tx.send(Ok(()));
                        channel
                    }
                    Err(e) => {
                        let _ = open_tx.send(Err(e));
                        thread_running.store(false, Ordering::Release);
                        return;
                    }
                };

                sample_loop(
                    channel.as_mut(),
                    &mut writer,
                    &config,
                    &thread_running,
                    &thread_diagnostics,
                    notify.as_ref(),
                );

                thread_running.store(false, Ordering::Release);
                // Channel (and any device stream) drops here, on its own thread.
            })?;

        let mut handle = ProviderHandle {
            running,
            thread: Some(thread),
            diagnostics,
        };

        match open_rx.recv() {
            Ok(Ok(())) => {
                info!(source = name.as_str(), "sampler started");
                Ok(handle)
            }
            Ok(Err(e)) => {
                handle.stop();
                Err(e)
            }
            Err(_) => {
                handle.stop();
                Err(HarkError::Other(anyhow::anyhow!(
                    "sampler thread exited before opening the channel"
                )))
            }
        }
    }
}

fn sample_loop(
    channel: &mut dyn AudioChannel,
    writer: &mut RingWriter,
    config: &ChannelConfig,
    running: &AtomicBool,
    diagnostics: &ProviderDiagnostics,
    notify: Option<&Sender<u64>>,
) {
    let mut words = vec![0i32; config.dma_buf_len];
    let mut samples: Vec<Sample> = vec![0; config.dma_buf_len];
    let retry_delay = config.block_duration();

    while running.load(Ordering::Acquire) {
        match channel.read(&mut words) {
            Ok(0) => thread::sleep(retry_delay),
            Ok(n) => {
                let n = n.min(words.len());
                narrow_block(&words[..n], config.sample_shift, &mut samples[..n]);
                writer.write(&samples[..n]);

                diagnostics.blocks_read.fetch_add(1, Ordering::Relaxed);
                diagnostics.samples_written.fetch_add(n, Ordering::Relaxed);

                if let Some(tx) = notify {
                    let _ = tx.try_send(writer.written());
                }
            }
            Err(HarkError::ChannelClosed) => {
                info!("audio channel closed; sampler exiting");
                break;
            }
            Err(e) => {
                diagnostics.read_errors.fetch_add(1, Ordering::Relaxed);
                warn!("audio read failed, skipping slot: {e}");
                thread::sleep(retry_delay);
            }
        }
    }

    debug!(written = writer.written(), "sampler loop finished");
}

/// Running sampler. Dropping it stops the thread.
pub struct ProviderHandle {
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
    diagnostics: Arc<ProviderDiagnostics>,
}

impl ProviderHandle {
    /// `false` once stopped or once the channel closed on its own.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn diagnostics(&self) -> ProviderSnapshot {
        self.diagnostics.snapshot()
    }

    /// The live counters, for owners that outlive this handle.
    pub fn shared_diagnostics(&self) -> Arc<ProviderDiagnostics> {
        Arc::clone(&self.diagnostics)
    }

    /// Signal the loop to exit after its current read and join the thread.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("sampler thread panicked");
            }
        }
    }
}

impl Drop for ProviderHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
