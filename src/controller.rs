use crate::audio::SharedSource;
use crate::buffer::{BufferPool, OutputBuffer};
use crate::clock::{LocalClock, TimestampProvider};
use crate::config::{CaptureConfig, Config, OverflowPolicy};
use crate::encode::{EncodedPayload, Encoder, create_encoder};
use crate::error::{BarkwatchError, Result};
use crate::net::uploader::{ResponseOutcome, Uploader};
use crate::session::{CaptureSession, SessionHandle, SessionStatus};

/// Summary of a capture that reached the collector.
#[derive(Debug, Clone)]
pub struct CaptureReport {
    pub filename: String,
    pub payload_bytes: usize,
    /// Samples of every block whose encoded output reached the buffer,
    /// including a block cut short by a truncating overflow.
    pub samples_captured: usize,
    pub truncated: bool,
    pub response: ResponseOutcome,
}

#[derive(Debug)]
pub enum CaptureOutcome {
    /// A session was already running; the trigger was dropped.
    Ignored,
    Delivered(CaptureReport),
    Failed {
        stage: SessionStatus,
        error: BarkwatchError,
    },
}

/// Runs after a capture is delivered. Hooks cannot fail the capture.
pub trait CaptureHook: Send {
    fn on_capture_complete(&mut self, report: &CaptureReport);
}

/// Record, encode and upload one clip per accepted trigger.
pub struct CaptureController {
    capture: CaptureConfig,
    device_id: String,
    source: SharedSource,
    pool: BufferPool,
    uploader: Uploader,
    clock: Box<dyn TimestampProvider>,
    session: SessionHandle,
    hooks: Vec<Box<dyn CaptureHook>>,
}

impl CaptureController {
    #[must_use]
    pub fn new(
        capture: CaptureConfig,
        device_id: String,
        source: SharedSource,
        pool: BufferPool,
        uploader: Uploader,
        clock: Box<dyn TimestampProvider>,
        session: SessionHandle,
    ) -> Self {
        Self {
            capture,
            device_id,
            source,
            pool,
            uploader,
            clock,
            session,
            hooks: Vec::new(),
        }
    }

    #[must_use]
    pub fn from_config(config: &Config, source: SharedSource, session: SessionHandle) -> Self {
        let pool = BufferPool::for_capture(&config.capture);
        tracing::debug!("output buffer capacity: {} bytes", pool.capacity());
        Self::new(
            config.capture.clone(),
            config.device.id.clone(),
            source,
            pool,
            Uploader::new(&config.upload),
            Box::new(LocalClock::new(&config.clock)),
            session,
        )
    }

    pub fn add_hook(&mut self, hook: Box<dyn CaptureHook>) {
        self.hooks.push(hook);
    }

    #[must_use]
    pub const fn session(&self) -> &SessionHandle {
        &self.session
    }

    /// Handle one trigger to completion. Every failure is contained here;
    /// the session and buffer are released before this returns.
    pub fn on_trigger(&mut self) -> CaptureOutcome {
        let Some(mut session) =
            CaptureSession::admit(&self.session, self.capture.target_samples())
        else {
            tracing::debug!("capture already in progress, ignoring trigger");
            return CaptureOutcome::Ignored;
        };

        tracing::info!(
            "capture started: {} s of {} Hz audio as {:?}",
            self.capture.duration_secs,
            self.capture.sample_rate,
            self.capture.format
        );

        match self.run(&mut session) {
            Ok(report) => {
                session.transition(SessionStatus::Done);
                tracing::info!(
                    "capture {} delivered ({} bytes, {} samples{})",
                    report.filename,
                    report.payload_bytes,
                    report.samples_captured,
                    if report.truncated { ", truncated" } else { "" }
                );
                for hook in &mut self.hooks {
                    hook.on_capture_complete(&report);
                }
                CaptureOutcome::Delivered(report)
            }
            Err(error) => {
                let stage = session.status();
                tracing::error!(
                    "capture failed while {stage}: {error} ({} of {} samples, {} bytes encoded)",
                    session.samples_captured,
                    session.target_samples,
                    session.bytes_captured
                );
                session.transition(SessionStatus::Failed);
                CaptureOutcome::Failed { stage, error }
            }
        }
    }

    fn run(&self, session: &mut CaptureSession) -> Result<CaptureReport> {
        let mut encoder = create_encoder(&self.capture)?;
        let mut lease = self.pool.acquire()?;

        self.record(session, encoder.as_mut(), &mut lease)?;

        session.transition(SessionStatus::Flushing);
        match encoder.flush(&mut lease) {
            Err(BarkwatchError::BufferOverflow { requested, .. }) if session.truncated => {
                tracing::warn!("dropped {requested} bytes of encoder flush output");
            }
            other => other?,
        }
        encoder.finalize(&mut lease)?;
        session.bytes_captured = lease.len();

        session.transition(SessionStatus::Uploading);
        let timestamp = self.clock.now();
        let payload = EncodedPayload::new(&lease, encoder.as_ref());
        let upload = self.uploader.upload(&payload, &self.device_id, &timestamp)?;

        Ok(CaptureReport {
            filename: format!("{}{timestamp}.{}", self.device_id, payload.file_extension),
            payload_bytes: payload.len(),
            samples_captured: session.samples_captured,
            truncated: session.truncated,
            response: upload.response,
        })
    }

    /// Stream blocks from the peripheral into the encoder until the target
    /// sample count is reached.
    fn record(
        &self,
        session: &mut CaptureSession,
        encoder: &mut dyn Encoder,
        out: &mut OutputBuffer,
    ) -> Result<()> {
        let mut block = vec![0i16; self.capture.block_samples];
        let timeout = self.capture.block_timeout();
        let mut source = self
            .source
            .lock()
            .map_err(|_| BarkwatchError::Audio("audio source lock poisoned".to_string()))?;
        source.discard_buffered();

        let mut timeouts = 0u32;
        while !session.is_complete() {
            let n = source.read(&mut block, timeout)?;
            if n == 0 {
                timeouts += 1;
                tracing::warn!(
                    "no audio from {} within {timeout:?} ({timeouts}/{})",
                    source.name(),
                    self.capture.max_block_timeouts
                );
                if timeouts >= self.capture.max_block_timeouts {
                    return Err(BarkwatchError::PeripheralTimeout);
                }
                continue;
            }
            timeouts = 0;

            let before = out.len();
            match encoder.encode(&block[..n], out) {
                Ok(()) => {}
                Err(BarkwatchError::BufferOverflow {
                    requested,
                    cursor,
                    capacity,
                }) if self.capture.overflow == OverflowPolicy::Truncate => {
                    tracing::warn!(
                        "output buffer full ({cursor}/{capacity} bytes, {requested} more needed), uploading truncated capture"
                    );
                    session.truncated = true;
                    // Streaming encoders may have kept earlier passes of this block.
                    if out.len() > before {
                        session.samples_captured += n;
                        session.bytes_captured = out.len();
                    }
                    break;
                }
                Err(e) => return Err(e),
            }

            session.samples_captured += n;
            session.bytes_captured = out.len();
        }

        tracing::debug!(
            "capture loop finished: {} samples, {} bytes",
            session.samples_captured,
            session.bytes_captured
        );
        Ok(())
    }
}
