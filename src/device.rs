use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, bounded, select, tick};

use crate::audio;
use crate::config::{Config, Scheduling};
use crate::controller::{CaptureController, CaptureOutcome};
use crate::error::{BarkwatchError, Result};
use crate::monitor::{PollOutcome, SoundMonitor};
use crate::presence;
use crate::session::SessionHandle;
use crate::telemetry::TelemetryHook;

/// The running detector: monitor and capture worker threads plus the
/// single-slot trigger between them.
pub struct Device {
    session: SessionHandle,
    trigger_tx: Sender<()>,
    shutdown_tx: Option<Sender<()>>,
    workers: Vec<JoinHandle<()>>,
}

impl Device {
    /// Open the configured peripherals and start monitoring.
    pub fn from_config(config: &Config) -> Result<Self> {
        let source = audio::shared(audio::open_source(config)?);
        let session = SessionHandle::new();
        let presence = presence::create_sensor(&config.presence)?;

        let monitor = SoundMonitor::new(
            &config.detection,
            Arc::clone(&source),
            presence,
            session.clone(),
        );
        let mut controller = CaptureController::from_config(config, source, session);
        if let Some(hook) = TelemetryHook::from_config(config)? {
            controller.add_hook(Box::new(hook));
        }

        Self::start(
            config.capture.scheduling,
            config.detection.poll_interval(),
            monitor,
            controller,
        )
    }

    pub fn start(
        scheduling: Scheduling,
        poll_interval: Duration,
        monitor: SoundMonitor,
        controller: CaptureController,
    ) -> Result<Self> {
        let session = controller.session().clone();
        let (trigger_tx, trigger_rx) = bounded::<()>(1);
        let (shutdown_tx, shutdown_rx) = bounded::<()>(0);

        let workers = match scheduling {
            Scheduling::Threaded => {
                let capture_shutdown = shutdown_rx.clone();
                let detector_tx = trigger_tx.clone();
                vec![
                    thread::Builder::new()
                        .name("barkwatch-detect".to_string())
                        .spawn(move || {
                            detection_loop(monitor, poll_interval, &detector_tx, &shutdown_rx);
                        })?,
                    thread::Builder::new()
                        .name("barkwatch-capture".to_string())
                        .spawn(move || capture_loop(controller, &trigger_rx, &capture_shutdown))?,
                ]
            }
            Scheduling::Cooperative => vec![
                thread::Builder::new()
                    .name("barkwatch-device".to_string())
                    .spawn(move || {
                        cooperative_loop(
                            monitor,
                            controller,
                            poll_interval,
                            &trigger_rx,
                            &shutdown_rx,
                        );
                    })?,
            ],
        };

        tracing::info!("device started ({scheduling:?} scheduling, polling every {poll_interval:?})");

        Ok(Self {
            session,
            trigger_tx,
            shutdown_tx: Some(shutdown_tx),
            workers,
        })
    }

    /// Request a capture regardless of detection. Returns false when a
    /// trigger is already pending.
    pub fn force_trigger(&self) -> bool {
        if self.trigger_tx.try_send(()).is_ok() {
            tracing::info!("forced capture requested");
            true
        } else {
            tracing::debug!("capture trigger already pending");
            false
        }
    }

    #[must_use]
    pub const fn session(&self) -> &SessionHandle {
        &self.session
    }

    /// Stop the worker threads. A capture in progress runs to completion
    /// first.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if self.shutdown_tx.take().is_none() {
            return;
        }
        for worker in self.workers.drain(..) {
            let name = worker.thread().name().unwrap_or("worker").to_string();
            if worker.join().is_err() {
                tracing::error!("{name} thread panicked");
            }
        }
        tracing::info!("device stopped");
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        self.stop();
    }
}

fn detection_loop(
    mut monitor: SoundMonitor,
    poll_interval: Duration,
    trigger_tx: &Sender<()>,
    shutdown_rx: &Receiver<()>,
) {
    let ticker = tick(poll_interval);
    loop {
        select! {
            recv(shutdown_rx) -> _ => break,
            recv(ticker) -> _ => match monitor.poll() {
                Ok(PollOutcome::Triggered { .. }) => {
                    if trigger_tx.try_send(()).is_err() {
                        tracing::debug!("capture trigger already pending");
                    }
                }
                Ok(_) => {}
                Err(e) => tracing::warn!("sound poll failed: {e}"),
            },
        }
    }
    tracing::debug!("detection thread exiting");
}

fn capture_loop(
    mut controller: CaptureController,
    trigger_rx: &Receiver<()>,
    shutdown_rx: &Receiver<()>,
) {
    loop {
        select! {
            recv(shutdown_rx) -> _ => break,
            recv(trigger_rx) -> msg => {
                if msg.is_err() {
                    break;
                }
                handle_trigger(&mut controller, trigger_rx);
            }
        }
    }
    tracing::debug!("capture thread exiting");
}

/// Single-thread variant: capture runs inline and polling pauses until it
/// returns.
fn cooperative_loop(
    mut monitor: SoundMonitor,
    mut controller: CaptureController,
    poll_interval: Duration,
    trigger_rx: &Receiver<()>,
    shutdown_rx: &Receiver<()>,
) {
    let ticker = tick(poll_interval);
    loop {
        select! {
            recv(shutdown_rx) -> _ => break,
            recv(trigger_rx) -> _ => handle_trigger(&mut controller, trigger_rx),
            recv(ticker) -> _ => match monitor.poll() {
                Ok(PollOutcome::Triggered { .. }) => handle_trigger(&mut controller, trigger_rx),
                Ok(_) => {}
                Err(e) => tracing::warn!("sound poll failed: {e}"),
            },
        }
    }
    tracing::debug!("device thread exiting");
}

fn handle_trigger(controller: &mut CaptureController, trigger_rx: &Receiver<()>) {
    if matches!(controller.on_trigger(), CaptureOutcome::Ignored) {
        return;
    }

    // Triggers raised while the session was active are stale.
    let stale = trigger_rx.try_iter().count();
    if stale > 0 {
        tracing::debug!("dropped {stale} trigger(s) raised during capture");
    }
}

/// Run the device until Ctrl+C.
pub async fn run_device(config: Config) -> Result<()> {
    let device = Device::from_config(&config)?;
    tracing::info!(
        "monitoring as {} (threshold {:.1} dB, {} consecutive hits)",
        config.device.id,
        config.detection.threshold_db,
        config.detection.required_consecutive_hits
    );

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| BarkwatchError::Other(format!("failed to listen for Ctrl+C: {e}")))?;
    tracing::info!("received Ctrl+C, shutting down...");

    tokio::task::spawn_blocking(move || device.shutdown())
        .await
        .map_err(|e| BarkwatchError::Other(format!("shutdown task failed: {e}")))?;
    Ok(())
}

/// One capture right now, bypassing detection.
pub fn capture_once(config: &Config) -> Result<CaptureOutcome> {
    let source = audio::shared(audio::open_source(config)?);
    let mut controller = CaptureController::from_config(config, source, SessionHandle::new());
    if let Some(hook) = TelemetryHook::from_config(config)? {
        controller.add_hook(Box::new(hook));
    }
    Ok(controller.on_trigger())
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};
    use std::net::TcpListener;

    use super::*;
    use crate::audio::{ScriptedSource, SharedSource, shared};
    use crate::buffer::BufferPool;
    use crate::clock::FixedClock;
    use crate::config::{AudioFormat, CaptureConfig, DetectionConfig, UploadConfig};
    use crate::controller::{CaptureHook, CaptureReport};
    use crate::net::uploader::Uploader;
    use crate::presence::StaticPresence;

    const REF: f32 = 0.050_118_7;

    struct Notify(Sender<CaptureReport>);

    impl CaptureHook for Notify {
        fn on_capture_complete(&mut self, report: &CaptureReport) {
            let _ = self.0.send(report.clone());
        }
    }

    /// Accept uploads forever, answering 200 to each.
    fn collector() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap_or_else(|e| panic!("{e}"));
        let port = listener.local_addr().unwrap_or_else(|e| panic!("{e}")).port();
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(mut stream) = stream else { break };
                let mut raw = Vec::new();
                let mut byte = [0u8; 1];
                while !raw.ends_with(b"\r\n\r\n") {
                    if stream.read_exact(&mut byte).is_err() {
                        break;
                    }
                    raw.push(byte[0]);
                }
                let head = String::from_utf8_lossy(&raw).to_string();
                let len: usize = head
                    .lines()
                    .find_map(|l| l.strip_prefix("Content-Length: "))
                    .and_then(|v| v.trim().parse().ok())
                    .unwrap_or(0);
                let mut body = vec![0u8; len];
                let _ = stream.read_exact(&mut body);
                let _ = stream.write_all(b"HTTP/1.1 200 OK\r\nConnection: close\r\n\r\n");
            }
        });
        port
    }

    /// Three loud windows followed by plenty of quiet capture material.
    fn script() -> Vec<Vec<i16>> {
        let mut blocks = vec![ScriptedSource::block_at_db(100.0, REF, 1024); 3];
        blocks.extend(std::iter::repeat_n(vec![1i16; 1024], 40));
        blocks
    }

    fn parts(
        source: SharedSource,
        presence: bool,
        port: u16,
    ) -> (SoundMonitor, CaptureController, crossbeam_channel::Receiver<CaptureReport>) {
        let session = SessionHandle::new();
        let detection = DetectionConfig {
            window_samples: 1024,
            ..DetectionConfig::default()
        };
        let monitor = SoundMonitor::new(
            &detection,
            Arc::clone(&source),
            Box::new(StaticPresence::new(presence)),
            session.clone(),
        );

        let capture = CaptureConfig {
            duration_secs: 1,
            format: AudioFormat::Wav,
            block_timeout_ms: 10,
            ..CaptureConfig::default()
        };
        let uploader = Uploader::new(&UploadConfig {
            host: "127.0.0.1".to_string(),
            port,
            ..UploadConfig::default()
        });
        let mut controller = CaptureController::new(
            capture.clone(),
            "DEV".to_string(),
            source,
            BufferPool::for_capture(&capture),
            uploader,
            Box::new(FixedClock("20250101000000".to_string())),
            session,
        );
        let (tx, rx) = crossbeam_channel::unbounded();
        controller.add_hook(Box::new(Notify(tx)));
        (monitor, controller, rx)
    }

    fn wait_for(rx: &crossbeam_channel::Receiver<CaptureReport>) -> CaptureReport {
        rx.recv_timeout(Duration::from_secs(10))
            .unwrap_or_else(|e| panic!("no capture delivered: {e}"))
    }

    #[test]
    fn threaded_device_captures_after_loud_run() {
        let port = collector();
        let source = shared(Box::new(ScriptedSource::new(script())));
        let (monitor, controller, rx) = parts(source, true, port);

        let device = Device::start(
            Scheduling::Threaded,
            Duration::from_millis(5),
            monitor,
            controller,
        )
        .unwrap_or_else(|e| panic!("{e}"));

        let report = wait_for(&rx);
        assert_eq!(report.filename, "DEV20250101000000.wav");
        assert_eq!(report.samples_captured, 16 * 1024);
        device.shutdown();
    }

    #[test]
    fn cooperative_device_captures_after_loud_run() {
        let port = collector();
        let source = shared(Box::new(ScriptedSource::new(script())));
        let (monitor, controller, rx) = parts(source, true, port);

        let device = Device::start(
            Scheduling::Cooperative,
            Duration::from_millis(5),
            monitor,
            controller,
        )
        .unwrap_or_else(|e| panic!("{e}"));

        let report = wait_for(&rx);
        assert_eq!(report.samples_captured, 16 * 1024);
        device.shutdown();
    }

    #[test]
    fn forced_trigger_bypasses_detection() {
        let port = collector();
        let source = shared(Box::new(ScriptedSource::new(vec![vec![1i16; 1024]; 400])));
        let (monitor, controller, rx) = parts(source, false, port);

        let device = Device::start(
            Scheduling::Threaded,
            Duration::from_millis(20),
            monitor,
            controller,
        )
        .unwrap_or_else(|e| panic!("{e}"));

        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
        assert!(device.force_trigger());
        wait_for(&rx);
        device.shutdown();
    }

    #[test]
    fn shutdown_joins_idle_workers() {
        let source = shared(Box::new(ScriptedSource::new(Vec::new())));
        let (monitor, controller, _rx) = parts(source, false, 1);
        let device = Device::start(
            Scheduling::Threaded,
            Duration::from_millis(5),
            monitor,
            controller,
        )
        .unwrap_or_else(|e| panic!("{e}"));
        assert!(!device.session().is_active());
        device.shutdown();
    }
}
