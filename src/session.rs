use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle of the single in-flight capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionStatus {
    Idle = 0,
    Capturing = 1,
    Flushing = 2,
    Uploading = 3,
    Failed = 4,
    Done = 5,
}

impl SessionStatus {
    #[must_use]
    pub const fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Idle),
            1 => Some(Self::Capturing),
            2 => Some(Self::Flushing),
            3 => Some(Self::Uploading),
            4 => Some(Self::Failed),
            5 => Some(Self::Done),
            _ => None,
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Capturing => "capturing",
            Self::Flushing => "flushing",
            Self::Uploading => "uploading",
            Self::Failed => "failed",
            Self::Done => "done",
        };
        f.write_str(s)
    }
}

/// Shared view of the session status. The capture side writes it, the
/// monitor only reads it to stay quiet while a session is active.
#[derive(Debug, Clone, Default)]
pub struct SessionHandle(Arc<AtomicU8>);

impl SessionHandle {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn status(&self) -> SessionStatus {
        SessionStatus::from_u8(self.0.load(Ordering::Acquire)).unwrap_or(SessionStatus::Idle)
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status() != SessionStatus::Idle
    }

    /// Move `Idle -> Capturing`. Returns false if a session already exists.
    pub fn try_admit(&self) -> bool {
        self.0
            .compare_exchange(
                SessionStatus::Idle as u8,
                SessionStatus::Capturing as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    pub(crate) fn set(&self, status: SessionStatus) {
        self.0.store(status as u8, Ordering::Release);
    }
}

/// Book-keeping for one capture, owned by the controller.
#[derive(Debug)]
pub struct CaptureSession {
    pub target_samples: usize,
    pub samples_captured: usize,
    pub bytes_captured: usize,
    pub truncated: bool,
    handle: SessionHandle,
}

impl CaptureSession {
    /// Admit a new session, or `None` if one is already running.
    #[must_use]
    pub fn admit(handle: &SessionHandle, target_samples: usize) -> Option<Self> {
        if !handle.try_admit() {
            return None;
        }
        Some(Self {
            target_samples,
            samples_captured: 0,
            bytes_captured: 0,
            truncated: false,
            handle: handle.clone(),
        })
    }

    #[must_use]
    pub fn status(&self) -> SessionStatus {
        self.handle.status()
    }

    pub fn transition(&self, to: SessionStatus) {
        let from = self.handle.status();
        tracing::debug!("capture session: {from} -> {to}");
        self.handle.set(to);
    }

    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.samples_captured >= self.target_samples
    }
}

impl Drop for CaptureSession {
    /// However the session ends, the device returns to idle.
    fn drop(&mut self) {
        self.handle.set(SessionStatus::Idle);
    }
}
