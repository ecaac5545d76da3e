use std::sync::TryLockError;
use std::time::Duration;

use crate::audio::SharedSource;
use crate::audio::loudness;
use crate::config::DetectionConfig;
use crate::error::{BarkwatchError, Result};
use crate::presence::PresenceSensor;
use crate::session::SessionHandle;

/// Consecutive-hit debounce for the loudness trigger.
///
/// `current_hit_count` stays within `0..=required_consecutive_hits` and is
/// zeroed by any observation that fails the presence-and-loudness test.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionState {
    pub threshold_db: f32,
    pub required_consecutive_hits: u32,
    pub current_hit_count: u32,
}

impl DetectionState {
    #[must_use]
    pub const fn new(threshold_db: f32, required_consecutive_hits: u32) -> Self {
        Self {
            threshold_db,
            required_consecutive_hits,
            current_hit_count: 0,
        }
    }

    /// Feed one poll. Returns true exactly when the required run of hits
    /// completes; the counter is back at 0 afterwards.
    pub fn observe(&mut self, presence: bool, db_spl: f32) -> bool {
        if presence && db_spl > self.threshold_db {
            self.current_hit_count += 1;
        } else {
            self.current_hit_count = 0;
        }

        if self.current_hit_count >= self.required_consecutive_hits {
            self.current_hit_count = 0;
            return true;
        }
        false
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PollOutcome {
    /// A capture session is active; nothing was read.
    Suspended,
    /// The peripheral produced nothing within the poll timeout.
    NoData,
    Measured { db_spl: f32, hits: u32 },
    Triggered { db_spl: f32 },
}

/// Periodically samples the ambient level and decides when to capture.
pub struct SoundMonitor {
    state: DetectionState,
    reference_rms: f32,
    poll_timeout: Duration,
    window: Vec<i16>,
    source: SharedSource,
    presence: Box<dyn PresenceSensor>,
    session: SessionHandle,
}

impl SoundMonitor {
    #[must_use]
    pub fn new(
        config: &DetectionConfig,
        source: SharedSource,
        presence: Box<dyn PresenceSensor>,
        session: SessionHandle,
    ) -> Self {
        Self {
            state: DetectionState::new(config.threshold_db, config.required_consecutive_hits),
            reference_rms: config.reference_rms,
            poll_timeout: config.poll_timeout(),
            window: vec![0i16; config.window_samples],
            source,
            presence,
            session,
        }
    }

    #[must_use]
    pub const fn state(&self) -> &DetectionState {
        &self.state
    }

    /// Read one window from the peripheral and return its dB SPL, or `None`
    /// when nothing arrived in time or the peripheral is busy.
    pub fn measure(&mut self) -> Result<Option<f32>> {
        let n = {
            let mut source = match self.source.try_lock() {
                Ok(source) => source,
                // The capture worker holds the peripheral.
                Err(TryLockError::WouldBlock) => return Ok(None),
                Err(TryLockError::Poisoned(_)) => {
                    return Err(BarkwatchError::Audio("audio source lock poisoned".to_string()));
                }
            };
            source.discard_buffered();
            source.read(&mut self.window, self.poll_timeout)?
        };

        if n == 0 {
            return Ok(None);
        }

        let rms = loudness::rms(&self.window[..n]);
        let db = loudness::db_spl(rms, self.reference_rms);
        tracing::debug!("sound level: rms={rms:.6} db={db:.2} ({n} samples)");
        Ok(Some(db))
    }

    /// One step of the detection loop.
    pub fn poll(&mut self) -> Result<PollOutcome> {
        if self.session.is_active() {
            return Ok(PollOutcome::Suspended);
        }

        let Some(db_spl) = self.measure()? else {
            tracing::trace!("no audio within {:?}, skipping poll", self.poll_timeout);
            return Ok(PollOutcome::NoData);
        };

        let present = self.presence.is_active();
        if self.state.observe(present, db_spl) {
            tracing::info!(
                "sustained noise above {:.1} dB ({db_spl:.2} dB), triggering capture",
                self.state.threshold_db
            );
            return Ok(PollOutcome::Triggered { db_spl });
        }

        Ok(PollOutcome::Measured {
            db_spl,
            hits: self.state.current_hit_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{ScriptedSource, shared};
    use crate::presence::StaticPresence;
    use crate::session::CaptureSession;

    const REF: f32 = 0.050_118_7;

    fn run(state: &mut DetectionState, dbs: &[f32]) -> (Vec<u32>, Vec<bool>) {
        let mut counts = Vec::new();
        let mut fired = Vec::new();
        for &db in dbs {
            let hit = state.observe(true, db);
            fired.push(hit);
            counts.push(if hit {
                state.required_consecutive_hits
            } else {
                state.current_hit_count
            });
        }
        (counts, fired)
    }

    #[test]
    fn three_loud_polls_trigger_once() {
        let mut state = DetectionState::new(90.0, 3);
        let (_, fired) = run(&mut state, &[95.0, 96.0, 97.0]);
        assert_eq!(fired, [false, false, true]);
        assert_eq!(state.current_hit_count, 0);
    }

    #[test]
    fn quiet_poll_resets_the_run() {
        let mut state = DetectionState::new(90.0, 3);
        let (counts, fired) = run(&mut state, &[95.0, 40.0, 95.0, 95.0, 95.0]);
        assert_eq!(counts, [1, 0, 1, 2, 3]);
        assert_eq!(fired, [false, false, false, false, true]);
    }

    #[test]
    fn absent_presence_never_counts() {
        let mut state = DetectionState::new(90.0, 2);
        assert!(!state.observe(false, 120.0));
        assert!(!state.observe(false, 120.0));
        assert_eq!(state.current_hit_count, 0);

        assert!(!state.observe(true, 120.0));
        assert!(!state.observe(false, 120.0));
        assert_eq!(state.current_hit_count, 0);
    }

    #[test]
    fn threshold_is_strict() {
        let mut state = DetectionState::new(90.0, 1);
        assert!(!state.observe(true, 90.0));
        assert!(state.observe(true, 90.01));
    }

    #[test]
    fn counter_stays_bounded() {
        let mut state = DetectionState::new(50.0, 4);
        for _ in 0..100 {
            state.observe(true, 60.0);
            assert!(state.current_hit_count < 4);
        }
    }

    fn monitor_with(
        blocks: Vec<Vec<i16>>,
        presence: bool,
        session: SessionHandle,
    ) -> SoundMonitor {
        let config = DetectionConfig {
            window_samples: 1024,
            ..DetectionConfig::default()
        };
        SoundMonitor::new(
            &config,
            shared(Box::new(ScriptedSource::new(blocks))),
            Box::new(StaticPresence::new(presence)),
            session,
        )
    }

    fn loud(db: f32) -> Vec<i16> {
        ScriptedSource::block_at_db(db, REF, 1024)
    }

    #[test]
    fn poll_triggers_after_required_hits() {
        let mut m = monitor_with(
            vec![loud(95.0), loud(96.0), loud(97.0)],
            true,
            SessionHandle::new(),
        );

        let first = m.poll().unwrap_or_else(|e| panic!("{e}"));
        assert!(matches!(first, PollOutcome::Measured { hits: 1, .. }));
        let second = m.poll().unwrap_or_else(|e| panic!("{e}"));
        assert!(matches!(second, PollOutcome::Measured { hits: 2, .. }));
        let third = m.poll().unwrap_or_else(|e| panic!("{e}"));
        assert!(matches!(third, PollOutcome::Triggered { .. }));
        assert_eq!(m.state().current_hit_count, 0);
    }

    #[test]
    fn empty_read_leaves_state_alone() {
        let mut m = monitor_with(vec![loud(95.0)], true, SessionHandle::new());
        m.poll().unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(m.state().current_hit_count, 1);

        assert_eq!(m.poll().unwrap_or_else(|e| panic!("{e}")), PollOutcome::NoData);
        assert_eq!(m.state().current_hit_count, 1);
    }

    #[test]
    fn no_trigger_while_session_active() {
        let session = SessionHandle::new();
        let mut m = monitor_with(vec![loud(100.0); 6], true, session.clone());

        let active = CaptureSession::admit(&session, 1).unwrap_or_else(|| panic!("refused"));
        for _ in 0..6 {
            assert_eq!(
                m.poll().unwrap_or_else(|e| panic!("{e}")),
                PollOutcome::Suspended
            );
        }
        assert_eq!(m.state().current_hit_count, 0);
        drop(active);

        // The loud blocks were never consumed while suspended.
        for _ in 0..2 {
            m.poll().unwrap_or_else(|e| panic!("{e}"));
        }
        assert!(matches!(
            m.poll().unwrap_or_else(|e| panic!("{e}")),
            PollOutcome::Triggered { .. }
        ));
    }

    #[test]
    fn silence_measures_zero_db() {
        let mut m = monitor_with(vec![vec![0i16; 1024]], true, SessionHandle::new());
        let db = m
            .measure()
            .unwrap_or_else(|e| panic!("{e}"))
            .unwrap_or_else(|| panic!("expected a reading"));
        assert!(db.abs() < f32::EPSILON);
    }
}
