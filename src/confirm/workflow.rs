// Confirmation workflow
// Per-subject state machine presenting detected points for accept/reject/correct

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::chart::PointPair;

#[derive(Debug, Error, PartialEq)]
pub enum WorkflowError {
    #[error("A confirmation is already active for subject {0}")]
    AlreadyActive(String),

    #[error("Signal {signal} not valid in state {state:?}")]
    InvalidTransition {
        state: ConfirmationState,
        signal: &'static str,
    },

    #[error("Signal {signal} not accepted in {mode:?} mode")]
    InvalidSignal {
        mode: ConfirmMode,
        signal: &'static str,
    },

    #[error("Workflow for subject {0} is closed")]
    Closed(String),
}

/// How detected points are presented to the operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmMode {
    /// Accept or reject only; calibration offsets are applied
    #[default]
    Confirmation,
    /// Corrections are allowed and recorded; offsets are not applied
    Training,
}

impl ConfirmMode {
    pub fn to_string(&self) -> String {
        match self {
            ConfirmMode::Confirmation => "confirmation".to_string(),
            ConfirmMode::Training => "training".to_string(),
        }
    }

    pub fn from_string(s: &str) -> Option<Self> {
        match s {
            "confirmation" => Some(ConfirmMode::Confirmation),
            "training" => Some(ConfirmMode::Training),
            _ => None,
        }
    }
}

/// Operator input delivered to a waiting workflow
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "signal", rename_all = "snake_case")]
pub enum ConfirmationSignal {
    Accept,
    Reject,
    Correct { points: PointPair },
    Timeout,
}

impl ConfirmationSignal {
    pub fn name(&self) -> &'static str {
        match self {
            ConfirmationSignal::Accept => "accept",
            ConfirmationSignal::Reject => "reject",
            ConfirmationSignal::Correct { .. } => "correct",
            ConfirmationSignal::Timeout => "timeout",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmationState {
    Pending,
    AwaitingInput,
    Confirmed,
    Corrected,
    Skipped,
    AutoConfirmed,
    Closed,
}

impl ConfirmationState {
    /// Resolved but not yet closed
    pub fn is_resolved(&self) -> bool {
        matches!(
            self,
            ConfirmationState::Confirmed
                | ConfirmationState::Corrected
                | ConfirmationState::Skipped
                | ConfirmationState::AutoConfirmed
        )
    }
}

/// Final result of one confirmation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "resolution", rename_all = "snake_case")]
pub enum Resolution {
    Confirmed { points: PointPair },
    Corrected { detected: PointPair, corrected: PointPair },
    Skipped,
    AutoConfirmed { points: PointPair },
}

impl Resolution {
    pub fn state(&self) -> ConfirmationState {
        match self {
            Resolution::Confirmed { .. } => ConfirmationState::Confirmed,
            Resolution::Corrected { .. } => ConfirmationState::Corrected,
            Resolution::Skipped => ConfirmationState::Skipped,
            Resolution::AutoConfirmed { .. } => ConfirmationState::AutoConfirmed,
        }
    }

    /// Points to click, if any
    pub fn click_points(&self) -> Option<PointPair> {
        match self {
            Resolution::Confirmed { points } | Resolution::AutoConfirmed { points } => Some(*points),
            Resolution::Corrected { corrected, .. } => Some(*corrected),
            Resolution::Skipped => None,
        }
    }
}

/// Source of monotonic time for deadlines
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Clock that follows tokio's timer, including paused test time
pub struct TokioClock;

impl Clock for TokioClock {
    fn now(&self) -> Instant {
        tokio::time::Instant::now().into_std()
    }
}

/// On-screen resource held while a confirmation is shown
pub trait DisplayHandle: Send {
    fn show(&mut self, subject_id: &str, points: &PointPair);
    fn release(&mut self);
}

/// Subjects with a workflow in flight
#[derive(Clone, Default)]
pub struct ActiveConfirmations {
    inner: Arc<Mutex<HashSet<String>>>,
}

impl ActiveConfirmations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the subject, failing if it already has a workflow
    pub fn acquire(&self, subject_id: &str) -> Result<ActiveSlot, WorkflowError> {
        let mut active = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if !active.insert(subject_id.to_string()) {
            return Err(WorkflowError::AlreadyActive(subject_id.to_string()));
        }

        Ok(ActiveSlot {
            subject_id: subject_id.to_string(),
            registry: Arc::clone(&self.inner),
        })
    }

    pub fn is_active(&self, subject_id: &str) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(subject_id)
    }
}

/// Claim on a subject; released on drop
pub struct ActiveSlot {
    subject_id: String,
    registry: Arc<Mutex<HashSet<String>>>,
}

impl ActiveSlot {
    pub fn subject_id(&self) -> &str {
        &self.subject_id
    }
}

impl Drop for ActiveSlot {
    fn drop(&mut self) {
        let mut active = self.registry.lock().unwrap_or_else(|e| e.into_inner());
        active.remove(&self.subject_id);
    }
}

/// One confirmation for one subject
pub struct ConfirmationWorkflow {
    slot: Option<ActiveSlot>,
    subject_id: String,
    mode: ConfirmMode,
    detected: PointPair,
    timeout: Duration,
    deadline: Option<Instant>,
    state: ConfirmationState,
    resolution: Option<Resolution>,
    display: Option<Box<dyn DisplayHandle>>,
}

impl ConfirmationWorkflow {
    pub fn new(slot: ActiveSlot, mode: ConfirmMode, detected: PointPair, timeout: Duration) -> Self {
        ConfirmationWorkflow {
            subject_id: slot.subject_id().to_string(),
            slot: Some(slot),
            mode,
            detected,
            timeout,
            deadline: None,
            state: ConfirmationState::Pending,
            resolution: None,
            display: None,
        }
    }

    pub fn with_display(mut self, display: Box<dyn DisplayHandle>) -> Self {
        self.display = Some(display);
        self
    }

    pub fn subject_id(&self) -> &str {
        &self.subject_id
    }

    pub fn mode(&self) -> ConfirmMode {
        self.mode
    }

    pub fn state(&self) -> ConfirmationState {
        self.state
    }

    pub fn detected(&self) -> PointPair {
        self.detected
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn resolution(&self) -> Option<&Resolution> {
        self.resolution.as_ref()
    }

    /// Time left before auto-confirmation
    pub fn remaining(&self, now: Instant) -> Duration {
        match self.deadline {
            Some(deadline) => deadline.saturating_duration_since(now),
            None => self.timeout,
        }
    }

    /// Show the points and start the timeout
    pub fn begin(&mut self, now: Instant) -> Result<(), WorkflowError> {
        match self.state {
            ConfirmationState::Pending => {}
            ConfirmationState::Closed => return Err(WorkflowError::Closed(self.subject_id.clone())),
            state => {
                return Err(WorkflowError::InvalidTransition {
                    state,
                    signal: "begin",
                })
            }
        }

        if let Some(display) = self.display.as_mut() {
            display.show(&self.subject_id, &self.detected);
        }
        self.deadline = Some(now + self.timeout);
        self.state = ConfirmationState::AwaitingInput;

        log::info!(
            "Awaiting {} for {} ({}s timeout)",
            self.mode.to_string(),
            self.subject_id,
            self.timeout.as_secs()
        );
        Ok(())
    }

    /// Apply an operator signal
    ///
    /// A signal arriving at or after the deadline resolves as a timeout. An
    /// invalid signal leaves the workflow waiting.
    pub fn handle(&mut self, signal: ConfirmationSignal, now: Instant) -> Result<ConfirmationState, WorkflowError> {
        match self.state {
            ConfirmationState::AwaitingInput => {}
            ConfirmationState::Closed => return Err(WorkflowError::Closed(self.subject_id.clone())),
            state => {
                return Err(WorkflowError::InvalidTransition {
                    state,
                    signal: signal.name(),
                })
            }
        }

        if self.expired(now) && signal != ConfirmationSignal::Timeout {
            log::warn!(
                "Late {} for {} ignored, deadline already passed",
                signal.name(),
                self.subject_id
            );
            return Ok(self.resolve(Resolution::AutoConfirmed { points: self.detected }));
        }

        let resolution = match signal {
            ConfirmationSignal::Accept => Resolution::Confirmed { points: self.detected },
            ConfirmationSignal::Reject => Resolution::Skipped,
            ConfirmationSignal::Timeout => Resolution::AutoConfirmed { points: self.detected },
            ConfirmationSignal::Correct { points } => match self.mode {
                ConfirmMode::Training => Resolution::Corrected {
                    detected: self.detected,
                    corrected: points,
                },
                ConfirmMode::Confirmation => {
                    return Err(WorkflowError::InvalidSignal {
                        mode: self.mode,
                        signal: signal.name(),
                    })
                }
            },
        };

        Ok(self.resolve(resolution))
    }

    /// Auto-confirm if the deadline has passed
    pub fn poll(&mut self, now: Instant) -> ConfirmationState {
        if self.state == ConfirmationState::AwaitingInput && self.expired(now) {
            return self.resolve(Resolution::AutoConfirmed { points: self.detected });
        }
        self.state
    }

    /// Resolve as skipped without operator input
    pub fn cancel(&mut self) -> ConfirmationState {
        if matches!(self.state, ConfirmationState::Pending | ConfirmationState::AwaitingInput) {
            return self.resolve(Resolution::Skipped);
        }
        self.state
    }

    /// Release the display and the subject claim
    /// An unresolved workflow closes as skipped
    pub fn close(&mut self) -> Result<Resolution, WorkflowError> {
        if self.state == ConfirmationState::Closed {
            return Err(WorkflowError::Closed(self.subject_id.clone()));
        }

        self.cancel();
        self.release();
        self.state = ConfirmationState::Closed;

        Ok(self.resolution.unwrap_or(Resolution::Skipped))
    }

    fn expired(&self, now: Instant) -> bool {
        self.deadline.map(|d| now >= d).unwrap_or(false)
    }

    fn resolve(&mut self, resolution: Resolution) -> ConfirmationState {
        log::info!("Confirmation for {} resolved: {:?}", self.subject_id, resolution.state());
        self.state = resolution.state();
        self.resolution = Some(resolution);
        self.state
    }

    fn release(&mut self) {
        if let Some(mut display) = self.display.take() {
            display.release();
        }
        self.slot.take();
    }
}

impl Drop for ConfirmationWorkflow {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chart::ScreenPoint;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ManualClock {
        base: Instant,
        elapsed: Mutex<Duration>,
    }

    impl ManualClock {
        fn new() -> Self {
            ManualClock {
                base: Instant::now(),
                elapsed: Mutex::new(Duration::ZERO),
            }
        }

        fn advance(&self, by: Duration) {
            *self.elapsed.lock().unwrap() += by;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> Instant {
            self.base + *self.elapsed.lock().unwrap()
        }
    }

    fn points() -> PointPair {
        PointPair::new(ScreenPoint::new(10.0, 20.0), ScreenPoint::new(30.0, 40.0))
    }

    fn workflow(registry: &ActiveConfirmations, mode: ConfirmMode) -> ConfirmationWorkflow {
        let slot = registry.acquire("farm-1").unwrap();
        ConfirmationWorkflow::new(slot, mode, points(), Duration::from_secs(60))
    }

    struct CountingDisplay {
        shown: Arc<AtomicUsize>,
        released: Arc<AtomicUsize>,
    }

    impl DisplayHandle for CountingDisplay {
        fn show(&mut self, _subject_id: &str, _points: &PointPair) {
            self.shown.fetch_add(1, Ordering::SeqCst);
        }

        fn release(&mut self) {
            self.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_accept_confirms() {
        let registry = ActiveConfirmations::new();
        let clock = ManualClock::new();
        let mut wf = workflow(&registry, ConfirmMode::Confirmation);

        assert_eq!(wf.state(), ConfirmationState::Pending);
        wf.begin(clock.now()).unwrap();
        assert_eq!(wf.state(), ConfirmationState::AwaitingInput);

        let state = wf.handle(ConfirmationSignal::Accept, clock.now()).unwrap();
        assert_eq!(state, ConfirmationState::Confirmed);
        assert_eq!(wf.close().unwrap(), Resolution::Confirmed { points: points() });
        assert_eq!(wf.state(), ConfirmationState::Closed);
    }

    #[test]
    fn test_reject_skips() {
        let registry = ActiveConfirmations::new();
        let clock = ManualClock::new();
        let mut wf = workflow(&registry, ConfirmMode::Confirmation);
        wf.begin(clock.now()).unwrap();

        wf.handle(ConfirmationSignal::Reject, clock.now()).unwrap();
        let resolution = wf.close().unwrap();
        assert_eq!(resolution, Resolution::Skipped);
        assert_eq!(resolution.click_points(), None);
    }

    #[test]
    fn test_correct_in_training_mode() {
        let registry = ActiveConfirmations::new();
        let clock = ManualClock::new();
        let mut wf = workflow(&registry, ConfirmMode::Training);
        wf.begin(clock.now()).unwrap();

        let corrected = PointPair::new(ScreenPoint::new(12.0, 18.0), ScreenPoint::new(33.0, 41.0));
        let state = wf
            .handle(ConfirmationSignal::Correct { points: corrected }, clock.now())
            .unwrap();

        assert_eq!(state, ConfirmationState::Corrected);
        assert_eq!(
            wf.close().unwrap(),
            Resolution::Corrected {
                detected: points(),
                corrected
            }
        );
    }

    #[test]
    fn test_correct_rejected_in_confirmation_mode() {
        let registry = ActiveConfirmations::new();
        let clock = ManualClock::new();
        let mut wf = workflow(&registry, ConfirmMode::Confirmation);
        wf.begin(clock.now()).unwrap();

        let result = wf.handle(ConfirmationSignal::Correct { points: points() }, clock.now());
        assert_eq!(
            result,
            Err(WorkflowError::InvalidSignal {
                mode: ConfirmMode::Confirmation,
                signal: "correct"
            })
        );
        // Still waiting
        assert_eq!(wf.state(), ConfirmationState::AwaitingInput);
        assert_eq!(
            wf.handle(ConfirmationSignal::Accept, clock.now()).unwrap(),
            ConfirmationState::Confirmed
        );
    }

    #[test]
    fn test_timeout_auto_confirms_with_detected_points() {
        let registry = ActiveConfirmations::new();
        let clock = ManualClock::new();
        let mut wf = workflow(&registry, ConfirmMode::Confirmation);
        wf.begin(clock.now()).unwrap();

        clock.advance(Duration::from_secs(59));
        assert_eq!(wf.poll(clock.now()), ConfirmationState::AwaitingInput);
        assert_eq!(wf.remaining(clock.now()), Duration::from_secs(1));

        clock.advance(Duration::from_secs(1));
        assert_eq!(wf.poll(clock.now()), ConfirmationState::AutoConfirmed);
        assert_eq!(wf.close().unwrap(), Resolution::AutoConfirmed { points: points() });
    }

    #[test]
    fn test_late_signal_resolves_as_timeout() {
        let registry = ActiveConfirmations::new();
        let clock = ManualClock::new();
        let mut wf = workflow(&registry, ConfirmMode::Confirmation);
        wf.begin(clock.now()).unwrap();

        clock.advance(Duration::from_secs(61));
        let state = wf.handle(ConfirmationSignal::Reject, clock.now()).unwrap();
        assert_eq!(state, ConfirmationState::AutoConfirmed);
    }

    #[test]
    fn test_no_transitions_after_close() {
        let registry = ActiveConfirmations::new();
        let clock = ManualClock::new();
        let mut wf = workflow(&registry, ConfirmMode::Confirmation);
        wf.begin(clock.now()).unwrap();
        wf.handle(ConfirmationSignal::Accept, clock.now()).unwrap();
        wf.close().unwrap();

        assert_eq!(
            wf.handle(ConfirmationSignal::Accept, clock.now()),
            Err(WorkflowError::Closed("farm-1".to_string()))
        );
        assert!(wf.close().is_err());
        assert!(wf.begin(clock.now()).is_err());
    }

    #[test]
    fn test_signal_before_begin_is_invalid() {
        let registry = ActiveConfirmations::new();
        let clock = ManualClock::new();
        let mut wf = workflow(&registry, ConfirmMode::Confirmation);

        let result = wf.handle(ConfirmationSignal::Accept, clock.now());
        assert!(matches!(result, Err(WorkflowError::InvalidTransition { .. })));
    }

    #[test]
    fn test_not_reentrant_per_subject() {
        let registry = ActiveConfirmations::new();
        let mut wf = workflow(&registry, ConfirmMode::Confirmation);

        assert!(registry.is_active("farm-1"));
        assert_eq!(
            registry.acquire("farm-1").err(),
            Some(WorkflowError::AlreadyActive("farm-1".to_string()))
        );
        // Other subjects are unaffected
        assert!(registry.acquire("farm-2").is_ok());

        wf.close().unwrap();
        assert!(!registry.is_active("farm-1"));
        assert!(registry.acquire("farm-1").is_ok());
    }

    #[test]
    fn test_drop_releases_claim() {
        let registry = ActiveConfirmations::new();
        {
            let _wf = workflow(&registry, ConfirmMode::Training);
            assert!(registry.is_active("farm-1"));
        }
        assert!(!registry.is_active("farm-1"));
    }

    #[test]
    fn test_close_releases_display_once() {
        let shown = Arc::new(AtomicUsize::new(0));
        let released = Arc::new(AtomicUsize::new(0));
        let registry = ActiveConfirmations::new();
        let clock = ManualClock::new();

        let mut wf = workflow(&registry, ConfirmMode::Confirmation).with_display(Box::new(CountingDisplay {
            shown: Arc::clone(&shown),
            released: Arc::clone(&released),
        }));
        wf.begin(clock.now()).unwrap();
        assert_eq!(shown.load(Ordering::SeqCst), 1);

        wf.handle(ConfirmationSignal::Accept, clock.now()).unwrap();
        wf.close().unwrap();
        drop(wf);
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_close_unresolved_is_skipped() {
        let registry = ActiveConfirmations::new();
        let clock = ManualClock::new();
        let mut wf = workflow(&registry, ConfirmMode::Confirmation);
        wf.begin(clock.now()).unwrap();

        assert_eq!(wf.close().unwrap(), Resolution::Skipped);
    }

    #[test]
    fn test_mode_strings() {
        assert_eq!(ConfirmMode::from_string("training"), Some(ConfirmMode::Training));
        assert_eq!(ConfirmMode::Confirmation.to_string(), "confirmation");
        assert_eq!(ConfirmMode::from_string("bogus"), None);
    }
}
