// Confirmation driver
// Feeds channel signals into a workflow until it resolves or times out

use tokio::sync::mpsc;
use tokio::time;

use crate::confirm::workflow::{Clock, ConfirmationSignal, ConfirmationWorkflow, Resolution, WorkflowError};

/// Drive a workflow to resolution and close it
///
/// The workflow is begun if still pending. Invalid signals are logged and the
/// wait continues against the original deadline. A closed channel cancels the
/// workflow.
pub async fn await_resolution(
    workflow: &mut ConfirmationWorkflow,
    signals: &mut mpsc::Receiver<ConfirmationSignal>,
    clock: &dyn Clock,
) -> Result<Resolution, WorkflowError> {
    if workflow.deadline().is_none() {
        workflow.begin(clock.now())?;
    }

    loop {
        if workflow.poll(clock.now()).is_resolved() {
            break;
        }

        let remaining = workflow.remaining(clock.now());
        match time::timeout(remaining, signals.recv()).await {
            Ok(Some(signal)) => match workflow.handle(signal, clock.now()) {
                Ok(state) if state.is_resolved() => break,
                Ok(_) => {}
                Err(WorkflowError::InvalidSignal { mode, signal }) => {
                    log::warn!(
                        "Ignoring {} for {} in {} mode",
                        signal,
                        workflow.subject_id(),
                        mode.to_string()
                    );
                }
                Err(e) => return Err(e),
            },
            Ok(None) => {
                log::warn!("Signal channel closed for {}, skipping", workflow.subject_id());
                workflow.cancel();
                break;
            }
            Err(_) => {
                workflow.handle(ConfirmationSignal::Timeout, clock.now())?;
                break;
            }
        }
    }

    workflow.close()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chart::{PointPair, ScreenPoint};
    use crate::confirm::workflow::{ActiveConfirmations, ConfirmMode, ConfirmationState, TokioClock};
    use std::time::Duration;

    fn points() -> PointPair {
        PointPair::new(ScreenPoint::new(1.0, 2.0), ScreenPoint::new(3.0, 4.0))
    }

    fn workflow(registry: &ActiveConfirmations, mode: ConfirmMode, secs: u64) -> ConfirmationWorkflow {
        let slot = registry.acquire("node-7").unwrap();
        ConfirmationWorkflow::new(slot, mode, points(), Duration::from_secs(secs))
    }

    #[tokio::test(start_paused = true)]
    async fn test_accept_from_channel() {
        let registry = ActiveConfirmations::new();
        let mut wf = workflow(&registry, ConfirmMode::Confirmation, 60);
        let (tx, mut rx) = mpsc::channel(4);

        tx.send(ConfirmationSignal::Accept).await.unwrap();
        let resolution = await_resolution(&mut wf, &mut rx, &TokioClock).await.unwrap();

        assert_eq!(resolution, Resolution::Confirmed { points: points() });
        assert_eq!(wf.state(), ConfirmationState::Closed);
        assert!(!registry.is_active("node-7"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_auto_confirms() {
        let registry = ActiveConfirmations::new();
        let mut wf = workflow(&registry, ConfirmMode::Confirmation, 60);
        let (_tx, mut rx) = mpsc::channel::<ConfirmationSignal>(4);

        let started = time::Instant::now();
        let resolution = await_resolution(&mut wf, &mut rx, &TokioClock).await.unwrap();

        assert_eq!(resolution, Resolution::AutoConfirmed { points: points() });
        assert!(started.elapsed() >= Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_training_timeout_is_shorter() {
        let registry = ActiveConfirmations::new();
        let mut wf = workflow(&registry, ConfirmMode::Training, 30);
        let (_tx, mut rx) = mpsc::channel::<ConfirmationSignal>(4);

        let started = time::Instant::now();
        await_resolution(&mut wf, &mut rx, &TokioClock).await.unwrap();

        let waited = started.elapsed();
        assert!(waited >= Duration::from_secs(30));
        assert!(waited < Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_channel_skips() {
        let registry = ActiveConfirmations::new();
        let mut wf = workflow(&registry, ConfirmMode::Confirmation, 60);
        let (tx, mut rx) = mpsc::channel::<ConfirmationSignal>(4);
        drop(tx);

        let resolution = await_resolution(&mut wf, &mut rx, &TokioClock).await.unwrap();
        assert_eq!(resolution, Resolution::Skipped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_correction_keeps_waiting() {
        let registry = ActiveConfirmations::new();
        let mut wf = workflow(&registry, ConfirmMode::Confirmation, 60);
        let (tx, mut rx) = mpsc::channel(4);

        tx.send(ConfirmationSignal::Correct { points: points() }).await.unwrap();
        tx.send(ConfirmationSignal::Reject).await.unwrap();

        let resolution = await_resolution(&mut wf, &mut rx, &TokioClock).await.unwrap();
        assert_eq!(resolution, Resolution::Skipped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delayed_correction_in_training() {
        let registry = ActiveConfirmations::new();
        let mut wf = workflow(&registry, ConfirmMode::Training, 30);
        let (tx, mut rx) = mpsc::channel(4);

        let corrected = PointPair::new(ScreenPoint::new(5.0, 5.0), ScreenPoint::new(6.0, 6.0));
        tokio::spawn(async move {
            time::sleep(Duration::from_secs(10)).await;
            let _ = tx.send(ConfirmationSignal::Correct { points: corrected }).await;
        });

        let resolution = await_resolution(&mut wf, &mut rx, &TokioClock).await.unwrap();
        assert_eq!(
            resolution,
            Resolution::Corrected {
                detected: points(),
                corrected
            }
        );
    }
}
