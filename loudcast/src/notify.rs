//! Job-completion fan-out between background analysis jobs and event
//! stream subscribers.
//!
//! The channel is created once at startup and handed explicitly to both
//! ends. Every stream connection holds its own subscriber queue, so a
//! published outcome reaches each connected client; with nobody connected
//! the outcome is dropped, because the producing job must never block on
//! delivery.

use tokio::sync::broadcast;

/// Terminal result of one analysis job.
///
/// The event stream layer pattern-matches on this when formatting the
/// outbound frame; a failure's reason stays in the server log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnalysisOutcome {
    /// The subprocess finished (or hit the tolerated timeout) and its
    /// output was reduced to the loudness summary.
    Completed { summary: String },
    /// The subprocess could not be launched, exited non-zero, or the job
    /// task panicked.
    Failed { reason: String },
}

/// Publish/subscribe handle for analysis outcomes.
#[derive(Debug, Clone)]
pub struct Notifier {
    tx: broadcast::Sender<AnalysisOutcome>,
}

impl Notifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Deliver an outcome to every current subscriber.
    ///
    /// Returns the number of subscribers reached; zero means nobody was
    /// connected and the outcome was dropped.
    pub fn publish(&self, outcome: AnalysisOutcome) -> usize {
        match self.tx.send(outcome) {
            Ok(receivers) => receivers,
            Err(_) => {
                tracing::warn!("Analysis outcome dropped: no event stream subscribers connected");
                0
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AnalysisOutcome> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_reaches_every_subscriber() {
        let notifier = Notifier::new(4);
        let mut first = notifier.subscribe();
        let mut second = notifier.subscribe();

        let outcome = AnalysisOutcome::Completed {
            summary: "Input Integrated:   -20.0 LUFS\n".to_string(),
        };
        assert_eq!(notifier.publish(outcome.clone()), 2);

        assert_eq!(first.recv().await.unwrap(), outcome);
        assert_eq!(second.recv().await.unwrap(), outcome);
    }

    #[tokio::test]
    async fn publish_without_subscribers_drops_the_outcome() {
        let notifier = Notifier::new(4);
        assert_eq!(notifier.subscriber_count(), 0);

        let reached = notifier.publish(AnalysisOutcome::Failed {
            reason: "exit code 1".to_string(),
        });
        assert_eq!(reached, 0);
    }

    #[tokio::test]
    async fn late_subscriber_misses_earlier_outcomes() {
        let notifier = Notifier::new(4);
        notifier.publish(AnalysisOutcome::Failed {
            reason: "nobody listening".to_string(),
        });

        let mut rx = notifier.subscribe();
        let outcome = AnalysisOutcome::Completed {
            summary: String::new(),
        };
        notifier.publish(outcome.clone());

        // Only the outcome published after subscribing is delivered
        assert_eq!(rx.recv().await.unwrap(), outcome);
        assert!(rx.try_recv().is_err());
    }
}
