//! Progress side-channel and coarse-grained cancellation.
//!
//! Both are passed explicitly to the orchestrator and batch executor. Neither
//! influences results: a reporter without a receiver, or a dropped receiver,
//! behaves exactly like no reporter at all.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;

use crate::models::SyncStep;

/// An event emitted while a pipeline or batch runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    /// A sync pipeline step was entered or finished.
    Step {
        step: SyncStep,
        message: String,
        timestamp: DateTime<Utc>,
    },
    /// A batch item is about to be processed (`index` is 1-based).
    Item {
        label: String,
        index: usize,
        total: usize,
        item: String,
    },
}

/// Optional sender half of the progress channel.
#[derive(Debug, Clone, Default)]
pub struct ProgressReporter {
    tx: Option<mpsc::UnboundedSender<ProgressEvent>>,
}

impl ProgressReporter {
    /// A reporter that drops every event.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Create a reporter together with its receiving end.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    pub fn from_sender(tx: mpsc::UnboundedSender<ProgressEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    pub fn is_enabled(&self) -> bool {
        self.tx.is_some()
    }

    pub fn step(&self, step: SyncStep, message: impl Into<String>) {
        self.emit(ProgressEvent::Step {
            step,
            message: message.into(),
            timestamp: Utc::now(),
        });
    }

    pub fn item(&self, label: &str, index: usize, total: usize, item: &str) {
        self.emit(ProgressEvent::Item {
            label: label.to_string(),
            index,
            total,
            item: item.to_string(),
        });
    }

    fn emit(&self, event: ProgressEvent) {
        if let Some(tx) = &self.tx {
            // A closed receiver only means nobody is watching.
            let _ = tx.send(event);
        }
    }
}

/// Shared flag checked between steps and between batch items.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_events_arrive_in_order() {
        let (reporter, mut rx) = ProgressReporter::channel();
        reporter.step(SyncStep::SafetyCheck, "checking");
        reporter.item("Cherry-picking", 1, 2, "a1b2c3");

        match rx.recv().await.unwrap() {
            ProgressEvent::Step { step, .. } => assert_eq!(step, SyncStep::SafetyCheck),
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(
            rx.recv().await.unwrap(),
            ProgressEvent::Item {
                label: "Cherry-picking".into(),
                index: 1,
                total: 2,
                item: "a1b2c3".into(),
            }
        );
    }

    #[test]
    fn test_dropped_receiver_is_ignored() {
        let (reporter, rx) = ProgressReporter::channel();
        drop(rx);
        reporter.step(SyncStep::Done, "done");
        assert!(reporter.is_enabled());
        ProgressReporter::disabled().step(SyncStep::Done, "done");
    }

    #[test]
    fn test_cancellation_is_shared() {
        let flag = CancellationFlag::new();
        let clone = flag.clone();
        assert!(!clone.is_cancelled());
        flag.cancel();
        assert!(clone.is_cancelled());
    }
}
