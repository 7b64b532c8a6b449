//! Index-addressed, write-once storage for batch outcomes. Completion
//! order never affects delivery order: results are read back by
//! submission index.

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::Notify;

use crate::batch::{FailureKind, Outcome};

/// Message attached to outcomes synthesized when the batch deadline fires.
pub const TIMED_OUT_MESSAGE: &str = "timed out";

pub struct ResultCollector {
    slots: Mutex<Vec<Option<Outcome>>>,
    remaining: AtomicUsize,
    done: Notify,
}

impl ResultCollector {
    pub fn new(total: usize) -> Self {
        Self {
            slots: Mutex::new(vec![None; total]),
            remaining: AtomicUsize::new(total),
            done: Notify::new(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.remaining.load(Ordering::Acquire) == 0
    }

    /// Record the terminal outcome for one index. Slots are write-once:
    /// returns false (and discards the outcome) when the slot was already
    /// resolved — a late result arriving after the deadline synthetics.
    pub fn record(&self, index: usize, outcome: Outcome) -> bool {
        let mut slots = self.slots.lock().expect("slots lock poisoned");
        if slots[index].is_some() {
            return false;
        }
        slots[index] = Some(outcome);
        drop(slots);

        if self.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.done.notify_waiters();
        }
        true
    }

    /// Wait until every slot is resolved or the timeout elapses. Returns
    /// true when the batch completed within the deadline. Does not write
    /// anything; the caller decides how to handle unresolved slots.
    pub async fn await_all(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.completed()).await.is_ok()
    }

    /// Resolves once every slot holds an outcome.
    pub async fn completed(&self) {
        loop {
            let notified = self.done.notified();
            if self.is_complete() {
                return;
            }
            notified.await;
        }
    }

    /// Mark every unresolved slot with a synthetic timed-out failure so
    /// the batch terminates with exactly N outcomes. Returns the
    /// synthesized outcomes (for stats accounting).
    pub fn fill_unresolved(&self) -> Vec<Outcome> {
        let mut slots = self.slots.lock().expect("slots lock poisoned");
        let mut synthesized = Vec::new();
        for slot in slots.iter_mut() {
            if slot.is_none() {
                let outcome = Outcome::Failure {
                    kind: FailureKind::ServiceError,
                    message: TIMED_OUT_MESSAGE.into(),
                };
                *slot = Some(outcome.clone());
                synthesized.push(outcome);
            }
        }
        drop(slots);

        if !synthesized.is_empty()
            && self.remaining.fetch_sub(synthesized.len(), Ordering::AcqRel) == synthesized.len()
        {
            self.done.notify_waiters();
        }
        synthesized
    }

    /// Outcomes in original submission order. Only meaningful once the
    /// batch is complete; any slot still unresolved is reported as timed
    /// out rather than dropped.
    pub fn ordered_results(&self) -> Vec<Outcome> {
        let slots = self.slots.lock().expect("slots lock poisoned");
        slots
            .iter()
            .map(|slot| {
                slot.clone().unwrap_or_else(|| Outcome::Failure {
                    kind: FailureKind::ServiceError,
                    message: TIMED_OUT_MESSAGE.into(),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::FieldSet;

    fn success(tag: &str) -> Outcome {
        let mut fields = FieldSet::new();
        fields.insert("Title".into(), Some(tag.to_string()));
        Outcome::Success { fields }
    }

    #[test]
    fn results_come_back_in_submission_order() {
        let collector = ResultCollector::new(3);
        // Completion order 2, 0, 1.
        assert!(collector.record(2, success("c")));
        assert!(collector.record(0, success("a")));
        assert!(collector.record(1, success("b")));
        assert!(collector.is_complete());

        let results = collector.ordered_results();
        let titles: Vec<_> = results
            .iter()
            .map(|o| match o {
                Outcome::Success { fields } => fields["Title"].clone().unwrap(),
                Outcome::Failure { .. } => panic!("unexpected failure"),
            })
            .collect();
        assert_eq!(titles, vec!["a", "b", "c"]);
    }

    #[test]
    fn slots_are_write_once() {
        let collector = ResultCollector::new(1);
        assert!(collector.record(0, success("first")));
        assert!(!collector.record(0, success("second")));

        match &collector.ordered_results()[0] {
            Outcome::Success { fields } => {
                assert_eq!(fields["Title"], Some("first".to_string()));
            }
            Outcome::Failure { .. } => panic!("unexpected failure"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn await_all_returns_once_every_slot_resolves() {
        let collector = std::sync::Arc::new(ResultCollector::new(2));
        let waiter = {
            let collector = std::sync::Arc::clone(&collector);
            tokio::spawn(async move { collector.await_all(Duration::from_secs(5)).await })
        };

        collector.record(1, success("b"));
        collector.record(0, success("a"));
        assert!(waiter.await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn await_all_times_out_when_slots_stay_open() {
        let collector = ResultCollector::new(2);
        collector.record(0, success("a"));
        assert!(!collector.await_all(Duration::from_millis(100)).await);
    }

    #[test]
    fn fill_unresolved_synthesizes_timed_out_failures() {
        let collector = ResultCollector::new(3);
        collector.record(1, success("b"));

        let synthesized = collector.fill_unresolved();
        assert_eq!(synthesized.len(), 2);
        assert!(collector.is_complete());

        let results = collector.ordered_results();
        assert_eq!(
            results[0].failure_kind(),
            Some(FailureKind::ServiceError)
        );
        assert!(results[1].is_success());
        match &results[2] {
            Outcome::Failure { message, .. } => assert_eq!(message, TIMED_OUT_MESSAGE),
            Outcome::Success { .. } => panic!("expected synthetic failure"),
        }
    }

    #[test]
    fn late_result_after_fill_is_discarded() {
        let collector = ResultCollector::new(1);
        collector.fill_unresolved();

        assert!(!collector.record(0, success("late")));
        assert_eq!(
            collector.ordered_results()[0].failure_kind(),
            Some(FailureKind::ServiceError)
        );
    }

    #[test]
    fn fill_on_complete_batch_is_a_no_op() {
        let collector = ResultCollector::new(1);
        collector.record(0, success("a"));
        assert!(collector.fill_unresolved().is_empty());
        assert!(collector.ordered_results()[0].is_success());
    }
}
