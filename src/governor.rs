//! Admission control against the extraction service: a concurrency ceiling
//! plus a rolling-window request budget with adaptive backpressure.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;

use crate::error::PapermetaError;

/// Result of asking the budget for a request slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reservation {
    /// Slot reserved; the call may start now.
    Ready,
    /// Budget exhausted; earliest instant a slot can free up.
    RetryAt(Instant),
}

/// Request-budget accounting behind the governor.
///
/// The provider's true limiting dimension (requests/sec, connections,
/// token budget) is not documented, so the accounting is a strategy; the
/// shipped implementation is a rolling request window.
pub trait BudgetModel: Send {
    fn try_reserve(&mut self, now: Instant) -> Reservation;
    /// The service signaled saturation; shrink the effective ceiling.
    fn throttle(&mut self, now: Instant);
    /// A call succeeded; relax toward the nominal ceiling after sustained
    /// success past the cooldown.
    fn note_success(&mut self, now: Instant);
    fn effective_ceiling(&self) -> u32;
}

/// At most `nominal` calls may start within any trailing `window`.
/// Consumption decays by elapsed time only — completions do not refund
/// the window, matching how provider-side rate limits behave.
pub struct RollingWindow {
    window: Duration,
    nominal: u32,
    effective: u32,
    starts: VecDeque<Instant>,
    cooldown: Duration,
    relax_step: u32,
    last_throttle: Option<Instant>,
    successes_since_step: u32,
}

/// Consecutive successes required (in addition to the cooldown) before one
/// relax step.
const RELAX_AFTER_SUCCESSES: u32 = 5;

impl RollingWindow {
    pub fn new(nominal: u32, window: Duration) -> Self {
        Self::with_cooldown(nominal, window, Duration::from_secs(10))
    }

    pub fn with_cooldown(nominal: u32, window: Duration, cooldown: Duration) -> Self {
        Self {
            window,
            nominal,
            effective: nominal,
            starts: VecDeque::new(),
            cooldown,
            relax_step: (nominal / 4).max(1),
            last_throttle: None,
            successes_since_step: 0,
        }
    }

    fn prune(&mut self, now: Instant) {
        while let Some(&front) = self.starts.front() {
            if now.duration_since(front) >= self.window {
                self.starts.pop_front();
            } else {
                break;
            }
        }
    }
}

impl BudgetModel for RollingWindow {
    fn try_reserve(&mut self, now: Instant) -> Reservation {
        self.prune(now);
        if (self.starts.len() as u32) < self.effective {
            self.starts.push_back(now);
            return Reservation::Ready;
        }
        // Full. The oldest start ages out first.
        let retry_at = self
            .starts
            .front()
            .map(|&front| front + self.window)
            .unwrap_or_else(|| now + self.window);
        Reservation::RetryAt(retry_at)
    }

    fn throttle(&mut self, now: Instant) {
        self.effective = (self.effective / 2).max(1);
        self.last_throttle = Some(now);
        self.successes_since_step = 0;
    }

    fn note_success(&mut self, now: Instant) {
        if self.effective >= self.nominal {
            return;
        }
        self.successes_since_step += 1;
        let cooled = self
            .last_throttle
            .is_none_or(|t| now.duration_since(t) >= self.cooldown);
        if cooled && self.successes_since_step >= RELAX_AFTER_SUCCESSES {
            self.effective = (self.effective + self.relax_step).min(self.nominal);
            self.successes_since_step = 0;
            // Each step restarts the cooldown for the next one.
            self.last_throttle = Some(now);
        }
    }

    fn effective_ceiling(&self) -> u32 {
        self.effective
    }
}

/// Enforces both ceilings. `acquire` waits first on a fair semaphore for a
/// concurrency slot (waiters are served FIFO), then on the window budget;
/// the returned guard frees only the concurrency slot on drop.
pub struct RateGovernor {
    semaphore: Arc<Semaphore>,
    budget: Mutex<Box<dyn BudgetModel>>,
}

impl fmt::Debug for RateGovernor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateGovernor")
            .field("available_permits", &self.semaphore.available_permits())
            .finish_non_exhaustive()
    }
}

/// Held for the duration of one in-flight call.
pub struct SlotGuard {
    _permit: OwnedSemaphorePermit,
}

impl RateGovernor {
    pub fn new(
        max_concurrent: usize,
        budget: Box<dyn BudgetModel>,
    ) -> Result<Self, PapermetaError> {
        if max_concurrent == 0 {
            return Err(PapermetaError::Config(
                "max_concurrency must be at least 1".into(),
            ));
        }
        if budget.effective_ceiling() == 0 {
            return Err(PapermetaError::Config(
                "rate ceiling must be at least 1 request per window".into(),
            ));
        }
        Ok(Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            budget: Mutex::new(budget),
        })
    }

    /// Governor with the default rolling-window budget.
    pub fn rolling(
        max_concurrent: usize,
        per_window: u32,
        window: Duration,
    ) -> Result<Self, PapermetaError> {
        Self::new(max_concurrent, Box::new(RollingWindow::new(per_window, window)))
    }

    /// Suspend until both a concurrency slot and a window slot are free,
    /// then reserve both atomically with respect to other callers.
    pub async fn acquire(&self) -> SlotGuard {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .expect("governor semaphore closed");
        loop {
            let reservation = {
                let mut budget = self.budget.lock().expect("budget lock poisoned");
                budget.try_reserve(Instant::now())
            };
            match reservation {
                Reservation::Ready => return SlotGuard { _permit: permit },
                Reservation::RetryAt(at) => tokio::time::sleep_until(at).await,
            }
        }
    }

    /// Saturation signal from a rate-limited failure.
    pub fn throttle(&self) {
        self.budget
            .lock()
            .expect("budget lock poisoned")
            .throttle(Instant::now());
    }

    /// Success signal feeding the relax side of the adaptive budget.
    pub fn note_success(&self) {
        self.budget
            .lock()
            .expect("budget lock poisoned")
            .note_success(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_concurrency_is_a_config_error() {
        let err = RateGovernor::rolling(0, 10, Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, PapermetaError::Config(_)));
    }

    #[test]
    fn zero_window_ceiling_is_a_config_error() {
        let err = RateGovernor::rolling(4, 0, Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, PapermetaError::Config(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn window_budget_defers_after_ceiling() {
        let mut w = RollingWindow::new(2, Duration::from_secs(1));
        let now = Instant::now();
        assert_eq!(w.try_reserve(now), Reservation::Ready);
        assert_eq!(w.try_reserve(now), Reservation::Ready);
        assert_eq!(
            w.try_reserve(now),
            Reservation::RetryAt(now + Duration::from_secs(1))
        );

        // After the window passes, old starts decay out.
        let later = now + Duration::from_millis(1100);
        assert_eq!(w.try_reserve(later), Reservation::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn window_consumption_decays_by_time_not_completion() {
        let mut w = RollingWindow::new(1, Duration::from_secs(1));
        let now = Instant::now();
        assert_eq!(w.try_reserve(now), Reservation::Ready);
        // Nothing "released" a slot; the budget stays consumed within the
        // window regardless of call completion.
        assert!(matches!(
            w.try_reserve(now + Duration::from_millis(500)),
            Reservation::RetryAt(_)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn throttle_halves_effective_ceiling_with_floor_one() {
        let mut w = RollingWindow::new(8, Duration::from_secs(1));
        let now = Instant::now();
        w.throttle(now);
        assert_eq!(w.effective_ceiling(), 4);
        w.throttle(now);
        w.throttle(now);
        w.throttle(now);
        assert_eq!(w.effective_ceiling(), 1);
        w.throttle(now);
        assert_eq!(w.effective_ceiling(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn sustained_success_after_cooldown_relaxes_toward_nominal() {
        let mut w =
            RollingWindow::with_cooldown(8, Duration::from_secs(1), Duration::from_secs(10));
        let now = Instant::now();
        w.throttle(now);
        assert_eq!(w.effective_ceiling(), 4);

        // Successes before the cooldown elapses do not relax.
        for _ in 0..20 {
            w.note_success(now + Duration::from_secs(1));
        }
        assert_eq!(w.effective_ceiling(), 4);

        // After the cooldown, sustained success steps the ceiling back up.
        let cooled = now + Duration::from_secs(11);
        for _ in 0..RELAX_AFTER_SUCCESSES {
            w.note_success(cooled);
        }
        assert_eq!(w.effective_ceiling(), 6);

        // The next step needs a fresh cooldown.
        for _ in 0..RELAX_AFTER_SUCCESSES {
            w.note_success(cooled + Duration::from_secs(1));
        }
        assert_eq!(w.effective_ceiling(), 6);

        let cooled_again = cooled + Duration::from_secs(11);
        for _ in 0..RELAX_AFTER_SUCCESSES {
            w.note_success(cooled_again);
        }
        assert_eq!(w.effective_ceiling(), 8);

        // Never above nominal.
        for _ in 0..50 {
            w.note_success(cooled_again + Duration::from_secs(20));
        }
        assert_eq!(w.effective_ceiling(), 8);
    }

    #[tokio::test(start_paused = true)]
    async fn acquire_blocks_on_concurrency_ceiling() {
        let gov = Arc::new(
            RateGovernor::rolling(1, 100, Duration::from_secs(1)).unwrap(),
        );
        let first = gov.acquire().await;

        let gov2 = Arc::clone(&gov);
        let waiter = tokio::spawn(async move {
            let _slot = gov2.acquire().await;
        });

        // The second acquire cannot proceed while the first slot is held.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        drop(first);
        waiter.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn acquire_waits_out_the_window() {
        let gov = RateGovernor::rolling(4, 1, Duration::from_millis(200)).unwrap();
        let started = Instant::now();
        drop(gov.acquire().await);
        drop(gov.acquire().await);
        // The second slot only opens after the first start ages out.
        assert!(started.elapsed() >= Duration::from_millis(200));
    }
}
