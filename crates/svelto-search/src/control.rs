//! Cooperative search control: the shared stop flag, ponder state, and the
//! search clock.
//!
//! Workers poll [`is_stopped`](SearchControl::is_stopped) at every recursion
//! entry and return immediately when it rises. The main worker converts its
//! time and node budgets into [`abort`](SearchControl::abort) calls on a
//! decaying cadence; helpers never stop on their own. Pondering suppresses
//! every self-stop until `ponderhit`.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub struct SearchControl {
    stop: Arc<AtomicBool>,
    aborted: AtomicBool,
    ponder: AtomicBool,
    stop_on_ponderhit: AtomicBool,
    start: Instant,
}

impl SearchControl {
    /// Start the clock now. `ponder` defers every self-stop to `ponderhit`.
    pub fn new(stop: Arc<AtomicBool>, ponder: bool) -> Self {
        Self {
            stop,
            aborted: AtomicBool::new(false),
            ponder: AtomicBool::new(ponder),
            stop_on_ponderhit: AtomicBool::new(false),
            start: Instant::now(),
        }
    }

    /// Control for tests and analysis: external stop only.
    pub fn infinite(stop: Arc<AtomicBool>) -> Self {
        Self::new(stop, false)
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }

    /// External halt request.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    /// Halt mid-iteration; results of the running iteration are untrusted.
    pub fn abort(&self) {
        self.aborted.store(true, Ordering::Release);
        self.stop.store(true, Ordering::Release);
    }

    /// Whether the last stop interrupted an iteration.
    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }

    pub fn is_pondering(&self) -> bool {
        self.ponder.load(Ordering::Acquire)
    }

    /// Defer the stop decision: when the ponder move hits, stop right away
    /// instead of continuing to think.
    pub fn set_stop_on_ponderhit(&self) {
        self.stop_on_ponderhit.store(true, Ordering::Release);
    }

    /// Withdraw a deferred stop (an aspiration fail-low reopened the search).
    pub fn clear_stop_on_ponderhit(&self) {
        self.stop_on_ponderhit.store(false, Ordering::Release);
    }

    pub fn is_stop_on_ponderhit(&self) -> bool {
        self.stop_on_ponderhit.load(Ordering::Acquire)
    }

    /// The GUI converted the pondered move into a real search.
    pub fn ponderhit(&self) {
        self.ponder.store(false, Ordering::Release);
        if self.stop_on_ponderhit.load(Ordering::Acquire) {
            self.stop.store(true, Ordering::Release);
        }
    }

    /// Time since the search started.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed().as_millis() as u64
    }

    /// The shared stop flag, for hosts that keep their own handle.
    pub fn stop_flag(&self) -> &Arc<AtomicBool> {
        &self.stop
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh(ponder: bool) -> SearchControl {
        SearchControl::new(Arc::new(AtomicBool::new(false)), ponder)
    }

    #[test]
    fn external_stop_is_immediate() {
        let control = fresh(false);
        assert!(!control.is_stopped());
        control.request_stop();
        assert!(control.is_stopped());
        assert!(!control.is_aborted());
    }

    #[test]
    fn abort_marks_the_iteration_untrusted() {
        let control = fresh(false);
        control.abort();
        assert!(control.is_stopped());
        assert!(control.is_aborted());
    }

    #[test]
    fn ponderhit_releases_the_clock() {
        let control = fresh(true);
        assert!(control.is_pondering());
        control.ponderhit();
        assert!(!control.is_pondering());
        assert!(!control.is_stopped());
    }

    #[test]
    fn stop_on_ponderhit_fires_at_hit() {
        let control = fresh(true);
        control.set_stop_on_ponderhit();
        assert!(!control.is_stopped());
        control.ponderhit();
        assert!(control.is_stopped());
    }

    #[test]
    fn fail_low_withdraws_the_deferred_stop() {
        let control = fresh(true);
        control.set_stop_on_ponderhit();
        control.clear_stop_on_ponderhit();
        control.ponderhit();
        assert!(!control.is_stopped());
    }

    #[test]
    fn clock_runs_from_construction() {
        let control = fresh(false);
        std::thread::sleep(Duration::from_millis(2));
        assert!(control.elapsed() >= Duration::from_millis(1));
    }

    #[test]
    fn shared_flag_is_visible_to_the_host() {
        let stop = Arc::new(AtomicBool::new(false));
        let control = SearchControl::new(Arc::clone(&stop), false);
        stop.store(true, Ordering::Release);
        assert!(control.is_stopped());
        assert!(Arc::ptr_eq(control.stop_flag(), &stop));
    }
}
