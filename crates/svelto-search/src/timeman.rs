//! Time manager: turns clock state into an optimum and a maximum budget for
//! the current move.
//!
//! The iterative-deepening driver scales `optimum` by its stability signals
//! (falling eval, best-move changes, time reduction) and stops between
//! iterations; `maximum` is the hard wall enforced from inside the search.

use std::time::Duration;

use shakmaty::Color;

use crate::limits::Limits;
use crate::options::SearchOptions;

/// Per-move time budgets in milliseconds.
#[derive(Debug, Clone, Copy)]
pub struct TimeManager {
    optimum: u64,
    maximum: u64,
}

impl TimeManager {
    /// Compute budgets for the side to move, or `None` when the limits do
    /// not put a clock on this search.
    pub fn new(
        limits: &Limits,
        side: Color,
        game_ply: u32,
        options: &SearchOptions,
    ) -> Option<TimeManager> {
        if let Some(movetime) = limits.movetime {
            let ms = movetime.as_millis() as u64;
            let ms = ms.saturating_sub(options.move_overhead_ms).max(1);
            return Some(TimeManager {
                optimum: ms,
                maximum: ms,
            });
        }

        if !limits.use_time_management(side) {
            return None;
        }

        let remaining = limits.time_for(side)?.as_millis() as u64;
        let inc = limits.inc_for(side).unwrap_or(Duration::ZERO).as_millis() as u64;
        let overhead = options.move_overhead_ms;

        // Horizon: either the declared time control or a slice that shrinks
        // slowly as the game goes on.
        let mtg = limits
            .movestogo
            .map(|m| m.clamp(1, 50))
            .unwrap_or_else(|| (50 - (game_ply / 10).min(20)) as u32) as u64;

        // Budget usable over the whole horizon, keeping one overhead slice
        // in reserve per expected move.
        let usable = (remaining + inc * (mtg - 1))
            .saturating_sub(overhead * (2 + mtg))
            .max(1);

        let base = usable / mtg + inc * 3 / 4;
        let optimum = (base * options.slow_mover_pct / 100)
            .max(options.minimum_thinking_ms)
            .min(remaining.saturating_sub(overhead).max(1));

        let maximum = (optimum * 11 / 2)
            .min(usable * 8 / 10)
            .min(remaining.saturating_sub(overhead).max(1))
            .max(optimum);

        Some(TimeManager { optimum, maximum })
    }

    /// Target budget; the driver may stop well before or somewhat after.
    pub fn optimum(&self) -> u64 {
        self.optimum
    }

    /// Hard cap never exceeded by the search.
    pub fn maximum(&self) -> u64 {
        self.maximum
    }

    pub fn maximum_duration(&self) -> Duration {
        Duration::from_millis(self.maximum)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clocked(secs: u64, inc_ms: u64, movestogo: Option<u32>) -> Limits {
        Limits {
            wtime: Some(Duration::from_secs(secs)),
            winc: (inc_ms > 0).then(|| Duration::from_millis(inc_ms)),
            movestogo,
            ..Limits::default()
        }
    }

    #[test]
    fn no_clock_means_no_manager() {
        let limits = Limits::depth(10);
        assert!(TimeManager::new(&limits, Color::White, 0, &SearchOptions::default()).is_none());
    }

    #[test]
    fn movetime_is_taken_whole_minus_overhead() {
        let limits = Limits::movetime(Duration::from_millis(1000));
        let tm = TimeManager::new(&limits, Color::White, 0, &SearchOptions::default()).unwrap();
        assert_eq!(tm.optimum(), tm.maximum());
        assert!(tm.maximum() <= 1000 && tm.maximum() >= 900);
    }

    #[test]
    fn five_minute_clock_spends_a_sensible_slice() {
        let tm = TimeManager::new(
            &clocked(300, 0, None),
            Color::White,
            0,
            &SearchOptions::default(),
        )
        .unwrap();
        // Roughly 1/50 of the clock, never more than a fifth of it.
        assert!(tm.optimum() >= 2_000, "optimum={}", tm.optimum());
        assert!(tm.optimum() <= 12_000, "optimum={}", tm.optimum());
        assert!(tm.maximum() <= 300_000 / 4, "maximum={}", tm.maximum());
        assert!(tm.maximum() >= tm.optimum());
    }

    #[test]
    fn increment_extends_the_budget() {
        let no_inc = TimeManager::new(
            &clocked(60, 0, None),
            Color::White,
            20,
            &SearchOptions::default(),
        )
        .unwrap();
        let with_inc = TimeManager::new(
            &clocked(60, 2000, None),
            Color::White,
            20,
            &SearchOptions::default(),
        )
        .unwrap();
        assert!(with_inc.optimum() > no_inc.optimum());
    }

    #[test]
    fn movestogo_divides_the_clock() {
        let tm = TimeManager::new(
            &clocked(60, 0, Some(10)),
            Color::White,
            0,
            &SearchOptions::default(),
        )
        .unwrap();
        assert!(tm.optimum() >= 4_000 && tm.optimum() <= 8_000, "optimum={}", tm.optimum());
    }

    #[test]
    fn slow_mover_scales_optimum() {
        let mut options = SearchOptions::default();
        let normal = TimeManager::new(&clocked(300, 0, None), Color::White, 0, &options).unwrap();
        options.slow_mover_pct = 50;
        let fast = TimeManager::new(&clocked(300, 0, None), Color::White, 0, &options).unwrap();
        assert!(fast.optimum() < normal.optimum());
    }

    #[test]
    fn minimum_thinking_time_floors_the_budget() {
        let mut options = SearchOptions::default();
        options.minimum_thinking_ms = 400;
        let tm = TimeManager::new(&clocked(2, 0, None), Color::White, 0, &options).unwrap();
        assert!(tm.optimum() >= 400);
        // But never beyond what the clock has.
        assert!(tm.maximum() <= 2_000);
    }

    #[test]
    fn desperate_clock_still_returns_positive_budget() {
        let tm = TimeManager::new(
            &clocked(0, 0, None),
            Color::White,
            100,
            &SearchOptions::default(),
        );
        // wtime = 0 still yields a manager with the 1 ms floor.
        let tm = tm.unwrap();
        assert!(tm.optimum() >= 1);
        assert!(tm.maximum() >= 1);
    }
}
