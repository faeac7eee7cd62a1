//! Tunable configuration consumed at search start.
//!
//! The host owns one of these and passes it by reference; workers snapshot
//! the hot-path fields into locals when a search begins, so no option is
//! read inside the inner loops.

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct SearchOptions {
    /// Number of search threads (1 = single main worker).
    pub threads: usize,
    /// Transposition table size in megabytes.
    pub hash_mb: usize,
    /// Number of principal variations to report.
    pub multi_pv: usize,
    /// Milliseconds reserved per move for I/O and GUI latency.
    pub move_overhead_ms: u64,
    /// Percentage scaling of the optimum time budget.
    pub slow_mover_pct: u64,
    /// Floor on the optimum time budget in milliseconds.
    pub minimum_thinking_ms: u64,
    /// Emit progress lines on aspiration fail-high/low.
    pub fail_info_enabled: bool,
    /// First fail-info line only after this much elapsed time…
    pub fail_info_first_ms: u64,
    /// …or after this many nodes, whichever comes first.
    pub fail_info_min_nodes: u64,
    /// Minimum interval between fail-info lines.
    pub fail_info_rate_ms: u64,
    /// Experimental: soften LMR on checks and captures (0 = neutral).
    pub attack_inclination: i32,
    /// Experimental: extra SEE tolerance in centipawns for checking moves
    /// in quiescence (0 = neutral).
    pub check_sacrifice_tolerance_cp: i32,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            threads: 1,
            hash_mb: 16,
            multi_pv: 1,
            move_overhead_ms: 10,
            slow_mover_pct: 100,
            minimum_thinking_ms: 20,
            fail_info_enabled: true,
            fail_info_first_ms: 3_000,
            fail_info_min_nodes: 2_000_000,
            fail_info_rate_ms: 200,
            attack_inclination: 0,
            check_sacrifice_tolerance_cp: 0,
        }
    }
}
