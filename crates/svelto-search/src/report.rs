//! Progress and result reporting.

use shakmaty::Move;

use crate::board::Board;
use crate::value::{Value, VALUE_MATE, VALUE_MATE_IN_MAX_PLY, VALUE_MATED_IN_MAX_PLY};

/// How a reported score relates to the true value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreBound {
    Exact,
    /// Fail-high: the true value is at least the reported one.
    Lower,
    /// Fail-low: the true value is at most the reported one.
    Upper,
}

/// A score in host-facing form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UciScore {
    /// Centipawns.
    Cp(Value),
    /// Moves (not plies) to mate; negative when getting mated.
    Mate(i32),
}

impl UciScore {
    pub fn from_value(v: Value) -> UciScore {
        if v >= VALUE_MATE_IN_MAX_PLY {
            UciScore::Mate((VALUE_MATE - v + 1) / 2)
        } else if v <= VALUE_MATED_IN_MAX_PLY {
            UciScore::Mate(-(VALUE_MATE + v) / 2)
        } else {
            UciScore::Cp(v)
        }
    }
}

/// One per-depth, per-PV-line progress record.
#[derive(Debug, Clone)]
pub struct SearchInfo {
    pub depth: i32,
    pub sel_depth: usize,
    /// 1-based MultiPV index.
    pub multipv: usize,
    pub score: UciScore,
    pub bound: ScoreBound,
    pub time_ms: u64,
    pub nodes: u64,
    pub nps: u64,
    pub tb_hits: u64,
    /// Transposition-table fill in permille.
    pub hashfull: usize,
    pub pv: Vec<Move>,
}

impl SearchInfo {
    /// The PV as space-separated UCI moves.
    pub fn pv_string(&self) -> String {
        self.pv
            .iter()
            .map(Board::move_uci)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Callbacks the host wires into a search. All calls come from the main
/// worker thread while the search runs.
pub trait SearchListener: Send {
    /// Full progress line: depth, score, nodes, PV.
    fn on_update_full(&mut self, _info: &SearchInfo) {}

    /// Long-search telemetry: which root move is being examined.
    fn on_iter(&mut self, _depth: i32, _curr_move: &Move, _curr_move_number: usize) {}

    /// Final result. `best` is `None` only when there is no legal move.
    fn on_bestmove(&mut self, _best: Option<&Move>, _ponder: Option<&Move>) {}
}

/// Listener that discards everything.
pub struct NullListener;

impl SearchListener for NullListener {}

/// Rate limiter for aspiration fail-high/low progress lines.
///
/// A line goes out only once the search is old enough (elapsed or nodes) and
/// not more often than the configured rate; the anchor resets at depth 1 of
/// every new search so short searches stay quiet.
pub struct FailInfoThrottle {
    enabled: bool,
    first_ms: u64,
    min_nodes: u64,
    rate_ms: u64,
    last_info_ms: i64,
}

impl FailInfoThrottle {
    pub fn new(enabled: bool, first_ms: u64, min_nodes: u64, rate_ms: u64) -> Self {
        Self {
            enabled,
            first_ms,
            min_nodes,
            rate_ms,
            last_info_ms: i64::MIN / 2,
        }
    }

    /// Reset the rate anchor; called when a search starts over at depth 1.
    pub fn reset(&mut self) {
        self.last_info_ms = i64::MIN / 2;
    }

    /// Whether to report now, recording the emission time if so.
    pub fn should_report(&mut self, elapsed_ms: u64, nodes: u64) -> bool {
        if !self.enabled {
            return false;
        }
        let now = elapsed_ms as i64;
        let first_gate = elapsed_ms >= self.first_ms || nodes >= self.min_nodes;
        let rate_ok = now - self.last_info_ms >= self.rate_ms as i64;
        if first_gate && rate_ok {
            self.last_info_ms = now;
            true
        } else {
            false
        }
    }
}
