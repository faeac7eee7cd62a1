//! Search limits handed to `go`.

use std::time::Duration;

use shakmaty::Color;

/// Budget and mode for one search.
///
/// Unset fields mean "no bound of that kind". With no bound at all the
/// search runs until stopped externally.
#[derive(Debug, Clone, Default)]
pub struct Limits {
    /// Maximum iterative-deepening depth.
    pub depth: Option<i32>,
    /// Node budget across all threads.
    pub nodes: Option<u64>,
    /// Fixed time for this move.
    pub movetime: Option<Duration>,
    /// Remaining clock time per side.
    pub wtime: Option<Duration>,
    pub btime: Option<Duration>,
    /// Increment per side.
    pub winc: Option<Duration>,
    pub binc: Option<Duration>,
    /// Moves to the next time control.
    pub movestogo: Option<u32>,
    /// Stop once a mate in at most this many moves is proven.
    pub mate: Option<u32>,
    /// Never stop on our own; wait for an external stop.
    pub infinite: bool,
    /// Start in ponder mode; the clock decision is deferred to `ponderhit`.
    pub ponder: bool,
}

impl Limits {
    /// Clock time for the side to move.
    pub fn time_for(&self, side: Color) -> Option<Duration> {
        match side {
            Color::White => self.wtime,
            Color::Black => self.btime,
        }
    }

    /// Increment for the side to move.
    pub fn inc_for(&self, side: Color) -> Option<Duration> {
        match side {
            Color::White => self.winc,
            Color::Black => self.binc,
        }
    }

    /// True when the search should consult the time manager: a clock is
    /// running and neither `movetime` nor `infinite` overrides it.
    pub fn use_time_management(&self, side: Color) -> bool {
        !self.infinite && self.movetime.is_none() && self.time_for(side).is_some()
    }

    /// Convenience constructor for a fixed-depth search.
    pub fn depth(depth: i32) -> Self {
        Self {
            depth: Some(depth),
            ..Self::default()
        }
    }

    /// Convenience constructor for a fixed-node search.
    pub fn nodes(nodes: u64) -> Self {
        Self {
            nodes: Some(nodes),
            ..Self::default()
        }
    }

    /// Convenience constructor for a fixed-time search.
    pub fn movetime(movetime: Duration) -> Self {
        Self {
            movetime: Some(movetime),
            ..Self::default()
        }
    }
}
