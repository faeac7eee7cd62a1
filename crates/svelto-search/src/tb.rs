//! Endgame tablebase seam.
//!
//! The search consumes WDL probes and a root-ranking configuration through
//! [`TablebaseProbe`]; a failed probe is a soft error and simply skips the
//! tablebase path. [`SyzygyTablebases`] adapts `shakmaty-syzygy`.

use std::path::Path;

use shakmaty::Chess;
use shakmaty_syzygy::{Tablebase, Wdl};

use crate::board::Board;
use crate::value::Depth;

/// Win/draw/loss from the side to move's perspective: -2 loss, -1 blessed
/// loss, 0 draw, 1 cursed win, 2 win.
pub type WdlScore = i32;

/// Tablebase access as the search sees it.
pub trait TablebaseProbe: Send + Sync {
    /// Largest piece count covered; 0 disables probing entirely.
    fn cardinality(&self) -> usize;

    /// Minimum remaining depth before probing positions at the cardinality
    /// boundary.
    fn probe_depth(&self) -> Depth {
        1
    }

    /// Whether cursed wins / blessed losses count as draws.
    fn use_rule50(&self) -> bool {
        true
    }

    /// WDL for the position, or `None` when the probe fails.
    fn probe_wdl(&self, board: &Board) -> Option<WdlScore>;
}

/// Disabled tablebases; every probe misses.
pub struct NoTablebases;

impl TablebaseProbe for NoTablebases {
    fn cardinality(&self) -> usize {
        0
    }

    fn probe_wdl(&self, _board: &Board) -> Option<WdlScore> {
        None
    }
}

/// Syzygy tables loaded from disk.
pub struct SyzygyTablebases {
    tables: Tablebase<Chess>,
}

impl SyzygyTablebases {
    /// Load all tables found under `path`.
    pub fn new(path: &Path) -> std::io::Result<Self> {
        let mut tables = Tablebase::new();
        tables.add_directory(path)?;
        Ok(Self { tables })
    }
}

impl TablebaseProbe for SyzygyTablebases {
    fn cardinality(&self) -> usize {
        self.tables.max_pieces()
    }

    fn probe_wdl(&self, board: &Board) -> Option<WdlScore> {
        let wdl = self.tables.probe_wdl(board.inner()).ok()?.after_zeroing();
        Some(match wdl {
            Wdl::Loss => -2,
            Wdl::BlessedLoss => -1,
            Wdl::Draw => 0,
            Wdl::CursedWin => 1,
            Wdl::Win => 2,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_tables_never_hit() {
        let tb = NoTablebases;
        assert_eq!(tb.cardinality(), 0);
        let board: Board = "4k3/8/8/8/8/8/8/3QK3 w - - 0 1".parse().unwrap();
        assert!(tb.probe_wdl(&board).is_none());
    }

    #[test]
    fn missing_directory_is_an_error() {
        assert!(SyzygyTablebases::new(Path::new("/nonexistent/syzygy")).is_err());
    }
}
