//! Root move bookkeeping.

use shakmaty::Move;

use crate::value::{Value, VALUE_INFINITE, VALUE_NONE, VALUE_ZERO};

/// One legal root move with the state the driver keeps across iterations.
///
/// Owned and mutated by a single worker. `score` is reset each iteration
/// (non-PV moves drop to `-VALUE_INFINITE` so the stable sort keeps their
/// relative order); `previous_score` and the running averages survive so the
/// ordering and the aspiration centre stay stable.
#[derive(Debug, Clone)]
pub struct RootMove {
    pub pv: Vec<Move>,
    pub score: Value,
    pub previous_score: Value,
    pub average_score: Value,
    pub mean_squared_score: i64,
    /// Score reported to the host; may be a window bound on fail-high/low.
    pub uci_score: Value,
    pub score_lowerbound: bool,
    pub score_upperbound: bool,
    pub sel_depth: usize,
    /// Tablebase rank; higher ranks are searched first and multiPV never
    /// mixes ranks.
    pub tb_rank: i32,
    pub tb_score: Value,
    /// Nodes spent under this move, for the node-effort stop rule.
    pub effort: u64,
}

impl RootMove {
    pub fn new(mv: Move) -> Self {
        Self {
            pv: vec![mv],
            score: -VALUE_INFINITE,
            previous_score: -VALUE_INFINITE,
            average_score: -VALUE_INFINITE,
            mean_squared_score: -(VALUE_INFINITE as i64) * VALUE_INFINITE as i64,
            uci_score: VALUE_ZERO,
            score_lowerbound: false,
            score_upperbound: false,
            sel_depth: 0,
            tb_rank: 0,
            tb_score: VALUE_NONE,
            effort: 0,
        }
    }

    pub fn root_move(&self) -> &Move {
        &self.pv[0]
    }

    /// Fold a fresh iteration score into the running averages.
    pub fn record_score(&mut self, value: Value) {
        self.average_score = if self.average_score == -VALUE_INFINITE {
            value
        } else {
            (value + self.average_score) / 2
        };
        let squared = value as i64 * value.unsigned_abs() as i64;
        self.mean_squared_score =
            if self.mean_squared_score == -(VALUE_INFINITE as i64) * VALUE_INFINITE as i64 {
                squared
            } else {
                (squared + self.mean_squared_score) / 2
            };
    }
}

/// Stable sort of a root-move range by (score, previous score) descending.
///
/// Stability matters: within an iteration every move except the PV keeps
/// `-VALUE_INFINITE`, and their pre-existing order must be preserved.
pub fn sort_root_moves(moves: &mut [RootMove]) {
    moves.sort_by(|a, b| {
        (b.score, b.previous_score).cmp(&(a.score, a.previous_score))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::Board;

    fn root_moves() -> Vec<RootMove> {
        Board::starting_position()
            .legal_moves()
            .iter()
            .map(|m| RootMove::new(m.clone()))
            .collect()
    }

    #[test]
    fn averages_start_from_first_score() {
        let mut rm = root_moves().remove(0);
        rm.record_score(40);
        assert_eq!(rm.average_score, 40);
        assert_eq!(rm.mean_squared_score, 1600);

        rm.record_score(0);
        assert_eq!(rm.average_score, 20);
        assert_eq!(rm.mean_squared_score, 800);
    }

    #[test]
    fn sort_is_stable_for_unsearched_moves() {
        let mut moves = root_moves();
        let original: Vec<String> = moves.iter().map(|m| Board::move_uci(m.root_move())).collect();

        // Only one move has a real score; the rest stay -INFINITE.
        moves[5].score = 33;
        sort_root_moves(&mut moves);

        assert_eq!(Board::move_uci(moves[0].root_move()), original[5]);
        let rest: Vec<String> = moves[1..]
            .iter()
            .map(|m| Board::move_uci(m.root_move()))
            .collect();
        let expected: Vec<String> = original
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != 5)
            .map(|(_, s)| s.clone())
            .collect();
        assert_eq!(rest, expected, "unsearched moves must keep their order");
    }

    #[test]
    fn previous_score_breaks_ties() {
        let mut moves = root_moves();
        moves[0].score = 10;
        moves[0].previous_score = 5;
        moves[1].score = 10;
        moves[1].previous_score = 50;
        let first_uci = Board::move_uci(moves[1].root_move());
        sort_root_moves(&mut moves);
        assert_eq!(Board::move_uci(moves[0].root_move()), first_uci);
    }
}
