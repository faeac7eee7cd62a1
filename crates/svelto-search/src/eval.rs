//! Static evaluation seam.
//!
//! The search only needs `evaluate(position, optimism) -> Value`; a neural
//! evaluator plugs in behind [`Evaluate`]. The bundled [`MaterialEval`] is a
//! deliberately small material + piece-square evaluation so the crate is
//! playable and testable on its own.

use shakmaty::{Color, Role, Square};

use crate::board::{role_value, Board};
use crate::value::{Value, VALUE_TB_LOSS_IN_MAX_PLY, VALUE_TB_WIN_IN_MAX_PLY};

/// Static evaluator from the side to move's perspective.
///
/// Implementations must never return a value inside the mate/TB bands; the
/// search clamps whatever comes back into the non-decisive range.
pub trait Evaluate: Send + Sync {
    /// Evaluate `board` in centipawns for the side to move. `optimism` is a
    /// small per-colour bias the driver derives from recent root scores.
    fn evaluate(&self, board: &Board, optimism: Value) -> Value;
}

/// Centre-weighted square bonus, applied to knights and bishops.
#[rustfmt::skip]
const CENTRE_BONUS: [Value; 64] = [
    -18, -12,  -8,  -6,  -6,  -8, -12, -18,
    -12,  -4,   0,   3,   3,   0,  -4, -12,
     -8,   0,   6,   9,   9,   6,   0,  -8,
     -6,   3,   9,  14,  14,   9,   3,  -6,
     -6,   3,   9,  14,  14,   9,   3,  -6,
     -8,   0,   6,   9,   9,   6,   0,  -8,
    -12,  -4,   0,   3,   3,   0,  -4, -12,
    -18, -12,  -8,  -6,  -6,  -8, -12, -18,
];

/// Pawn advancement bonus per rank from its own side (rank 2 .. rank 7).
const PAWN_ADVANCE: [Value; 8] = [0, 0, 2, 6, 12, 24, 48, 0];

const TEMPO: Value = 14;

/// Material and piece placement, tapered only by pawn advancement.
pub struct MaterialEval;

impl MaterialEval {
    fn side_score(&self, board: &Board, color: Color) -> Value {
        let mut score = 0;
        for sq in board.by_color(color) {
            let role = board.role_at(sq).expect("occupied square");
            score += role_value(role);
            let oriented = oriented_square(sq, color);
            match role {
                Role::Pawn => {
                    score += PAWN_ADVANCE[oriented as usize / 8];
                }
                Role::Knight | Role::Bishop => {
                    score += CENTRE_BONUS[oriented as usize];
                }
                _ => {}
            }
        }
        score
    }
}

/// Mirror a square vertically for black so tables read from white's view.
fn oriented_square(sq: Square, color: Color) -> u32 {
    match color {
        Color::White => u32::from(sq),
        Color::Black => u32::from(sq) ^ 56,
    }
}

impl Evaluate for MaterialEval {
    fn evaluate(&self, board: &Board, optimism: Value) -> Value {
        let us = board.side_to_move();
        let raw = self.side_score(board, us) - self.side_score(board, !us) + TEMPO;
        let v = raw + optimism * (80 + raw.abs() / 8) / 256;
        v.clamp(VALUE_TB_LOSS_IN_MAX_PLY + 1, VALUE_TB_WIN_IN_MAX_PLY - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn startpos_is_near_balanced() {
        let board = Board::starting_position();
        let v = MaterialEval.evaluate(&board, 0);
        assert!(v.abs() <= 50, "startpos eval {v} should be close to zero");
    }

    #[test]
    fn extra_queen_dominates() {
        // White queen vs bare king.
        let board: Board = "4k3/8/8/8/8/8/8/3QK3 w - - 0 1".parse().unwrap();
        let v = MaterialEval.evaluate(&board, 0);
        assert!(v > 800, "queen-up eval {v}");

        // Same position from black's perspective is mirrored.
        let board: Board = "4k3/8/8/8/8/8/8/3QK3 b - - 0 1".parse().unwrap();
        let v = MaterialEval.evaluate(&board, 0);
        assert!(v < -800, "queen-down eval {v}");
    }

    #[test]
    fn advanced_pawn_beats_home_pawn() {
        let home: Board = "4k3/8/8/8/8/8/4P3/4K3 w - - 0 1".parse().unwrap();
        let advanced: Board = "4k3/4P3/8/8/8/8/8/4K3 w - - 0 1".parse().unwrap();
        assert!(
            MaterialEval.evaluate(&advanced, 0) > MaterialEval.evaluate(&home, 0),
            "a 7th-rank pawn must be worth more than a 2nd-rank pawn"
        );
    }

    #[test]
    fn optimism_shifts_toward_the_searcher() {
        let board = Board::starting_position();
        let neutral = MaterialEval.evaluate(&board, 0);
        let hopeful = MaterialEval.evaluate(&board, 60);
        let gloomy = MaterialEval.evaluate(&board, -60);
        assert!(hopeful > neutral);
        assert!(gloomy < neutral);
    }

    #[test]
    fn never_returns_decisive_values() {
        let board: Board = "k7/8/8/8/8/8/2QQQQQQ/4K3 w - - 0 1".parse().unwrap();
        let v = MaterialEval.evaluate(&board, 200);
        assert!(!crate::value::is_decisive(v));
    }
}
