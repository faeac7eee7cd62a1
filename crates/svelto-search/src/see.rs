//! Static Exchange Evaluation (SEE).
//!
//! Determines the material outcome of a sequence of captures on a single
//! square, assuming both sides use their least valuable attacker at each step.

use shakmaty::{attacks, Bitboard, Color, Move, Role, Square};

use crate::board::Board;
use crate::value::Value;

/// Exchange values. The king is priced high enough that a king recapture
/// ends any chain it enters on the losing side.
const SEE_VALUES: [Value; 6] = [100, 320, 330, 500, 900, 20_000];

fn see_value(role: Role) -> Value {
    SEE_VALUES[role as usize - 1]
}

/// All pieces attacking `sq` under the given occupancy.
///
/// Sliding attacks use `occ`, so removing pieces from it reveals X-ray
/// attackers behind them.
fn attackers_of(board: &Board, sq: Square, occ: Bitboard) -> Bitboard {
    let knights = attacks::knight_attacks(sq) & board.by_role(Role::Knight);
    let kings = attacks::king_attacks(sq) & board.by_role(Role::King);
    let rook_like =
        attacks::rook_attacks(sq, occ) & (board.by_role(Role::Rook) | board.by_role(Role::Queen));
    let bishop_like = attacks::bishop_attacks(sq, occ)
        & (board.by_role(Role::Bishop) | board.by_role(Role::Queen));
    // A pawn of colour C attacks sq iff sq is attacked "as if" by an
    // opposite-coloured pawn standing on sq.
    let white_pawns = attacks::pawn_attacks(Color::Black, sq)
        & board.by_role(Role::Pawn)
        & board.by_color(Color::White);
    let black_pawns = attacks::pawn_attacks(Color::White, sq)
        & board.by_role(Role::Pawn)
        & board.by_color(Color::Black);

    knights | kings | rook_like | bishop_like | white_pawns | black_pawns
}

/// Least valuable attacker for `side` within `attackers`.
fn least_valuable_attacker(
    board: &Board,
    attackers: Bitboard,
    side: Color,
) -> Option<(Square, Role)> {
    let side_bb = board.by_color(side);
    for role in [
        Role::Pawn,
        Role::Knight,
        Role::Bishop,
        Role::Rook,
        Role::Queen,
        Role::King,
    ] {
        let candidates = attackers & side_bb & board.by_role(role);
        if let Some(sq) = candidates.first() {
            return Some((sq, role));
        }
    }
    None
}

/// Full swap-list SEE: the material gain/loss from the side to move's
/// perspective after all profitable recaptures on the target square.
pub fn see(board: &Board, m: &Move) -> Value {
    let Some(src) = m.from() else {
        return 0;
    };
    let dst = m.to();
    let mut occ = board.occupied();

    let attacker_role = board.role_at(src).unwrap_or(Role::Pawn);

    let victim_value = if m.is_en_passant() {
        see_value(Role::Pawn)
    } else if let Some(victim) = board.role_at(dst) {
        see_value(victim)
    } else {
        0
    };

    // A promoting pawn turns into the promoted piece before any recapture.
    let attacker_value = match m.promotion() {
        Some(promo) => see_value(promo),
        None => see_value(attacker_role),
    };

    occ = occ.without(src);

    if m.is_en_passant() {
        let delta = if board.side_to_move() == Color::White {
            -8
        } else {
            8
        };
        if let Some(captured_sq) = dst.offset(delta) {
            occ = occ.without(captured_sq);
        }
    }

    let mut gain = [0 as Value; 32];
    let mut depth = 0usize;
    gain[0] = victim_value;

    // Value of the piece currently sitting on dst, the next victim.
    let mut next_victim_value = attacker_value;
    let mut side_to_move = !board.side_to_move();

    let mut all_attackers = attackers_of(board, dst, occ) & occ;

    loop {
        let Some((sq, role)) = least_valuable_attacker(board, all_attackers, side_to_move) else {
            break;
        };

        depth += 1;
        if depth >= 32 {
            break;
        }

        gain[depth] = next_victim_value - gain[depth - 1];
        next_victim_value = see_value(role);
        occ = occ.without(sq);

        // Refresh sliders for X-ray discovery behind the removed piece.
        if matches!(role, Role::Pawn | Role::Bishop | Role::Queen) {
            all_attackers |= attacks::bishop_attacks(dst, occ)
                & (board.by_role(Role::Bishop) | board.by_role(Role::Queen));
        }
        if matches!(role, Role::Rook | Role::Queen) {
            all_attackers |= attacks::rook_attacks(dst, occ)
                & (board.by_role(Role::Rook) | board.by_role(Role::Queen));
        }
        all_attackers &= occ;

        side_to_move = !side_to_move;
    }

    // Backward negamax over the swap list: each side only recaptures when
    // the continuation is profitable.
    while depth > 0 {
        depth -= 1;
        gain[depth] = -Value::max(-gain[depth], gain[depth + 1]);
    }

    gain[0]
}

/// Threshold SEE: `see(board, m) >= threshold`.
pub fn see_ge(board: &Board, m: &Move, threshold: Value) -> bool {
    see(board, m) >= threshold
}
