//! Position adapter: wraps `shakmaty::Chess` behind the interface the search
//! consumes, caches the zobrist key, and packs moves for TT storage.

use std::str::FromStr;
use std::sync::OnceLock;

use shakmaty::fen::Fen;
use shakmaty::zobrist::{Zobrist64, ZobristHash};
use shakmaty::{
    Bitboard, CastlingMode, Chess, Color, EnPassantMode, FromSetup, Move, MoveList, Position,
    Role, Square,
};

use crate::value::Value;

/// Material values indexed by `Role as usize - 1` (pawn..king).
pub const ROLE_VALUES: [Value; 6] = [100, 320, 330, 500, 900, 0];

/// Value of the piece a role represents, for futility margins and SEE.
pub fn role_value(role: Role) -> Value {
    ROLE_VALUES[role as usize - 1]
}

/// Dense piece index `color * 6 + role` in `0..12`.
pub fn piece_index(color: Color, role: Role) -> usize {
    (color as usize) * 6 + (role as usize - 1)
}

/// Sentinel piece index used by null-move continuation targets.
pub const NO_PIECE: usize = 12;
/// Piece index dimension including the sentinel row.
pub const PIECE_NB: usize = 13;

/// Butterfly index `from * 64 + to`.
pub fn from_to(m: &Move) -> usize {
    let from = m.from().map_or(0, |sq| sq as usize);
    from * 64 + m.to() as usize
}

#[derive(Debug, thiserror::Error)]
pub enum ParseBoardError {
    /// The FEN string could not be parsed.
    #[error("invalid FEN: {0}")]
    Fen(String),
    /// The FEN parsed but does not describe a legal position.
    #[error("illegal position: {0}")]
    Position(String),
}

// ---------------------------------------------------------------------------
// Packed moves
// ---------------------------------------------------------------------------

/// A move packed into 16 bits for transposition-table storage:
/// `to(6) | from(6) | promotion(3)`.
///
/// Packed moves are only ever compared against encodings of legal moves of
/// the same position, never decoded, so the representation just has to be
/// injective within one position's move set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PackedMove(pub u16);

impl PackedMove {
    pub const NONE: PackedMove = PackedMove(0);

    pub fn encode(m: &Move) -> PackedMove {
        let from = m.from().map_or(0, |sq| sq as u16);
        let to = m.to() as u16;
        let promo = match m.promotion() {
            Some(Role::Knight) => 1u16,
            Some(Role::Bishop) => 2,
            Some(Role::Rook) => 3,
            Some(Role::Queen) => 4,
            _ => 0,
        };
        PackedMove(to | (from << 6) | (promo << 12))
    }

    pub fn is_none(self) -> bool {
        self == PackedMove::NONE
    }

    pub fn is_some(self) -> bool {
        !self.is_none()
    }

    /// Find the legal move this encoding refers to, if any.
    pub fn find_in(self, moves: &MoveList) -> Option<Move> {
        if self.is_none() {
            return None;
        }
        moves.iter().find(|m| PackedMove::encode(m) == self).cloned()
    }
}

// ---------------------------------------------------------------------------
// Side keys for history indexing
// ---------------------------------------------------------------------------

static SIDE_KEYS: OnceLock<[[u64; 64]; PIECE_NB]> = OnceLock::new();

fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9E37_79B9_7F4A_7C15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

fn side_keys() -> &'static [[u64; 64]; PIECE_NB] {
    SIDE_KEYS.get_or_init(|| {
        let mut state: u64 = 0x5C72_1FD0_8F52_E883;
        let mut keys = [[0u64; 64]; PIECE_NB];
        for row in keys.iter_mut() {
            for k in row.iter_mut() {
                *k = splitmix64(&mut state);
            }
        }
        keys
    })
}

// ---------------------------------------------------------------------------
// Board
// ---------------------------------------------------------------------------

/// Chess position with a cached zobrist key.
///
/// Copy-make: [`Board::make_move`] returns the child position, the parent is
/// untouched. The search keeps its own key stack for repetition detection.
#[derive(Debug, Clone)]
pub struct Board {
    pos: Chess,
    key: u64,
}

impl Board {
    /// The standard starting position.
    pub fn starting_position() -> Self {
        Self::from_pos(Chess::default())
    }

    fn from_pos(pos: Chess) -> Self {
        let key = pos.zobrist_hash::<Zobrist64>(EnPassantMode::Legal).0;
        Self { pos, key }
    }

    /// 64-bit position key.
    pub fn key(&self) -> u64 {
        self.key
    }

    /// The wrapped position, for collaborators that speak shakmaty directly
    /// (tablebase probing).
    pub fn inner(&self) -> &Chess {
        &self.pos
    }

    pub fn side_to_move(&self) -> Color {
        self.pos.turn()
    }

    /// Halfmove clock for the 50-move rule.
    pub fn rule50(&self) -> u32 {
        self.pos.halfmoves()
    }

    /// Game ply derived from the move counter (0 at the initial position).
    pub fn game_ply(&self) -> u32 {
        let full = u32::from(self.pos.fullmoves());
        (full - 1) * 2 + u32::from(self.pos.turn() == Color::Black)
    }

    pub fn in_check(&self) -> bool {
        self.pos.is_check()
    }

    pub fn legal_moves(&self) -> MoveList {
        self.pos.legal_moves()
    }

    pub fn is_insufficient_material(&self) -> bool {
        self.pos.is_insufficient_material()
    }

    /// Whether either side still has a castling right (tablebase gate).
    pub fn any_castling_rights(&self) -> bool {
        self.pos.castles().any()
    }

    /// Total number of pieces on the board.
    pub fn piece_count(&self) -> usize {
        self.pos.board().occupied().count()
    }

    /// Sum of non-pawn, non-king material for `color` in centipawns.
    pub fn non_pawn_material(&self, color: Color) -> Value {
        let board = self.pos.board();
        let us = board.by_color(color);
        let mut total = 0;
        for role in [Role::Knight, Role::Bishop, Role::Rook, Role::Queen] {
            total += (board.by_role(role) & us).count() as Value * role_value(role);
        }
        total
    }

    pub fn occupied(&self) -> Bitboard {
        self.pos.board().occupied()
    }

    pub fn by_color(&self, color: Color) -> Bitboard {
        self.pos.board().by_color(color)
    }

    pub fn by_role(&self, role: Role) -> Bitboard {
        self.pos.board().by_role(role)
    }

    pub fn role_at(&self, sq: Square) -> Option<Role> {
        self.pos.board().role_at(sq)
    }

    pub fn color_at(&self, sq: Square) -> Option<Color> {
        self.pos.board().color_at(sq)
    }

    /// Piece index at `sq`, or [`NO_PIECE`] for an empty square.
    pub fn piece_index_at(&self, sq: Square) -> usize {
        match (self.color_at(sq), self.role_at(sq)) {
            (Some(c), Some(r)) => piece_index(c, r),
            _ => NO_PIECE,
        }
    }

    /// Capture stage: captures (including en passant) and queen promotions,
    /// the moves the quiescence generator deals in.
    pub fn is_capture_stage(&self, m: &Move) -> bool {
        m.is_capture() || m.promotion() == Some(Role::Queen)
    }

    /// Role captured by `m`, if any.
    pub fn captured_role(&self, m: &Move) -> Option<Role> {
        m.capture()
    }

    /// Whether `m` checks the opponent. Verified on a scratch copy.
    pub fn gives_check(&self, m: &Move) -> bool {
        let mut child = self.pos.clone();
        child.play_unchecked(m);
        child.is_check()
    }

    /// Make a move, returning the child position.
    pub fn make_move(&self, m: &Move) -> Board {
        let mut pos = self.pos.clone();
        pos.play_unchecked(m);
        Board::from_pos(pos)
    }

    /// Make a null move (pass). Only valid when not in check. Returns `None`
    /// if the resulting setup is rejected, which cannot happen for positions
    /// reached through legal play.
    pub fn make_null(&self) -> Option<Board> {
        debug_assert!(!self.in_check());
        let mut setup = self.pos.clone().into_setup(EnPassantMode::Legal);
        setup.turn = !setup.turn;
        setup.ep_square = None;
        setup.halfmoves = setup.halfmoves.saturating_add(1);
        Chess::from_setup(setup, CastlingMode::Standard)
            .ok()
            .map(Board::from_pos)
    }

    /// Key of the pawn structure, for pawn-history and pawn-correction indices.
    pub fn pawn_key(&self) -> u64 {
        self.material_key(self.pos.board().pawns())
    }

    /// Key of minor pieces and kings, for the minor-piece correction index.
    pub fn minor_key(&self) -> u64 {
        let board = self.pos.board();
        self.material_key(board.knights() | board.bishops() | board.kings())
    }

    /// Key of `color`'s non-pawn pieces, for the non-pawn correction index.
    pub fn non_pawn_key(&self, color: Color) -> u64 {
        let board = self.pos.board();
        self.material_key(board.by_color(color) & !board.pawns())
    }

    fn material_key(&self, mask: Bitboard) -> u64 {
        let keys = side_keys();
        let mut key = 0u64;
        for sq in mask {
            key ^= keys[self.piece_index_at(sq)][sq as usize];
        }
        key
    }

    /// Move in UCI notation, for PV strings.
    pub fn move_uci(m: &Move) -> String {
        m.to_uci(CastlingMode::Standard).to_string()
    }
}

impl FromStr for Board {
    type Err = ParseBoardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fen: Fen = s
            .parse()
            .map_err(|_| ParseBoardError::Fen(s.to_string()))?;
        let pos: Chess = fen
            .into_position(CastlingMode::Standard)
            .map_err(|e| ParseBoardError::Position(e.to_string()))?;
        Ok(Board::from_pos(pos))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starting_position_basics() {
        let board = Board::starting_position();
        assert_eq!(board.legal_moves().len(), 20);
        assert_eq!(board.side_to_move(), Color::White);
        assert_eq!(board.rule50(), 0);
        assert_eq!(board.game_ply(), 0);
        assert!(!board.in_check());
        assert_eq!(board.piece_count(), 32);
    }

    #[test]
    fn key_changes_with_moves_and_transposes() {
        let board = Board::starting_position();
        let moves = board.legal_moves();
        let e4 = moves
            .iter()
            .find(|m| Board::move_uci(m) == "e2e4")
            .cloned()
            .unwrap();
        let child = board.make_move(&e4);
        assert_ne!(board.key(), child.key());

        // Transposition: e4-e5-Nf3 vs Nf3-e5-e4 reach the same key.
        let via_a = play_line(&board, &["e2e4", "e7e5", "g1f3"]);
        let via_b = play_line(&board, &["g1f3", "e7e5", "e2e4"]);
        assert_eq!(via_a.key(), via_b.key());
    }

    fn play_line(board: &Board, line: &[&str]) -> Board {
        let mut cur = board.clone();
        for uci in line {
            let m = cur
                .legal_moves()
                .iter()
                .find(|m| Board::move_uci(m) == *uci)
                .cloned()
                .unwrap_or_else(|| panic!("move {uci} not legal"));
            cur = cur.make_move(&m);
        }
        cur
    }

    #[test]
    fn null_move_flips_side() {
        let board = Board::starting_position();
        let nulled = board.make_null().expect("null move from startpos");
        assert_eq!(nulled.side_to_move(), Color::Black);
        assert_ne!(nulled.key(), board.key());
    }

    #[test]
    fn non_pawn_material_startpos() {
        let board = Board::starting_position();
        // 2N + 2B + 2R + Q per side
        let expected = 2 * 320 + 2 * 330 + 2 * 500 + 900;
        assert_eq!(board.non_pawn_material(Color::White), expected);
        assert_eq!(board.non_pawn_material(Color::Black), expected);
    }

    #[test]
    fn packed_move_roundtrip_via_matching() {
        let board = Board::starting_position();
        let moves = board.legal_moves();
        for m in &moves {
            let packed = PackedMove::encode(m);
            assert!(packed.is_some());
            let found = packed.find_in(&moves).expect("packed move should match");
            assert_eq!(&found, m);
        }
    }

    #[test]
    fn packed_move_distinguishes_promotions() {
        let board: Board = "7k/4P3/8/8/8/8/8/4K3 w - - 0 1".parse().unwrap();
        let moves = board.legal_moves();
        let encodings: Vec<_> = moves.iter().map(PackedMove::encode).collect();
        let unique: std::collections::HashSet<_> = encodings.iter().map(|p| p.0).collect();
        assert_eq!(unique.len(), encodings.len(), "encodings must be injective");
    }

    #[test]
    fn capture_stage_includes_queen_promotions() {
        let board: Board = "7k/4P3/8/8/8/8/8/4K3 w - - 0 1".parse().unwrap();
        let moves = board.legal_moves();
        let promo_q = moves
            .iter()
            .find(|m| m.promotion() == Some(Role::Queen))
            .unwrap();
        let promo_n = moves
            .iter()
            .find(|m| m.promotion() == Some(Role::Knight))
            .unwrap();
        assert!(board.is_capture_stage(promo_q));
        assert!(!board.is_capture_stage(promo_n));
    }

    #[test]
    fn gives_check_detects_checks() {
        // Qh5+ from a scholar's-mate-like setup
        let board: Board = "rnbqkbnr/pppp1ppp/8/4p3/4P3/8/PPPP1PPP/RNBQKBNR w KQkq - 0 2"
            .parse()
            .unwrap();
        let qh5 = board
            .legal_moves()
            .iter()
            .find(|m| Board::move_uci(m) == "d1h5")
            .cloned()
            .unwrap();
        assert!(!board.gives_check(&qh5));

        let board: Board = "rnbqkbnr/pppp2pp/8/4pp2/4P3/8/PPPP1PPP/RNBQKBNR w KQkq - 0 3"
            .parse()
            .unwrap();
        let qh5 = board
            .legal_moves()
            .iter()
            .find(|m| Board::move_uci(m) == "d1h5")
            .cloned()
            .unwrap();
        assert!(board.gives_check(&qh5));
    }

    #[test]
    fn pawn_key_ignores_piece_moves() {
        let board = Board::starting_position();
        let after_knight = play_line(&board, &["g1f3"]);
        assert_eq!(board.pawn_key(), after_knight.pawn_key());

        let after_pawn = play_line(&board, &["e2e4"]);
        assert_ne!(board.pawn_key(), after_pawn.pawn_key());
    }

    #[test]
    fn invalid_fen_is_rejected() {
        assert!("not a fen".parse::<Board>().is_err());
        assert!("8/8/8/8/8/8/8/8 w - - 0 1".parse::<Board>().is_err());
    }
}
