//! Staged move picker.
//!
//! Yields moves in the order the search wants to try them: TT move first,
//! then winning captures by MVV plus capture history, then quiets ranked by
//! the combined butterfly/continuation/pawn/low-ply histories, then losing
//! captures. Scoring is deferred per stage, so a node that cuts off on a
//! capture never pays for ranking its quiet moves. Check evasions and the
//! quiescence capture stage are separate modes, and the search can ask to
//! skip the quiet stage entirely once move-count pruning kicks in.

use shakmaty::{Move, MoveList};

use crate::board::{from_to, role_value, Board, PackedMove};
use crate::history::{pawn_structure_index, ContIndex, Histories};
use crate::see::see_ge;
use crate::value::Value;

const MAX_MOVES: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    TtMove,
    Init,
    WinningCaptures,
    RankQuiets,
    Quiets,
    LosingCaptures,
    Evasions,
    Done,
}

/// What the picker is generating for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PickMode {
    /// Full search: all stages.
    Search,
    /// Quiescence: captures and queen promotions only (evasions in check).
    Quiescence,
    /// ProbCut: captures whose SEE clears the given threshold.
    ProbCut(Value),
}

/// A scored band of move indices, yielded best-first by selection sort.
struct Band {
    idx: [u16; MAX_MOVES],
    score: [i32; MAX_MOVES],
    len: usize,
    cur: usize,
}

impl Band {
    const fn new() -> Self {
        Self {
            idx: [0; MAX_MOVES],
            score: [0; MAX_MOVES],
            len: 0,
            cur: 0,
        }
    }

    fn push(&mut self, idx: usize, score: i32) {
        self.idx[self.len] = idx as u16;
        self.score[self.len] = score;
        self.len += 1;
    }

    fn pick_best(&mut self) -> Option<(usize, i32)> {
        if self.cur >= self.len {
            return None;
        }
        let mut best = self.cur;
        for i in (self.cur + 1)..self.len {
            if self.score[i] > self.score[best] {
                best = i;
            }
        }
        self.idx.swap(self.cur, best);
        self.score.swap(self.cur, best);
        let out = (self.idx[self.cur] as usize, self.score[self.cur]);
        self.cur += 1;
        Some(out)
    }
}

pub struct MovePicker<'a> {
    board: &'a Board,
    moves: &'a MoveList,
    /// Continuation indices of the previous two plies, for quiet ranking.
    prev_cont: [ContIndex; 2],
    ply: usize,
    mode: PickMode,
    stage: Stage,
    tt_index: Option<usize>,
    skip_quiets: bool,
    captures: Band,
    quiets: Band,
    losing: Band,
}

impl<'a> MovePicker<'a> {
    /// Build a picker over `moves`, the legal moves of `board`.
    ///
    /// `tt_move` is the packed hint from the transposition table; it is
    /// yielded first when it matches a legal move (and, in quiescence out of
    /// check, only when it belongs to the capture stage).
    pub fn new(
        board: &'a Board,
        moves: &'a MoveList,
        tt_move: PackedMove,
        prev_cont: [ContIndex; 2],
        ply: usize,
        mode: PickMode,
    ) -> Self {
        let tt_index = if tt_move.is_none() {
            None
        } else {
            moves
                .iter()
                .position(|m| PackedMove::encode(m) == tt_move)
                .filter(|&i| match mode {
                    PickMode::Search => true,
                    PickMode::Quiescence => {
                        board.in_check() || board.is_capture_stage(&moves[i])
                    }
                    PickMode::ProbCut(_) => board.is_capture_stage(&moves[i]),
                })
        };

        Self {
            board,
            moves,
            prev_cont,
            ply,
            mode,
            stage: if tt_index.is_some() {
                Stage::TtMove
            } else {
                Stage::Init
            },
            tt_index,
            skip_quiets: false,
            captures: Band::new(),
            quiets: Band::new(),
            losing: Band::new(),
        }
    }

    /// Stop yielding quiet moves; already-yielded stages are unaffected.
    pub fn skip_quiet_moves(&mut self) {
        self.skip_quiets = true;
    }

    fn capture_score(&self, histories: &Histories, m: &Move) -> i32 {
        let piece = self.board.piece_index_at(m.from().expect("board move"));
        let to = m.to() as usize;
        let victim = m.capture().map_or(0, role_value);
        let captured_slot = m.capture().map_or(0, |r| r as usize - 1);
        let promo_bonus = match m.promotion() {
            Some(r) => role_value(r),
            None => 0,
        };
        7 * (victim + promo_bonus) + histories.capture_score(piece, to, captured_slot)
    }

    fn quiet_score(&self, histories: &Histories, m: &Move) -> i32 {
        let us = self.board.side_to_move();
        let piece = self.board.piece_index_at(m.from().expect("board move"));
        let to = m.to() as usize;
        let ft = from_to(m);
        let pawn_bucket = pawn_structure_index(self.board);

        histories.main_score(us, ft)
            + histories.cont_score(&self.prev_cont[0], piece, to)
            + histories.cont_score(&self.prev_cont[1], piece, to)
            + histories.pawn_score(pawn_bucket, piece, to)
            + 2 * histories.low_ply_score(self.ply, ft)
    }

    fn init_bands(&mut self, histories: &Histories) {
        let board = self.board;
        let moves = self.moves;

        if board.in_check() {
            // Evasions: one band, captures ranked above quiets.
            for (i, m) in moves.iter().enumerate() {
                if Some(i) == self.tt_index {
                    continue;
                }
                let score = if board.is_capture_stage(m) {
                    1_000_000 + self.capture_score(histories, m)
                } else {
                    self.quiet_score(histories, m)
                };
                self.captures.push(i, score);
            }
            self.stage = Stage::Evasions;
            return;
        }

        for (i, m) in moves.iter().enumerate() {
            if Some(i) == self.tt_index {
                continue;
            }
            if board.is_capture_stage(m) {
                if let PickMode::ProbCut(threshold) = self.mode {
                    if !see_ge(board, m, threshold) {
                        continue;
                    }
                }
                let score = self.capture_score(histories, m);
                self.captures.push(i, score);
            } else if self.mode == PickMode::Search {
                // Deferred: scored only if the quiet stage is reached.
                self.quiets.push(i, 0);
            }
        }
        self.stage = Stage::WinningCaptures;
    }

    /// Yield the next move, or `None` when every stage is exhausted.
    /// `histories` is borrowed per call so the caller can keep updating its
    /// tables between picks.
    pub fn next_move(&mut self, histories: &Histories) -> Option<Move> {
        loop {
            match self.stage {
                Stage::TtMove => {
                    self.stage = Stage::Init;
                    return Some(self.moves[self.tt_index.unwrap()].clone());
                }
                Stage::Init => self.init_bands(histories),
                Stage::WinningCaptures => match self.captures.pick_best() {
                    Some((i, _)) => {
                        let m = &self.moves[i];
                        // In the main search losing captures wait until after
                        // the quiets; quiescence and ProbCut take them all.
                        if self.mode == PickMode::Search && !see_ge(self.board, m, 0) {
                            self.losing.push(i, 0);
                            continue;
                        }
                        return Some(m.clone());
                    }
                    None => {
                        self.stage = match self.mode {
                            PickMode::Search => Stage::RankQuiets,
                            _ => Stage::Done,
                        };
                    }
                },
                Stage::RankQuiets => {
                    let moves = self.moves;
                    for slot in 0..self.quiets.len {
                        let i = self.quiets.idx[slot] as usize;
                        let score = self.quiet_score(histories, &moves[i]);
                        self.quiets.score[slot] = score;
                    }
                    self.stage = Stage::Quiets;
                }
                Stage::Quiets => {
                    if self.skip_quiets {
                        self.stage = Stage::LosingCaptures;
                        continue;
                    }
                    match self.quiets.pick_best() {
                        Some((i, _)) => return Some(self.moves[i].clone()),
                        None => self.stage = Stage::LosingCaptures,
                    }
                }
                Stage::LosingCaptures => match self.losing.pick_best() {
                    Some((i, _)) => return Some(self.moves[i].clone()),
                    None => self.stage = Stage::Done,
                },
                Stage::Evasions => match self.captures.pick_best() {
                    Some((i, _)) => return Some(self.moves[i].clone()),
                    None => self.stage = Stage::Done,
                },
                Stage::Done => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pick_all(board: &Board, mode: PickMode, tt: PackedMove) -> Vec<Move> {
        let moves = board.legal_moves();
        let histories = Histories::new();
        let mut picker = MovePicker::new(board, &moves, tt, [ContIndex::SENTINEL; 2], 0, mode);
        let mut out = Vec::new();
        while let Some(m) = picker.next_move(&histories) {
            out.push(m);
        }
        out
    }

    #[test]
    fn yields_every_legal_move_exactly_once() {
        let board = Board::starting_position();
        let picked = pick_all(&board, PickMode::Search, PackedMove::NONE);
        assert_eq!(picked.len(), 20);
        let unique: std::collections::HashSet<String> =
            picked.iter().map(Board::move_uci).collect();
        assert_eq!(unique.len(), 20);
    }

    #[test]
    fn tt_move_comes_first() {
        let board = Board::starting_position();
        let moves = board.legal_moves();
        let tt = PackedMove::encode(&moves[13]);
        let picked = pick_all(&board, PickMode::Search, tt);
        assert_eq!(picked[0], moves[13]);
        assert_eq!(picked.len(), 20, "TT move must not be yielded twice");
    }

    #[test]
    fn winning_capture_before_quiets() {
        // Qd4 can take an undefended pawn on e5.
        let board: Board = "4k3/8/8/4p3/3Q4/8/8/4K3 w - - 0 1".parse().unwrap();
        let picked = pick_all(&board, PickMode::Search, PackedMove::NONE);
        assert!(
            board.is_capture_stage(&picked[0]),
            "first yielded move should be the capture, got {}",
            Board::move_uci(&picked[0])
        );
    }

    #[test]
    fn losing_capture_comes_last() {
        // QxP defended by a pawn is the only capture and it loses material.
        let board: Board = "4k3/8/3p4/2p5/8/4Q3/8/4K3 w - - 0 1".parse().unwrap();
        let picked = pick_all(&board, PickMode::Search, PackedMove::NONE);
        let last = picked.last().unwrap();
        assert!(board.is_capture_stage(last));
        assert_eq!(Board::move_uci(last), "e3c5");
    }

    #[test]
    fn quiescence_yields_captures_only() {
        let board: Board = "4k3/8/3p4/2p5/8/4Q3/8/4K3 w - - 0 1".parse().unwrap();
        let picked = pick_all(&board, PickMode::Quiescence, PackedMove::NONE);
        assert!(!picked.is_empty());
        assert!(picked.iter().all(|m| board.is_capture_stage(m)));
    }

    #[test]
    fn quiescence_startpos_is_empty() {
        let board = Board::starting_position();
        let picked = pick_all(&board, PickMode::Quiescence, PackedMove::NONE);
        assert!(picked.is_empty());
    }

    #[test]
    fn evasions_cover_all_legal_replies() {
        // White king in check from a rook: every legal move is an evasion.
        let board: Board = "4k3/8/8/8/4r3/8/3P4/4K3 w - - 0 1".parse().unwrap();
        assert!(board.in_check());
        let picked = pick_all(&board, PickMode::Search, PackedMove::NONE);
        assert_eq!(picked.len(), board.legal_moves().len());
    }

    #[test]
    fn probcut_filters_by_see_threshold() {
        // QxP (SEE +100) passes a zero threshold but not a rook-sized one.
        let board: Board = "4k3/8/8/4p3/3Q4/8/8/4K3 w - - 0 1".parse().unwrap();
        let all = pick_all(&board, PickMode::ProbCut(0), PackedMove::NONE);
        assert!(all.iter().any(|m| Board::move_uci(m) == "d4e5"));
        let none = pick_all(&board, PickMode::ProbCut(400), PackedMove::NONE);
        assert!(none.is_empty());
    }

    #[test]
    fn skip_quiets_jumps_to_losing_captures() {
        let board: Board = "4k3/8/3p4/2p5/8/4Q3/8/4K3 w - - 0 1".parse().unwrap();
        let moves = board.legal_moves();
        let histories = Histories::new();
        let mut picker = MovePicker::new(
            &board,
            &moves,
            PackedMove::NONE,
            [ContIndex::SENTINEL; 2],
            0,
            PickMode::Search,
        );
        picker.skip_quiet_moves();
        let mut picked = Vec::new();
        while let Some(m) = picker.next_move(&histories) {
            picked.push(m);
        }
        assert!(picked.iter().all(|m| board.is_capture_stage(m)));
        assert_eq!(picked.len(), 1, "only the losing capture remains");
    }
}
