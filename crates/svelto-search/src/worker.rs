//! The per-thread search engine: iterative deepening with aspiration
//! windows, principal-variation search with quiescence, and the statistics
//! updates feeding move ordering and eval correction.
//!
//! Every worker re-searches the same root independently. Communication with
//! the rest of the pool happens only through the shared transposition table,
//! the stop flag, and the per-worker atomic counters; histories and stack
//! frames are strictly thread-local.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use shakmaty::{Color, Move, Role};

use crate::board::{from_to, role_value, Board, PackedMove, NO_PIECE};
use crate::control::SearchControl;
use crate::eval::Evaluate;
use crate::see::see_ge;
use crate::history::{
    correction_index, pawn_structure_index, ContIndex, Histories, CORRECTION_HISTORY_LIMIT,
    LOW_PLY_PLIES,
};
use crate::limits::Limits;
use crate::options::SearchOptions;
use crate::picker::{MovePicker, PickMode};
use crate::report::{FailInfoThrottle, ScoreBound, SearchInfo, SearchListener, UciScore};
use crate::rootmoves::{sort_root_moves, RootMove};
use crate::tb::TablebaseProbe;
use crate::timeman::TimeManager;
use crate::tt::{Bound, TranspositionTable};
use crate::value::{
    is_decisive, is_loss, is_valid, is_win, mate_in, mated_in, value_from_tt, value_to_tt, Depth,
    Value, DEPTH_QS, DEPTH_UNSEARCHED, MAX_PLY, VALUE_DRAW, VALUE_INFINITE, VALUE_MATE,
    VALUE_NONE, VALUE_TB, VALUE_TB_LOSS_IN_MAX_PLY, VALUE_TB_WIN_IN_MAX_PLY, VALUE_ZERO,
};

/// Sentinel frames before ply 0, so `ss - 7 ..= ss + 2` always indexes
/// into the stack.
const SS_OFFSET: usize = 7;
const STACK_LEN: usize = MAX_PLY + 10;

/// Moves whose statistics are updated after a beta cutoff.
const SEARCHED_LIST_CAPACITY: usize = 32;

/// Node-type selector, monomorphised into the recursion so the per-node
/// branches on it disappear.
pub(crate) trait NodeTag {
    const PV: bool;
    const ROOT: bool;
}

pub(crate) struct RootTag;
pub(crate) struct PvTag;
pub(crate) struct NonPvTag;

impl NodeTag for RootTag {
    const PV: bool = true;
    const ROOT: bool = true;
}
impl NodeTag for PvTag {
    const PV: bool = true;
    const ROOT: bool = false;
}
impl NodeTag for NonPvTag {
    const PV: bool = false;
    const ROOT: bool = false;
}

/// Per-ply search state. Frames are plain indices into a pre-allocated
/// array; continuation-history references are index structs, not borrows.
#[derive(Clone)]
struct Frame {
    ply: usize,
    current_move: Option<Move>,
    captured: Option<Role>,
    excluded: PackedMove,
    static_eval: Value,
    stat_score: i32,
    move_count: u32,
    cutoff_cnt: u32,
    in_check: bool,
    tt_pv: bool,
    tt_hit: bool,
    reduction: i32,
    cont_index: ContIndex,
    /// Continuation-correction key of the move made at this frame.
    corr_piece: usize,
    corr_to: usize,
}

impl Frame {
    fn new(ply: usize) -> Self {
        Frame {
            ply,
            current_move: None,
            captured: None,
            excluded: PackedMove::NONE,
            static_eval: 0,
            stat_score: 0,
            move_count: 0,
            cutoff_cnt: 0,
            in_check: false,
            tt_pv: false,
            tt_hit: false,
            reduction: 0,
            cont_index: ContIndex::SENTINEL,
            corr_piece: NO_PIECE,
            corr_to: 0,
        }
    }
}

/// State shared by every worker of one search.
#[derive(Clone, Copy)]
pub(crate) struct SharedState<'a> {
    pub tt: &'a TranspositionTable,
    pub control: &'a SearchControl,
    pub evaluator: &'a dyn Evaluate,
    pub tb: &'a dyn TablebaseProbe,
    pub options: &'a SearchOptions,
    pub limits: &'a Limits,
    /// One published node counter per worker.
    pub nodes: &'a [AtomicU64],
    pub tb_hits: &'a [AtomicU64],
    /// Per-worker count of best-move changes, drained by the main worker.
    pub best_move_changes: &'a [AtomicU64],
    /// Set by the main worker when there is time to deepen further.
    pub increase_depth: &'a AtomicBool,
}

/// Driver memory carried across consecutive searches of one game.
#[derive(Debug, Clone, Copy)]
pub struct DriverMemory {
    pub best_previous_score: Value,
    pub best_previous_average_score: Value,
    pub previous_time_reduction: f64,
}

impl Default for DriverMemory {
    fn default() -> Self {
        Self {
            best_previous_score: VALUE_INFINITE,
            best_previous_average_score: VALUE_INFINITE,
            previous_time_reduction: 0.85,
        }
    }
}

pub(crate) struct Worker<'a> {
    shared: SharedState<'a>,
    thread_idx: usize,

    root_board: Board,
    pub root_moves: Vec<RootMove>,
    pub completed_depth: Depth,
    root_depth: Depth,
    sel_depth: usize,
    nodes: u64,
    tb_hits: u64,

    histories: Histories,
    stack: Vec<Frame>,
    pv_table: Vec<Vec<Move>>,
    /// Zobrist keys of the game prefix plus the current search path.
    keys: Vec<u64>,
    /// Length of `keys` at the root (game prefix + root position).
    root_len: usize,

    multi_pv: usize,
    pv_idx: usize,
    pv_last: usize,
    root_delta: Value,
    optimism: [Value; 2],
    nmp_min_ply: usize,
    root_in_tb: bool,
    tb_cardinality: usize,

    // Main-thread state.
    time: Option<TimeManager>,
    memory: DriverMemory,
    calls_cnt: i32,
    listener: Option<&'a mut dyn SearchListener>,
    throttle: FailInfoThrottle,
    pub last_best_pv: Vec<Move>,
    pub last_best_score: Value,
    last_best_move_depth: Depth,
    iter_values: [Value; 4],
    iter_idx: usize,
    tot_best_move_changes: f64,
    pub time_reduction: f64,

    reductions: Vec<i32>,
}

impl<'a> Worker<'a> {
    pub fn new(
        shared: SharedState<'a>,
        thread_idx: usize,
        root_board: Board,
        game_keys: &[u64],
        time: Option<TimeManager>,
        memory: DriverMemory,
    ) -> Self {
        let root_moves: Vec<RootMove> = root_board
            .legal_moves()
            .iter()
            .map(|m| RootMove::new(m.clone()))
            .collect();

        let mut keys = game_keys.to_vec();
        keys.push(root_board.key());
        let root_len = keys.len();

        let mut reductions = vec![0i32; MAX_PLY];
        for (i, r) in reductions.iter_mut().enumerate().skip(1) {
            *r = (2809.0 / 128.0 * (i as f64).ln()) as i32;
        }

        let options = shared.options;
        let throttle = FailInfoThrottle::new(
            options.fail_info_enabled,
            options.fail_info_first_ms,
            options.fail_info_min_nodes,
            options.fail_info_rate_ms,
        );

        Self {
            shared,
            thread_idx,
            root_board,
            root_moves,
            completed_depth: 0,
            root_depth: 0,
            sel_depth: 0,
            nodes: 0,
            tb_hits: 0,
            histories: Histories::new(),
            stack: (0..STACK_LEN)
                .map(|i| Frame::new(i.saturating_sub(SS_OFFSET)))
                .collect(),
            pv_table: (0..MAX_PLY + 2).map(|_| Vec::new()).collect(),
            keys,
            root_len,
            multi_pv: 1,
            pv_idx: 0,
            pv_last: 0,
            root_delta: 1,
            optimism: [0; 2],
            nmp_min_ply: 0,
            root_in_tb: false,
            tb_cardinality: shared.tb.cardinality(),
            time,
            memory,
            calls_cnt: 0,
            listener: None,
            throttle,
            last_best_pv: Vec::new(),
            last_best_score: -VALUE_INFINITE,
            last_best_move_depth: 0,
            iter_values: [VALUE_ZERO; 4],
            iter_idx: 0,
            tot_best_move_changes: 0.0,
            time_reduction: 1.0,
            reductions,
        }
    }

    fn is_main(&self) -> bool {
        self.thread_idx == 0
    }

    /// Wire the progress callbacks; only the main worker gets one.
    pub fn attach_listener(&mut self, listener: &'a mut dyn SearchListener) {
        self.listener = Some(listener);
    }

    /// Reclaim the progress callback once the search is done driving it.
    pub fn take_listener(&mut self) -> Option<&'a mut dyn SearchListener> {
        self.listener.take()
    }

    pub fn memory(&self) -> DriverMemory {
        self.memory
    }

    fn total_nodes(&self) -> u64 {
        self.shared
            .nodes
            .iter()
            .map(|n| n.load(Ordering::Relaxed))
            .sum()
    }

    fn total_tb_hits(&self) -> u64 {
        self.shared
            .tb_hits
            .iter()
            .map(|n| n.load(Ordering::Relaxed))
            .sum()
    }

    fn bump_node(&mut self) {
        self.nodes += 1;
        self.shared.nodes[self.thread_idx].store(self.nodes, Ordering::Relaxed);
    }

    fn bump_tb_hit(&mut self) {
        self.tb_hits += 1;
        self.shared.tb_hits[self.thread_idx].store(self.tb_hits, Ordering::Relaxed);
    }

    /// Decaying time poll on the main thread: every ~512 entries, verify the
    /// hard wall clock and the node budget. Nothing fires before one
    /// iteration completes, so an aborted search always has a trustworthy
    /// previous result to fall back on.
    fn check_time(&mut self) {
        self.calls_cnt -= 1;
        if self.calls_cnt > 0 {
            return;
        }
        self.calls_cnt = match self.shared.limits.nodes {
            Some(limit) => (limit / 1024).clamp(1, 512) as i32,
            None => 512,
        };

        let control = self.shared.control;
        if control.is_pondering() || self.completed_depth < 1 {
            return;
        }

        let elapsed = control.elapsed_ms();
        let out_of_time = self
            .time
            .is_some_and(|tm| elapsed >= tm.maximum() || control.is_stop_on_ponderhit());
        let out_of_nodes = self
            .shared
            .limits
            .nodes
            .is_some_and(|limit| self.total_nodes() >= limit);

        if out_of_time || out_of_nodes {
            control.abort();
        }
    }

    fn stopped(&self) -> bool {
        self.shared.control.is_stopped()
    }

    // -----------------------------------------------------------------------
    // Draw and repetition detection over the key stack
    // -----------------------------------------------------------------------

    /// Scan the key stack for earlier occurrences of the current position.
    /// Returns `(seen_at_all, counts_as_draw)`: any occurrence inside the
    /// search path is an immediate draw, and two occurrences in the game
    /// prefix complete a threefold.
    fn repetition_state(&self, board: &Board) -> (bool, bool) {
        let key = board.key();
        let len = self.keys.len();
        let span = (board.rule50() as usize).min(len.saturating_sub(1));
        let mut prefix_hits = 0;
        let mut seen = false;
        for d in 1..=span {
            let idx = len - 1 - d;
            if self.keys[idx] == key {
                seen = true;
                if idx >= self.root_len - 1 {
                    return (true, true);
                }
                prefix_hits += 1;
                if prefix_hits >= 2 {
                    return (true, true);
                }
            }
        }
        (seen, false)
    }

    fn is_draw(&self, board: &Board) -> bool {
        if board.rule50() >= 100 {
            return true;
        }
        if board.is_insufficient_material() {
            return true;
        }
        self.repetition_state(board).1
    }

    /// Slightly off-zero draw value to keep repeated searches from treating
    /// all drawing lines as identical (anti threefold blindness).
    fn value_draw(&self) -> Value {
        VALUE_DRAW - 1 + (self.nodes as Value & 0x2)
    }

    // -----------------------------------------------------------------------
    // Making moves
    // -----------------------------------------------------------------------

    fn do_move(&mut self, board: &Board, m: &Move, ss: usize) -> Board {
        let capture = board.is_capture_stage(m);
        let piece = board.piece_index_at(m.from().expect("legal move has origin"));
        let in_check = self.stack[ss].in_check;
        let child = board.make_move(m);

        self.bump_node();
        self.keys.push(child.key());

        let to = m.to() as usize;
        let frame = &mut self.stack[ss];
        frame.current_move = Some(m.clone());
        frame.captured = m.capture();
        frame.cont_index = ContIndex {
            in_check,
            capture,
            piece,
            to,
        };
        // The piece now standing on the target square (promotions included).
        frame.corr_piece = child.piece_index_at(m.to());
        frame.corr_to = to;
        child
    }

    fn do_null_move(&mut self, board: &Board, ss: usize) -> Option<Board> {
        let child = board.make_null()?;
        self.bump_node();
        self.keys.push(child.key());
        let frame = &mut self.stack[ss];
        frame.current_move = None;
        frame.captured = None;
        frame.cont_index = ContIndex::SENTINEL;
        frame.corr_piece = NO_PIECE;
        frame.corr_to = 0;
        Some(child)
    }

    fn undo_move(&mut self) {
        self.keys.pop();
    }

    // -----------------------------------------------------------------------
    // Static evaluation and correction history
    // -----------------------------------------------------------------------

    fn evaluate(&self, board: &Board) -> Value {
        let us = board.side_to_move();
        let v = self
            .shared
            .evaluator
            .evaluate(board, self.optimism[us as usize]);
        if !is_valid(v) {
            return VALUE_ZERO;
        }
        v.clamp(VALUE_TB_LOSS_IN_MAX_PLY + 1, VALUE_TB_WIN_IN_MAX_PLY - 1)
    }

    /// Weighted sum of the correction histories for this position.
    fn correction_value(&self, board: &Board, ss: usize) -> i64 {
        let us = board.side_to_move();
        let pcv = self.histories.pawn_corr(us, correction_index(board.pawn_key()));
        let micv = self
            .histories
            .minor_corr(us, correction_index(board.minor_key()));
        let wnpcv = self.histories.non_pawn_corr(
            Color::White,
            us,
            correction_index(board.non_pawn_key(Color::White)),
        );
        let bnpcv = self.histories.non_pawn_corr(
            Color::Black,
            us,
            correction_index(board.non_pawn_key(Color::Black)),
        );
        let prev = &self.stack[ss - 1];
        let cntcv = if prev.current_move.is_some() {
            self.histories.cont_corr(prev.corr_piece, prev.corr_to)
        } else {
            8
        };

        9536 * pcv as i64 + 8494 * micv as i64 + 10132 * (wnpcv + bnpcv) as i64 + 7156 * cntcv as i64
    }

    /// Correction-adjusted static eval, clamped inside the TB band.
    fn corrected_eval(raw: Value, correction: i64) -> Value {
        (raw as i64 + correction / 131_072).clamp(
            (VALUE_TB_LOSS_IN_MAX_PLY + 1) as i64,
            (VALUE_TB_WIN_IN_MAX_PLY - 1) as i64,
        ) as Value
    }

    fn update_correction_histories(&mut self, board: &Board, ss: usize, bonus: i32) {
        let us = board.side_to_move();
        const NON_PAWN_WEIGHT: i32 = 165;

        self.histories
            .update_pawn_corr(us, correction_index(board.pawn_key()), bonus);
        self.histories.update_minor_corr(
            us,
            correction_index(board.minor_key()),
            bonus * 145 / 128,
        );
        self.histories.update_non_pawn_corr(
            Color::White,
            us,
            correction_index(board.non_pawn_key(Color::White)),
            bonus * NON_PAWN_WEIGHT / 128,
        );
        self.histories.update_non_pawn_corr(
            Color::Black,
            us,
            correction_index(board.non_pawn_key(Color::Black)),
            bonus * NON_PAWN_WEIGHT / 128,
        );

        let prev = self.stack[ss - 1].clone();
        if prev.current_move.is_some() {
            self.histories
                .update_cont_corr(prev.corr_piece, prev.corr_to, bonus * 137 / 128);
        }
    }

    // -----------------------------------------------------------------------
    // History updates
    // -----------------------------------------------------------------------

    /// Bonus for the move pairs at plies -1..-4 and -6 behind `ss`.
    fn update_continuation_histories(&mut self, ss: usize, piece: usize, to: usize, bonus: i32) {
        const WEIGHTS: [(usize, i32); 6] =
            [(1, 1157), (2, 648), (3, 288), (4, 576), (5, 140), (6, 441)];
        let in_check = self.stack[ss].in_check;
        for (offset, weight) in WEIGHTS {
            if in_check && offset > 2 {
                break;
            }
            if self.stack[ss - offset].current_move.is_some() {
                let idx = self.stack[ss - offset].cont_index;
                self.histories.update_cont(
                    &idx,
                    piece,
                    to,
                    bonus * weight / 1024 + 88 * (offset < 2) as i32,
                );
            }
        }
    }

    fn update_quiet_histories(&mut self, board: &Board, ss: usize, m: &Move, bonus: i32) {
        let us = board.side_to_move();
        let ft = from_to(m);
        self.histories.update_main(us, ft, bonus);

        let ply = self.stack[ss].ply;
        if ply < LOW_PLY_PLIES {
            self.histories.update_low_ply(ply, ft, bonus * 761 / 1024);
        }

        let piece = board.piece_index_at(m.from().expect("quiet move origin"));
        let to = m.to() as usize;
        self.update_continuation_histories(ss, piece, to, bonus * 955 / 1024);

        let bucket = pawn_structure_index(board);
        let pawn_bonus = bonus * if bonus > 0 { 800 } else { 500 } / 1024 + 70;
        self.histories.update_pawn(bucket, piece, to, pawn_bonus);
    }

    /// Stats refresh once a node finishes with a best move.
    #[allow(clippy::too_many_arguments)]
    fn update_all_stats(
        &mut self,
        board: &Board,
        ss: usize,
        best_move: &Move,
        quiets: &[Move],
        captures: &[Move],
        depth: Depth,
        tt_move: PackedMove,
    ) {
        let bonus = (151 * depth - 91).min(1730)
            + 302 * (PackedMove::encode(best_move) == tt_move) as i32;
        let malus = (951 * depth - 156).min(2468) - 30 * quiets.len() as i32;

        if !board.is_capture_stage(best_move) {
            self.update_quiet_histories(board, ss, best_move, bonus * 957 / 1024);
            for m in quiets {
                let m = m.clone();
                self.update_quiet_histories(board, ss, &m, -malus);
            }
        } else {
            let piece = board.piece_index_at(best_move.from().expect("capture origin"));
            let to = best_move.to() as usize;
            let captured = best_move.capture().map_or(0, |r| r as usize - 1);
            self.histories.update_capture(piece, to, captured, bonus);
        }

        // Refuting an early quiet move of the previous ply reflects on it.
        let prev = self.stack[ss - 1].clone();
        if let Some(prev_move) = &prev.current_move {
            if prev.move_count == 1 + prev.tt_hit as u32 && prev.captured.is_none() {
                let prev_to = prev_move.to() as usize;
                let prev_piece = board.piece_index_at(prev_move.to());
                self.update_continuation_histories(
                    ss - 1,
                    prev_piece,
                    prev_to,
                    -malus * 503 / 1024,
                );
            }
        }

        for m in captures {
            let piece = board.piece_index_at(m.from().expect("capture origin"));
            let to = m.to() as usize;
            let captured = m.capture().map_or(0, |r| r as usize - 1);
            self.histories
                .update_capture(piece, to, captured, -malus * 1157 / 1024);
        }
    }

    // -----------------------------------------------------------------------
    // PV bookkeeping
    // -----------------------------------------------------------------------

    fn update_pv(&mut self, ply: usize, m: &Move) {
        let child = std::mem::take(&mut self.pv_table[ply + 1]);
        let row = &mut self.pv_table[ply];
        row.clear();
        row.push(m.clone());
        row.extend(child.iter().cloned());
        self.pv_table[ply + 1] = child;
    }

    fn reduction(&self, improving: bool, depth: Depth, move_count: u32, delta: Value) -> i32 {
        let d = (depth as usize).min(MAX_PLY - 1);
        let mc = (move_count as usize).min(MAX_PLY - 1);
        let scale = self.reductions[d] * self.reductions[mc];
        scale - delta * 757 / self.root_delta + (!improving as i32) * scale * 218 / 512 + 1200
    }

    // -----------------------------------------------------------------------
    // Tablebase root ranking
    // -----------------------------------------------------------------------

    /// Rank root moves by child WDL when the position is inside the tables.
    /// A failed probe disables ranking for the whole search (soft failure).
    fn rank_root_moves_with_tb(&mut self) {
        self.root_in_tb = false;
        for rm in &mut self.root_moves {
            rm.tb_rank = 0;
        }

        let pieces = self.root_board.piece_count();
        if self.tb_cardinality == 0
            || pieces > self.tb_cardinality
            || self.root_board.rule50() != 0
            || self.root_board.any_castling_rights()
        {
            return;
        }

        let mut ranks = Vec::with_capacity(self.root_moves.len());
        for rm in &self.root_moves {
            let child = self.root_board.make_move(rm.root_move());
            match self.shared.tb.probe_wdl(&child) {
                // The probe speaks for the opponent; negate for our view.
                Some(wdl) => ranks.push(-wdl),
                None => return,
            }
        }

        self.root_in_tb = true;
        let draw_score = self.shared.tb.use_rule50() as i32;
        for (rm, wdl) in self.root_moves.iter_mut().zip(ranks) {
            self.tb_hits += 1;
            rm.tb_rank = wdl * 1000;
            rm.tb_score = if wdl < -draw_score {
                -(VALUE_TB - 1)
            } else if wdl > draw_score {
                VALUE_TB - 1
            } else {
                VALUE_DRAW + 2 * wdl * draw_score
            };
        }
        self.shared.tb_hits[self.thread_idx].store(self.tb_hits, Ordering::Relaxed);
        self.root_moves.sort_by_key(|rm| -rm.tb_rank);
    }

    // -----------------------------------------------------------------------
    // Iterative deepening
    // -----------------------------------------------------------------------

    /// Run the worker until stopped or out of depth. The main worker also
    /// drives the time manager and the progress reports.
    pub fn iterate(&mut self) {
        for i in 0..SS_OFFSET {
            self.stack[i].static_eval = VALUE_NONE;
        }

        let main = self.is_main();
        if main {
            let seed = if self.memory.best_previous_score == VALUE_INFINITE {
                VALUE_ZERO
            } else {
                self.memory.best_previous_score
            };
            self.iter_values.fill(seed);
        }

        self.multi_pv = self
            .shared
            .options
            .multi_pv
            .max(1)
            .min(self.root_moves.len().max(1));
        self.histories.reset_low_ply();
        self.rank_root_moves_with_tb();

        let depth_limit = self.shared.limits.depth;
        let us = self.root_board.side_to_move();
        let mut search_again_counter: i32 = 0;
        let mut iter_best_value = -VALUE_INFINITE;

        while !self.stopped() {
            self.root_depth += 1;
            if self.root_depth >= MAX_PLY as Depth {
                break;
            }
            if main && depth_limit.is_some_and(|d| self.root_depth > d) {
                break;
            }

            if main {
                // Age out the PV variability metric.
                self.tot_best_move_changes /= 2.0;
            }

            for rm in &mut self.root_moves {
                rm.previous_score = rm.score;
            }

            let mut pv_first = 0;
            self.pv_last = 0;

            if !self.shared.increase_depth.load(Ordering::Relaxed) {
                search_again_counter += 1;
            }

            let root = self.root_board.clone();

            for pv_idx in 0..self.multi_pv {
                self.pv_idx = pv_idx;
                if pv_idx == self.pv_last {
                    pv_first = self.pv_last;
                    self.pv_last += 1;
                    while self.pv_last < self.root_moves.len()
                        && self.root_moves[self.pv_last].tb_rank
                            == self.root_moves[pv_first].tb_rank
                    {
                        self.pv_last += 1;
                    }
                }

                self.sel_depth = 0;

                // Aspiration window centred on the running average score.
                // On the first iteration the mean-squared term blows the
                // window wide open, which is exactly what we want.
                let avg = self.root_moves[pv_idx].average_score;
                let wide = 5
                    + (self.thread_idx % 8) as i64
                    + self.root_moves[pv_idx].mean_squared_score.abs() / 9000;
                let mut alpha =
                    ((avg as i64 - wide).max(-(VALUE_INFINITE as i64))) as Value;
                let mut beta = ((avg as i64 + wide).min(VALUE_INFINITE as i64)) as Value;
                let mut delta = wide.min(VALUE_INFINITE as i64) as Value;

                self.optimism[us as usize] = 137 * avg / (avg.abs() + 91);
                self.optimism[(!us) as usize] = -self.optimism[us as usize];

                let mut failed_high_cnt = 0;
                loop {
                    let adjusted_depth = (self.root_depth
                        - failed_high_cnt
                        - 3 * (search_again_counter + 1) / 4)
                        .max(1);
                    self.root_delta = (beta - alpha).max(1);

                    let best_value =
                        self.search::<RootTag>(&root, SS_OFFSET, alpha, beta, adjusted_depth, false);
                    iter_best_value = best_value;

                    sort_root_moves(&mut self.root_moves[pv_idx..self.pv_last]);

                    if self.stopped() {
                        break;
                    }

                    // Throttled progress line before an aspiration re-search.
                    if main
                        && self.multi_pv == 1
                        && (best_value <= alpha || best_value >= beta)
                    {
                        if self.root_depth == 1 {
                            self.throttle.reset();
                        }
                        let elapsed = self.shared.control.elapsed_ms();
                        let nodes = self.total_nodes();
                        if self.throttle.should_report(elapsed, nodes) {
                            self.report_pv(self.root_depth);
                        }
                    }

                    if best_value <= alpha {
                        beta = alpha;
                        alpha =
                            ((best_value as i64 - delta as i64).max(-(VALUE_INFINITE as i64))) as Value;
                        failed_high_cnt = 0;
                        if main {
                            self.shared.control.clear_stop_on_ponderhit();
                        }
                    } else if best_value >= beta {
                        alpha = (beta - delta).max(alpha);
                        beta =
                            ((best_value as i64 + delta as i64).min(VALUE_INFINITE as i64)) as Value;
                        failed_high_cnt += 1;
                    } else {
                        break;
                    }

                    delta += delta / 3;
                }

                sort_root_moves(&mut self.root_moves[pv_first..pv_idx + 1]);

                if main
                    && (self.stopped()
                        || pv_idx + 1 == self.multi_pv
                        || self.total_nodes() > 10_000_000)
                    && !(self.shared.control.is_aborted()
                        && is_loss(self.root_moves[0].uci_score))
                {
                    self.report_pv(self.root_depth);
                }

                if self.stopped() {
                    break;
                }
            }

            if !self.stopped() {
                self.completed_depth = self.root_depth;
            }

            // An aborted iteration may leave an unproven loss on top; fall
            // back to the last fully searched best line.
            if self.shared.control.is_aborted()
                && !self.last_best_pv.is_empty()
                && self.root_moves[0].score != -VALUE_INFINITE
                && is_loss(self.root_moves[0].score)
            {
                if let Some(pos) = self
                    .root_moves
                    .iter()
                    .position(|rm| rm.root_move() == &self.last_best_pv[0])
                {
                    self.root_moves[..=pos].rotate_right(1);
                }
                self.root_moves[0].pv = self.last_best_pv.clone();
                self.root_moves[0].score = self.last_best_score;
                self.root_moves[0].uci_score = self.last_best_score;
            } else if self.last_best_pv.first() != Some(self.root_moves[0].root_move()) {
                self.last_best_pv = self.root_moves[0].pv.clone();
                self.last_best_score = self.root_moves[0].score;
                self.last_best_move_depth = self.root_depth;
            }

            if !main {
                continue;
            }

            // Proven mate-in-x request.
            if let Some(mate) = self.shared.limits.mate {
                let rm = &self.root_moves[0];
                let proven = rm.score == rm.uci_score
                    && ((rm.score >= VALUE_MATE - MAX_PLY as Value
                        && VALUE_MATE - rm.score <= 2 * mate as Value)
                        || (rm.score != -VALUE_INFINITE
                            && rm.score <= -(VALUE_MATE - MAX_PLY as Value)
                            && VALUE_MATE + rm.score <= 2 * mate as Value));
                if proven {
                    self.shared.control.request_stop();
                }
            }

            // Pull best-move instability from every worker.
            let mut changes = 0u64;
            for counter in self.shared.best_move_changes {
                changes += counter.swap(0, Ordering::Relaxed);
            }
            self.tot_best_move_changes += changes as f64;

            if self.shared.limits.use_time_management(us) {
                if let Some(tm) = self.time {
                    if !self.stopped() && !self.shared.control.is_stop_on_ponderhit() {
                        self.decide_time_stop(&tm, iter_best_value);
                    }
                }
            }

            self.iter_values[self.iter_idx] = iter_best_value;
            self.iter_idx = (self.iter_idx + 1) & 3;
        }

        if main {
            self.memory.previous_time_reduction = self.time_reduction;
        }
    }

    /// Iteration-end stop decision for the main worker.
    fn decide_time_stop(&mut self, tm: &TimeManager, best_value: Value) {
        let control = self.shared.control;
        let total_nodes = self.total_nodes().max(1);
        let nodes_effort = self.root_moves[0].effort * 100_000 / total_nodes;

        let falling_eval = ((11.325
            + 2.115 * (self.memory.best_previous_average_score - best_value) as f64
            + 0.987 * (self.iter_values[self.iter_idx] - best_value) as f64)
            / 100.0)
            .clamp(0.5688, 1.5698);

        // A best move that has been stable for many iterations earns a
        // shorter budget.
        let k = 0.5189;
        let center = self.last_best_move_depth as f64 + 11.57;
        self.time_reduction =
            0.723 + 0.79 / (1.104 + (-k * (self.completed_depth as f64 - center)).exp());
        let reduction =
            (1.455 + self.memory.previous_time_reduction) / (2.2375 * self.time_reduction);
        let instability =
            1.04 + 1.8956 * self.tot_best_move_changes / self.shared.nodes.len() as f64;

        let mut total_time = tm.optimum() as f64 * falling_eval * reduction * instability;

        // A forced move needs no deliberation beyond a viewer-friendly pause.
        if self.root_moves.len() == 1 {
            total_time = total_time.min(502.0);
        }

        let elapsed = control.elapsed_ms() as f64;

        if self.completed_depth >= 10
            && nodes_effort >= 92_425
            && elapsed > total_time * 0.666
            && !control.is_pondering()
        {
            control.request_stop();
        }

        if elapsed > total_time.min(tm.maximum() as f64) {
            if control.is_pondering() {
                control.set_stop_on_ponderhit();
            } else {
                control.request_stop();
            }
        } else {
            self.shared.increase_depth.store(
                control.is_pondering() || elapsed <= total_time * 0.503,
                Ordering::Relaxed,
            );
        }
    }

    // -----------------------------------------------------------------------
    // Progress reporting
    // -----------------------------------------------------------------------

    fn report_pv(&mut self, depth: Depth) {
        let elapsed = self.shared.control.elapsed_ms().max(1);
        let nodes = self.total_nodes();
        let tb_hits = self.total_tb_hits()
            + if self.root_in_tb {
                self.root_moves.len() as u64
            } else {
                0
            };
        let hashfull = self.shared.tt.hashfull();
        let multi_pv = self.multi_pv.min(self.root_moves.len());

        let mut infos = Vec::with_capacity(multi_pv);
        for i in 0..multi_pv {
            let rm = &self.root_moves[i];
            let updated = rm.score != -VALUE_INFINITE;

            if depth == 1 && !updated && i > 0 {
                continue;
            }

            let d = if updated { depth } else { (depth - 1).max(1) };
            let mut v = if updated { rm.uci_score } else { rm.previous_score };
            if v == -VALUE_INFINITE {
                v = VALUE_ZERO;
            }
            let tb = self.root_in_tb && v.abs() <= VALUE_TB;
            let v = if tb { rm.tb_score } else { v };
            let exact = i != self.pv_idx || tb || !updated;

            let bound = if exact {
                ScoreBound::Exact
            } else if rm.score_lowerbound {
                ScoreBound::Lower
            } else if rm.score_upperbound {
                ScoreBound::Upper
            } else {
                ScoreBound::Exact
            };

            infos.push(SearchInfo {
                depth: d,
                sel_depth: rm.sel_depth,
                multipv: i + 1,
                score: UciScore::from_value(v),
                bound,
                time_ms: elapsed,
                nodes,
                nps: nodes * 1000 / elapsed,
                tb_hits,
                hashfull,
                pv: rm.pv.clone(),
            });
        }

        if let Some(listener) = self.listener.as_mut() {
            for info in &infos {
                listener.on_update_full(info);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// The search recursion
// ---------------------------------------------------------------------------

impl<'a> Worker<'a> {
    /// Principal-variation search. `alpha < beta` always; non-PV nodes run
    /// zero-width windows (`alpha == beta - 1`).
    #[allow(clippy::too_many_lines)]
    pub(crate) fn search<NT: NodeTag>(
        &mut self,
        board: &Board,
        ss: usize,
        mut alpha: Value,
        mut beta: Value,
        mut depth: Depth,
        cut_node: bool,
    ) -> Value {
        let pv_node = NT::PV;
        let root_node = NT::ROOT;
        let all_node = !(pv_node || cut_node);

        // Depth exhausted: resolve tactics instead of evaluating directly.
        if depth <= 0 {
            return if pv_node {
                self.qsearch::<PvTag>(board, ss, alpha, beta)
            } else {
                self.qsearch::<NonPvTag>(board, ss, alpha, beta)
            };
        }

        // Extensions may have pushed the depth past the stack bound.
        depth = depth.min(MAX_PLY as Depth - 1);

        let ply = ss - SS_OFFSET;

        // A reachable repetition bounds the score at the draw value.
        if !root_node && alpha < VALUE_DRAW && self.repetition_state(board).0 {
            alpha = self.value_draw();
            if alpha >= beta {
                return alpha;
            }
        }

        debug_assert!(-VALUE_INFINITE <= alpha && alpha < beta && beta <= VALUE_INFINITE);
        debug_assert!(pv_node || alpha == beta - 1);
        debug_assert!(0 < depth && depth < MAX_PLY as Depth);
        debug_assert!(!(pv_node && cut_node));

        // Step 1. Node init.
        let in_check = board.in_check();
        let us = board.side_to_move();
        self.stack[ss].ply = ply;
        self.stack[ss].in_check = in_check;
        self.stack[ss].move_count = 0;
        let prior_capture = self.stack[ss - 1].captured;
        let mut best_value = -VALUE_INFINITE;
        let mut max_value = VALUE_INFINITE;

        if self.is_main() {
            self.check_time();
        }

        if pv_node && self.sel_depth < ply + 1 {
            self.sel_depth = ply + 1;
        }

        if !root_node {
            // Step 2. Aborted search and immediate draws.
            if self.stopped() || self.is_draw(board) || ply >= MAX_PLY {
                return if ply >= MAX_PLY && !in_check {
                    self.evaluate(board)
                } else {
                    self.value_draw()
                };
            }

            // Step 3. Mate distance pruning: no line from here can beat a
            // shorter mate already found closer to the root.
            alpha = alpha.max(mated_in(ply));
            beta = beta.min(mate_in(ply + 1));
            if alpha >= beta {
                return alpha;
            }
        }

        let prev_move = self.stack[ss - 1].current_move.clone();
        let prev_sq = prev_move.as_ref().map(|m| m.to());
        let mut best_move: Option<Move> = None;
        let prior_reduction = self.stack[ss - 1].reduction;
        self.stack[ss - 1].reduction = 0;
        self.stack[ss].stat_score = 0;
        self.stack[ss + 2].cutoff_cnt = 0;

        // Step 4. Transposition table lookup.
        let excluded = self.stack[ss].excluded;
        let pos_key = board.key();
        let probe = self.shared.tt.probe(pos_key);
        self.stack[ss].tt_hit = probe.hit;

        let moves = board.legal_moves();
        let tt_hint = if root_node {
            PackedMove::encode(self.root_moves[self.pv_idx].root_move())
        } else if probe.hit {
            probe.data.mv
        } else {
            PackedMove::NONE
        };
        let tt_move: Option<Move> = tt_hint.find_in(&moves);
        let tt_packed = tt_move.as_ref().map_or(PackedMove::NONE, PackedMove::encode);
        let tt_value = if probe.hit {
            value_from_tt(probe.data.value, ply, board.rule50())
        } else {
            VALUE_NONE
        };
        let tt_depth = probe.data.depth;
        let tt_bound = probe.data.bound;
        if excluded.is_none() {
            self.stack[ss].tt_pv = pv_node || (probe.hit && probe.data.is_pv);
        }
        let tt_capture = tt_move.as_ref().is_some_and(|m| board.is_capture_stage(m));

        // Early TT cutoff at non-PV nodes.
        if !pv_node
            && excluded.is_none()
            && tt_depth > depth - (tt_value <= beta) as Depth
            && is_valid(tt_value)
            && tt_bound.includes(if tt_value >= beta { Bound::Lower } else { Bound::Upper })
            && (cut_node == (tt_value >= beta) || depth > 5)
            && (depth > 8
                || tt_move.is_none()
                || board.rule50() < 80
                || (!tt_capture
                    && tt_move
                        .as_ref()
                        .and_then(|m| m.from())
                        .and_then(|sq| board.role_at(sq))
                        != Some(Role::Pawn)))
        {
            // A quiet TT move that fails high is worth reinforcing even
            // though we are not searching it now.
            if let Some(ttm) = tt_move.clone() {
                if tt_value >= beta {
                    if !tt_capture {
                        let bonus = (130 * depth - 71).min(1043);
                        self.update_quiet_histories(board, ss, &ttm, bonus);
                    }
                    if let Some(psq) = prev_sq {
                        if self.stack[ss - 1].move_count < 4 && prior_capture.is_none() {
                            let ppiece = board.piece_index_at(psq);
                            self.update_continuation_histories(
                                ss - 1,
                                ppiece,
                                psq as usize,
                                -2142,
                            );
                        }
                    }
                }
            }

            // High rule-50 counts interact badly with the graph history, so
            // no cutoff near the reset horizon.
            if board.rule50() < 96 {
                // At depth, verify that the entry behind the TT move agrees
                // with the claimed side of the window before trusting it.
                if depth >= 8 && tt_move.is_some() && !is_decisive(tt_value) {
                    let ttm = tt_move.clone().expect("checked above");
                    let child = board.make_move(&ttm);
                    let next = self.shared.tt.probe(child.key());
                    let next_value = if next.hit {
                        value_from_tt(next.data.value, ply + 1, child.rule50())
                    } else {
                        VALUE_NONE
                    };
                    if !is_valid(next_value) {
                        return tt_value;
                    }
                    if (tt_value >= beta) == (-next_value >= beta) {
                        return tt_value;
                    }
                } else {
                    return tt_value;
                }
            }
        }

        // Step 5. Tablebase probe.
        if !root_node && excluded.is_none() && self.tb_cardinality > 0 {
            let pieces = board.piece_count();
            if pieces <= self.tb_cardinality
                && (pieces < self.tb_cardinality || depth >= self.shared.tb.probe_depth())
                && board.rule50() == 0
                && !board.any_castling_rights()
            {
                if self.is_main() {
                    // Force a clock check on the next entry.
                    self.calls_cnt = 0;
                }
                if let Some(wdl) = self.shared.tb.probe_wdl(board) {
                    self.bump_tb_hit();

                    let draw_score = self.shared.tb.use_rule50() as i32;
                    let tb_value = VALUE_TB - ply as Value;
                    let value = if wdl < -draw_score {
                        -tb_value
                    } else if wdl > draw_score {
                        tb_value
                    } else {
                        VALUE_DRAW + 2 * wdl * draw_score
                    };
                    let bound = if wdl < -draw_score {
                        Bound::Upper
                    } else if wdl > draw_score {
                        Bound::Lower
                    } else {
                        Bound::Exact
                    };

                    if bound == Bound::Exact
                        || (bound == Bound::Lower && value >= beta)
                        || (bound == Bound::Upper && value <= alpha)
                    {
                        self.shared.tt.store(
                            &probe,
                            pos_key,
                            value_to_tt(value, ply),
                            VALUE_NONE,
                            (depth + 6).min(MAX_PLY as Depth - 1),
                            PackedMove::NONE,
                            bound,
                            self.stack[ss].tt_pv,
                        );
                        return value;
                    }

                    if pv_node {
                        if bound == Bound::Lower {
                            best_value = value;
                            alpha = alpha.max(best_value);
                        } else {
                            max_value = value;
                        }
                    }
                }
            }
        }

        // Step 6. Static evaluation.
        let correction = self.correction_value(board, ss);
        let mut unadjusted_eval = VALUE_NONE;
        let mut improving = false;

        if in_check {
            // No pruning while in check; inherit the eval from two plies ago.
            self.stack[ss].static_eval = self.stack[ss - 2].static_eval;
        } else {
            let mut eval;
            if excluded.is_some() {
                // Same node, already evaluated by the enclosing search.
                unadjusted_eval = self.stack[ss].static_eval;
                eval = self.stack[ss].static_eval;
            } else if probe.hit {
                unadjusted_eval = if is_valid(probe.data.eval) {
                    probe.data.eval
                } else {
                    self.evaluate(board)
                };
                eval = Self::corrected_eval(unadjusted_eval, correction);
                self.stack[ss].static_eval = eval;

                // The TT value is a better estimate when its bound allows.
                if is_valid(tt_value)
                    && tt_bound
                        .includes(if tt_value > eval { Bound::Lower } else { Bound::Upper })
                {
                    eval = tt_value;
                }
            } else {
                unadjusted_eval = self.evaluate(board);
                eval = Self::corrected_eval(unadjusted_eval, correction);
                self.stack[ss].static_eval = eval;

                // Cache the raw eval even without a search result.
                self.shared.tt.store(
                    &probe,
                    pos_key,
                    VALUE_NONE,
                    unadjusted_eval,
                    DEPTH_UNSEARCHED,
                    PackedMove::NONE,
                    Bound::None,
                    self.stack[ss].tt_pv,
                );
            }

            // The eval swing across the opponent's move refines the ordering
            // of their quiet choices.
            if let Some(pm) = prev_move.clone() {
                if !self.stack[ss - 1].in_check && prior_capture.is_none() {
                    let swing = self.stack[ss - 1].static_eval + self.stack[ss].static_eval;
                    let bonus = (-10 * swing).clamp(-2023, 1563) + 583;
                    self.histories
                        .update_main(!us, from_to(&pm), bonus * 944 / 1024);
                    let psq = pm.to();
                    if !probe.hit
                        && board.role_at(psq) != Some(Role::Pawn)
                        && pm.promotion().is_none()
                    {
                        self.histories.update_pawn(
                            pawn_structure_index(board),
                            board.piece_index_at(psq),
                            psq as usize,
                            bonus * 1438 / 1024,
                        );
                    }
                }
            }

            improving = self.stack[ss].static_eval > self.stack[ss - 2].static_eval;
            let opponent_worsening = self.stack[ss].static_eval > -self.stack[ss - 1].static_eval;

            if prior_reduction >= 3 && !opponent_worsening {
                depth += 1;
            }
            if prior_reduction >= 2
                && depth >= 2
                && self.stack[ss].static_eval + self.stack[ss - 1].static_eval > 173
            {
                depth -= 1;
            }

            // Step 7. Razoring: a hopeless eval goes straight to quiescence.
            if !pv_node && eval < alpha - 514 - 294 * depth * depth {
                return self.qsearch::<NonPvTag>(board, ss, alpha, beta);
            }

            // Step 8. Futility pruning for the child: a large static margin
            // over beta prunes the whole node at shallow depth.
            {
                let futility_mult = 91 - 21 * !probe.hit as Value;
                let margin = futility_mult * depth
                    - 2094 * improving as Value * futility_mult / 1024
                    - 1324 * opponent_worsening as Value * futility_mult / 4096
                    + self.stack[ss - 1].stat_score / 331
                    + (correction.abs() / 158_105) as Value;
                if !self.stack[ss].tt_pv
                    && depth < 14
                    && eval - margin >= beta
                    && eval >= beta
                    && (tt_move.is_none() || tt_capture)
                    && !is_loss(beta)
                    && !is_win(eval)
                {
                    return (2 * beta + eval) / 3;
                }
            }

            // Step 9. Null move with verification at high depth.
            if cut_node
                && self.stack[ss].static_eval >= beta - 18 * depth + 390
                && excluded.is_none()
                && board.non_pawn_material(us) > 0
                && ply >= self.nmp_min_ply
                && !is_loss(beta)
                && self.stack[ss - 1].current_move.is_some()
            {
                let r = 6 + depth / 3;
                if let Some(null_child) = self.do_null_move(board, ss) {
                    let null_value = -self.search::<NonPvTag>(
                        &null_child,
                        ss + 1,
                        -beta,
                        -beta + 1,
                        depth - r,
                        false,
                    );
                    self.undo_move();

                    // Unproven wins from a passed move are never returned.
                    if null_value >= beta && !is_win(null_value) {
                        if self.nmp_min_ply > 0 || depth < 16 {
                            return null_value;
                        }

                        // Verification search with null moves disabled for
                        // the upper part of the subtree.
                        self.nmp_min_ply = ply + 3 * (depth - r) as usize / 4;
                        let v = self.search::<NonPvTag>(board, ss, beta - 1, beta, depth - r, false);
                        self.nmp_min_ply = 0;

                        if v >= beta {
                            return null_value;
                        }
                    }
                }
            }

            improving = improving || self.stack[ss].static_eval >= beta;

            // Step 10. Internal iterative reduction.
            if !all_node && depth >= 6 && tt_move.is_none() && prior_reduction <= 3 {
                depth -= 1;
            }

            // Step 11. ProbCut: a good capture clearing beta by a margin in
            // a reduced search almost certainly refutes the previous move.
            let prob_cut_beta = beta + 224 - 64 * improving as Value;
            if depth >= 3
                && !is_decisive(beta)
                && !(is_valid(tt_value) && tt_value < prob_cut_beta)
            {
                let threshold = prob_cut_beta - self.stack[ss].static_eval;
                let prob_cut_depth =
                    (depth - 5 - (self.stack[ss].static_eval - beta) / 306).clamp(0, depth);
                let prev_conts = [
                    self.stack[ss - 1].cont_index,
                    self.stack[ss - 2].cont_index,
                ];
                let mut picker = MovePicker::new(
                    board,
                    &moves,
                    tt_packed,
                    prev_conts,
                    ply,
                    PickMode::ProbCut(threshold),
                );
                while let Some(m) = picker.next_move(&self.histories) {
                    if PackedMove::encode(&m) == excluded {
                        continue;
                    }
                    let child = self.do_move(board, &m, ss);
                    let mut value = -self.qsearch::<NonPvTag>(
                        &child,
                        ss + 1,
                        -prob_cut_beta,
                        -prob_cut_beta + 1,
                    );
                    if value >= prob_cut_beta && prob_cut_depth > 0 {
                        value = -self.search::<NonPvTag>(
                            &child,
                            ss + 1,
                            -prob_cut_beta,
                            -prob_cut_beta + 1,
                            prob_cut_depth,
                            !cut_node,
                        );
                    }
                    self.undo_move();

                    if value >= prob_cut_beta {
                        self.shared.tt.store(
                            &probe,
                            pos_key,
                            value_to_tt(value, ply),
                            unadjusted_eval,
                            prob_cut_depth + 1,
                            PackedMove::encode(&m),
                            Bound::Lower,
                            self.stack[ss].tt_pv,
                        );
                        if !is_decisive(value) {
                            return value - (prob_cut_beta - beta);
                        }
                    }
                }
            }
        }

        // Step 12. A small ProbCut idea on the TT entry alone.
        let prob_cut_beta = beta + 418;
        if tt_bound.includes(Bound::Lower)
            && tt_depth >= depth - 4
            && is_valid(tt_value)
            && tt_value >= prob_cut_beta
            && !is_decisive(beta)
            && !is_decisive(tt_value)
        {
            return prob_cut_beta;
        }

        let prev_conts = [self.stack[ss - 1].cont_index, self.stack[ss - 2].cont_index];
        let pawn_bucket = pawn_structure_index(board);

        let mut picker = MovePicker::new(board, &moves, tt_packed, prev_conts, ply, PickMode::Search);

        let mut value = best_value;
        let mut move_count: u32 = 0;
        let mut quiets_searched: Vec<Move> = Vec::with_capacity(SEARCHED_LIST_CAPACITY);
        let mut captures_searched: Vec<Move> = Vec::with_capacity(SEARCHED_LIST_CAPACITY);
        let attack_inclination = self.shared.options.attack_inclination;
        let check_tolerance = self.shared.options.check_sacrifice_tolerance_cp;

        // Step 13. Move loop.
        while let Some(m) = picker.next_move(&self.histories) {
            let m_packed = PackedMove::encode(&m);
            if m_packed == excluded {
                continue;
            }

            // At root only the moves of the active MultiPV band participate.
            if root_node
                && !self.root_moves[self.pv_idx..self.pv_last]
                    .iter()
                    .any(|rm| rm.root_move() == &m)
            {
                continue;
            }

            move_count += 1;
            self.stack[ss].move_count = move_count;

            if root_node && self.is_main() && self.total_nodes() > 10_000_000 {
                let num = move_count as usize + self.pv_idx;
                if let Some(listener) = self.listener.as_mut() {
                    listener.on_iter(depth, &m, num);
                }
            }

            if pv_node {
                self.pv_table[ply + 1].clear();
            }

            let mut extension: Depth = 0;
            let capture = board.is_capture_stage(&m);
            let from = m.from().expect("legal move origin");
            let moved_piece = board.piece_index_at(from);
            let gives_check = board.gives_check(&m);
            let to = m.to() as usize;

            let mut new_depth = depth - 1;
            let delta = beta - alpha;
            let mut r = self.reduction(improving, depth, move_count, delta);

            // Softer reductions on forcing moves when configured.
            if attack_inclination > 0 && (gives_check || capture) {
                if attack_inclination >= 50 {
                    r -= 1024;
                } else if attack_inclination >= 20 {
                    r -= 512;
                }
            }

            if self.stack[ss].tt_pv {
                r += 946;
            }

            // Step 14. Pruning at shallow depth.
            if !root_node && board.non_pawn_material(us) > 0 && !is_loss(best_value) {
                if move_count >= ((3 + depth * depth) / (2 - improving as Depth)) as u32 {
                    picker.skip_quiet_moves();
                }

                let mut lmr_depth = new_depth - r / 1024;

                if capture || gives_check {
                    let captured_role = m.capture();
                    let capt_slot = captured_role.map_or(0, |r| r as usize - 1);
                    let capt_hist = self.histories.capture_score(moved_piece, to, capt_slot);

                    // Futility for captures: the gained material cannot lift
                    // the eval to alpha.
                    if !gives_check && lmr_depth < 7 {
                        let futility_value = self.stack[ss].static_eval
                            + 231
                            + 211 * lmr_depth
                            + captured_role.map_or(0, role_value)
                            + 130 * capt_hist / 1024;
                        if futility_value <= alpha {
                            continue;
                        }
                    }

                    let mut margin = (157 * depth + capt_hist / 29).max(0);
                    if gives_check && check_tolerance > 0 {
                        margin += check_tolerance;
                    }
                    let moved_value = board.role_at(from).map_or(0, role_value);
                    if (alpha >= VALUE_DRAW || board.non_pawn_material(us) != moved_value)
                        && !see_ge(board, &m, -margin)
                    {
                        continue;
                    }
                } else {
                    let history = self.histories.cont_score(&prev_conts[0], moved_piece, to)
                        + self.histories.cont_score(&prev_conts[1], moved_piece, to)
                        + self.histories.pawn_score(pawn_bucket, moved_piece, to);

                    // A quiet move every recent continuation hates is gone.
                    if history < -4312 * depth {
                        continue;
                    }

                    let history = history + 76 * self.histories.main_score(us, from_to(&m)) / 32;
                    lmr_depth += history / 3220;

                    let futility_value = self.stack[ss].static_eval
                        + 47
                        + 171 * best_move.is_none() as Value
                        + 134 * lmr_depth
                        + 90 * (self.stack[ss].static_eval > alpha) as Value;

                    if !in_check && lmr_depth < 11 && futility_value <= alpha {
                        if best_value <= futility_value
                            && !is_decisive(best_value)
                            && !is_win(futility_value)
                        {
                            best_value = futility_value;
                        }
                        continue;
                    }

                    lmr_depth = lmr_depth.max(0);
                    if !see_ge(board, &m, -27 * lmr_depth * lmr_depth) {
                        continue;
                    }
                }
            }

            // Step 15. Singular extension: exclude the TT move and re-search
            // this node; if everything else fails low by a margin, the TT
            // move is the only viable try and deserves more depth.
            if !root_node
                && Some(&m) == tt_move.as_ref()
                && excluded.is_none()
                && depth >= 6 + self.stack[ss].tt_pv as Depth
                && is_valid(tt_value)
                && !is_decisive(tt_value)
                && tt_bound.includes(Bound::Lower)
                && tt_depth >= depth - 3
            {
                let singular_beta = (tt_value
                    - (56 + 81 * (self.stack[ss].tt_pv && !pv_node) as Value) * depth / 60)
                    .max(-VALUE_INFINITE + 1);
                let singular_depth = new_depth / 2;

                self.stack[ss].excluded = m_packed;
                value = self.search::<NonPvTag>(
                    board,
                    ss,
                    singular_beta - 1,
                    singular_beta,
                    singular_depth,
                    cut_node,
                );
                self.stack[ss].excluded = PackedMove::NONE;

                if value < singular_beta {
                    let corr_adj = (correction.abs() / 229_958) as Value;
                    let double_margin = -4 + 198 * pv_node as Value - 212 * !tt_capture as Value
                        - corr_adj
                        - 921 * self.histories.tt_move / 127_649
                        - (ply as Depth > self.root_depth) as Value * 45;
                    let triple_margin = 76 + 308 * pv_node as Value - 250 * !tt_capture as Value
                        + 92 * self.stack[ss].tt_pv as Value
                        - corr_adj
                        - (ply as Depth * 2 > self.root_depth * 3) as Value * 52;

                    extension = 1
                        + (value < singular_beta - double_margin) as Depth
                        + (value < singular_beta - triple_margin) as Depth;
                    depth += 1;
                } else if value >= beta && !is_decisive(value) {
                    // Multi-cut: even without the TT move this node fails
                    // high, so prune the whole subtree on a soft bound.
                    self.histories
                        .update_tt_move((-400 - 100 * depth).max(-4000));
                    return value;
                } else if tt_value >= beta {
                    extension = -3;
                } else if cut_node {
                    extension = -2;
                }
            }

            // Step 16. Make the move.
            let child = self.do_move(board, &m, ss);
            new_depth += extension;
            let nodes_before = self.nodes;

            if self.stack[ss].tt_pv {
                r -= 2618
                    + pv_node as i32 * 991
                    + (is_valid(tt_value) && tt_value > alpha) as i32 * 903
                    + (tt_depth >= depth) as i32 * (978 + cut_node as i32 * 1051);
            }

            r += 843;
            r -= move_count as i32 * 66;
            r -= (correction.abs() / 30_450) as i32;

            if cut_node {
                r += 3094 + 1056 * tt_move.is_none() as i32;
            }
            if tt_capture {
                r += 1415;
            }
            if self.stack[ss + 1].cutoff_cnt > 2 {
                r += 1051 + all_node as i32 * 814;
            }
            if Some(&m) == tt_move.as_ref() {
                r -= 2018;
            }

            let stat_score = if capture {
                803 * m.capture().map_or(0, role_value) / 128
                    + self
                        .histories
                        .capture_score(moved_piece, to, m.capture().map_or(0, |r| r as usize - 1))
            } else {
                2 * self.histories.main_score(us, from_to(&m))
                    + self.histories.cont_score(&prev_conts[0], moved_piece, to)
                    + self.histories.cont_score(&prev_conts[1], moved_piece, to)
            };
            self.stack[ss].stat_score = stat_score;
            r -= stat_score * 794 / 8192;

            // Step 17. Late move reduction.
            if depth >= 2 && move_count > 1 {
                let d = (new_depth - r / 1024).min(new_depth + 2).max(1) + pv_node as Depth;

                self.stack[ss].reduction = new_depth - d;
                value = -self.search::<NonPvTag>(&child, ss + 1, -(alpha + 1), -alpha, d, true);
                self.stack[ss].reduction = 0;

                if value > alpha {
                    // The reduced search was wrong about this move; choose
                    // between a deeper or shallower verification.
                    let do_deeper = d < new_depth && value > best_value + 43 + 2 * new_depth;
                    let do_shallower = value < best_value + 9;
                    new_depth += do_deeper as Depth - do_shallower as Depth;

                    if new_depth > d {
                        value = -self.search::<NonPvTag>(
                            &child,
                            ss + 1,
                            -(alpha + 1),
                            -alpha,
                            new_depth,
                            !cut_node,
                        );
                    }

                    self.update_continuation_histories(ss, moved_piece, to, 1365);
                }
            }
            // Step 18. Full-depth zero-window search when LMR is skipped.
            else if !pv_node || move_count > 1 {
                if tt_move.is_none() {
                    r += 1118;
                }

                let reduced =
                    new_depth - (r > 3212) as Depth - (r > 4784 && new_depth > 2) as Depth;
                value =
                    -self.search::<NonPvTag>(&child, ss + 1, -(alpha + 1), -alpha, reduced, !cut_node);
            }

            // Full-window search for PV first moves and fail-highs.
            if pv_node && (move_count == 1 || value > alpha) {
                self.pv_table[ply + 1].clear();

                if Some(&m) == tt_move.as_ref() && tt_depth > 1 && self.root_depth > 8 {
                    new_depth = new_depth.max(1);
                }

                value = -self.search::<PvTag>(&child, ss + 1, -beta, -alpha, new_depth, false);
            }

            // Step 19. Undo.
            self.undo_move();

            debug_assert!(value > -VALUE_INFINITE && value < VALUE_INFINITE);

            // Step 20. A stopped search cannot trust this value.
            if self.stopped() {
                return VALUE_ZERO;
            }

            if root_node {
                let spent = self.nodes - nodes_before;
                let child_pv = self.pv_table[ply + 1].clone();
                let idx = self
                    .root_moves
                    .iter()
                    .position(|rm| rm.root_move() == &m)
                    .expect("searched move is a root move");
                let pv_front = self.pv_idx == 0;
                let sel_depth = self.sel_depth;
                let rm = &mut self.root_moves[idx];

                rm.effort += spent;
                rm.record_score(value);

                if move_count == 1 || value > alpha {
                    rm.score = value;
                    rm.uci_score = value;
                    rm.sel_depth = sel_depth;
                    rm.score_lowerbound = false;
                    rm.score_upperbound = false;

                    if value >= beta {
                        rm.score_lowerbound = true;
                        rm.uci_score = beta;
                    } else if value <= alpha {
                        rm.score_upperbound = true;
                        rm.uci_score = alpha;
                    }

                    rm.pv.truncate(1);
                    rm.pv.extend(child_pv);

                    if move_count > 1 && pv_front {
                        self.shared.best_move_changes[self.thread_idx]
                            .fetch_add(1, Ordering::Relaxed);
                    }
                } else {
                    // Keep the stable order: unsearched moves stay behind.
                    rm.score = -VALUE_INFINITE;
                }
            }

            // Promote an equal-valued alternative near the horizon now and
            // then, so repeated searches do not fixate on one drawing line.
            let inc = (value == best_value
                && ply + 2 >= self.root_depth as usize
                && (self.nodes & 14) == 0
                && !is_win(value.abs() + 1)) as Value;

            if value + inc > best_value {
                best_value = value;

                if value + inc > alpha {
                    best_move = Some(m.clone());

                    if pv_node && !root_node {
                        self.update_pv(ply, &m);
                    }

                    if value >= beta {
                        self.stack[ss].cutoff_cnt += (extension < 2 || pv_node) as u32;
                        break;
                    }

                    // One improvement found: the rest of the node can be
                    // searched a little shallower.
                    if depth > 2 && depth < 14 && !is_decisive(value) {
                        depth -= 2;
                    }

                    alpha = value;
                }
            }

            if Some(&m) != best_move.as_ref() && move_count <= SEARCHED_LIST_CAPACITY as u32 {
                if capture {
                    captures_searched.push(m.clone());
                } else {
                    quiets_searched.push(m.clone());
                }
            }
        }

        // Step 21. Terminals and statistics.
        debug_assert!(move_count > 0 || !in_check || excluded.is_some() || moves.is_empty());

        if best_value >= beta && !is_decisive(best_value) && !is_decisive(alpha) {
            best_value = (best_value * depth + beta) / (depth + 1);
        }

        if move_count == 0 {
            best_value = if excluded.is_some() {
                alpha
            } else if in_check {
                mated_in(ply)
            } else {
                VALUE_DRAW
            };
        } else if let Some(bm) = best_move.clone() {
            self.update_all_stats(
                board,
                ss,
                &bm,
                &quiets_searched,
                &captures_searched,
                depth,
                tt_packed,
            );
            if !pv_node {
                let bonus = if Some(&bm) == tt_move.as_ref() { 809 } else { -865 };
                self.histories.update_tt_move(bonus);
            }
        } else if let Some(psq) = prev_sq {
            if prior_capture.is_none() {
                // Everything failed low: the opponent's quiet move that led
                // here refuted the whole node and earns a scaled bonus.
                let mut bonus_scale: i32 = -228;
                bonus_scale -= self.stack[ss - 1].stat_score / 104;
                bonus_scale += (63 * depth).min(508);
                bonus_scale += 184 * (self.stack[ss - 1].move_count > 8) as i32;
                bonus_scale += 143
                    * (!in_check && best_value <= self.stack[ss].static_eval - 92) as i32;
                bonus_scale += 149
                    * (!self.stack[ss - 1].in_check
                        && best_value <= -self.stack[ss - 1].static_eval - 70)
                        as i32;
                bonus_scale = bonus_scale.max(0);

                let scaled_bonus = (144 * depth - 92).min(1365) * bonus_scale;
                let ppiece = board.piece_index_at(psq);
                self.update_continuation_histories(
                    ss - 1,
                    ppiece,
                    psq as usize,
                    scaled_bonus * 400 / 32768,
                );

                if let Some(pm) = &prev_move {
                    self.histories
                        .update_main(!us, from_to(pm), scaled_bonus * 220 / 32768);
                    if board.role_at(psq) != Some(Role::Pawn) && pm.promotion().is_none() {
                        self.histories.update_pawn(
                            pawn_bucket,
                            ppiece,
                            psq as usize,
                            scaled_bonus * 1164 / 32768,
                        );
                    }
                }
            } else if let Some(captured) = prior_capture {
                // A capture refuted the node: its capture history improves.
                let ppiece = board.piece_index_at(psq);
                self.histories
                    .update_capture(ppiece, psq as usize, captured as usize - 1, 964);
            }
        }

        if pv_node {
            best_value = best_value.min(max_value);
        }

        // A fail-low under a PV parent keeps the PV marker alive: the
        // opponent's previous move was probably good.
        if best_value <= alpha {
            self.stack[ss].tt_pv = self.stack[ss].tt_pv || self.stack[ss - 1].tt_pv;
        }

        // Step 22. Write back, except in excluded sub-searches and for
        // MultiPV lines beyond the first.
        if excluded.is_none() && !(root_node && self.pv_idx > 0) {
            let bound = if best_value >= beta {
                Bound::Lower
            } else if pv_node && best_move.is_some() {
                Bound::Exact
            } else {
                Bound::Upper
            };
            let write_depth = if move_count != 0 {
                depth
            } else {
                (depth + 6).min(MAX_PLY as Depth - 1)
            };
            self.shared.tt.store(
                &probe,
                pos_key,
                value_to_tt(best_value, ply),
                unadjusted_eval,
                write_depth,
                best_move
                    .as_ref()
                    .map_or(PackedMove::NONE, PackedMove::encode),
                bound,
                self.stack[ss].tt_pv,
            );
        }

        // The gap between the search result and the static eval feeds the
        // correction histories, unless a capture or a check explains it.
        let static_eval = self.stack[ss].static_eval;
        let best_is_capture = best_move
            .as_ref()
            .is_some_and(|m| m.is_capture());
        if !in_check
            && !best_is_capture
            && ((best_value < static_eval && best_value < beta)
                || (best_value > static_eval && best_move.is_some()))
        {
            let bonus = ((best_value - static_eval) * depth
                / (8 + (best_value > static_eval) as Depth))
                .clamp(
                    -CORRECTION_HISTORY_LIMIT / 4,
                    CORRECTION_HISTORY_LIMIT / 4,
                );
            let bonus = (1088 - 180 * (best_value > static_eval) as i32) * bonus / 1024;
            self.update_correction_histories(board, ss, bonus);
        }

        debug_assert!(best_value > -VALUE_INFINITE && best_value < VALUE_INFINITE);

        best_value
    }

    /// Quiescence search: captures and queen promotions (all evasions while
    /// in check) until the position goes quiet.
    pub(crate) fn qsearch<NT: NodeTag>(
        &mut self,
        board: &Board,
        ss: usize,
        mut alpha: Value,
        beta: Value,
    ) -> Value {
        let pv_node = NT::PV;
        let ply = ss - SS_OFFSET;

        debug_assert!(-VALUE_INFINITE <= alpha && alpha < beta && beta <= VALUE_INFINITE);
        debug_assert!(pv_node || alpha == beta - 1);

        if alpha < VALUE_DRAW && self.repetition_state(board).0 {
            alpha = self.value_draw();
            if alpha >= beta {
                return alpha;
            }
        }

        // Step 1. Node init.
        if pv_node {
            self.pv_table[ply].clear();
        }

        let in_check = board.in_check();
        self.stack[ss].ply = ply;
        self.stack[ss].in_check = in_check;
        let mut best_move: Option<Move> = None;
        let mut move_count: u32 = 0;

        if pv_node && self.sel_depth < ply + 1 {
            self.sel_depth = ply + 1;
        }

        // Step 2. Draws and the depth wall.
        if self.is_draw(board) || ply >= MAX_PLY {
            return if ply >= MAX_PLY && !in_check {
                self.evaluate(board)
            } else {
                VALUE_DRAW
            };
        }

        debug_assert!(ply < MAX_PLY);

        // Step 3. Transposition table lookup.
        let pos_key = board.key();
        let probe = self.shared.tt.probe(pos_key);
        self.stack[ss].tt_hit = probe.hit;
        let tt_value = if probe.hit {
            value_from_tt(probe.data.value, ply, board.rule50())
        } else {
            VALUE_NONE
        };
        let pv_hit = probe.hit && probe.data.is_pv;

        if !pv_node
            && probe.data.depth >= DEPTH_QS
            && is_valid(tt_value)
            && probe
                .data
                .bound
                .includes(if tt_value >= beta { Bound::Lower } else { Bound::Upper })
        {
            return tt_value;
        }

        let moves = board.legal_moves();

        // Checkmate and stalemate are exact values, not stand-pat material.
        if moves.is_empty() {
            return if in_check { mated_in(ply) } else { VALUE_DRAW };
        }

        let tt_move = probe.data.mv.find_in(&moves);
        let tt_packed = tt_move.as_ref().map_or(PackedMove::NONE, PackedMove::encode);

        // Step 4. Static evaluation and stand-pat.
        let mut unadjusted_eval = VALUE_NONE;
        let mut best_value;
        let futility_base;

        if in_check {
            best_value = -VALUE_INFINITE;
            futility_base = -VALUE_INFINITE;
        } else {
            let correction = self.correction_value(board, ss);

            if probe.hit {
                unadjusted_eval = if is_valid(probe.data.eval) {
                    probe.data.eval
                } else {
                    self.evaluate(board)
                };
                best_value = Self::corrected_eval(unadjusted_eval, correction);
                self.stack[ss].static_eval = best_value;

                if is_valid(tt_value)
                    && !is_decisive(tt_value)
                    && probe.data.bound.includes(if tt_value > best_value {
                        Bound::Lower
                    } else {
                        Bound::Upper
                    })
                {
                    best_value = tt_value;
                }
            } else {
                unadjusted_eval = self.evaluate(board);
                best_value = Self::corrected_eval(unadjusted_eval, correction);
                self.stack[ss].static_eval = best_value;
            }

            // Stand pat: the side to move may simply decline to capture.
            if best_value >= beta {
                if !is_decisive(best_value) {
                    best_value = (best_value + beta) / 2;
                }
                if !probe.hit {
                    self.shared.tt.store(
                        &probe,
                        pos_key,
                        value_to_tt(best_value, ply),
                        unadjusted_eval,
                        DEPTH_UNSEARCHED,
                        PackedMove::NONE,
                        Bound::Lower,
                        false,
                    );
                }
                return best_value;
            }

            if best_value > alpha {
                alpha = best_value;
            }

            futility_base = self.stack[ss].static_eval + 352;
        }

        let prev_conts = [self.stack[ss - 1].cont_index, self.stack[ss - 2].cont_index];
        let prev_sq = self.stack[ss - 1].current_move.as_ref().map(|m| m.to());
        let pawn_bucket = pawn_structure_index(board);
        let tolerance = self.shared.options.check_sacrifice_tolerance_cp;

        let mut picker =
            MovePicker::new(board, &moves, tt_packed, prev_conts, ply, PickMode::Quiescence);

        // Step 5. Move loop.
        while let Some(m) = picker.next_move(&self.histories) {
            let gives_check = board.gives_check(&m);
            let capture = board.is_capture_stage(&m);
            move_count += 1;

            // Step 6. Pruning.
            if !is_loss(best_value) {
                // Futility and move-count pruning for non-checking,
                // non-recapture, non-promoting moves.
                if !gives_check
                    && Some(m.to()) != prev_sq
                    && !is_loss(futility_base)
                    && m.promotion().is_none()
                {
                    if move_count > 2 {
                        continue;
                    }

                    let futility_value = futility_base + m.capture().map_or(0, role_value);
                    if futility_value <= alpha {
                        best_value = best_value.max(futility_value);
                        continue;
                    }

                    if !see_ge(board, &m, alpha - futility_base) {
                        best_value = alpha.min(futility_base);
                        continue;
                    }
                }

                // Quiet evasions with a hopeless pawn-structure history.
                if !capture {
                    let piece = board.piece_index_at(m.from().expect("legal move origin"));
                    if self
                        .histories
                        .pawn_score(pawn_bucket, piece, m.to() as usize)
                        < 7300
                    {
                        continue;
                    }
                }

                let mut see_gate = -78;
                if tolerance > 0 && gives_check {
                    see_gate -= tolerance;
                }
                if !see_ge(board, &m, see_gate) {
                    continue;
                }
            }

            // Step 7. Make and search.
            let child = self.do_move(board, &m, ss);
            let value = -self.qsearch::<NT>(&child, ss + 1, -beta, -alpha);
            self.undo_move();

            debug_assert!(value > -VALUE_INFINITE && value < VALUE_INFINITE);

            // Step 8. New best move.
            if value > best_value {
                best_value = value;

                if value > alpha {
                    best_move = Some(m.clone());

                    if pv_node {
                        self.update_pv(ply, &m);
                    }

                    if value < beta {
                        alpha = value;
                    } else {
                        break;
                    }
                }
            }
        }

        // Step 9. Smooth the fail-high value toward beta.
        debug_assert!(best_value > -VALUE_INFINITE);
        if !is_decisive(best_value) && best_value > beta {
            best_value = (best_value + beta) / 2;
        }

        // Step 10. Write back.
        let bound = if best_value >= beta {
            Bound::Lower
        } else {
            Bound::Upper
        };
        self.shared.tt.store(
            &probe,
            pos_key,
            value_to_tt(best_value, ply),
            unadjusted_eval,
            DEPTH_QS,
            best_move
                .as_ref()
                .map_or(PackedMove::NONE, PackedMove::encode),
            bound,
            pv_hit,
        );

        debug_assert!(best_value > -VALUE_INFINITE && best_value < VALUE_INFINITE);

        best_value
    }
}
