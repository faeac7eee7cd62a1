//! End-to-end single-thread search behaviour: mates, draws, determinism,
//! budget handling, and MultiPV reporting.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use svelto_search::value::{is_win, VALUE_MATE, VALUE_MATE_IN_MAX_PLY};
use svelto_search::{
    Board, Limits, NullListener, SearchControl, SearchInfo, SearchListener, SearchOptions,
    SearchPool, SearchResult, UciScore,
};

const SCHOLARS_MATE_FEN: &str =
    "r1bqkb1r/pppp1ppp/2n2n2/4p2Q/2B1P3/8/PPPP1PPP/RNB1K1NR w KQkq - 4 4";

const MATED_FEN: &str = "r1bqkbnr/pppp1Qpp/2n5/4p3/2B1P3/8/PPPP1PPP/RNB1K1NR b KQkq - 0 3";

const STALEMATE_FEN: &str = "8/8/8/8/8/3k4/3p4/3K4 w - - 0 1";

const KP_PROMOTION_FEN: &str = "4k3/8/8/8/8/8/4P3/4K3 w - - 0 1";

const KP_MATE_FEN: &str = "3k4/3P4/3K4/8/8/8/8/8 w - - 0 1";

fn search(board: &Board, limits: &Limits) -> SearchResult {
    let mut pool = SearchPool::new(SearchOptions::default()).expect("pool");
    let control = SearchControl::infinite(Arc::new(AtomicBool::new(false)));
    pool.search(board, &[], limits, &control, &mut NullListener)
        .expect("search")
}

fn search_depth(board: &Board, depth: i32) -> SearchResult {
    search(board, &Limits::depth(depth))
}

#[test]
fn depth_1_returns_legal_move() {
    let board = Board::starting_position();
    let result = search_depth(&board, 1);
    let best = result.best_move.expect("a legal move at depth 1");
    assert!(board
        .legal_moves()
        .iter()
        .any(|m| m == &best));
}

#[test]
fn finds_mate_in_one() {
    let board: Board = SCHOLARS_MATE_FEN.parse().unwrap();
    let result = search_depth(&board, 4);
    assert_eq!(
        result.best_move.as_ref().map(Board::move_uci).as_deref(),
        Some("h5f7"),
        "should find Qxf7#"
    );
    assert!(
        result.score >= VALUE_MATE_IN_MAX_PLY,
        "score {} should be a mate score",
        result.score
    );
}

#[test]
fn mate_pv_replays_to_checkmate() {
    let board: Board = SCHOLARS_MATE_FEN.parse().unwrap();
    let result = search_depth(&board, 4);

    let mut pos = board.clone();
    for m in &result.pv {
        let legal = pos.legal_moves();
        let found = legal.iter().find(|x| *x == m).cloned();
        let found = found.unwrap_or_else(|| panic!("PV move {} not legal", Board::move_uci(m)));
        pos = pos.make_move(&found);
    }
    assert!(
        pos.legal_moves().is_empty() && pos.in_check(),
        "replaying the mate PV must end in checkmate"
    );
}

#[test]
fn mated_root_reports_no_move() {
    let board: Board = MATED_FEN.parse().unwrap();
    let result = search_depth(&board, 1);
    assert!(result.best_move.is_none(), "no best move in a mated position");
    assert_eq!(result.score, -VALUE_MATE);
}

#[test]
fn stalemate_root_reports_draw() {
    let board: Board = STALEMATE_FEN.parse().unwrap();
    assert!(board.legal_moves().is_empty() && !board.in_check());
    let result = search_depth(&board, 30);
    assert!(result.best_move.is_none());
    assert_eq!(result.score, 0, "stalemate scores zero");
}

#[test]
fn startpos_search_is_sane() {
    let board = Board::starting_position();
    let result = search_depth(&board, 7);
    assert!(result.depth >= 7);
    assert!(!result.pv.is_empty());
    assert!(
        result.score.abs() <= 150,
        "startpos score {} should stay near equality",
        result.score
    );
    let best = result.best_move.expect("legal opening move");
    assert!(board.legal_moves().iter().any(|m| m == &best));
}

#[test]
fn passed_pawn_endgame_is_winning() {
    let board: Board = KP_PROMOTION_FEN.parse().unwrap();
    let result = search_depth(&board, 20);
    // The defender starts on the promotion square, so the conversion is a
    // long king march; the score must at least show clear progress.
    assert!(
        result.score > 150,
        "score {} should show progress toward promotion",
        result.score
    );
    assert!(result.best_move.is_some());
}

#[test]
fn kp_mate_found_despite_stalemate_traps() {
    let board: Board = KP_MATE_FEN.parse().unwrap();
    let result = search_depth(&board, 18);
    assert!(
        is_win(result.score),
        "score {} should prove the win",
        result.score
    );
    assert!(!result.pv.is_empty());
}

#[test]
fn node_limited_search_is_deterministic() {
    let board = Board::starting_position();
    let limits = Limits::nodes(20_000);

    let a = search(&board, &limits);
    let b = search(&board, &limits);

    assert_eq!(
        a.best_move.map(|m| Board::move_uci(&m)),
        b.best_move.map(|m| Board::move_uci(&m)),
        "same inputs, same best move"
    );
    assert_eq!(a.score, b.score, "same inputs, same score");
    assert_eq!(a.nodes, b.nodes, "same inputs, same node count");
}

#[test]
fn node_limit_is_respected() {
    let board = Board::starting_position();
    let result = search(&board, &Limits::nodes(5_000));
    // The limit is polled on a cadence, so allow a modest overshoot.
    assert!(
        result.nodes < 5_000 + 40_000,
        "nodes {} should stay near the 5000 budget",
        result.nodes
    );
    assert!(result.best_move.is_some());
}

#[test]
fn deeper_searches_visit_more_nodes() {
    let board = Board::starting_position();
    let shallow = search_depth(&board, 4);
    let deep = search_depth(&board, 5);
    assert!(
        deep.nodes >= shallow.nodes,
        "depth 5 ({}) must cost at least depth 4 ({})",
        deep.nodes,
        shallow.nodes
    );
}

#[test]
fn movetime_search_terminates_promptly() {
    let board = Board::starting_position();
    let start = std::time::Instant::now();
    let result = search(&board, &Limits::movetime(Duration::from_millis(300)));
    assert!(
        start.elapsed() < Duration::from_secs(5),
        "movetime search must come back quickly"
    );
    assert!(result.depth >= 1);
    assert!(result.best_move.is_some());
}

// --- MultiPV ----------------------------------------------------------------

struct MultiPvCollector {
    latest: Vec<Option<SearchInfo>>,
}

impl SearchListener for MultiPvCollector {
    fn on_update_full(&mut self, info: &SearchInfo) {
        let idx = info.multipv - 1;
        if idx < self.latest.len() {
            self.latest[idx] = Some(info.clone());
        }
    }
}

fn score_key(score: UciScore) -> i64 {
    match score {
        UciScore::Cp(v) => v as i64,
        UciScore::Mate(n) if n > 0 => 1_000_000 - n as i64,
        UciScore::Mate(n) => -1_000_000 - n as i64,
    }
}

#[test]
fn multipv_reports_three_distinct_lines() {
    let board = Board::starting_position();
    let mut options = SearchOptions::default();
    options.multi_pv = 3;
    let mut pool = SearchPool::new(options).expect("pool");
    let control = SearchControl::infinite(Arc::new(AtomicBool::new(false)));
    let mut collector = MultiPvCollector {
        latest: vec![None, None, None],
    };

    pool.search(&board, &[], &Limits::depth(5), &control, &mut collector)
        .expect("search");

    let lines: Vec<SearchInfo> = collector
        .latest
        .into_iter()
        .map(|i| i.expect("every MultiPV line reported"))
        .collect();

    let first_moves: std::collections::HashSet<String> = lines
        .iter()
        .map(|i| Board::move_uci(i.pv.first().expect("non-empty PV")))
        .collect();
    assert_eq!(first_moves.len(), 3, "three distinct leading moves");

    for pair in lines.windows(2) {
        assert!(
            score_key(pair[0].score) >= score_key(pair[1].score),
            "MultiPV scores must be sorted descending"
        );
    }
}

// --- Draw-rule handling -----------------------------------------------------

#[test]
fn fifty_move_rule_rescues_a_lost_position() {
    // Down a whole queen, but the halfmove clock stands at 99: every quiet
    // king move reaches 100 and claims the draw, so the search must score
    // this as a draw rather than a lost game.
    let board: Board = "7k/8/8/8/8/8/5q2/K7 w - - 99 80".parse().unwrap();
    assert!(!board.in_check());
    let result = search_depth(&board, 8);
    assert!(
        result.score.abs() <= 1,
        "score {} should be the draw value, not a queen deficit",
        result.score
    );
}
