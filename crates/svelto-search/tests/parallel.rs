//! Integration tests for the Lazy SMP pool and the engine façade.
//!
//! Verifies correctness (legal moves, mate detection) and robustness
//! (stop-signal propagation, node aggregation) under various thread counts.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use shakmaty::Move;
use svelto_search::value::VALUE_MATE_IN_MAX_PLY;
use svelto_search::{
    Board, Engine, Limits, NullListener, SearchControl, SearchInfo, SearchListener,
    SearchOptions, SearchPool, SearchResult,
};

const SCHOLARS_MATE_FEN: &str =
    "r1bqkb1r/pppp1ppp/2n2n2/4p2Q/2B1P3/8/PPPP1PPP/RNB1K1NR w KQkq - 4 4";

const SICILIAN_FEN: &str = "rnbqkbnr/pp1ppppp/8/2p5/4P3/8/PPPP1PPP/RNBQKBNR w KQkq c6 0 2";

const RUY_LOPEZ_FEN: &str =
    "r1bqkbnr/pppp1ppp/2n5/1B2p3/4P3/5N2/PPPP1PPP/RNBQK2R b KQkq - 3 3";

const ENDGAME_FEN: &str = "8/8/8/3k4/8/3K4/4P3/8 w - - 0 1";

/// Run a search on `board` at `depth` with `threads` workers.
fn search_with_threads(board: &Board, depth: i32, threads: usize) -> SearchResult {
    let mut options = SearchOptions::default();
    options.threads = threads;
    let mut pool = SearchPool::new(options).expect("pool");
    let control = SearchControl::infinite(Arc::new(AtomicBool::new(false)));
    pool.search(board, &[], &Limits::depth(depth), &control, &mut NullListener)
        .expect("search")
}

// -- Basic correctness -------------------------------------------------------

#[test]
fn single_thread_returns_legal_move() {
    let board = Board::starting_position();
    let result = search_with_threads(&board, 4, 1);
    let best = result.best_move.expect("legal move from startpos");
    assert!(board.legal_moves().iter().any(|m| m == &best));
}

#[test]
fn multi_thread_returns_legal_move() {
    let board = Board::starting_position();
    for threads in [2, 4] {
        let result = search_with_threads(&board, 4, threads);
        let best = result
            .best_move
            .unwrap_or_else(|| panic!("{threads}-thread search returned no move"));
        assert!(board.legal_moves().iter().any(|m| m == &best));
    }
}

#[test]
fn multi_thread_finds_mate_in_one() {
    let board: Board = SCHOLARS_MATE_FEN.parse().unwrap();
    let result = search_with_threads(&board, 4, 4);
    assert_eq!(
        result.best_move.as_ref().map(Board::move_uci).as_deref(),
        Some("h5f7"),
        "4-thread search should find Qxf7#"
    );
    assert!(
        result.score >= VALUE_MATE_IN_MAX_PLY,
        "score {} should indicate mate",
        result.score
    );
}

#[test]
fn multi_thread_various_positions() {
    let positions = [
        ("Sicilian Defence", SICILIAN_FEN),
        ("Ruy Lopez", RUY_LOPEZ_FEN),
        ("King+pawn endgame", ENDGAME_FEN),
    ];

    for (name, fen) in positions {
        let board: Board = fen.parse().unwrap_or_else(|_| panic!("invalid FEN for {name}"));
        let result = search_with_threads(&board, 4, 4);
        assert!(
            result.best_move.is_some(),
            "4-thread search on {name} ({fen}) returned no move"
        );
    }
}

// -- Stop-signal behaviour ---------------------------------------------------

#[test]
fn stop_signal_terminates_all_threads() {
    let board = Board::starting_position();
    let mut options = SearchOptions::default();
    options.threads = 4;
    let mut pool = SearchPool::new(options).expect("pool");

    let stopped = Arc::new(AtomicBool::new(false));
    let control = SearchControl::infinite(Arc::clone(&stopped));

    let stop_clone = Arc::clone(&stopped);
    let killer = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(50));
        stop_clone.store(true, Ordering::Release);
    });

    let result = pool
        .search(&board, &[], &Limits::default(), &control, &mut NullListener)
        .expect("search");
    killer.join().unwrap();

    assert!(
        result.depth < 128,
        "search should have been stopped early, got depth {}",
        result.depth
    );
    assert!(result.best_move.is_some(), "a stopped search still answers");
}

#[test]
fn pre_set_stop_returns_immediately() {
    let board = Board::starting_position();
    let mut options = SearchOptions::default();
    options.threads = 4;
    let mut pool = SearchPool::new(options).expect("pool");

    let stopped = Arc::new(AtomicBool::new(true));
    let control = SearchControl::infinite(stopped);

    let result = pool
        .search(&board, &[], &Limits::depth(100), &control, &mut NullListener)
        .expect("search");

    assert_eq!(result.depth, 0, "no iteration completes with a pre-set stop");
    assert!(
        result.best_move.is_some(),
        "even then, some legal move is emitted"
    );
}

// -- Aggregation and reporting -----------------------------------------------

#[test]
fn multi_thread_reports_total_nodes() {
    let board = Board::starting_position();

    let single = search_with_threads(&board, 5, 1);
    let quad = search_with_threads(&board, 5, 4);

    assert!(single.nodes > 0);
    assert!(
        quad.nodes > single.nodes,
        "four workers ({}) should visit more nodes than one ({})",
        quad.nodes,
        single.nodes
    );
}

struct DepthCollector {
    depths: Vec<i32>,
    bestmove_calls: usize,
}

impl SearchListener for DepthCollector {
    fn on_update_full(&mut self, info: &SearchInfo) {
        self.depths.push(info.depth);
    }

    fn on_bestmove(&mut self, best: Option<&Move>, _ponder: Option<&Move>) {
        assert!(best.is_some(), "startpos always has a best move");
        self.bestmove_calls += 1;
    }
}

#[test]
fn listener_sees_every_iteration_and_one_bestmove() {
    let board = Board::starting_position();
    let mut pool = SearchPool::new(SearchOptions::default()).expect("pool");
    let control = SearchControl::infinite(Arc::new(AtomicBool::new(false)));
    let mut collector = DepthCollector {
        depths: Vec::new(),
        bestmove_calls: 0,
    };

    pool.search(&board, &[], &Limits::depth(4), &control, &mut collector)
        .expect("search");

    for d in 1..=4 {
        assert!(
            collector.depths.contains(&d),
            "missing progress report for depth {d}: {:?}",
            collector.depths
        );
    }
    assert_eq!(collector.bestmove_calls, 1);
}

#[test]
fn pool_reuse_keeps_working() {
    // Two consecutive searches on one pool: the second probes a warm table.
    let board = Board::starting_position();
    let mut pool = SearchPool::new(SearchOptions::default()).expect("pool");

    for _ in 0..2 {
        let control = SearchControl::infinite(Arc::new(AtomicBool::new(false)));
        let result = pool
            .search(&board, &[], &Limits::depth(5), &control, &mut NullListener)
            .expect("search");
        assert!(result.best_move.is_some());
    }

    pool.new_game();
    assert_eq!(pool.hashfull(), 0, "new game clears the table");
}

// -- Engine façade -----------------------------------------------------------

#[test]
fn engine_go_and_wait() {
    let mut engine = Engine::new(SearchOptions::default()).expect("engine");
    engine.set_position(Board::starting_position(), Vec::new());
    engine.go(Limits::depth(4), NullListener).expect("go");

    let result = engine.wait().expect("a search was running").expect("search ok");
    assert!(result.best_move.is_some());
    assert!(result.depth >= 4);
}

#[test]
fn engine_stop_halts_infinite_search() {
    let mut engine = Engine::new(SearchOptions::default()).expect("engine");
    engine.set_position(Board::starting_position(), Vec::new());

    let limits = Limits {
        infinite: true,
        ..Limits::default()
    };
    engine.go(limits, NullListener).expect("go");

    std::thread::sleep(Duration::from_millis(100));
    engine.stop();

    let result = engine.wait().expect("running").expect("search ok");
    assert!(result.best_move.is_some());
}

#[test]
fn engine_ponderhit_releases_the_clock() {
    let mut engine = Engine::new(SearchOptions::default()).expect("engine");
    engine.set_position(Board::starting_position(), Vec::new());

    let limits = Limits {
        movetime: Some(Duration::from_millis(150)),
        ponder: true,
        ..Limits::default()
    };
    engine.go(limits, NullListener).expect("go");

    // While pondering the clock must not fire on its own.
    std::thread::sleep(Duration::from_millis(60));
    engine.ponderhit();

    let result = engine.wait().expect("running").expect("search ok");
    assert!(result.best_move.is_some());
}

#[test]
fn engine_back_to_back_searches() {
    let mut engine = Engine::new(SearchOptions::default()).expect("engine");
    engine.set_position(Board::starting_position(), Vec::new());

    engine.go(Limits::depth(3), NullListener).expect("go");
    let first = engine.wait().expect("running").expect("ok");

    let board: Board = SCHOLARS_MATE_FEN.parse().unwrap();
    engine.set_position(board, Vec::new());
    engine.go(Limits::depth(3), NullListener).expect("go");
    let second = engine.wait().expect("running").expect("ok");

    assert!(first.best_move.is_some());
    assert_eq!(
        second.best_move.as_ref().map(Board::move_uci).as_deref(),
        Some("h5f7")
    );
}
