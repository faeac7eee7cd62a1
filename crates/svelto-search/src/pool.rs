//! Lazy SMP thread pool and the engine façade.
//!
//! The pool owns the shared transposition table and, per search, spawns one
//! main worker plus N-1 helpers over `std::thread::scope`. Every worker runs
//! the same iterative deepening on the same root; they cooperate only
//! through the table, the stop flag, and the per-worker counters. At halt
//! the pool joins everyone and reports the best worker's line.

use std::sync::atomic::{AtomicBool, AtomicU64};
use std::sync::{mpsc, Arc};
use std::time::Duration;

use shakmaty::Move;
use tracing::{debug, info, warn};

use crate::board::Board;
use crate::control::SearchControl;
use crate::error::SearchError;
use crate::eval::{Evaluate, MaterialEval};
use crate::limits::Limits;
use crate::options::SearchOptions;
use crate::report::{ScoreBound, SearchInfo, SearchListener, UciScore};
use crate::tb::{NoTablebases, TablebaseProbe};
use crate::timeman::TimeManager;
use crate::tt::TranspositionTable;
use crate::value::{Depth, Value, VALUE_INFINITE, VALUE_ZERO};
use crate::worker::{DriverMemory, SharedState, Worker};

/// Worker threads get a generous stack; the recursion keeps move lists and
/// picker state in stack frames.
const WORKER_STACK_SIZE: usize = 16 * 1024 * 1024;

/// Final outcome of one search.
#[derive(Debug, Clone)]
pub struct SearchResult {
    /// Best move, or `None` when the root has no legal move.
    pub best_move: Option<Move>,
    /// Expected reply, for pondering.
    pub ponder_move: Option<Move>,
    /// Principal variation of the best worker.
    pub pv: Vec<Move>,
    /// Score in centipawns from the engine's perspective.
    pub score: Value,
    /// Deepest fully completed iteration.
    pub depth: Depth,
    pub sel_depth: usize,
    /// Nodes across all workers.
    pub nodes: u64,
    pub tb_hits: u64,
    pub hashfull: usize,
}

/// The search pool. Owns the only mutably-shared resource (the TT); worker
/// state is created fresh for every `search` call.
pub struct SearchPool {
    tt: TranspositionTable,
    options: SearchOptions,
    evaluator: Arc<dyn Evaluate>,
    tb: Arc<dyn TablebaseProbe>,
    memory: DriverMemory,
}

impl SearchPool {
    pub fn new(options: SearchOptions) -> Result<Self, SearchError> {
        let tt = TranspositionTable::new(options.hash_mb)?;
        Ok(Self {
            tt,
            options,
            evaluator: Arc::new(MaterialEval),
            tb: Arc::new(NoTablebases),
            memory: DriverMemory::default(),
        })
    }

    /// Swap in a different evaluator (e.g. an NNUE front end).
    pub fn set_evaluator(&mut self, evaluator: Arc<dyn Evaluate>) {
        self.evaluator = evaluator;
    }

    pub fn set_tablebases(&mut self, tb: Arc<dyn TablebaseProbe>) {
        self.tb = tb;
    }

    pub fn options(&self) -> &SearchOptions {
        &self.options
    }

    /// Reconfigure between searches. Hash-size changes reallocate the table,
    /// which is safe here because `&mut self` proves no worker is running.
    pub fn set_options(&mut self, options: SearchOptions) -> Result<(), SearchError> {
        if options.hash_mb != self.options.hash_mb {
            self.tt = TranspositionTable::new(options.hash_mb)?;
            info!(hash_mb = options.hash_mb, "transposition table resized");
        }
        self.options = options;
        Ok(())
    }

    /// Forget everything learned: new game.
    pub fn new_game(&mut self) {
        self.tt.clear();
        self.memory = DriverMemory::default();
    }

    pub fn hashfull(&self) -> usize {
        self.tt.hashfull()
    }

    /// Run a search to completion and emit the best move.
    ///
    /// `history` holds the zobrist keys of the game so far (positions before
    /// `board`), used for repetition detection. The search stops on its own
    /// budgets or when `control` is stopped externally; with `infinite` or
    /// an unanswered ponder it waits for the host before reporting.
    pub fn search(
        &mut self,
        board: &Board,
        history: &[u64],
        limits: &Limits,
        control: &SearchControl,
        listener: &mut dyn SearchListener,
    ) -> Result<SearchResult, SearchError> {
        self.tt.new_search();

        let root_moves = board.legal_moves();
        if root_moves.is_empty() {
            // Mated or stalemated root: nothing to search, still answer.
            let score = if board.in_check() {
                UciScore::Mate(0)
            } else {
                UciScore::Cp(VALUE_ZERO)
            };
            listener.on_update_full(&SearchInfo {
                depth: 0,
                sel_depth: 0,
                multipv: 1,
                score,
                bound: ScoreBound::Exact,
                time_ms: control.elapsed_ms().max(1),
                nodes: 0,
                nps: 0,
                tb_hits: 0,
                hashfull: 0,
                pv: Vec::new(),
            });
            listener.on_bestmove(None, None);
            return Ok(SearchResult {
                best_move: None,
                ponder_move: None,
                pv: Vec::new(),
                score: if board.in_check() {
                    -crate::value::VALUE_MATE
                } else {
                    VALUE_ZERO
                },
                depth: 0,
                sel_depth: 0,
                nodes: 0,
                tb_hits: 0,
                hashfull: 0,
            });
        }

        let num_threads = self.options.threads.max(1);
        let time = TimeManager::new(limits, board.side_to_move(), board.game_ply(), &self.options);

        debug!(
            threads = num_threads,
            depth = ?limits.depth,
            nodes = ?limits.nodes,
            optimum_ms = time.as_ref().map(TimeManager::optimum),
            maximum_ms = time.as_ref().map(TimeManager::maximum),
            "search started"
        );

        let node_counters: Vec<AtomicU64> = (0..num_threads).map(|_| AtomicU64::new(0)).collect();
        let tb_hit_counters: Vec<AtomicU64> =
            (0..num_threads).map(|_| AtomicU64::new(0)).collect();
        let change_counters: Vec<AtomicU64> =
            (0..num_threads).map(|_| AtomicU64::new(0)).collect();
        let increase_depth = AtomicBool::new(true);

        let shared = SharedState {
            tt: &self.tt,
            control,
            evaluator: self.evaluator.as_ref(),
            tb: self.tb.as_ref(),
            options: &self.options,
            limits,
            nodes: &node_counters,
            tb_hits: &tb_hit_counters,
            best_move_changes: &change_counters,
            increase_depth: &increase_depth,
        };

        let mut workers: Vec<Worker> = (0..num_threads)
            .map(|i| {
                Worker::new(
                    shared,
                    i,
                    board.clone(),
                    history,
                    if i == 0 { time } else { None },
                    self.memory,
                )
            })
            .collect();
        workers[0].attach_listener(listener);

        let mut spawn_error: Option<std::io::Error> = None;

        std::thread::scope(|scope| {
            let mut iter = workers.iter_mut();
            let main_worker = iter.next().expect("at least one worker");

            for (i, helper) in iter.enumerate() {
                let spawned = std::thread::Builder::new()
                    .name(format!("svelto-worker-{}", i + 1))
                    .stack_size(WORKER_STACK_SIZE)
                    .spawn_scoped(scope, move || helper.iterate());
                if let Err(e) = spawned {
                    warn!(error = %e, "helper thread spawn failed, aborting search");
                    spawn_error = Some(e);
                    control.request_stop();
                    break;
                }
            }

            if spawn_error.is_none() {
                main_worker.iterate();

                // The protocol forbids answering before the host releases an
                // infinite or pondering search.
                while !control.is_stopped() && (control.is_pondering() || limits.infinite) {
                    std::thread::sleep(Duration::from_millis(1));
                }
            }

            // Halt the helpers; the scope joins them on exit.
            control.request_stop();
        });

        if let Some(e) = spawn_error {
            return Err(SearchError::ThreadSpawn { source: e });
        }

        // Pick the worker whose result we trust most: best score, then the
        // deeper iteration among equal scores.
        let mut best_idx = 0;
        if self.options.multi_pv == 1 && limits.depth.is_none() && limits.mate.is_none() {
            for i in 1..workers.len() {
                let best = &workers[best_idx];
                let cand = &workers[i];
                if (cand.root_moves[0].score, cand.completed_depth)
                    > (best.root_moves[0].score, best.completed_depth)
                {
                    best_idx = i;
                }
            }
        }

        self.memory = DriverMemory {
            best_previous_score: workers[best_idx].root_moves[0].score,
            best_previous_average_score: workers[best_idx].root_moves[0].average_score,
            previous_time_reduction: workers[0].memory().previous_time_reduction,
        };

        let total_nodes: u64 = node_counters.iter().map(|c| c.load(std::sync::atomic::Ordering::Relaxed)).sum();
        let total_tb_hits: u64 = tb_hit_counters
            .iter()
            .map(|c| c.load(std::sync::atomic::Ordering::Relaxed))
            .sum();
        let hashfull = self.tt.hashfull();

        let listener = workers[0]
            .take_listener()
            .expect("listener was attached to the main worker");

        let best = &workers[best_idx];
        let best_root = &best.root_moves[0];
        let elapsed = control.elapsed_ms().max(1);

        // A helper that beat the main worker has never been reported.
        if best_idx != 0 {
            listener.on_update_full(&SearchInfo {
                depth: best.completed_depth.max(1),
                sel_depth: best_root.sel_depth,
                multipv: 1,
                score: UciScore::from_value(best_root.uci_score),
                bound: ScoreBound::Exact,
                time_ms: elapsed,
                nodes: total_nodes,
                nps: total_nodes * 1000 / elapsed,
                tb_hits: total_tb_hits,
                hashfull,
                pv: best_root.pv.clone(),
            });
        }

        let best_move = best_root.pv.first().cloned();
        let ponder_move = best_root
            .pv
            .get(1)
            .cloned()
            .or_else(|| self.ponder_from_tt(board, best_move.as_ref()));

        listener.on_bestmove(best_move.as_ref(), ponder_move.as_ref());

        let score = if best_root.score == -VALUE_INFINITE {
            VALUE_ZERO
        } else {
            best_root.score
        };

        debug!(
            depth = best.completed_depth,
            score,
            nodes = total_nodes,
            "search finished"
        );

        Ok(SearchResult {
            best_move,
            ponder_move,
            pv: best_root.pv.clone(),
            score,
            depth: best.completed_depth,
            sel_depth: best_root.sel_depth,
            nodes: total_nodes,
            tb_hits: total_tb_hits,
            hashfull,
        })
    }

    /// Try to produce a ponder move from the table when the PV stops after
    /// one move (e.g. a stop during a root fail-high).
    fn ponder_from_tt(&self, board: &Board, best_move: Option<&Move>) -> Option<Move> {
        let best_move = best_move?;
        let child = board.make_move(best_move);
        let probe = self.tt.probe(child.key());
        if !probe.hit {
            return None;
        }
        probe.data.mv.find_in(&child.legal_moves())
    }
}

impl std::fmt::Debug for SearchPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchPool")
            .field("tt", &self.tt)
            .field("threads", &self.options.threads)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Engine façade
// ---------------------------------------------------------------------------

/// Payload returned by the search thread when it finishes.
struct SearchDone {
    pool: SearchPool,
    result: Result<SearchResult, SearchError>,
}

/// Asynchronous front door for a host: `go` launches a search on its own
/// thread, `stop`/`ponderhit` steer it, `wait` collects the result.
///
/// The pool is moved into the search thread and handed back on completion,
/// so there is exactly one owner of the table at any time.
pub struct Engine {
    pool: Option<SearchPool>,
    board: Board,
    history: Vec<u64>,
    control: Option<Arc<SearchControl>>,
    pending: Option<mpsc::Receiver<SearchDone>>,
}

impl Engine {
    pub fn new(options: SearchOptions) -> Result<Self, SearchError> {
        Ok(Self {
            pool: Some(SearchPool::new(options)?),
            board: Board::starting_position(),
            history: Vec::new(),
            control: None,
            pending: None,
        })
    }

    /// Set the position to search and the keys of the game leading to it.
    pub fn set_position(&mut self, board: Board, history: Vec<u64>) {
        self.board = board;
        self.history = history;
    }

    /// Start a search. Any running search is stopped and joined first.
    pub fn go<L>(&mut self, limits: Limits, mut listener: L) -> Result<(), SearchError>
    where
        L: SearchListener + 'static,
    {
        self.stop();
        let _ = self.wait();

        let mut pool = self.pool.take().expect("pool returned by wait");
        let control = Arc::new(SearchControl::new(
            Arc::new(AtomicBool::new(false)),
            limits.ponder,
        ));
        self.control = Some(Arc::clone(&control));

        let board = self.board.clone();
        let history = self.history.clone();
        let (tx, rx) = mpsc::channel();
        self.pending = Some(rx);

        std::thread::Builder::new()
            .name("svelto-search".into())
            .spawn(move || {
                let result = pool.search(&board, &history, &limits, &control, &mut listener);
                let _ = tx.send(SearchDone { pool, result });
            })
            .map_err(|source| SearchError::ThreadSpawn { source })?;

        Ok(())
    }

    /// Halt the running search, if any.
    pub fn stop(&self) {
        if let Some(control) = &self.control {
            control.request_stop();
        }
    }

    /// The pondered move was played; convert to a normally timed search.
    pub fn ponderhit(&self) {
        if let Some(control) = &self.control {
            control.ponderhit();
        }
    }

    /// Block until the current search finishes and return its result.
    /// Returns `None` when no search is running.
    pub fn wait(&mut self) -> Option<Result<SearchResult, SearchError>> {
        let rx = self.pending.take()?;
        match rx.recv() {
            Ok(done) => {
                self.pool = Some(done.pool);
                self.control = None;
                Some(done.result)
            }
            Err(_) => None,
        }
    }

    /// Access the pool between searches for reconfiguration.
    pub fn pool_mut(&mut self) -> Option<&mut SearchPool> {
        self.pool.as_mut()
    }
}
