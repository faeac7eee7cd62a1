//! Search core for svelto: iterative-deepening PVS with quiescence, a
//! shared lock-free transposition table, history-driven move ordering, and
//! Lazy SMP parallelism.
//!
//! Position representation and move generation come from `shakmaty` behind
//! the [`Board`] adapter; static evaluation and tablebases plug in behind
//! the [`Evaluate`] and [`TablebaseProbe`] traits.

pub mod board;
pub mod control;
pub mod error;
pub mod eval;
pub mod history;
pub mod limits;
pub mod options;
pub mod picker;
pub mod pool;
pub mod report;
pub mod rootmoves;
pub mod see;
pub mod tb;
pub mod timeman;
pub mod tt;
pub mod value;
mod worker;

pub use board::Board;
pub use control::SearchControl;
pub use error::SearchError;
pub use eval::{Evaluate, MaterialEval};
pub use limits::Limits;
pub use options::SearchOptions;
pub use pool::{Engine, SearchPool, SearchResult};
pub use report::{NullListener, ScoreBound, SearchInfo, SearchListener, UciScore};
pub use tb::{NoTablebases, SyzygyTablebases, TablebaseProbe};
pub use value::Value;
