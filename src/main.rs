use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use svelto_search::{Board, Limits, NullListener, SearchControl, SearchOptions, SearchPool};

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    info!("svelto starting");

    let board = match std::env::args().nth(1) {
        Some(fen) => fen.parse::<Board>()?,
        None => Board::starting_position(),
    };
    let depth: i32 = std::env::args()
        .nth(2)
        .map(|d| d.parse())
        .transpose()?
        .unwrap_or(12);

    let mut pool = SearchPool::new(SearchOptions::default())?;
    let control = SearchControl::infinite(Arc::new(AtomicBool::new(false)));
    let result = pool.search(
        &board,
        &[],
        &Limits::depth(depth),
        &control,
        &mut NullListener,
    )?;

    let pv: Vec<String> = result.pv.iter().map(Board::move_uci).collect();
    info!(
        depth = result.depth,
        score = result.score,
        nodes = result.nodes,
        pv = pv.join(" "),
        "search complete"
    );

    Ok(())
}
