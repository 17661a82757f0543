//! Stream-K processor-grid prediction.
//!
//! Stream-K partitions the K-iterations of all output tiles across a fixed
//! processor grid, so the grid size trades tail imbalance against fixup
//! traffic between peers sharing a tile. A linear runtime model with fitted
//! coefficients scores each grid size; a cache-imbalance penalty discounts
//! grids whose partial tiles spread poorly over the peers.

use log::trace;

use crate::model::ceil_div;

// Coefficients fitted on measured Stream-K runs.
const LAUNCH_COST: f64 = 7.337;
const PEER_SYNC_COST: f64 = 3.01;
const ITERATION_COST: f64 = 2.2935;
const FIXUP_COST: f64 = 10.22;

/// Predicted relative runtime for `grid` processors.
fn predicted_runtime(output_tiles: u64, iters_per_tile: u64, iters_total: u64, grid: u64) -> f64 {
    let iters_per_cta = ceil_div(iters_total, grid);
    let even_split = iters_total % grid == 0 && iters_per_cta % iters_per_tile == 0;
    let has_fixup = !even_split as u64;
    let peers = ceil_div(iters_per_tile, iters_per_cta) + has_fixup;

    let mut runtime = LAUNCH_COST
        + PEER_SYNC_COST * ((peers > 1) as u64 as f64)
        + ITERATION_COST * iters_per_cta as f64
        + FIXUP_COST * (peers - 1) as f64;
    if peers > 1 {
        let k_split_ratio = (output_tiles % grid) as f64 / grid as f64;
        let ideal = 1.0 / peers as f64;
        let gap = (k_split_ratio - ideal).abs();
        if gap > 0.0 {
            runtime += FIXUP_COST * (1.0 / gap) * peers as f64;
        }
    }
    runtime
}

/// Sweeps the processor counts in `[grid_start, grid_end]` and returns the
/// one with the lowest predicted runtime.
#[allow(clippy::too_many_arguments)]
pub fn best_predicted_grid_size(
    blk_m: u64,
    blk_n: u64,
    blk_k: u64,
    m: u64,
    n: u64,
    k: u64,
    batch: u64,
    grid_start: u64,
    grid_end: u64,
) -> u64 {
    let output_tiles = ceil_div(m, blk_m) * ceil_div(n, blk_n) * batch;
    let iters_per_tile = ceil_div(k, blk_k);
    let iters_total = output_tiles * iters_per_tile;

    let mut best_grid = grid_start.max(1);
    let mut best_runtime = std::f64::INFINITY;
    for grid in grid_start.max(1)..=grid_end {
        let runtime = predicted_runtime(output_tiles, iters_per_tile, iters_total, grid);
        if runtime < best_runtime {
            best_runtime = runtime;
            best_grid = grid;
        }
    }
    trace!(
        "stream-k: {} tiles x {} iters, best grid {} at {:.1}",
        output_tiles,
        iters_per_tile,
        best_grid,
        best_runtime
    );
    best_grid
}
