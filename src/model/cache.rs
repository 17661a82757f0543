//! Cache-reuse estimators for the two shared memory tiers.
//!
//! Both estimators model the block of output tiles that resides on one
//! accelerator die at a time. The workgroup mapping shapes that block along
//! M; its N extent follows from the number of compute units sharing the
//! cache. Tiles inside the block reuse each other's A and B slices, so the
//! hit rate is the fraction of reads served by a prior tile in the block.
//! Everything is 64-bit signed integer arithmetic until the final ratio.

use log::warn;

use crate::device::Hardware;
use crate::model::{ceil_div, MacroTile, Problem};

/// Estimated hit rate of the last-level cache shared by one die.
pub fn estimate_l2_hit(
    hw: &Hardware,
    problem: &Problem,
    tile: &MacroTile,
    active_cus: u64,
    wgm: u64,
) -> f64 {
    let wgm = wgm.max(1) as i64;
    let grid_m = ceil_div(problem.m, tile.mt_m) as i64;
    let grid_n = ceil_div(problem.n, tile.mt_n) as i64;
    let mt_m = tile.mt_m as i64;
    let mt_n = tile.mt_n as i64;
    let mt_k = tile.mt_k as i64;

    let cu_per_xcd = (ceil_div(active_cus, hw.num_xcd) as i64).max(1);
    let mut l2_m = wgm.min(grid_m);
    let mut l2_n = cu_per_xcd / wgm.min(grid_m);
    if l2_n > grid_n {
        // The block wraps around the N extent of the grid.
        l2_m += (l2_n / grid_n - 1) * wgm;
        l2_n = grid_n;
    }
    l2_m = l2_m.max(1).min(grid_m);
    l2_n = l2_n.max(1).min(grid_n);

    let elem_bytes = ceil_div(problem.a_bits.max(problem.b_bits), 8) as i64;
    let capacity_elems = hw.l2_capacity as i64 / elem_bytes;
    let mut uncached_a = l2_m * mt_m * mt_k;
    let uncached_b = l2_n * mt_n * mt_k;
    // Shrink the block along M until its working set fits.
    while uncached_a + uncached_b > capacity_elems && l2_m >= 2 {
        l2_m -= 1;
        uncached_a = l2_m * mt_m * mt_k;
    }

    let a_reads = l2_m * l2_n * mt_m * mt_k;
    let b_reads = l2_n * l2_m * mt_n * mt_k;
    let total_reads = a_reads + b_reads;
    let uncached_reads = uncached_a + uncached_b;
    let hit = (total_reads - uncached_reads) as f64 / total_reads.max(1) as f64;
    if hit > 1.0 {
        warn!("last-level cache hit rate estimate {} exceeds 1", hit);
    }
    hit
}

/// Estimated hit rate of the memory-side cache behind the last-level tier.
/// Same block model as [`estimate_l2_hit`], except that the block is not
/// bounded by a capacity, its N extent ignores the grid clamp on the
/// divisor, and a grid smaller than the device shrinks the CU count.
pub fn estimate_mall_hit(
    hw: &Hardware,
    problem: &Problem,
    tile: &MacroTile,
    active_cus: u64,
    wgm: u64,
) -> f64 {
    let wgm = wgm.max(1) as i64;
    let grid_m = ceil_div(problem.m, tile.mt_m) as i64;
    let grid_n = ceil_div(problem.n, tile.mt_n) as i64;
    let batch = problem.batch as i64;
    let mt_m = tile.mt_m as i64;
    let mt_n = tile.mt_n as i64;
    let mt_k = tile.mt_k as i64;

    let mut num_cus = (ceil_div(active_cus, hw.num_xcd) as i64).max(1);
    if grid_m * grid_n * batch < active_cus as i64 {
        num_cus = grid_m * grid_n * batch / hw.num_xcd as i64;
    }
    let mut mall_m = wgm.min(grid_m);
    let mut mall_n = num_cus / wgm;
    if mall_n > grid_n {
        mall_m += (mall_n / grid_n - 1) * wgm;
        mall_n = grid_n;
    }
    mall_m = mall_m.max(1).min(grid_m);
    mall_n = mall_n.max(1).min(grid_n);

    let a_reads = mall_m * mall_n * mt_m * mt_k;
    let b_reads = mall_n * mall_m * mt_n * mt_k;
    let total_reads = a_reads + b_reads;
    let uncached_reads = mall_m * mt_m * mt_k + mall_n * mt_n * mt_k;
    let hit = (total_reads - uncached_reads) as f64 / total_reads.max(1) as f64;
    if hit > 1.0 {
        warn!("memory-side cache hit rate estimate {} exceeds 1", hit);
    }
    hit
}
