//! Closed-form latency model for GEMM macro-tiles.
//!
//! The model composes per-tile compute latency, cache-hit-driven memory
//! latency, prologue and epilogue costs and layout-alignment penalties into
//! a whole-problem cycle count. All fractions are IEEE-754 doubles; the
//! integer parts use 64-bit arithmetic so the reuse-volume products cannot
//! overflow.

pub mod cache;

use log::trace;
use serde::{Deserialize, Serialize};

use self::cache::{estimate_l2_hit, estimate_mall_hit};
use crate::device::Hardware;

/// Extra cycles of a device-memory access on top of the bandwidth term.
const MEMORY_ACCESS_LATENCY: f64 = 200.0;
/// Branch cycles paid on every K-iteration of the inner loop.
const ITERATION_BRANCH_LATENCY: f64 = 28.0;

/// A GEMM problem shape.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Problem {
    pub m: u64,
    pub n: u64,
    pub k: u64,
    pub batch: u64,
    pub trans_a: bool,
    pub trans_b: bool,
    /// Width of the A elements, in bits.
    pub a_bits: u64,
    /// Width of the B elements, in bits.
    pub b_bits: u64,
    /// Width of the output elements, in bits.
    pub out_bits: u64,
    /// Block size of the scaled datatypes; 0 disables scale accounting.
    pub mx_block_size: u64,
}

/// The tile configuration of a hypothetical kernel: the macro-tile computed
/// by one workgroup and the matrix instruction it is decomposed into. The
/// macro-tile extents must be multiples of the instruction extents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MacroTile {
    pub mt_m: u64,
    pub mt_n: u64,
    pub mt_k: u64,
    pub mi_m: u64,
    pub mi_n: u64,
    pub mi_k: u64,
    pub occupancy: u64,
}

/// Rounds `n / d` towards positive infinity. A zero divisor yields 0.
pub fn ceil_div(n: u64, d: u64) -> u64 {
    if d == 0 {
        0
    } else {
        n / d + (n % d != 0) as u64
    }
}

/// Flops per byte moved, for a `m x n x k` product with `bpe`-byte elements.
pub fn arithmetic_intensity(m: u64, n: u64, k: u64, bpe: u64) -> f64 {
    (2 * m * n * k) as f64 / ((m * n + n * k + m * k) * bpe) as f64
}

/// Elements of A loaded by one workgroup per K-iteration.
pub fn a_tile_loads(mt_m: u64, mt_k: u64) -> u64 {
    mt_m * mt_k
}

/// Elements of B loaded by one workgroup per K-iteration.
pub fn b_tile_loads(mt_n: u64, mt_k: u64) -> u64 {
    mt_n * mt_k
}

/// Number of compute units with at least one output tile to process.
pub fn active_cu(hw: &Hardware, m: u64, n: u64, batch: u64, mt_m: u64, mt_n: u64) -> u64 {
    let total_tiles = ceil_div(m, mt_m) * ceil_div(n, mt_n) * batch;
    total_tiles.min(hw.n_cu)
}

/// Fraction of the peak bandwidth reachable at the given occupancy.
pub fn bw_limit_from_occupancy(active_cus: u64) -> f64 {
    if active_cus < 100 {
        (active_cus as f64 * 0.008).min(1.0)
    } else {
        1.0
    }
}

fn safe_ratio(num: f64, denom: f64) -> f64 {
    if denom <= 0.0 {
        0.0
    } else {
        num / denom
    }
}

/// Multiplicative penalty for tile extents that break the 128-byte access
/// granularity of the loads. The transpose flags decide which extent each
/// operand is contiguous along. The memory path skips the TN case.
fn layout_penalty(problem: &Problem, tile: &MacroTile, include_tn: bool) -> f64 {
    let a_bytes = ceil_div(problem.a_bits, 8);
    let b_bytes = ceil_div(problem.b_bits, 8);
    let mut penalty = 1.0;
    match (problem.trans_a, problem.trans_b) {
        (true, false) => {
            if include_tn {
                if (tile.mt_k * a_bytes) % 128 != 0 {
                    penalty *= 1.5;
                }
                if (tile.mt_k * b_bytes) % 128 != 0 {
                    penalty *= 1.5;
                }
            }
        }
        (false, true) => {
            if (tile.mt_m * a_bytes) % 128 != 0 {
                penalty *= 2.0;
            }
            if (tile.mt_n * b_bytes) % 128 != 0 {
                penalty *= 2.0;
            }
        }
        (true, true) => {
            if tile.mt_k * a_bytes < 128 {
                penalty *= 2.0;
            }
            if tile.mt_n * b_bytes < 128 {
                penalty *= 2.0;
            }
        }
        (false, false) => {
            if tile.mt_m * a_bytes < 128 {
                penalty *= 2.0;
            }
            if tile.mt_k * b_bytes < 128 {
                penalty *= 2.0;
            }
        }
    }
    penalty
}

/// Cycles one compute unit spends on the matrix instructions of a single
/// macro-tile K-iteration.
pub fn compute_tile_latency(hw: &Hardware, problem: &Problem, tile: &MacroTile) -> f64 {
    let n_mi = ceil_div(tile.mt_m, tile.mi_m)
        * ceil_div(tile.mt_n, tile.mi_n)
        * ceil_div(tile.mt_k, tile.mi_k);
    let mi_latency = hw.mi_latency(
        tile.mi_m,
        tile.mi_n,
        tile.mi_k,
        problem.a_bits.max(problem.b_bits),
    );
    mi_latency * n_mi as f64 * layout_penalty(problem, tile, true)
}

/// Cycles one compute unit waits on the memory system for a single
/// macro-tile K-iteration. `h_mem1` is the hit rate of the per-CU cache
/// tier; the last-level hit rate is estimated internally with a unit
/// workgroup mapping.
pub fn memory_tile_latency(
    hw: &Hardware,
    problem: &Problem,
    tile: &MacroTile,
    split: u64,
    h_mem1: f64,
) -> f64 {
    let base_cus = active_cu(hw, problem.m, problem.n, problem.batch, tile.mt_m, tile.mt_n);
    let active_cus = (base_cus * split).min(hw.n_cu);
    let h_mem2 = estimate_mall_hit(hw, problem, tile, active_cus, 1);

    let a_bytes = ceil_div(problem.a_bits, 8);
    let b_bytes = ceil_div(problem.b_bits, 8);
    let mut per_cu_bytes =
        a_tile_loads(tile.mt_m, tile.mt_k) * a_bytes + b_tile_loads(tile.mt_n, tile.mt_k) * b_bytes;
    if problem.mx_block_size != 0 {
        if problem.a_bits < 8 {
            per_cu_bytes += ceil_div(tile.mt_m * tile.mt_k, problem.mx_block_size);
        }
        if problem.b_bits < 8 {
            per_cu_bytes += ceil_div(tile.mt_m * tile.mt_k, problem.mx_block_size);
        }
    }
    let total_ld = (per_cu_bytes * active_cus) as f64;

    let occupancy_ratio = active_cus as f64 / hw.n_cu as f64;
    let l1 = safe_ratio(total_ld, hw.mem1_perf_ratio * occupancy_ratio);

    let bw_limited = bw_limit_from_occupancy(active_cus);
    let mut ld_mem2 = (1.0 - h_mem1) * total_ld;
    let mut ld_mem = (1.0 - h_mem2) * ld_mem2;
    if active_cus < hw.n_cu {
        // Every problem element crosses the lower tiers at least once per
        // K-slab when the device is not filled.
        let compulsory = ((problem.m * tile.mt_k * a_bytes + problem.n * tile.mt_k * b_bytes)
            * problem.batch) as f64;
        ld_mem2 = ld_mem2.max(compulsory);
        ld_mem = ld_mem.max(compulsory);
    }
    let l2 = safe_ratio(ld_mem2, hw.mem2_perf_ratio * bw_limited);
    let l3 = safe_ratio(ld_mem, hw.mem3_perf_ratio * bw_limited) + MEMORY_ACCESS_LATENCY;

    trace!(
        "memory tiers: l1 {:.1} l2 {:.1} l3 {:.1} (hit1 {:.3} hit2 {:.3})",
        l1,
        l2,
        l3,
        h_mem1,
        h_mem2
    );
    l1.max(l2).max(l3) * layout_penalty(problem, tile, false)
}

fn num_iterations(k: u64, mt_k: u64, split: u64) -> u64 {
    ceil_div(ceil_div(k, mt_k).saturating_sub(1), split).max(1)
}

/// Predicted cycles for the whole problem with the given tile configuration,
/// K-split factor and workgroup mapping.
pub fn compute_total_latency(
    hw: &Hardware,
    problem: &Problem,
    tile: &MacroTile,
    split: u64,
    wgm: u64,
) -> f64 {
    let base_cus = active_cu(hw, problem.m, problem.n, problem.batch, tile.mt_m, tile.mt_n);
    let active_cus = (base_cus * split).min(hw.n_cu);
    let h_mem1 = estimate_l2_hit(hw, problem, tile, active_cus, wgm);

    let l_compute = compute_tile_latency(hw, problem, tile);
    let l_mem = memory_tile_latency(hw, problem, tile, split, h_mem1);
    let l_tile_single = l_compute.max(l_mem);
    let num_iter = num_iterations(problem.k, tile.mt_k, split);

    let l_prologue = 1.5 * l_mem;
    let out_bytes = ceil_div(problem.out_bits, 8);
    let limited = (hw.mem1_perf_ratio * active_cus as f64 / hw.n_cu as f64).max(10.0);
    let mut l_epilogue = (active_cus * tile.mt_m * tile.mt_n * out_bytes) as f64 / limited;
    if split > 1 {
        let reduce_bytes = 2 * active_cus * out_bytes * tile.mt_m * tile.mt_n * (split - 1);
        l_epilogue += safe_ratio(reduce_bytes as f64, hw.mem3_perf_ratio);
    }

    let mut l_tile_total = l_tile_single * num_iter as f64
        + l_prologue
        + l_epilogue
        + 1.0
        + ITERATION_BRANCH_LATENCY * num_iter as f64;
    if tile.mt_k == 512 {
        // Empirically calibrated penalty for 512-deep tiles.
        l_tile_total *= 1.5;
    }

    let total_wgs =
        ceil_div(problem.m, tile.mt_m) * ceil_div(problem.n, tile.mt_n) * problem.batch * split;
    let n_waves = ceil_div(total_wgs, hw.n_cu);
    let total = l_tile_total * n_waves as f64;

    hw.debug_record("l_compute", l_compute);
    hw.debug_record("l_mem", l_mem);
    hw.debug_record("l_tile_total", l_tile_total);
    hw.debug_record("n_waves", n_waves as f64);
    trace!(
        "tile {}x{}x{} split {} wgm {}: compute {:.1} mem {:.1} iters {} waves {} total {:.1}",
        tile.mt_m,
        tile.mt_n,
        tile.mt_k,
        split,
        wgm,
        l_compute,
        l_mem,
        num_iter,
        n_waves,
        total
    );
    total
}
