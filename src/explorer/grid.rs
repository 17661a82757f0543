//! Grid-shape selection: K-split factor and workgroup mapping.

use log::trace;

use crate::device::Hardware;
use crate::model::{self, cache::estimate_l2_hit, MacroTile, Problem};
use crate::Error;

/// Number of workgroups launched for the problem before any K-split.
fn base_grid(problem: &Problem, tile: &MacroTile) -> u64 {
    model::ceil_div(problem.m, tile.mt_m) * model::ceil_div(problem.n, tile.mt_n) * problem.batch
}

/// Picks the K-split factor minimizing the predicted latency and returns the
/// resulting grid size. Splits beyond the device occupancy are not
/// considered; when the base grid already exceeds the device, the search
/// range is empty and the base grid is returned unchanged.
pub fn select_best_grid_size(
    hw: &Hardware,
    problem: &Problem,
    tile: &MacroTile,
    biggest_allowable_split: u64,
) -> u64 {
    let grid = base_grid(problem, tile);
    let max_hw_split = hw.n_cu / grid;
    let mut best_split = 1;
    let mut best_latency = std::f64::INFINITY;
    for split in 1..=biggest_allowable_split.min(max_hw_split) {
        let latency = model::compute_total_latency(hw, problem, tile, split, 1);
        if latency < best_latency {
            best_latency = latency;
            best_split = split;
        }
    }
    trace!(
        "grid {}: best split {} at {:.1} cycles",
        grid,
        best_split,
        best_latency
    );
    best_split * grid
}

/// Picks the workgroup mapping maximizing the estimated last-level cache hit
/// rate. Returns the winning `(hit_rate, wgm)` pair.
pub fn select_best_wgm(
    hw: &Hardware,
    problem: &Problem,
    tile: &MacroTile,
    wgm_candidates: &[u64],
) -> Result<(f64, u64), Error> {
    let a_bytes = model::ceil_div(problem.a_bits, 8);
    let loads =
        model::a_tile_loads(tile.mt_m, tile.mt_k) + model::b_tile_loads(tile.mt_n, tile.mt_k);
    let active_cus = model::active_cu(hw, problem.m, problem.n, problem.batch, tile.mt_m, tile.mt_n);
    let mut best: Option<(f64, u64)> = None;
    for &wgm in wgm_candidates {
        if loads * a_bytes > hw.lds_capacity {
            continue;
        }
        let hit = estimate_l2_hit(hw, problem, tile, active_cus, wgm);
        trace!("wgm {}: estimated hit rate {:.3}", wgm, hit);
        if best.map_or(true, |(best_hit, _)| hit > best_hit) {
            best = Some((hit, wgm));
        }
    }
    best.ok_or(Error::NoViableWGM)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Architecture;

    fn gfx942() -> Hardware {
        Hardware::new(
            Architecture::Gfx942,
            304,
            65536,
            8,
            17.0,
            7.3125,
            4.0,
            4 * 1024 * 1024,
            1.8,
            4.0,
            0.015,
        )
    }

    fn tile_128x128x32() -> MacroTile {
        MacroTile {
            mt_m: 128,
            mt_n: 128,
            mt_k: 32,
            mi_m: 32,
            mi_n: 32,
            mi_k: 8,
            occupancy: 2,
        }
    }

    fn problem(m: u64, n: u64, k: u64) -> Problem {
        Problem {
            m,
            n,
            k,
            batch: 1,
            trans_a: false,
            trans_b: true,
            a_bits: 16,
            b_bits: 16,
            out_bits: 32,
            mx_block_size: 0,
        }
    }

    #[test]
    fn split_search_respects_the_allowed_range() {
        let _ = env_logger::try_init();
        let hw = gfx942();
        // A 4 x 5 grid of output tiles: 20 workgroups, 15 splits fit the
        // device but only 8 are allowed.
        let problem = problem(512, 640, 4096);
        let tile = tile_128x128x32();
        let grid = select_best_grid_size(&hw, &problem, &tile, 8);
        assert_eq!(grid % 20, 0);
        let split = grid / 20;
        assert!(split >= 1 && split <= 8);
    }

    #[test]
    fn oversubscribed_grid_is_returned_unchanged() {
        let hw = gfx942();
        // 32 x 32 = 1024 workgroups exceed the 304 CUs: no split fits.
        let problem = problem(4096, 4096, 4096);
        let tile = tile_128x128x32();
        assert_eq!(select_best_grid_size(&hw, &problem, &tile, 8), 1024);
    }

    #[test]
    fn deep_k_prefers_splitting() {
        let hw = gfx942();
        // A single output tile with a deep K extent leaves 303 CUs idle
        // unless the reduction is split.
        let problem = problem(128, 128, 65536);
        let tile = tile_128x128x32();
        let grid = select_best_grid_size(&hw, &problem, &tile, 8);
        assert!(grid > 1, "expected a K-split for the single-tile grid");
    }

    #[test]
    fn wgm_selection_returns_the_best_hit() {
        let hw = gfx942();
        let problem = problem(4096, 4096, 4096);
        let tile = tile_128x128x32();
        let (best_hit, best_wgm) =
            select_best_wgm(&hw, &problem, &tile, &[1, 2, 4, 8, 16]).unwrap();
        assert!(best_hit >= 0.0 && best_hit <= 1.0);
        for &wgm in &[1u64, 2, 4, 8, 16] {
            let hit = estimate_l2_hit(&hw, &problem, &tile, 304, wgm);
            assert!(best_hit >= hit, "wgm {} beats the winner {}", wgm, best_wgm);
        }
    }

    #[test]
    fn wgm_selection_fails_without_viable_tiles() {
        let hw = gfx942();
        let problem = problem(4096, 4096, 4096);
        let mut tile = tile_128x128x32();
        tile.mt_m = 1024;
        tile.mt_k = 256;
        match select_best_wgm(&hw, &problem, &tile, &[1, 2, 4]) {
            Err(Error::NoViableWGM) => (),
            other => panic!("expected NoViableWGM, got {:?}", other.map(|_| ())),
        }
    }
}
