//! Enumeration and ranking of macro-tile candidates.
pub mod grid;
pub mod stream_k;

use std::cmp::Ordering;
use std::fmt;

use itertools::Itertools;
use log::trace;
use serde::Serialize;

use crate::device::Hardware;
use crate::model::{self, MacroTile, Problem};
use crate::Error;

/// Candidates whose predicted latencies differ by less than this many cycles
/// are considered tied and reordered by arithmetic intensity.
const TIE_EPSILON_CYCLES: f64 = 10.0;

/// A macro-tile candidate together with its predicted latency.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct RankedTile {
    pub latency: f64,
    pub tile: MacroTile,
}

impl fmt::Display for RankedTile {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}x{}x{} (mi {}x{}x{}, occupancy {}): {:.1} cycles",
            self.tile.mt_m,
            self.tile.mt_n,
            self.tile.mt_k,
            self.tile.mi_m,
            self.tile.mi_n,
            self.tile.mi_k,
            self.tile.occupancy,
            self.latency
        )
    }
}

/// Flops per element moved for one macro-tile K-iteration.
fn tile_intensity(tile: &MacroTile) -> f64 {
    model::arithmetic_intensity(tile.mt_m, tile.mt_n, tile.mt_k, 1)
}

fn fits_in_lds(hw: &Hardware, problem: &Problem, tile: &MacroTile) -> bool {
    let a_bytes = model::ceil_div(problem.a_bits, 8);
    let loads =
        model::a_tile_loads(tile.mt_m, tile.mt_k) + model::b_tile_loads(tile.mt_n, tile.mt_k);
    loads * a_bytes <= hw.lds_capacity
}

/// Ranks the viable candidates by predicted latency. Filters out candidates
/// whose per-iteration loads do not fit in the scratchpad, then predicts
/// each survivor with a unit K-split and reorders near-equal latencies by
/// descending arithmetic intensity. The head of the returned vector is the
/// preferred configuration.
pub fn select_best_macro_tile_size(
    hw: &Hardware,
    problem: &Problem,
    candidates: &[MacroTile],
) -> Result<Vec<RankedTile>, Error> {
    let mut ranked = candidates
        .iter()
        .filter(|tile| fits_in_lds(hw, problem, tile))
        .map(|&tile| RankedTile {
            latency: model::compute_total_latency(hw, problem, &tile, 1, 1),
            tile,
        })
        .collect_vec();
    if ranked.is_empty() {
        return Err(Error::NoViableTile);
    }
    ranked.sort_by(|lhs, rhs| compare_latency(lhs.latency, rhs.latency));

    let min_latency = ranked[0].latency;
    let tie_len = ranked
        .iter()
        .take_while(|entry| entry.latency - min_latency < TIE_EPSILON_CYCLES)
        .count();
    ranked[..tie_len].sort_by(|lhs, rhs| {
        tile_intensity(&rhs.tile)
            .partial_cmp(&tile_intensity(&lhs.tile))
            .unwrap_or(Ordering::Equal)
    });

    for entry in &ranked {
        trace!("ranked candidate {}", entry);
    }
    Ok(ranked)
}

/// Alternative tie-breaker for problems with a dominant dimension: among the
/// near-equal candidates, prefers the tile with the largest extent along the
/// larger of M and N, then along the other, then along K.
pub fn pick_best_tile_with_dimension_priority(
    hw: &Hardware,
    problem: &Problem,
    candidates: &[MacroTile],
) -> Result<RankedTile, Error> {
    let ranked = select_best_macro_tile_size(hw, problem, candidates)?;
    let min_latency = ranked[0].latency;
    let best = ranked
        .iter()
        .take_while(|entry| entry.latency - min_latency < TIE_EPSILON_CYCLES)
        .max_by_key(|entry| {
            let tile = &entry.tile;
            if problem.m >= problem.n {
                (tile.mt_m, tile.mt_n, tile.mt_k)
            } else {
                (tile.mt_n, tile.mt_m, tile.mt_k)
            }
        })
        .cloned();
    // The tie window always holds the front entry.
    Ok(best.unwrap_or(ranked[0]))
}

fn compare_latency(lhs: f64, rhs: f64) -> Ordering {
    lhs.partial_cmp(&rhs).unwrap_or(Ordering::Equal)
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

    fn problem_4096() -> Problem {
        Problem {
            m: 4096,
            n: 4096,
            k: 4096,
            batch: 1,
            trans_a: false,
            trans_b: true,
            a_bits: 16,
            b_bits: 16,
            out_bits: 32,
            mx_block_size: 0,
        }
    }

    fn tile(mt_m: u64, mt_n: u64, mt_k: u64) -> MacroTile {
        MacroTile {
            mt_m,
            mt_n,
            mt_k,
            mi_m: 32,
            mi_n: 32,
            mi_k: 8,
            occupancy: 2,
        }
    }

    #[test]
    fn ranking_is_sorted_with_intensity_ties() {
        let _ = env_logger::try_init();
        let hw = gfx942();
        let problem = problem_4096();
        let candidates = [
            tile(128, 128, 32),
            tile(256, 128, 32),
            tile(64, 64, 32),
            tile(128, 64, 32),
        ];
        let ranked = select_best_macro_tile_size(&hw, &problem, &candidates).unwrap();
        assert_eq!(ranked.len(), 4);
        let min_latency = ranked[0].latency;
        for pair in ranked.windows(2) {
            let tied = pair[0].latency - min_latency < TIE_EPSILON_CYCLES
                && pair[1].latency - min_latency < TIE_EPSILON_CYCLES;
            if tied {
                // Inside the tie window, descending arithmetic intensity.
                assert!(tile_intensity(&pair[0].tile) >= tile_intensity(&pair[1].tile));
            } else {
                assert!(pair[0].latency <= pair[1].latency);
            }
        }
    }

    #[test]
    fn intensity_breaks_exact_ties() {
        let hw = gfx942();
        let problem = problem_4096();
        // T2 has the higher arithmetic intensity; if the model predicts the
        // two within the tie window it must come out first.
        let t1 = tile(128, 128, 32);
        let t2 = tile(256, 128, 32);
        let ranked = select_best_macro_tile_size(&hw, &problem, &[t1, t2]).unwrap();
        if (ranked[0].latency - ranked[1].latency).abs() < TIE_EPSILON_CYCLES {
            assert_eq!(ranked[0].tile, t2);
        }
        assert!(tile_intensity(&t2) > tile_intensity(&t1));
    }

    #[test]
    fn scratchpad_filter_rejects_oversized_tiles() {
        let hw = gfx942();
        let problem = problem_4096();
        // (512 * 512 + 128 * 512) * 2 bytes is far beyond 64 KiB.
        let oversized = tile(512, 128, 512);
        let viable = tile(128, 128, 32);
        let ranked = select_best_macro_tile_size(&hw, &problem, &[oversized, viable]).unwrap();
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].tile, viable);
    }

    #[test]
    fn all_rejected_is_an_error() {
        let hw = gfx942();
        let problem = problem_4096();
        let oversized = tile(512, 512, 128);
        match select_best_macro_tile_size(&hw, &problem, &[oversized]) {
            Err(Error::NoViableTile) => (),
            other => panic!("expected NoViableTile, got {:?}", other.map(|r| r.len())),
        }
    }

    #[test]
    fn dimension_priority_prefers_the_larger_extent() {
        let hw = gfx942();
        let mut problem = problem_4096();
        problem.m = 8192;
        problem.n = 2048;
        let candidates = [tile(128, 128, 32), tile(256, 128, 32), tile(128, 256, 32)];
        let best = pick_best_tile_with_dimension_priority(&hw, &problem, &candidates).unwrap();
        // Whatever the tie window contains, the pick is one of the inputs
        // and no slower than the window allows.
        let ranked = select_best_macro_tile_size(&hw, &problem, &candidates).unwrap();
        assert!(best.latency - ranked[0].latency < TIE_EPSILON_CYCLES);
        assert!(candidates.contains(&best.tile));
    }
}
