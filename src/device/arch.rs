//! Per-architecture constants and matrix-instruction issue latencies.
//!
//! The tables are built once during module initialization and are keyed by
//! the full instruction shape, so two element widths of the same geometry
//! resolve to distinct entries.

use std::fmt;
use std::hash::{Hash, Hasher};

use fxhash::FxHashMap;
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};

/// Identifies a matrix-multiply-accumulate instruction by its shape and the
/// width of its input elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MatInstr {
    pub m: u64,
    pub n: u64,
    pub k: u64,
    /// Width of the input elements, in bits.
    pub element_bits: u64,
}

impl MatInstr {
    pub fn new(m: u64, n: u64, k: u64, element_bits: u64) -> Self {
        MatInstr {
            m,
            n,
            k,
            element_bits,
        }
    }
}

impl Hash for MatInstr {
    fn hash<H: Hasher>(&self, state: &mut H) {
        // XOR-combined component hashes keep the key stable even if the
        // field order changes.
        state.write_u64(self.m ^ self.n ^ self.k ^ self.element_bits);
    }
}

impl fmt::Display for MatInstr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}x{}x{} ({}-bit)",
            self.m, self.n, self.k, self.element_bits
        )
    }
}

/// The GPU architectures the model knows about. `Count` is the sentinel for
/// unrecognized architecture strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Architecture {
    Gfx942,
    Gfx950,
    Count,
}

impl Architecture {
    /// Parses a `gcnArchName` string. Feature suffixes after the first `:`
    /// (e.g. `gfx942:sramecc+:xnack-`) are ignored.
    pub fn from_gcn_arch_name(name: &str) -> Self {
        match name.split(':').next().unwrap_or(name) {
            "gfx942" => Architecture::Gfx942,
            "gfx950" => Architecture::Gfx950,
            _ => Architecture::Count,
        }
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Architecture::Gfx942 => write!(f, "gfx942"),
            Architecture::Gfx950 => write!(f, "gfx950"),
            Architecture::Count => write!(f, "<unknown>"),
        }
    }
}

/// Static performance parameters of an architecture.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ArchConstants {
    /// Number of accelerator complex dies the device is partitioned into.
    pub num_xcds: u64,
    /// Bandwidth ratio of the per-CU cache tier.
    pub mem1_perf_ratio: f64,
    /// Bandwidth ratio of the last-level cache tier.
    pub mem2_perf_ratio: f64,
    /// Bandwidth ratio of the device-memory tier.
    pub mem3_perf_ratio: f64,
    /// How many matrix instructions a compute unit issues in parallel.
    pub parallel_mi_cu: f64,
    /// Per-workgroup share of the bandwidth.
    pub percent_bw_per_wg: f64,
    /// Scaling factor on the memory clock.
    pub mem_clock_ratio: f64,
}

impl ArchConstants {
    const fn new(
        num_xcds: u64,
        mem1_perf_ratio: f64,
        mem2_perf_ratio: f64,
        mem3_perf_ratio: f64,
        parallel_mi_cu: f64,
        percent_bw_per_wg: f64,
        mem_clock_ratio: f64,
    ) -> Self {
        ArchConstants {
            num_xcds,
            mem1_perf_ratio,
            mem2_perf_ratio,
            mem3_perf_ratio,
            parallel_mi_cu,
            percent_bw_per_wg,
            mem_clock_ratio,
        }
    }
}

static GFX942_CONSTANTS: ArchConstants =
    ArchConstants::new(8, 17.0, 1.21875121875121875 * 6.0, 4.0, 4.0, 0.015, 1.5);

static GFX950_CONSTANTS: ArchConstants =
    ArchConstants::new(8, 17.0, 1.21875121875121875 * 7.0, 4.0, 6.0, 0.008, 1.5);

/// Returns the constants of a supported architecture.
pub fn constants(arch: Architecture) -> Option<&'static ArchConstants> {
    match arch {
        Architecture::Gfx942 => Some(&GFX942_CONSTANTS),
        Architecture::Gfx950 => Some(&GFX950_CONSTANTS),
        Architecture::Count => None,
    }
}

/// Returns the issue-cycle table of a supported architecture.
pub fn mi_issue_cycles(arch: Architecture) -> Option<&'static FxHashMap<MatInstr, f64>> {
    match arch {
        Architecture::Gfx942 => Some(&*GFX942_MI_CYCLES),
        Architecture::Gfx950 => Some(&*GFX950_MI_CYCLES),
        Architecture::Count => None,
    }
}

fn build_table(entries: &[(u64, u64, u64, u64, f64)]) -> FxHashMap<MatInstr, f64> {
    entries
        .iter()
        .map(|&(m, n, k, bits, cycles)| (MatInstr::new(m, n, k, bits), cycles))
        .collect()
}

lazy_static! {
    static ref GFX942_MI_CYCLES: FxHashMap<MatInstr, f64> = build_table(&[
        // 16-bit inputs (f16, bf16).
        (32, 32, 8, 16, 32.0),
        (32, 32, 4, 16, 64.0),
        (16, 16, 16, 16, 16.0),
        (16, 16, 4, 16, 32.0),
        (4, 4, 4, 16, 8.0),
        // 8-bit inputs (fp8, bf8, i8).
        (32, 32, 16, 8, 32.0),
        (16, 16, 32, 8, 16.0),
        (4, 4, 4, 8, 8.0),
        // 32-bit inputs (f32, xf32).
        (32, 32, 2, 32, 64.0),
        (32, 32, 1, 32, 128.0),
        (32, 32, 4, 32, 32.0),
        (16, 16, 4, 32, 32.0),
        (16, 16, 8, 32, 16.0),
        (16, 16, 1, 32, 64.0),
        (4, 4, 1, 32, 8.0),
        // 64-bit inputs (f64).
        (32, 32, 2, 64, 64.0),
        (16, 16, 4, 64, 32.0),
        (4, 4, 4, 64, 16.0),
    ]);
    static ref GFX950_MI_CYCLES: FxHashMap<MatInstr, f64> = build_table(&[
        // 16-bit inputs; the double-rate K shapes are new on this target.
        (32, 32, 16, 16, 32.0),
        (32, 32, 8, 16, 32.0),
        (16, 16, 32, 16, 16.0),
        (16, 16, 16, 16, 16.0),
        (4, 4, 4, 16, 8.0),
        // 8-bit inputs.
        (32, 32, 64, 8, 64.0),
        (32, 32, 32, 8, 32.0),
        (32, 32, 16, 8, 32.0),
        (16, 16, 128, 8, 64.0),
        (16, 16, 64, 8, 32.0),
        (16, 16, 32, 8, 16.0),
        (4, 4, 4, 8, 8.0),
        // 32-bit inputs.
        (32, 32, 2, 32, 64.0),
        (32, 32, 4, 32, 32.0),
        (16, 16, 4, 32, 32.0),
        (16, 16, 8, 32, 16.0),
        (4, 4, 1, 32, 8.0),
        // 64-bit inputs.
        (32, 32, 2, 64, 64.0),
        (16, 16, 4, 64, 32.0),
        (4, 4, 4, 64, 16.0),
    ]);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arch_name_parsing() {
        assert_eq!(
            Architecture::from_gcn_arch_name("gfx942:sramecc+:xnack-"),
            Architecture::Gfx942
        );
        assert_eq!(
            Architecture::from_gcn_arch_name("gfx950"),
            Architecture::Gfx950
        );
        assert_eq!(
            Architecture::from_gcn_arch_name("gfx1100"),
            Architecture::Count
        );
        assert_eq!(Architecture::from_gcn_arch_name(""), Architecture::Count);
    }

    #[test]
    fn constants_values() {
        let gfx942 = constants(Architecture::Gfx942).unwrap();
        assert_eq!(gfx942.num_xcds, 8);
        assert_eq!(gfx942.mem1_perf_ratio, 17.0);
        assert!((gfx942.mem2_perf_ratio - 7.3125).abs() < 1e-4);
        assert_eq!(gfx942.mem3_perf_ratio, 4.0);
        assert_eq!(gfx942.parallel_mi_cu, 4.0);
        assert_eq!(gfx942.percent_bw_per_wg, 0.015);
        assert_eq!(gfx942.mem_clock_ratio, 1.5);

        let gfx950 = constants(Architecture::Gfx950).unwrap();
        assert_eq!(gfx950.parallel_mi_cu, 6.0);
        assert_eq!(gfx950.percent_bw_per_wg, 0.008);
        assert!(constants(Architecture::Count).is_none());
    }

    #[test]
    fn instruction_lookup() {
        let table = mi_issue_cycles(Architecture::Gfx942).unwrap();
        assert_eq!(table[&MatInstr::new(32, 32, 8, 16)], 32.0);
        assert_eq!(table[&MatInstr::new(16, 16, 16, 16)], 16.0);
        // Same geometry, different element width, distinct entry.
        assert_eq!(table[&MatInstr::new(16, 16, 4, 32)], 32.0);
        assert!(table.get(&MatInstr::new(8, 8, 8, 16)).is_none());
    }

    #[test]
    fn instruction_key_ordering() {
        let small = MatInstr::new(16, 16, 16, 16);
        let large = MatInstr::new(32, 32, 8, 16);
        assert!(small < large);
        assert!(MatInstr::new(16, 16, 16, 8) < small);
        assert_eq!(small, MatInstr::new(16, 16, 16, 16));
    }
}
