//! Describes the GPUs the model can target.
pub mod arch;
pub mod catalog;

pub use self::arch::{constants, mi_issue_cycles, ArchConstants, Architecture, MatInstr};
pub use self::catalog::{is_standard_cu, DeviceDescriptor, Processor};

use std::cell::RefCell;
use std::env;

use fxhash::FxHashMap;
use lazy_static::lazy_static;
use log::warn;
use serde::{Deserialize, Serialize};

use crate::Error;

lazy_static! {
    // Read once; the value is cached for the lifetime of the process.
    static ref DEBUG_ENABLED: bool = env::var("ANALYTICAL_GEMM_DEBUG")
        .map(|value| value == "1")
        .unwrap_or(false);
}

/// Indicates whether diagnostic stderr output was requested through
/// `ANALYTICAL_GEMM_DEBUG=1`.
pub fn debug_enabled() -> bool {
    *DEBUG_ENABLED
}

/// Device quantities reported by the runtime. How this bundle is obtained
/// from a driver is up to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceProperties {
    pub gcn_arch_name: String,
    pub multi_processor_count: u64,
    pub shared_mem_per_block: u64,
    pub clock_rate_khz: f64,
    pub memory_clock_rate_khz: f64,
    pub l2_cache_size: u64,
}

impl DeviceProperties {
    /// Parses a JSON-encoded property bundle.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// The performance parameters of a target GPU, composed from the
/// architecture constants and the device-reported quantities. Built once per
/// session and read-only afterwards; the debug log is the only mutable part
/// and is never consulted by the model.
#[derive(Debug, Clone, Serialize)]
pub struct Hardware {
    pub arch: Architecture,
    /// Number of compute units on the device.
    pub n_cu: u64,
    /// Scratchpad capacity available to one workgroup, in bytes.
    pub lds_capacity: u64,
    /// Number of accelerator complex dies.
    pub num_xcd: u64,
    /// Bandwidth ratio of the per-CU cache tier.
    pub mem1_perf_ratio: f64,
    /// Bandwidth ratio of the last-level cache tier.
    pub mem2_perf_ratio: f64,
    /// Bandwidth ratio of the device-memory tier.
    pub mem3_perf_ratio: f64,
    /// Last-level cache capacity, in bytes.
    pub l2_capacity: u64,
    pub compute_clock_ghz: f64,
    /// Compute units attached to one last-level cache slice.
    pub cu_per_l2: u64,
    /// Matrix instructions a compute unit issues in parallel.
    pub parallel_mi_cu: f64,
    /// Per-workgroup share of the bandwidth.
    pub percent_bw_per_wg: f64,
    #[serde(skip)]
    debug_log: RefCell<FxHashMap<String, f64>>,
}

impl Hardware {
    /// Builds a descriptor from explicit parameters. The perf ratios are
    /// taken verbatim; see [`Hardware::from_device_properties`] for the
    /// clock-derived variant.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        arch: Architecture,
        n_cu: u64,
        lds_capacity: u64,
        num_xcd: u64,
        mem1_perf_ratio: f64,
        mem2_perf_ratio: f64,
        mem3_perf_ratio: f64,
        l2_capacity: u64,
        compute_clock_ghz: f64,
        parallel_mi_cu: f64,
        percent_bw_per_wg: f64,
    ) -> Self {
        Hardware {
            arch,
            n_cu,
            lds_capacity,
            num_xcd,
            mem1_perf_ratio,
            mem2_perf_ratio,
            mem3_perf_ratio,
            l2_capacity,
            compute_clock_ghz,
            cu_per_l2: n_cu / num_xcd,
            parallel_mi_cu,
            percent_bw_per_wg,
            debug_log: RefCell::new(FxHashMap::default()),
        }
    }

    /// Composes the architecture constants with the device-reported
    /// quantities. Fails when the architecture string is not a supported
    /// target.
    pub fn from_device_properties(props: &DeviceProperties) -> Result<Self, Error> {
        let arch = Architecture::from_gcn_arch_name(&props.gcn_arch_name);
        let consts = arch::constants(arch)
            .ok_or_else(|| Error::UnsupportedArchitecture(props.gcn_arch_name.clone()))?;
        let mem1 = 1e9 * consts.mem1_perf_ratio / props.clock_rate_khz;
        let mem2 = 1e9 * consts.mem2_perf_ratio
            / (props.memory_clock_rate_khz * consts.mem_clock_ratio);
        let mem3 = 1e9 * consts.mem3_perf_ratio / props.memory_clock_rate_khz;
        Ok(Hardware::new(
            arch,
            props.multi_processor_count,
            props.shared_mem_per_block,
            consts.num_xcds,
            mem1,
            mem2,
            mem3,
            props.l2_cache_size,
            props.clock_rate_khz / 1e6,
            consts.parallel_mi_cu,
            consts.percent_bw_per_wg,
        ))
    }

    /// Issue latency of a matrix instruction, in cycles, accounting for the
    /// parallel issue width of a compute unit. Unknown instructions resolve
    /// to a fallback latency instead of failing the search.
    pub fn mi_latency(&self, m: u64, n: u64, k: u64, element_bits: u64) -> f64 {
        let key = MatInstr::new(m, n, k, element_bits);
        let cycles = arch::mi_issue_cycles(self.arch).and_then(|table| table.get(&key));
        match cycles {
            Some(&cycles) => cycles / self.parallel_mi_cu,
            None => {
                warn!(
                    "no issue latency for {} on {}, using the fallback",
                    key, self.arch
                );
                32.0 / self.parallel_mi_cu
            }
        }
    }

    /// Records a diagnostic value. No-op unless `ANALYTICAL_GEMM_DEBUG=1`.
    pub fn debug_record(&self, key: &str, value: f64) {
        if debug_enabled() {
            self.debug_log.borrow_mut().insert(key.to_string(), value);
        }
    }

    /// Dumps the recorded diagnostics to stderr and clears them.
    pub fn dump_debug(&self) {
        if !debug_enabled() {
            return;
        }
        let mut entries: Vec<_> = self.debug_log.borrow_mut().drain().collect();
        entries.sort_by(|lhs, rhs| lhs.0.cmp(&rhs.0));
        for (key, value) in entries {
            eprintln!("{} = {}", key, value);
        }
    }

    /// Clears the diagnostic log.
    pub fn reset_debug(&self) {
        self.debug_log.borrow_mut().clear();
    }
}
