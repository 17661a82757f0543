//! Catalog of GPU families: which physical CU counts ship on each processor
//! and which processors can run kernels compiled for another target.

use std::fmt;

use fxhash::FxHashMap;
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};

/// A GPU processor family, ordered by generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Processor {
    Gfx803,
    Gfx900,
    Gfx906,
    Gfx908,
    Gfx90a,
    Gfx940,
    Gfx941,
    Gfx942,
    Gfx950,
}

impl Processor {
    /// Indicates whether a kernel compiled for `other` runs on `self`. The
    /// baseline `Gfx900` target runs everywhere except on `Gfx803`.
    pub fn runs_kernel_targeting(self, other: Processor) -> bool {
        other == self || (other == Processor::Gfx900 && self != Processor::Gfx803)
    }
}

impl fmt::Display for Processor {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Processor::Gfx803 => "gfx803",
            Processor::Gfx900 => "gfx900",
            Processor::Gfx906 => "gfx906",
            Processor::Gfx908 => "gfx908",
            Processor::Gfx90a => "gfx90a",
            Processor::Gfx940 => "gfx940",
            Processor::Gfx941 => "gfx941",
            Processor::Gfx942 => "gfx942",
            Processor::Gfx950 => "gfx950",
        };
        f.write_str(name)
    }
}

lazy_static! {
    /// CU counts of the cut-down parts of each family. A count absent from
    /// this table is a standard configuration.
    static ref NON_STANDARD_CU_COUNTS: FxHashMap<Processor, &'static [u64]> = {
        let mut map = FxHashMap::default();
        map.insert(Processor::Gfx90a, &[104u64][..]);
        map.insert(Processor::Gfx942, &[20u64, 38, 64, 80, 228][..]);
        map
    };
}

/// Indicates whether `cu_count` is a standard configuration of `processor`.
pub fn is_standard_cu(processor: Processor, cu_count: u64) -> bool {
    NON_STANDARD_CU_COUNTS
        .get(&processor)
        .map_or(true, |counts| !counts.contains(&cu_count))
}

/// A physical device: its processor family, CU count and marketing name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub processor: Processor,
    pub cu_count: u64,
    pub name: String,
}

impl DeviceDescriptor {
    pub fn new(processor: Processor, cu_count: u64, name: impl Into<String>) -> Self {
        DeviceDescriptor {
            processor,
            cu_count,
            name: name.into(),
        }
    }

    pub fn is_standard_cu(&self) -> bool {
        is_standard_cu(self.processor, self.cu_count)
    }

    pub fn runs_kernel_targeting(&self, other: Processor) -> bool {
        self.processor.runs_kernel_targeting(other)
    }
}

impl fmt::Display for DeviceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} ({}, {} CUs)", self.name, self.processor, self.cu_count)
    }
}
