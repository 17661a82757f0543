//! Analytical latency model and tile-shape search for GPU GEMM kernels.
//!
//! Given a problem shape and the description of a target GPU, the model
//! predicts the execution latency, in compute cycles, of a hypothetical GEMM
//! kernel for any combination of macro-tile shape, matrix-instruction shape,
//! K-split factor and workgroup mapping. The predicted latencies are an
//! ordinal ranking device, not a timing oracle: they order candidate kernel
//! configurations, they do not predict wall-clock times.
//!
//! The crate is purely computational. Building a [`Hardware`] from the
//! device-reported [`DeviceProperties`] is the only fallible entry point;
//! every search function is deterministic and keeps no state across calls.

pub mod device;
pub mod explorer;
pub mod model;

pub use crate::device::{DeviceProperties, Hardware};
pub use crate::explorer::grid::{select_best_grid_size, select_best_wgm};
pub use crate::explorer::stream_k::best_predicted_grid_size;
pub use crate::explorer::{select_best_macro_tile_size, RankedTile};
pub use crate::model::{compute_total_latency, MacroTile, Problem};

use failure::Fail;

/// Errors raised while ranking kernel configurations.
#[derive(Debug, Fail)]
pub enum Error {
    /// The architecture string does not resolve to a supported target.
    #[fail(display = "unsupported architecture: {}", _0)]
    UnsupportedArchitecture(String),
    /// Every macro-tile candidate was rejected by the scratchpad capacity
    /// filter.
    #[fail(display = "no macro-tile candidate fits in the scratchpad")]
    NoViableTile,
    /// Every workgroup-mapping candidate was rejected.
    #[fail(display = "no viable workgroup mapping candidate")]
    NoViableWGM,
}
