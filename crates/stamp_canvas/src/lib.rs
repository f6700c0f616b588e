#![forbid(unsafe_code)]
//! stamp_canvas: Reproducible, parallel composition of rendered stamps into images.
//!
//! Modules:
//! - dispatch: batch dispatcher over a worker pool with ordered, fail-fast results
//! - image: Single, Tiled and Scattered image strategies
//! - noise: per-stamp noise variance reconciliation, sky and final noise
//! - orchestrator: per-image state machine and batch entry point
//! - stamp, canvas, geometry, random, config, hooks: supporting types and seams
//!
//! Rendering an individual stamp is left to a [`stamp::StampBuilder`] supplied by
//! the caller.
pub mod canvas;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod geometry;
pub mod hooks;
pub mod image;
pub mod noise;
pub mod orchestrator;
pub mod random;
pub mod stamp;

/// Convenient re-exports for common types. Import with `use stamp_canvas::prelude::*;`.
pub mod prelude {
    pub use crate::canvas::Canvas;
    pub use crate::config::{ConfigTable, ConfigValue};
    pub use crate::dispatch::{
        chunk_size, resolve_worker_count, BatchDispatcher, BuildRequest, Built, CancelToken, Job,
        JobResult, UnitBuilder,
    };
    pub use crate::error::{Error, Result};
    pub use crate::geometry::{Bounds, ImageGeometry, IndexConvention, Wcs};
    pub use crate::hooks::{
        ExtraOutput, FixedCatalog, FnOutput, ImageState, InputCatalog, OutputEvent,
        RecordingOutput,
    };
    pub use crate::image::{
        object_count, ForcedSize, ImageStrategy, ImageType, ScatteredImage, SingleImage,
        TileOrder, TiledImage,
    };
    pub use crate::noise::{reconcile, NoiseModel, NoiseSpec, VarianceMap};
    pub use crate::orchestrator::ImageOrchestrator;
    pub use crate::random::{seed_for_index, Generator};
    pub use crate::stamp::{
        build_stamps, DrawMethod, StampBuilder, StampPosition, StampRequest, StampResult,
    };
}
