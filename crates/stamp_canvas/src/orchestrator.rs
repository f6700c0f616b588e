//! Per-image state machine and batch entry point.
//!
//! [`ImageOrchestrator::build_image`] turns one image index into a finished canvas:
//! resolve the strategy, fix the geometry, notify hooks, build, then add deferred
//! noise. [`ImageOrchestrator::build_images`] runs that for a whole batch through a
//! [`BatchDispatcher`], one unit per image.
use std::borrow::Cow;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::canvas::Canvas;
use crate::config::ConfigTable;
use crate::dispatch::{resolve_worker_count, BatchDispatcher, BuildRequest, Built};
use crate::error::Result;
use crate::geometry::{ImageGeometry, IndexConvention, Wcs};
use crate::hooks::{ExtraOutput, ImageState, InputCatalog};
use crate::image::{self, BuildContext, ForcedSize, ImageStrategy, ImageType, SetupContext};
use crate::noise::NoiseSpec;
use crate::random::Generator;
use crate::stamp::{DrawMethod, StampBuilder};

/// Builds images from a configuration tree and a stamp builder.
///
/// Cloning is cheap apart from the configuration, which every image-level worker
/// receives its own copy of.
#[derive(Clone)]
pub struct ImageOrchestrator {
    config: ConfigTable,
    stamps: Arc<dyn StampBuilder>,
    inputs: Option<Arc<dyn InputCatalog>>,
    outputs: Vec<Arc<dyn ExtraOutput>>,
    forced: ForcedSize,
    nested: bool,
}

impl ImageOrchestrator {
    pub fn new(config: ConfigTable, stamps: impl StampBuilder + 'static) -> Self {
        Self::with_shared_builder(config, Arc::new(stamps))
    }

    pub fn with_shared_builder(config: ConfigTable, stamps: Arc<dyn StampBuilder>) -> Self {
        Self {
            config,
            stamps,
            inputs: None,
            outputs: Vec::new(),
            forced: ForcedSize::default(),
            nested: false,
        }
    }

    pub fn with_input_catalog(mut self, inputs: Arc<dyn InputCatalog>) -> Self {
        self.inputs = Some(inputs);
        self
    }

    pub fn with_extra_output(mut self, output: Arc<dyn ExtraOutput>) -> Self {
        self.outputs.push(output);
        self
    }

    pub fn with_forced_size(mut self, forced: ForcedSize) -> Self {
        self.forced = forced;
        self
    }

    pub fn config(&self) -> &ConfigTable {
        &self.config
    }

    /// The `image` table, empty when absent.
    fn image_table(&self) -> Result<Cow<'_, ConfigTable>> {
        Ok(match self.config.get_table("image")? {
            Some(t) => Cow::Borrowed(t),
            None => Cow::Owned(ConfigTable::new()),
        })
    }

    fn inputs(&self) -> Option<&dyn InputCatalog> {
        self.inputs.as_deref()
    }

    /// Number of objects in image `image_index`.
    pub fn object_count(&self, image_index: usize) -> Result<usize> {
        let image = self.image_table().map_err(|e| e.in_image(image_index))?;
        image::object_count(&image, self.inputs()).map_err(|e| e.in_image(image_index))
    }

    /// Stamp-level worker count from `image.nproc`; 1 inside an image-level worker.
    fn stamp_workers(&self, image: &ConfigTable) -> Result<usize> {
        if self.nested {
            return Ok(1);
        }
        Ok(image
            .get_int("nproc")?
            .map_or(1, resolve_worker_count))
    }

    /// Group size that must stay on one worker: `gal.num` for Ring tests.
    fn atomic_size(&self, image_type: ImageType) -> Result<usize> {
        if image_type != ImageType::Single {
            return Ok(1);
        }
        let Some(gal) = self.config.get_table("gal")? else {
            return Ok(1);
        };
        if gal.get_str("type")? != Some("Ring") {
            return Ok(1);
        }
        Ok(gal.get_positive("num")?.unwrap_or(1))
    }

    fn seeds(image: &ConfigTable) -> Result<Generator> {
        let seed = image.get_int("random_seed")?.unwrap_or(0);
        Ok(Generator::new(seed as u64))
    }

    /// Builds one image whose first object is `object_index`.
    pub fn build_image(&self, image_index: usize, object_index: usize) -> Result<Canvas> {
        self.build_image_inner(image_index, object_index)
            .map_err(|e| e.in_image(image_index))
    }

    fn build_image_inner(&self, image_index: usize, object_index: usize) -> Result<Canvas> {
        debug!("image {image_index}: BuildImage: image, obj = {image_index},{object_index}");
        let image = self.image_table()?;

        let image_type = ImageType::from_config(&image)?;
        let setup = SetupContext {
            forced: self.forced,
            inputs: self.inputs(),
        };
        let strategy = ImageStrategy::setup(image_type, &image, &setup)?;

        let (xsize, ysize) = strategy.size();
        let geometry = ImageGeometry::new(xsize, ysize, IndexConvention::from_config(&image)?)?;
        let wcs = Wcs::from_config(&image, geometry.origin)?;
        let draw_method = DrawMethod::from_config(&image)?;
        let noise = NoiseSpec::from_config(&image, &wcs)?;
        debug!("image {image_index}: image_size = {xsize}, {ysize}");
        debug!("image {image_index}: image_origin = {}", geometry.origin);
        debug!("image {image_index}: image_center = {}", geometry.center);

        let mut state = ImageState {
            image_index,
            object_index,
            geometry,
            wcs,
            current_variance: 0.0,
        };
        if let Some(inputs) = self.inputs() {
            inputs.setup_for_image(image_index);
        }
        for output in &self.outputs {
            output.setup_for_image(&state);
        }

        let seeds = Self::seeds(&image)?;
        let mut ctx = BuildContext {
            image_index,
            object_index,
            geometry,
            wcs,
            draw_method,
            noise,
            stamps: self.stamps.as_ref(),
            seeds: &seeds,
            rng: seeds.for_image(image_index),
            workers: self.stamp_workers(&image)?,
        };
        let built = strategy.build(&mut ctx)?;
        let mut rng = ctx.rng;

        // Stamp positions end with the build; only the canvas and variance carry on.
        debug!(
            "image {image_index}: {} stamp positions used",
            built.stamp_positions.len()
        );
        let mut canvas = built.canvas;
        state.current_variance = built.current_variance;

        for output in &self.outputs {
            output.process_for_image(&state, &canvas);
        }

        if strategy.has_final_noise() {
            strategy.add_final_noise(&mut canvas, state.current_variance, &noise, &mut rng)?;
        }
        info!(
            "Image {image_index}: size = {} x {}",
            canvas.width(),
            canvas.height()
        );
        Ok(canvas)
    }

    /// Builds every image of `request`, in order, across image-level workers.
    pub fn build_images(&self, request: &BuildRequest) -> Result<Vec<Built<Canvas>>> {
        let image = self.image_table()?;
        let image_type = ImageType::from_config(&image)?;
        let atomic = self.atomic_size(image_type)?;

        let mut request = *request;
        if request.worker_count > 1 && self.stamp_workers(&image)? > 1 {
            warn!("Stamps are built in parallel, so images are built with 1 worker.");
            request.worker_count = 1;
        }
        let nested = request.worker_count > 1 && request.count > 1;

        BatchDispatcher::new()
            .with_atomic_size(atomic)
            .with_label("image")
            .run(
                &request,
                |image_index| self.object_count(image_index),
                |_worker| {
                    let mut orchestrator = self.clone();
                    orchestrator.nested = nested;
                    move |image_index: usize, object_index: usize| -> Result<(Canvas, usize)> {
                        let canvas = orchestrator.build_image(image_index, object_index)?;
                        let consumed = orchestrator.object_count(image_index)?;
                        Ok((canvas, consumed))
                    }
                },
            )
    }
}
