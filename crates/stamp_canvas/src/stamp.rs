//! Stamp requests, results and the builder seam.
//!
//! Rendering a single object is outside this crate. Image strategies describe each
//! stamp with a [`StampRequest`] and hand it to a [`StampBuilder`], which returns
//! the rendered pixels and the noise variance already present in them.
use std::str::FromStr;

use glam::DVec2;

use crate::canvas::Canvas;
use crate::config::ConfigTable;
use crate::dispatch::{BatchDispatcher, BuildRequest};
use crate::error::{Error, Result};
use crate::geometry::{Bounds, Wcs};
use crate::random::Generator;

/// How the stamp builder should render the profile.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum DrawMethod {
    #[default]
    Auto,
    Fft,
    RealSpace,
    Phot,
    NoPixel,
    Sb,
}

impl DrawMethod {
    pub fn from_config(image: &ConfigTable) -> Result<Self> {
        match image.get_str("draw_method")? {
            None => Ok(Self::default()),
            Some(s) => s.parse(),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            DrawMethod::Auto => "auto",
            DrawMethod::Fft => "fft",
            DrawMethod::RealSpace => "real_space",
            DrawMethod::Phot => "phot",
            DrawMethod::NoPixel => "no_pixel",
            DrawMethod::Sb => "sb",
        }
    }
}

impl FromStr for DrawMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "auto" => Ok(DrawMethod::Auto),
            "fft" => Ok(DrawMethod::Fft),
            "real_space" => Ok(DrawMethod::RealSpace),
            "phot" => Ok(DrawMethod::Phot),
            "no_pixel" => Ok(DrawMethod::NoPixel),
            "sb" => Ok(DrawMethod::Sb),
            other => Err(Error::config(
                "draw_method",
                format!("unknown draw_method: {other}"),
            )),
        }
    }
}

/// Where a stamp should be centered.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum StampPosition {
    /// Pixel coordinates on the canvas.
    Image(DVec2),
    /// World coordinates, resolved through the canvas WCS.
    World(DVec2),
}

/// Everything a stamp builder needs to render one object.
#[derive(Clone, Debug, PartialEq)]
pub struct StampRequest {
    pub object_index: usize,
    pub image_index: usize,
    /// Target width; 0 lets the builder choose.
    pub xsize: i32,
    /// Target height; 0 lets the builder choose.
    pub ysize: i32,
    pub position: Option<StampPosition>,
    /// Whether the builder should add the final noise itself.
    pub apply_noise: bool,
    pub draw_method: DrawMethod,
    pub image_bounds: Bounds,
    pub wcs: Wcs,
}

impl StampRequest {
    /// Requested center in pixel coordinates, if a position was published.
    pub fn image_position(&self) -> Option<DVec2> {
        self.position.map(|p| match p {
            StampPosition::Image(p) => p,
            StampPosition::World(w) => self.wcs.to_image(w),
        })
    }

    /// Bounds of a `width x height` stamp centered on the requested position, or
    /// anchored at the canvas origin when no position was published.
    pub fn placed_bounds(&self, width: i32, height: i32) -> Bounds {
        match self.image_position() {
            Some(center) => {
                let xmin = (center.x - (width as f64 - 1.0) / 2.0).round() as i32;
                let ymin = (center.y - (height as f64 - 1.0) / 2.0).round() as i32;
                Bounds::from_origin_size(glam::IVec2::new(xmin, ymin), width, height)
            }
            None => Bounds::from_origin_size(self.image_bounds.origin(), width, height),
        }
    }
}

/// Output of one stamp build.
#[derive(Clone, Debug, PartialEq)]
pub struct StampResult {
    /// Rendered pixels; undefined bounds mean the object was skipped.
    pub canvas: Canvas,
    /// Noise variance already present in the stamp after whitening (0 if none).
    pub current_variance: f64,
}

impl StampResult {
    pub fn new(canvas: Canvas, current_variance: f64) -> Self {
        Self {
            canvas,
            current_variance,
        }
    }

    pub fn skipped() -> Self {
        Self::new(Canvas::undefined(), 0.0)
    }

    pub fn is_skipped(&self) -> bool {
        !self.canvas.is_defined()
    }
}

/// Renders one object. Must be a pure function of the request and the generator
/// it is given.
pub trait StampBuilder: Send + Sync {
    fn build(&self, request: &StampRequest, rng: &mut Generator) -> Result<StampResult>;
}

impl<F> StampBuilder for F
where
    F: Fn(&StampRequest, &mut Generator) -> Result<StampResult> + Send + Sync,
{
    fn build(&self, request: &StampRequest, rng: &mut Generator) -> Result<StampResult> {
        self(request, rng)
    }
}

/// Builds one stamp per request, possibly across workers. Each object draws from
/// its own substream of `seeds`, so the result does not depend on `workers`.
pub fn build_stamps(
    builder: &dyn StampBuilder,
    requests: &[StampRequest],
    seeds: &Generator,
    workers: usize,
) -> Result<Vec<StampResult>> {
    let Some(first) = requests.first() else {
        return Ok(Vec::new());
    };
    let request = BuildRequest::new(requests.len())
        .with_start(0, first.object_index)
        .with_workers(workers);
    let built = BatchDispatcher::new().with_label("stamp").run(
        &request,
        |_| Ok(1),
        |_worker| {
            move |k: usize, object_index: usize| -> Result<(StampResult, usize)> {
                let req = &requests[k];
                debug_assert_eq!(req.object_index, object_index);
                let mut rng = seeds.for_object(req.object_index);
                let stamp = builder.build(req, &mut rng)?;
                if stamp.current_variance < 0.0 {
                    return Err(Error::Stamp {
                        object_index: req.object_index,
                        message: format!(
                            "negative current variance {}",
                            stamp.current_variance
                        ),
                    });
                }
                Ok((stamp, 1))
            }
        },
    )?;
    Ok(built.into_iter().map(|b| b.value).collect())
}
