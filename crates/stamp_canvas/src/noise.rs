//! Noise variance reconciliation and final noise.
//!
//! Stamps may arrive already whitened to different noise levels. [`reconcile`]
//! brings the whole canvas up to one flat variance; [`NoiseSpec::apply`] later adds
//! the sky background and whatever stationary noise is still missing.
use tracing::debug;

use crate::canvas::Canvas;
use crate::config::ConfigTable;
use crate::error::{Error, Result};
use crate::geometry::{Bounds, Wcs};
use crate::random::Generator;

/// Per-pixel variance accumulated over a canvas.
#[derive(Clone, Debug)]
pub struct VarianceMap {
    bounds: Bounds,
    data: Vec<f64>,
}

impl VarianceMap {
    /// Create a map over `bounds`, initializing all values to zero.
    pub fn new(bounds: Bounds) -> Self {
        Self {
            bounds,
            data: vec![0.0; bounds.area()],
        }
    }

    /// Add `variance` to every pixel of `region` that lies on the map.
    pub fn accumulate(&mut self, region: Bounds, variance: f64) {
        let b = self.bounds.intersection(&region);
        if !b.is_defined() {
            return;
        }
        for y in b.ymin..=b.ymax {
            let row = self.bounds.offset(b.xmin, y);
            for v in &mut self.data[row..row + b.width()] {
                *v += variance;
            }
        }
    }

    /// Value at `(x, y)`, `0.0` outside the map.
    pub fn get(&self, x: i32, y: i32) -> f64 {
        if !self.bounds.contains(x, y) {
            return 0.0;
        }
        self.data[self.bounds.offset(x, y)]
    }

    pub fn max(&self) -> f64 {
        self.data.iter().copied().fold(0.0, f64::max)
    }

    /// Per-pixel amount still needed to reach `target`.
    pub fn deficit(&self, target: f64) -> Vec<f64> {
        self.data.iter().map(|v| (target - v).max(0.0)).collect()
    }
}

/// Brings `canvas` to a single flat noise variance and returns it.
///
/// `variances[k]` is the noise already present in stamp `k`, which covers
/// `bounds[k]`. Overlapping stamps sum their variances. Skipped stamps (undefined
/// bounds) contribute nothing.
pub fn reconcile(
    canvas: &mut Canvas,
    variances: &[f64],
    bounds: &[Bounds],
    rng: &mut Generator,
) -> f64 {
    debug_assert_eq!(variances.len(), bounds.len());
    let max_stamp = variances.iter().copied().fold(0.0, f64::max);
    if max_stamp <= 0.0 {
        return 0.0;
    }
    debug!("maximum noise variance in any stamp is {max_stamp}");

    let mut map = VarianceMap::new(canvas.bounds());
    for (v, b) in variances.iter().zip(bounds) {
        if b.is_defined() {
            map.accumulate(*b, *v);
        }
    }
    let flat = map.max();
    debug!("maximum noise variance in any pixel is {flat}");

    canvas.add_variable_gaussian_noise(&map.deficit(flat), rng);
    flat
}

/// Stationary noise model of the `noise` table.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum NoiseModel {
    Gaussian { variance: f64 },
}

impl NoiseModel {
    pub fn from_config(noise: &ConfigTable) -> Result<Self> {
        let kind = noise.get_str("type")?.unwrap_or("Gaussian");
        if kind != "Gaussian" {
            return Err(Error::config(
                "noise.type",
                format!("unsupported noise type {kind}"),
            ));
        }
        let variance = match (noise.get_float("sigma")?, noise.get_float("variance")?) {
            (Some(_), Some(_)) => {
                return Err(Error::config(
                    "noise",
                    "only one of sigma or variance may be given",
                ))
            }
            (Some(sigma), None) => sigma * sigma,
            (None, Some(variance)) => variance,
            (None, None) => {
                return Err(Error::config(
                    "noise",
                    "Gaussian noise requires sigma or variance",
                ))
            }
        };
        if variance < 0.0 {
            return Err(Error::config(
                "noise",
                format!("variance must be >= 0 (got {variance})"),
            ));
        }
        Ok(NoiseModel::Gaussian { variance })
    }

    pub fn variance(&self) -> f64 {
        match self {
            NoiseModel::Gaussian { variance } => *variance,
        }
    }
}

/// Sky background and noise settings read from the image table.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct NoiseSpec {
    pub model: Option<NoiseModel>,
    /// Sky level per pixel.
    pub sky_level_pixel: f64,
}

impl NoiseSpec {
    pub fn from_config(image: &ConfigTable, wcs: &Wcs) -> Result<Self> {
        let model = image
            .get_table("noise")?
            .map(NoiseModel::from_config)
            .transpose()?;
        let sky_level_pixel = match (
            image.get_float("sky_level_pixel")?,
            image.get_float("sky_level")?,
        ) {
            (Some(_), Some(_)) => {
                return Err(Error::config(
                    "sky_level",
                    "only one of sky_level or sky_level_pixel may be given",
                ))
            }
            (Some(p), None) => p,
            (None, Some(s)) => s * wcs.pixel_area(),
            (None, None) => 0.0,
        };
        Ok(Self {
            model,
            sky_level_pixel,
        })
    }

    pub fn has_noise(&self) -> bool {
        self.model.is_some()
    }

    pub fn add_sky(&self, canvas: &mut Canvas) {
        if self.sky_level_pixel != 0.0 {
            canvas.add_constant(self.sky_level_pixel);
        }
    }

    /// Tops the canvas up from `current_variance` to the model variance.
    pub fn add_noise(
        &self,
        canvas: &mut Canvas,
        current_variance: f64,
        rng: &mut Generator,
    ) -> Result<()> {
        let Some(model) = self.model else {
            return Ok(());
        };
        let extra = model.variance() - current_variance;
        if extra < 0.0 {
            return Err(Error::config(
                "noise",
                format!(
                    "whitening already added variance {current_variance}, \
                     more than the requested {}",
                    model.variance()
                ),
            ));
        }
        canvas.add_gaussian_noise(extra, rng);
        Ok(())
    }

    /// Sky background then residual noise.
    pub fn apply(
        &self,
        canvas: &mut Canvas,
        current_variance: f64,
        rng: &mut Generator,
    ) -> Result<()> {
        self.add_sky(canvas);
        self.add_noise(canvas, current_variance, rng)
    }
}
