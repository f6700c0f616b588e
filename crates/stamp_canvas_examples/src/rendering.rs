//! Shared helpers for the demo binaries: logging setup, config loading, a toy
//! stamp builder and PNG previews.
use std::fs;
use std::path::Path;

use anyhow::Context;
use image::{GrayImage, Luma};
use stamp_canvas::prelude::{
    Canvas, ConfigTable, Generator, StampBuilder, StampRequest, StampResult,
};
use tracing::info;

/// Installs a fmt subscriber filtered by `RUST_LOG` (default `info`).
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(env_filter).try_init();
}

/// Reads a RON configuration tree.
pub fn load_config(path: impl AsRef<Path>) -> anyhow::Result<ConfigTable> {
    let path = path.as_ref();
    let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let config: ConfigTable =
        ron::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
    Ok(config)
}

/// Circular Gaussian blobs with random flux and width.
///
/// When the request asks for noise the stamp gets `stamp_noise` variance; either
/// way it reports `whitened_variance` as already present, the way a builder that
/// whitens correlated noise would.
#[derive(Clone, Debug)]
pub struct GaussianBlobStamps {
    pub flux: (f64, f64),
    pub sigma: (f64, f64),
    pub default_size: i32,
    pub stamp_noise: f64,
    pub whitened_variance: f64,
}

impl Default for GaussianBlobStamps {
    fn default() -> Self {
        Self {
            flux: (500.0, 2_000.0),
            sigma: (1.2, 3.0),
            default_size: 25,
            stamp_noise: 4.0,
            whitened_variance: 0.0,
        }
    }
}

impl GaussianBlobStamps {
    pub fn with_whitened_variance(mut self, variance: f64) -> Self {
        self.whitened_variance = variance;
        self
    }
}

impl StampBuilder for GaussianBlobStamps {
    fn build(
        &self,
        request: &StampRequest,
        rng: &mut Generator,
    ) -> stamp_canvas::error::Result<StampResult> {
        let flux = self.flux.0 + (self.flux.1 - self.flux.0) * rng.uniform();
        let sigma = self.sigma.0 + (self.sigma.1 - self.sigma.0) * rng.uniform();
        let w = if request.xsize > 0 { request.xsize } else { self.default_size };
        let h = if request.ysize > 0 { request.ysize } else { self.default_size };

        let bounds = request.placed_bounds(w, h);
        let center = request.image_position().unwrap_or_else(|| bounds.center());
        let norm = flux / (2.0 * std::f64::consts::PI * sigma * sigma);
        let mut canvas = Canvas::new(bounds);
        for y in bounds.ymin..=bounds.ymax {
            for x in bounds.xmin..=bounds.xmax {
                let dx = x as f64 - center.x;
                let dy = y as f64 - center.y;
                let v = norm * (-(dx * dx + dy * dy) / (2.0 * sigma * sigma)).exp();
                canvas.set(x, y, v as f32);
            }
        }
        if request.apply_noise {
            canvas.add_gaussian_noise(self.stamp_noise, rng);
        }
        Ok(StampResult::new(canvas, self.whitened_variance))
    }
}

/// Linear grayscale stretch used for previews.
#[derive(Clone, Copy, Debug, Default)]
pub struct PreviewConfig {
    /// Fixed `(black, white)` levels; the pixel range when `None`.
    pub levels: Option<(f32, f32)>,
}

/// Writes `canvas` as an 8-bit grayscale PNG, flipping y so row `ymax` is on top.
pub fn save_canvas_png(
    canvas: &Canvas,
    cfg: &PreviewConfig,
    path: impl AsRef<Path>,
) -> anyhow::Result<()> {
    let (w, h) = (canvas.width() as u32, canvas.height() as u32);
    anyhow::ensure!(w > 0 && h > 0, "canvas has no pixels");

    let (lo, hi) = cfg.levels.unwrap_or_else(|| {
        canvas
            .pixels()
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &p| {
                (lo.min(p), hi.max(p))
            })
    });
    let span = (hi - lo).max(f32::EPSILON);

    let mut img = GrayImage::new(w, h);
    for (i, p) in canvas.pixels().iter().enumerate() {
        let x = (i as u32) % w;
        let y = h - 1 - (i as u32) / w;
        let v = ((p - lo) / span).clamp(0.0, 1.0) * 255.0;
        img.put_pixel(x, y, Luma([v as u8]));
    }
    let path = path.as_ref();
    img.save(path)
        .with_context(|| format!("writing {}", path.display()))?;
    info!("Wrote {} ({w} x {h}).", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use glam::{DVec2, IVec2};
    use stamp_canvas::prelude::{Bounds, DrawMethod, StampPosition, Wcs};

    use super::*;

    #[test]
    fn blob_is_centered_and_sized() {
        let stamps = GaussianBlobStamps {
            stamp_noise: 0.0,
            ..Default::default()
        };
        let request = StampRequest {
            object_index: 0,
            image_index: 0,
            xsize: 11,
            ysize: 11,
            position: Some(StampPosition::Image(DVec2::new(20.0, 30.0))),
            apply_noise: true,
            draw_method: DrawMethod::Auto,
            image_bounds: Bounds::new(1, 64, 1, 64),
            wcs: Wcs::PixelScale {
                scale: 1.0,
                origin: IVec2::ONE,
            },
        };
        let stamp = stamps.build(&request, &mut Generator::new(1)).unwrap();
        assert_eq!(stamp.canvas.bounds(), Bounds::new(15, 25, 25, 35));
        let peak = stamp.canvas.get(20, 30).unwrap();
        assert!(stamp.canvas.pixels().iter().all(|p| *p <= peak));
    }

    #[test]
    fn ron_config_round_trips_into_table() {
        let text = r#"{
            "image": { "type": "Tiled", "nx_tiles": 3, "pixel_scale": 0.2, "image_pos": [1, 2.5] }
        }"#;
        let config: ConfigTable = ron::from_str(text).unwrap();
        let image = config.get_table("image").unwrap().unwrap();
        assert_eq!(image.get_str("type").unwrap(), Some("Tiled"));
        assert_eq!(image.get_int("nx_tiles").unwrap(), Some(3));
        assert_eq!(image.get_float("pixel_scale").unwrap(), Some(0.2));
        assert_eq!(image.get_list("image_pos").unwrap().map(|l| l.len()), Some(2));
    }
}
