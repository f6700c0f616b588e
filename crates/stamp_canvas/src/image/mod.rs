//! Image-type strategies.
//!
//! The set of image types is closed: [`ImageType`] names them and
//! [`ImageStrategy`] carries the validated parameters of each. A strategy is set
//! up once per image (deciding the canvas size), then builds the canvas and
//! optionally adds deferred noise at the end.
use std::str::FromStr;

use glam::DVec2;

use crate::canvas::Canvas;
use crate::config::{ConfigTable, ConfigValue};
use crate::error::{Error, Result};
use crate::geometry::{ImageGeometry, Wcs};
use crate::hooks::InputCatalog;
use crate::noise::NoiseSpec;
use crate::random::Generator;
use crate::stamp::{
    build_stamps, DrawMethod, StampBuilder, StampPosition, StampRequest, StampResult,
};

pub mod scattered;
pub mod single;
pub mod tiled;

pub use scattered::ScatteredImage;
pub use single::SingleImage;
pub use tiled::{TileOrder, TiledImage};

/// Name of an image type, read from the `type` key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ImageType {
    #[default]
    Single,
    Tiled,
    Scattered,
}

impl ImageType {
    pub fn from_config(image: &ConfigTable) -> Result<Self> {
        match image.get_str("type")? {
            None => Ok(Self::default()),
            Some(s) => s.parse(),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ImageType::Single => "Single",
            ImageType::Tiled => "Tiled",
            ImageType::Scattered => "Scattered",
        }
    }
}

impl FromStr for ImageType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Single" => Ok(ImageType::Single),
            "Tiled" => Ok(ImageType::Tiled),
            "Scattered" => Ok(ImageType::Scattered),
            other => Err(Error::UnknownImageType(other.to_owned())),
        }
    }
}

/// Canvas size imposed by an outer layer (e.g. a data cube with fixed planes).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ForcedSize {
    pub xsize: Option<i32>,
    pub ysize: Option<i32>,
}

impl ForcedSize {
    pub fn new(xsize: i32, ysize: i32) -> Self {
        Self {
            xsize: Some(xsize),
            ysize: Some(ysize),
        }
    }

    /// Both axes, when both are forced.
    pub fn both(&self) -> Option<(i32, i32)> {
        self.xsize.zip(self.ysize)
    }

    /// Fails unless every forced axis equals the computed size.
    pub fn check(&self, xsize: i32, ysize: i32) -> Result<()> {
        let x_ok = self.xsize.is_none_or(|x| x == xsize);
        let y_ok = self.ysize.is_none_or(|y| y == ysize);
        if x_ok && y_ok {
            return Ok(());
        }
        Err(Error::config(
            "size",
            format!(
                "unable to reconcile required image size {}x{} with computed size {xsize}x{ysize}",
                self.xsize.map_or("*".to_owned(), |x| x.to_string()),
                self.ysize.map_or("*".to_owned(), |y| y.to_string()),
            ),
        ))
    }
}

/// Inputs to strategy setup.
#[derive(Clone, Copy, Default)]
pub struct SetupContext<'a> {
    pub forced: ForcedSize,
    pub inputs: Option<&'a dyn InputCatalog>,
}

/// Everything a strategy needs while building one image.
pub struct BuildContext<'a> {
    pub image_index: usize,
    /// Index of the first object in this image.
    pub object_index: usize,
    pub geometry: ImageGeometry,
    pub wcs: Wcs,
    pub draw_method: DrawMethod,
    pub noise: NoiseSpec,
    pub stamps: &'a dyn StampBuilder,
    /// Base generator; stamps draw from its per-object substreams.
    pub seeds: &'a Generator,
    /// Image-level generator for tile order, positions and noise.
    pub rng: Generator,
    /// Stamp-level worker count.
    pub workers: usize,
}

impl BuildContext<'_> {
    /// Zero canvas over the image bounds.
    pub fn blank_canvas(&self) -> Canvas {
        Canvas::new(self.geometry.bounds).with_wcs(self.wcs)
    }

    /// Request for the `k`-th object of this image.
    pub fn request(
        &self,
        k: usize,
        xsize: i32,
        ysize: i32,
        position: Option<StampPosition>,
        apply_noise: bool,
    ) -> StampRequest {
        StampRequest {
            object_index: self.object_index + k,
            image_index: self.image_index,
            xsize,
            ysize,
            position,
            apply_noise,
            draw_method: self.draw_method,
            image_bounds: self.geometry.bounds,
            wcs: self.wcs,
        }
    }

    /// Builds the requested stamps across the stamp-level workers.
    pub fn build_stamps(&self, requests: &[StampRequest]) -> Result<Vec<StampResult>> {
        build_stamps(self.stamps, requests, self.seeds, self.workers)
    }
}

/// Result of one strategy build.
#[derive(Clone, Debug)]
pub struct ImageBuild {
    pub canvas: Canvas,
    /// Flat noise variance after reconciliation.
    pub current_variance: f64,
    /// Positions published for the stamps of this image.
    pub stamp_positions: Vec<StampPosition>,
}

/// Validated parameters of one image type.
#[derive(Clone, Debug, PartialEq)]
pub enum ImageStrategy {
    Single(SingleImage),
    Tiled(TiledImage),
    Scattered(ScatteredImage),
}

impl ImageStrategy {
    /// Validates the image table for `image_type` and fixes the canvas size.
    pub fn setup(
        image_type: ImageType,
        image: &ConfigTable,
        ctx: &SetupContext<'_>,
    ) -> Result<Self> {
        Ok(match image_type {
            ImageType::Single => ImageStrategy::Single(SingleImage::setup(image, ctx)?),
            ImageType::Tiled => ImageStrategy::Tiled(TiledImage::setup(image, ctx)?),
            ImageType::Scattered => ImageStrategy::Scattered(ScatteredImage::setup(image, ctx)?),
        })
    }

    pub fn image_type(&self) -> ImageType {
        match self {
            ImageStrategy::Single(_) => ImageType::Single,
            ImageStrategy::Tiled(_) => ImageType::Tiled,
            ImageStrategy::Scattered(_) => ImageType::Scattered,
        }
    }

    /// Canvas size; `(0, 0)` means the stamp decides.
    pub fn size(&self) -> (i32, i32) {
        match self {
            ImageStrategy::Single(s) => s.size(),
            ImageStrategy::Tiled(s) => s.size(),
            ImageStrategy::Scattered(s) => s.size(),
        }
    }

    pub fn object_count(&self) -> usize {
        match self {
            ImageStrategy::Single(_) => 1,
            ImageStrategy::Tiled(s) => s.object_count(),
            ImageStrategy::Scattered(s) => s.object_count(),
        }
    }

    pub fn build(&self, ctx: &mut BuildContext<'_>) -> Result<ImageBuild> {
        match self {
            ImageStrategy::Single(s) => s.build(ctx),
            ImageStrategy::Tiled(s) => s.build(ctx),
            ImageStrategy::Scattered(s) => s.build(ctx),
        }
    }

    /// Whether noise was deferred to [`ImageStrategy::add_final_noise`].
    pub fn has_final_noise(&self) -> bool {
        match self {
            ImageStrategy::Single(_) => false,
            ImageStrategy::Tiled(s) => !s.noise_in_stamps(),
            ImageStrategy::Scattered(_) => true,
        }
    }

    /// Adds sky then residual noise over the whole canvas.
    pub fn add_final_noise(
        &self,
        canvas: &mut Canvas,
        current_variance: f64,
        noise: &NoiseSpec,
        rng: &mut Generator,
    ) -> Result<()> {
        if !self.has_final_noise() {
            return Ok(());
        }
        noise.apply(canvas, current_variance, rng)
    }
}

/// Number of objects an image of this configuration holds, without a full setup.
pub fn object_count(image: &ConfigTable, inputs: Option<&dyn InputCatalog>) -> Result<usize> {
    match ImageType::from_config(image)? {
        ImageType::Single => Ok(1),
        ImageType::Tiled => tiled::object_count(image),
        ImageType::Scattered => scattered::object_count(image, inputs),
    }
}

/// Reads `size`, `xsize` and `ysize`. Explicit axes default to `size`.
pub(crate) fn read_size(image: &ConfigTable) -> Result<(Option<i32>, Option<i32>, Option<i32>)> {
    Ok((
        image.get_i32("size")?,
        image.get_i32("xsize")?,
        image.get_i32("ysize")?,
    ))
}

/// Reads `key` as one `[x, y]` pair or a list of pairs.
pub(crate) fn read_positions(image: &ConfigTable, key: &str) -> Result<Option<Vec<DVec2>>> {
    let Some(items) = image.get_list(key)? else {
        return Ok(None);
    };
    if let Some(p) = as_pair(items) {
        return Ok(Some(vec![p]));
    }
    items
        .iter()
        .map(|item| match item {
            ConfigValue::List(pair) => as_pair(pair),
            _ => None,
        })
        .collect::<Option<Vec<_>>>()
        .map(Some)
        .ok_or_else(|| Error::config(key, "expected [x, y] or a list of [x, y] pairs"))
}

fn as_pair(items: &[ConfigValue]) -> Option<DVec2> {
    match items {
        [x, y] => Some(DVec2::new(x.as_f64()?, y.as_f64()?)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::FixedCatalog;

    #[test]
    fn unknown_type_names_the_value() {
        let image = ConfigTable::new().with("type", "Mosaic");
        match ImageType::from_config(&image).unwrap_err() {
            Error::UnknownImageType(name) => assert_eq!(name, "Mosaic"),
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(
            ImageType::from_config(&ConfigTable::new()).unwrap(),
            ImageType::Single
        );
    }

    #[test]
    fn single_object_count_ignores_contents() {
        let image = ConfigTable::new()
            .with("nx_tiles", 4)
            .with("nobjects", 9)
            .with("size", 12);
        assert_eq!(object_count(&image, None).unwrap(), 1);
    }

    #[test]
    fn object_count_per_type() {
        let tiled = ConfigTable::new()
            .with("type", "Tiled")
            .with("nx_tiles", 3)
            .with("ny_tiles", 2);
        assert_eq!(object_count(&tiled, None).unwrap(), 6);

        let half = ConfigTable::new().with("type", "Tiled").with("nx_tiles", 3);
        assert!(object_count(&half, None).unwrap_err().is_config());

        let scattered = ConfigTable::new().with("type", "Scattered");
        let catalog = FixedCatalog::new(11);
        assert_eq!(object_count(&scattered, Some(&catalog)).unwrap(), 11);
        assert!(object_count(&scattered, None).is_err());
    }

    #[test]
    fn forced_size_checks_each_axis() {
        let forced = ForcedSize {
            xsize: Some(30),
            ysize: None,
        };
        assert!(forced.check(30, 99).is_ok());
        assert!(forced.check(31, 16).unwrap_err().is_config());
        assert!(ForcedSize::default().check(1, 1).is_ok());
    }

    #[test]
    fn positions_accept_pair_or_list() {
        let one = ConfigTable::new().with("image_pos", vec![3.0, 4.0]);
        assert_eq!(
            read_positions(&one, "image_pos").unwrap(),
            Some(vec![DVec2::new(3.0, 4.0)])
        );
        let many = ConfigTable::new().with(
            "image_pos",
            ConfigValue::List(vec![vec![1, 2].into(), vec![5.5, 6.0].into()]),
        );
        assert_eq!(
            read_positions(&many, "image_pos").unwrap().map(|p| p.len()),
            Some(2)
        );
        let bad = ConfigTable::new().with("image_pos", vec![1.0, 2.0, 3.0]);
        assert!(read_positions(&bad, "image_pos").is_err());
    }
}
