//! Stamps placed at arbitrary positions, possibly overlapping or off the canvas.
use glam::DVec2;
use tracing::{debug, warn};

use super::{read_positions, read_size, BuildContext, ImageBuild, SetupContext};
use crate::config::ConfigTable;
use crate::error::{Error, Result};
use crate::hooks::InputCatalog;
use crate::noise::reconcile;
use crate::stamp::StampPosition;

/// Where the objects go.
#[derive(Clone, Debug, PartialEq)]
pub enum Placement {
    /// Uniformly random integer pixel positions over the canvas.
    Random,
    /// Explicit pixel positions, one shared or one per object.
    Image(Vec<DVec2>),
    /// Explicit world positions, one shared or one per object.
    World(Vec<DVec2>),
}

impl Placement {
    fn position(&self, k: usize) -> Option<StampPosition> {
        let pick = |ps: &[DVec2]| if ps.len() == 1 { ps[0] } else { ps[k] };
        match self {
            Placement::Random => None,
            Placement::Image(ps) => Some(StampPosition::Image(pick(ps))),
            Placement::World(ps) => Some(StampPosition::World(pick(ps))),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ScatteredImage {
    nobjects: usize,
    xsize: i32,
    ysize: i32,
    placement: Placement,
}

impl ScatteredImage {
    pub fn setup(image: &ConfigTable, ctx: &SetupContext<'_>) -> Result<Self> {
        let nobjects = object_count(image, ctx.inputs)?;
        debug!("Scattered image: nobjects = {nobjects}");

        let (xsize, ysize) = match read_size(image)? {
            (Some(_), Some(_), _) => {
                return Err(Error::config("xsize", "xsize is invalid if size is set"))
            }
            (Some(_), _, Some(_)) => {
                return Err(Error::config("ysize", "ysize is invalid if size is set"))
            }
            (Some(size), None, None) => (size, size),
            (None, Some(x), Some(y)) => (x, y),
            _ => {
                return Err(Error::config(
                    "size",
                    "either size or both xsize and ysize are required for image.type = Scattered",
                ))
            }
        };
        if xsize <= 0 || ysize <= 0 {
            return Err(Error::config(
                "size",
                format!("image size must be > 0 (got {xsize} x {ysize})"),
            ));
        }
        ctx.forced.check(xsize, ysize)?;

        let placement = match (
            read_positions(image, "image_pos")?,
            read_positions(image, "world_pos")?,
        ) {
            (Some(_), Some(_)) => {
                return Err(Error::config(
                    "image_pos",
                    "both image_pos and world_pos specified for Scattered image",
                ))
            }
            (Some(ps), None) => Placement::Image(check_count(ps, nobjects, "image_pos")?),
            (None, Some(ws)) => Placement::World(check_count(ws, nobjects, "world_pos")?),
            (None, None) => Placement::Random,
        };

        Ok(Self {
            nobjects,
            xsize,
            ysize,
            placement,
        })
    }

    pub fn size(&self) -> (i32, i32) {
        (self.xsize, self.ysize)
    }

    pub fn object_count(&self) -> usize {
        self.nobjects
    }

    pub fn build(&self, ctx: &mut BuildContext<'_>) -> Result<ImageBuild> {
        let b = ctx.geometry.bounds;
        let positions: Vec<StampPosition> = match &self.placement {
            Placement::Random => (0..self.nobjects)
                .map(|_| {
                    let x = ctx.rng.uniform_int(b.xmin, b.xmax);
                    let y = ctx.rng.uniform_int(b.ymin, b.ymax);
                    StampPosition::Image(DVec2::new(x as f64, y as f64))
                })
                .collect(),
            explicit => (0..self.nobjects)
                .filter_map(|k| explicit.position(k))
                .collect(),
        };

        let requests: Vec<_> = positions
            .iter()
            .enumerate()
            .map(|(k, p)| ctx.request(k, 0, 0, Some(*p), false))
            .collect();
        let stamps = ctx.build_stamps(&requests)?;

        let mut canvas = ctx.blank_canvas();
        for stamp in stamps.iter().filter(|s| !s.is_skipped()) {
            let overlap = canvas.add_overlap(&stamp.canvas);
            if !overlap.is_defined() {
                let center = stamp.canvas.bounds().center();
                warn!(
                    "Object centered at ({},{}) is entirely off the main image, \
                     whose bounds are {}.",
                    center.x,
                    center.y,
                    canvas.bounds()
                );
            }
        }

        let mut current_variance = 0.0;
        if ctx.noise.has_noise() {
            let variances: Vec<f64> = stamps.iter().map(|s| s.current_variance).collect();
            let bounds: Vec<_> = stamps.iter().map(|s| s.canvas.bounds()).collect();
            current_variance = reconcile(&mut canvas, &variances, &bounds, &mut ctx.rng);
        }
        Ok(ImageBuild {
            canvas,
            current_variance,
            stamp_positions: positions,
        })
    }
}

fn check_count(positions: Vec<DVec2>, nobjects: usize, key: &str) -> Result<Vec<DVec2>> {
    if positions.len() == 1 || positions.len() == nobjects {
        Ok(positions)
    } else {
        Err(Error::config(
            key,
            format!(
                "{} positions given for {nobjects} objects",
                positions.len()
            ),
        ))
    }
}

pub(crate) fn object_count(
    image: &ConfigTable,
    inputs: Option<&dyn InputCatalog>,
) -> Result<usize> {
    if let Some(n) = image.get_int("nobjects")? {
        return usize::try_from(n)
            .map_err(|_| Error::config("nobjects", format!("must be >= 0 (got {n})")));
    }
    inputs.and_then(|catalog| catalog.nobjects()).ok_or_else(|| {
        Error::config(
            "nobjects",
            "nobjects is required for image.type = Scattered",
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::FixedCatalog;
    use crate::image::ForcedSize;

    #[test]
    fn size_and_xsize_conflict() {
        let image = ConfigTable::new()
            .with("nobjects", 3)
            .with("size", 20)
            .with("xsize", 20);
        let err = ScatteredImage::setup(&image, &SetupContext::default()).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig { ref key, .. } if key == "xsize"));
    }

    #[test]
    fn missing_nobjects_and_catalog_fails() {
        let image = ConfigTable::new().with("size", 20);
        let err = ScatteredImage::setup(&image, &SetupContext::default()).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig { ref key, .. } if key == "nobjects"));
    }

    #[test]
    fn catalog_supplies_nobjects() {
        let catalog = FixedCatalog::new(5);
        let ctx = SetupContext {
            forced: ForcedSize::default(),
            inputs: Some(&catalog),
        };
        let s = ScatteredImage::setup(&ConfigTable::new().with("size", 20), &ctx).unwrap();
        assert_eq!(s.object_count(), 5);
        assert_eq!(s.size(), (20, 20));
    }

    #[test]
    fn size_is_required() {
        let image = ConfigTable::new().with("nobjects", 3).with("xsize", 20);
        assert!(ScatteredImage::setup(&image, &SetupContext::default()).is_err());
    }

    #[test]
    fn forced_size_must_match() {
        let image = ConfigTable::new()
            .with("nobjects", 3)
            .with("xsize", 20)
            .with("ysize", 10);
        let ctx = SetupContext {
            forced: ForcedSize::new(20, 12),
            inputs: None,
        };
        assert!(ScatteredImage::setup(&image, &ctx).unwrap_err().is_config());
    }

    #[test]
    fn explicit_positions_are_validated() {
        let both = ConfigTable::new()
            .with("nobjects", 2)
            .with("size", 20)
            .with("image_pos", vec![1.0, 1.0])
            .with("world_pos", vec![1.0, 1.0]);
        assert!(ScatteredImage::setup(&both, &SetupContext::default()).is_err());

        let wrong_len = ConfigTable::new()
            .with("nobjects", 2)
            .with("size", 20)
            .with(
                "image_pos",
                crate::config::ConfigValue::List(vec![
                    vec![1.0, 1.0].into(),
                    vec![2.0, 2.0].into(),
                    vec![3.0, 3.0].into(),
                ]),
            );
        assert!(ScatteredImage::setup(&wrong_len, &SetupContext::default()).is_err());
    }
}
