//! One stamp filling the whole canvas.
use tracing::debug;

use super::{read_positions, read_size, BuildContext, ImageBuild, SetupContext};
use crate::config::ConfigTable;
use crate::error::{Error, Result};
use crate::stamp::StampPosition;

#[derive(Clone, Debug, PartialEq)]
pub struct SingleImage {
    xsize: i32,
    ysize: i32,
    position: Option<StampPosition>,
}

impl SingleImage {
    pub fn setup(image: &ConfigTable, ctx: &SetupContext<'_>) -> Result<Self> {
        let (xsize, ysize) = match ctx.forced.both() {
            Some(forced) => forced,
            None => {
                let (size, xsize, ysize) = read_size(image)?;
                let size = size.unwrap_or(0);
                (xsize.unwrap_or(size), ysize.unwrap_or(size))
            }
        };
        if (xsize == 0) != (ysize == 0) {
            return Err(Error::config(
                "size",
                "both (or neither) of xsize and ysize need to be defined and != 0",
            ));
        }

        let image_pos = read_positions(image, "image_pos")?;
        let world_pos = read_positions(image, "world_pos")?;
        let position = match (image_pos, world_pos) {
            (Some(_), Some(_)) => {
                return Err(Error::config(
                    "image_pos",
                    "both image_pos and world_pos specified",
                ))
            }
            (Some(p), None) => single_position(&p, "image_pos")?.map(StampPosition::Image),
            (None, Some(w)) => single_position(&w, "world_pos")?.map(StampPosition::World),
            (None, None) => None,
        };
        debug!("Single image: size = {xsize} x {ysize}");
        Ok(Self {
            xsize,
            ysize,
            position,
        })
    }

    pub fn size(&self) -> (i32, i32) {
        (self.xsize, self.ysize)
    }

    /// Builds object 0 of the image with noise applied in the stamp.
    pub fn build(&self, ctx: &mut BuildContext<'_>) -> Result<ImageBuild> {
        let request = ctx.request(0, self.xsize, self.ysize, self.position, true);
        let mut rng = ctx.seeds.for_object(request.object_index);
        let stamp = ctx.stamps.build(&request, &mut rng)?;
        let mut canvas = stamp.canvas;
        if canvas.is_defined() {
            canvas.set_wcs(ctx.wcs);
        }
        Ok(ImageBuild {
            canvas,
            current_variance: stamp.current_variance,
            stamp_positions: self.position.into_iter().collect(),
        })
    }
}

fn single_position(positions: &[glam::DVec2], key: &str) -> Result<Option<glam::DVec2>> {
    match positions {
        [p] => Ok(Some(*p)),
        _ => Err(Error::config(key, "a single image takes one [x, y] position")),
    }
}
