//! Regular grid of equally sized stamps separated by borders.
//!
//! Tile `(ix, iy)` is centered at `origin + (stamp - 1) / 2 + i * (stamp + border)`
//! on each axis. With non-negative borders the stamps add their own noise. A
//! negative border makes tiles overlap, so noise is deferred and reconciled over
//! the whole canvas.
use std::str::FromStr;

use glam::DVec2;
use tracing::debug;

use super::{BuildContext, ImageBuild, SetupContext};
use crate::config::ConfigTable;
use crate::error::{Error, Result};
use crate::noise::reconcile;
use crate::random::Generator;
use crate::stamp::StampPosition;

/// Order in which tiles are assigned to consecutive objects.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum TileOrder {
    /// x varies fastest.
    #[default]
    Row,
    /// y varies fastest.
    Column,
    /// Random permutation of the column order.
    Random,
}

impl TileOrder {
    /// `(ix, iy)` for every tile in placement order.
    pub fn tiles(self, nx: usize, ny: usize, rng: &mut Generator) -> Vec<(usize, usize)> {
        match self {
            TileOrder::Row => (0..ny)
                .flat_map(|iy| (0..nx).map(move |ix| (ix, iy)))
                .collect(),
            TileOrder::Column => column_major(nx, ny),
            TileOrder::Random => {
                let mut tiles = column_major(nx, ny);
                rng.permute(&mut tiles);
                tiles
            }
        }
    }
}

fn column_major(nx: usize, ny: usize) -> Vec<(usize, usize)> {
    (0..nx)
        .flat_map(|ix| (0..ny).map(move |iy| (ix, iy)))
        .collect()
}

impl FromStr for TileOrder {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let lower = s.to_ascii_lowercase();
        if lower.starts_with("row") {
            Ok(TileOrder::Row)
        } else if lower.starts_with("col") {
            Ok(TileOrder::Column)
        } else if lower.starts_with("rand") {
            Ok(TileOrder::Random)
        } else {
            Err(Error::config(
                "order",
                format!("invalid order {s}; must be row, column, or random"),
            ))
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct TiledImage {
    nx_tiles: usize,
    ny_tiles: usize,
    stamp_xsize: i32,
    stamp_ysize: i32,
    xborder: i32,
    yborder: i32,
    order: TileOrder,
    xsize: i32,
    ysize: i32,
}

impl TiledImage {
    pub fn setup(image: &ConfigTable, ctx: &SetupContext<'_>) -> Result<Self> {
        let (nx_tiles, ny_tiles) = read_tiles(image)?;

        let stamp_size = image.get_i32("stamp_size")?.unwrap_or(0);
        let stamp_xsize = image.get_i32("stamp_xsize")?.unwrap_or(stamp_size);
        let stamp_ysize = image.get_i32("stamp_ysize")?.unwrap_or(stamp_size);
        if stamp_xsize <= 0 || stamp_ysize <= 0 {
            return Err(Error::config(
                "stamp_size",
                "both stamp_xsize and stamp_ysize need to be defined and > 0",
            ));
        }

        let border = image.get_i32("border")?.unwrap_or(0);
        let xborder = image.get_i32("xborder")?.unwrap_or(border);
        let yborder = image.get_i32("yborder")?.unwrap_or(border);

        let order = match image.get_str("order")? {
            Some(s) => s.parse()?,
            None => TileOrder::default(),
        };

        let xsize = full_size(nx_tiles, stamp_xsize, xborder, "nx_tiles")?;
        let ysize = full_size(ny_tiles, stamp_ysize, yborder, "ny_tiles")?;
        if xsize <= 0 || ysize <= 0 {
            return Err(Error::config(
                "border",
                format!("borders leave no canvas ({xsize} x {ysize})"),
            ));
        }
        ctx.forced.check(xsize, ysize)?;
        debug!(
            "Tiled image: {nx_tiles} x {ny_tiles} tiles of {stamp_xsize} x {stamp_ysize}, \
             border = ({xborder}, {yborder}), size = {xsize} x {ysize}"
        );
        Ok(Self {
            nx_tiles,
            ny_tiles,
            stamp_xsize,
            stamp_ysize,
            xborder,
            yborder,
            order,
            xsize,
            ysize,
        })
    }

    pub fn size(&self) -> (i32, i32) {
        (self.xsize, self.ysize)
    }

    pub fn object_count(&self) -> usize {
        self.nx_tiles * self.ny_tiles
    }

    /// Stamps carry their own noise only when neither border is negative. With
    /// mixed signs the deferred noise covers the whole canvas, so the gaps along
    /// the positive-border axis get noise instead of staying zero.
    pub fn noise_in_stamps(&self) -> bool {
        self.xborder >= 0 && self.yborder >= 0
    }

    pub fn build(&self, ctx: &mut BuildContext<'_>) -> Result<ImageBuild> {
        let origin = ctx.geometry.origin.as_dvec2();
        let x0 = origin.x + (self.stamp_xsize as f64 - 1.0) / 2.0;
        let y0 = origin.y + (self.stamp_ysize as f64 - 1.0) / 2.0;
        let dx = (self.stamp_xsize + self.xborder) as f64;
        let dy = (self.stamp_ysize + self.yborder) as f64;

        let positions: Vec<StampPosition> = self
            .order
            .tiles(self.nx_tiles, self.ny_tiles, &mut ctx.rng)
            .into_iter()
            .map(|(ix, iy)| {
                StampPosition::Image(DVec2::new(x0 + ix as f64 * dx, y0 + iy as f64 * dy))
            })
            .collect();

        let do_noise = self.noise_in_stamps();
        let requests: Vec<_> = positions
            .iter()
            .enumerate()
            .map(|(k, p)| ctx.request(k, self.stamp_xsize, self.stamp_ysize, Some(*p), do_noise))
            .collect();
        let stamps = ctx.build_stamps(&requests)?;

        let mut canvas = ctx.blank_canvas();
        let canvas_bounds = canvas.bounds();
        for (k, stamp) in stamps.iter().enumerate() {
            if stamp.is_skipped() {
                continue;
            }
            let b = stamp.canvas.bounds();
            if !canvas_bounds.includes(&b) {
                return Err(Error::GeometryViolation {
                    index: ctx.object_index + k,
                    stamp: b,
                    canvas: canvas_bounds,
                });
            }
            canvas.add_region(&stamp.canvas, b);
        }

        let mut current_variance = 0.0;
        if !do_noise && ctx.noise.has_noise() {
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

/// `(stamp + border) * tiles - border` along one axis.
fn full_size(tiles: usize, stamp: i32, border: i32, key: &str) -> Result<i32> {
    i32::try_from(tiles)
        .ok()
        .and_then(|n| stamp.checked_add(border)?.checked_mul(n))
        .and_then(|size| size.checked_sub(border))
        .ok_or_else(|| {
            Error::config(
                key,
                format!(
                    "{tiles} tiles of {stamp} pixels with border {border} overflow the canvas size"
                ),
            )
        })
}

fn read_tiles(image: &ConfigTable) -> Result<(usize, usize)> {
    match (image.get_positive("nx_tiles")?, image.get_positive("ny_tiles")?) {
        (Some(nx), Some(ny)) => Ok((nx, ny)),
        _ => Err(Error::config(
            "nx_tiles",
            "nx_tiles and ny_tiles are required for image.type = Tiled",
        )),
    }
}

pub(crate) fn object_count(image: &ConfigTable) -> Result<usize> {
    let (nx, ny) = read_tiles(image)?;
    Ok(nx * ny)
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::image::ForcedSize;

    fn grid(nx: i64, ny: i64) -> ConfigTable {
        ConfigTable::new()
            .with("nx_tiles", nx)
            .with("ny_tiles", ny)
            .with("stamp_xsize", 10)
            .with("stamp_ysize", 8)
    }

    #[test]
    fn size_without_borders() {
        let t = TiledImage::setup(&grid(3, 2).with("border", 0), &SetupContext::default()).unwrap();
        assert_eq!(t.size(), (30, 16));
        assert!(t.noise_in_stamps());
    }

    #[test]
    fn size_with_borders() {
        let image = grid(3, 2).with("xborder", 2).with("yborder", 1);
        let t = TiledImage::setup(&image, &SetupContext::default()).unwrap();
        assert_eq!(t.size(), (34, 17));
        assert_eq!(t.object_count(), 6);
    }

    #[test]
    fn forced_size_mismatch_fails_in_setup() {
        let ctx = SetupContext {
            forced: ForcedSize::new(25, 16),
            inputs: None,
        };
        let err = TiledImage::setup(&grid(2, 2), &ctx).unwrap_err();
        assert!(err.is_config());

        let ctx = SetupContext {
            forced: ForcedSize::new(20, 16),
            inputs: None,
        };
        assert!(TiledImage::setup(&grid(2, 2), &ctx).is_ok());
    }

    #[test]
    fn zero_stamp_size_is_rejected() {
        let image = ConfigTable::new()
            .with("nx_tiles", 2)
            .with("ny_tiles", 2)
            .with("stamp_xsize", 10);
        assert!(TiledImage::setup(&image, &SetupContext::default()).is_err());
    }

    #[test]
    fn negative_border_defers_noise() {
        let image = grid(2, 2).with("xborder", -2).with("yborder", 1);
        let t = TiledImage::setup(&image, &SetupContext::default()).unwrap();
        assert!(!t.noise_in_stamps());
        assert_eq!(t.size(), (18, 17));
    }

    #[test]
    fn oversized_grid_is_a_config_error() {
        let image = grid(70_000, 2).with("stamp_xsize", 40_000);
        let err = TiledImage::setup(&image, &SetupContext::default()).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig { ref key, .. } if key == "nx_tiles"));

        let image = grid(2, 3_000_000_000);
        let err = TiledImage::setup(&image, &SetupContext::default()).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig { ref key, .. } if key == "ny_tiles"));
    }

    #[test]
    fn orders_parse_by_prefix() {
        assert_eq!("Rows".parse::<TileOrder>().unwrap(), TileOrder::Row);
        assert_eq!("column".parse::<TileOrder>().unwrap(), TileOrder::Column);
        assert_eq!("RANDOM".parse::<TileOrder>().unwrap(), TileOrder::Random);
        assert!("spiral".parse::<TileOrder>().is_err());
    }

    #[test]
    fn every_order_visits_each_tile_once() {
        let (nx, ny) = (4, 3);
        let mut rng = Generator::new(17);
        for order in [TileOrder::Row, TileOrder::Column, TileOrder::Random] {
            let tiles = order.tiles(nx, ny, &mut rng);
            assert_eq!(tiles.len(), nx * ny);
            let unique: HashSet<_> = tiles.iter().copied().collect();
            assert_eq!(unique.len(), nx * ny);
            assert!(tiles.iter().all(|&(ix, iy)| ix < nx && iy < ny));
        }
        let row = TileOrder::Row.tiles(nx, ny, &mut rng);
        assert_eq!(&row[..2], &[(0, 0), (1, 0)]);
        let col = TileOrder::Column.tiles(nx, ny, &mut rng);
        assert_eq!(&col[..2], &[(0, 0), (0, 1)]);
    }
}
