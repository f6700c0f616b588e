//! Integer pixel bounds, index conventions and canvas geometry.
//!
//! [`Bounds`] is an inclusive integer rectangle that may be undefined (empty).
//! Undefined bounds are how a skipped stamp is signalled, so every compositing
//! path checks [`Bounds::is_defined`] first.
use std::fmt;
use std::str::FromStr;

use glam::{DVec2, IVec2};

use crate::config::ConfigTable;
use crate::error::{Error, Result};

/// Inclusive integer pixel rectangle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Bounds {
    pub xmin: i32,
    pub xmax: i32,
    pub ymin: i32,
    pub ymax: i32,
}

impl Bounds {
    /// Bounds with no pixels.
    pub const UNDEFINED: Bounds = Bounds {
        xmin: 0,
        xmax: -1,
        ymin: 0,
        ymax: -1,
    };

    pub fn new(xmin: i32, xmax: i32, ymin: i32, ymax: i32) -> Self {
        Self {
            xmin,
            xmax,
            ymin,
            ymax,
        }
    }

    /// Bounds of a `width x height` rectangle whose lower-left pixel is `origin`.
    pub fn from_origin_size(origin: IVec2, width: i32, height: i32) -> Self {
        if width <= 0 || height <= 0 {
            return Self::UNDEFINED;
        }
        Self::new(
            origin.x,
            origin.x + width - 1,
            origin.y,
            origin.y + height - 1,
        )
    }

    pub fn is_defined(&self) -> bool {
        self.xmin <= self.xmax && self.ymin <= self.ymax
    }

    pub fn width(&self) -> usize {
        if self.is_defined() {
            (self.xmax - self.xmin + 1) as usize
        } else {
            0
        }
    }

    pub fn height(&self) -> usize {
        if self.is_defined() {
            (self.ymax - self.ymin + 1) as usize
        } else {
            0
        }
    }

    pub fn area(&self) -> usize {
        self.width() * self.height()
    }

    pub fn origin(&self) -> IVec2 {
        IVec2::new(self.xmin, self.ymin)
    }

    /// Geometric center, in pixel coordinates.
    pub fn center(&self) -> DVec2 {
        DVec2::new(
            (self.xmin as f64 + self.xmax as f64) * 0.5,
            (self.ymin as f64 + self.ymax as f64) * 0.5,
        )
    }

    pub fn contains(&self, x: i32, y: i32) -> bool {
        self.is_defined() && x >= self.xmin && x <= self.xmax && y >= self.ymin && y <= self.ymax
    }

    /// Whether `other` lies entirely inside `self`. Undefined bounds are inside nothing.
    pub fn includes(&self, other: &Bounds) -> bool {
        self.is_defined()
            && other.is_defined()
            && other.xmin >= self.xmin
            && other.xmax <= self.xmax
            && other.ymin >= self.ymin
            && other.ymax <= self.ymax
    }

    /// Overlap of two rectangles, undefined when they do not intersect.
    pub fn intersection(&self, other: &Bounds) -> Bounds {
        if !self.is_defined() || !other.is_defined() {
            return Self::UNDEFINED;
        }
        let b = Bounds::new(
            self.xmin.max(other.xmin),
            self.xmax.min(other.xmax),
            self.ymin.max(other.ymin),
            self.ymax.min(other.ymax),
        );
        if b.is_defined() {
            b
        } else {
            Self::UNDEFINED
        }
    }

    /// Row-major offset of `(x, y)` within these bounds.
    #[inline]
    pub(crate) fn offset(&self, x: i32, y: i32) -> usize {
        debug_assert!(self.contains(x, y), "pixel ({x},{y}) outside {self}");
        (y - self.ymin) as usize * self.width() + (x - self.xmin) as usize
    }
}

impl Default for Bounds {
    fn default() -> Self {
        Self::UNDEFINED
    }
}

impl fmt::Display for Bounds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_defined() {
            write!(
                f,
                "({},{},{},{})",
                self.xmin, self.xmax, self.ymin, self.ymax
            )
        } else {
            write!(f, "(undefined)")
        }
    }
}

/// First pixel index of an image.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum IndexConvention {
    /// C / numpy style, origin at 0.
    Zero,
    /// FITS / Fortran style, origin at 1.
    #[default]
    One,
}

impl IndexConvention {
    pub fn origin(self) -> i32 {
        match self {
            IndexConvention::Zero => 0,
            IndexConvention::One => 1,
        }
    }

    /// Reads `index_convention` from the image table, defaulting to 1-based.
    pub fn from_config(image: &ConfigTable) -> Result<Self> {
        match image.get_string_lossy("index_convention")? {
            None => Ok(Self::default()),
            Some(s) => s.parse(),
        }
    }
}

impl FromStr for IndexConvention {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "0" | "c" | "python" => Ok(IndexConvention::Zero),
            "1" | "fortran" | "fits" => Ok(IndexConvention::One),
            _ => Err(Error::config(
                "index_convention",
                format!("unknown index_convention: {s}"),
            )),
        }
    }
}

/// World coordinate handle attached to every canvas.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Wcs {
    /// Uniform square pixels of `scale` world units, world origin at the image origin.
    PixelScale { scale: f64, origin: IVec2 },
}

impl Wcs {
    /// Builds the handle from `pixel_scale` (default 1.0).
    pub fn from_config(image: &ConfigTable, origin: IVec2) -> Result<Self> {
        let scale = image.get_float("pixel_scale")?.unwrap_or(1.0);
        if !(scale.is_finite() && scale > 0.0) {
            return Err(Error::config(
                "pixel_scale",
                format!("must be > 0 (got {scale})"),
            ));
        }
        Ok(Wcs::PixelScale { scale, origin })
    }

    pub fn scale(&self) -> f64 {
        match self {
            Wcs::PixelScale { scale, .. } => *scale,
        }
    }

    /// World area of one pixel.
    pub fn pixel_area(&self) -> f64 {
        let s = self.scale();
        s * s
    }

    pub fn to_world(&self, image_pos: DVec2) -> DVec2 {
        match self {
            Wcs::PixelScale { scale, origin } => (image_pos - origin.as_dvec2()) * *scale,
        }
    }

    pub fn to_image(&self, world_pos: DVec2) -> DVec2 {
        match self {
            Wcs::PixelScale { scale, origin } => world_pos / *scale + origin.as_dvec2(),
        }
    }
}

/// Size, origin, center and bounds resolved for one image.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ImageGeometry {
    pub xsize: i32,
    pub ysize: i32,
    pub origin: IVec2,
    pub center: DVec2,
    pub bounds: Bounds,
}

impl ImageGeometry {
    /// Derives geometry from a canvas size. `(0, 0)` means the size is decided later
    /// and yields undefined bounds; an asymmetric zero is an error.
    pub fn new(xsize: i32, ysize: i32, convention: IndexConvention) -> Result<Self> {
        if (xsize == 0) != (ysize == 0) {
            return Err(Error::config(
                "size",
                format!(
                    "both (or neither) of xsize and ysize need to be != 0 (got {xsize} x {ysize})"
                ),
            ));
        }
        if xsize < 0 || ysize < 0 {
            return Err(Error::config(
                "size",
                format!("image size must be >= 0 (got {xsize} x {ysize})"),
            ));
        }
        let o = convention.origin();
        let origin = IVec2::new(o, o);
        Ok(Self {
            xsize,
            ysize,
            origin,
            center: DVec2::new(
                o as f64 + (xsize as f64 - 1.0) / 2.0,
                o as f64 + (ysize as f64 - 1.0) / 2.0,
            ),
            bounds: Bounds::from_origin_size(origin, xsize, ysize),
        })
    }

    pub fn is_sized(&self) -> bool {
        self.xsize > 0 && self.ysize > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intersection_of_disjoint_is_undefined() {
        let a = Bounds::new(1, 5, 1, 5);
        let b = Bounds::new(7, 9, 1, 5);
        assert!(!a.intersection(&b).is_defined());
        assert_eq!(
            a.intersection(&Bounds::new(4, 9, 0, 2)),
            Bounds::new(4, 5, 1, 2)
        );
    }

    #[test]
    fn undefined_bounds_are_never_included() {
        let a = Bounds::new(1, 5, 1, 5);
        assert!(!a.includes(&Bounds::UNDEFINED));
        assert!(a.includes(&Bounds::new(2, 3, 2, 3)));
        assert_eq!(Bounds::UNDEFINED.area(), 0);
    }

    #[test]
    fn index_convention_parses_aliases() {
        assert_eq!(
            "Python".parse::<IndexConvention>().unwrap(),
            IndexConvention::Zero
        );
        assert_eq!(
            "FITS".parse::<IndexConvention>().unwrap(),
            IndexConvention::One
        );
        assert!("2".parse::<IndexConvention>().is_err());
    }

    #[test]
    fn geometry_center_and_bounds() {
        let g = ImageGeometry::new(30, 16, IndexConvention::One).unwrap();
        assert_eq!(g.bounds, Bounds::new(1, 30, 1, 16));
        assert_eq!(g.center, DVec2::new(15.5, 8.5));

        let z = ImageGeometry::new(4, 4, IndexConvention::Zero).unwrap();
        assert_eq!(z.bounds, Bounds::new(0, 3, 0, 3));
    }

    #[test]
    fn asymmetric_zero_size_is_rejected() {
        assert!(ImageGeometry::new(0, 10, IndexConvention::One).is_err());
        let auto = ImageGeometry::new(0, 0, IndexConvention::One).unwrap();
        assert!(!auto.bounds.is_defined());
    }

    #[test]
    fn wcs_round_trips_positions() {
        let wcs = Wcs::PixelScale {
            scale: 0.5,
            origin: IVec2::new(1, 1),
        };
        let p = DVec2::new(11.0, 21.0);
        assert_eq!(wcs.to_world(p), DVec2::new(5.0, 10.0));
        assert_eq!(wcs.to_image(wcs.to_world(p)), p);
    }
}
