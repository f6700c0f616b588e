//! Pixel storage for stamps and full images.
//!
//! A [`Canvas`] owns its pixels and is only ever mutated in place; compositing adds
//! a source canvas over an explicit region instead of replacing buffers.
use crate::geometry::{Bounds, Wcs};
use crate::random::Generator;

/// A 2D pixel buffer addressed by integer bounds.
#[derive(Clone, Debug, PartialEq)]
pub struct Canvas {
    bounds: Bounds,
    wcs: Option<Wcs>,
    data: Vec<f32>,
}

impl Canvas {
    /// Create a zero-filled canvas covering `bounds`.
    pub fn new(bounds: Bounds) -> Self {
        Self {
            bounds,
            wcs: None,
            data: vec![0.0; bounds.area()],
        }
    }

    /// A canvas with no pixels, the marker for a skipped object.
    pub fn undefined() -> Self {
        Self::new(Bounds::UNDEFINED)
    }

    /// Wrap existing row-major pixels. Returns `None` if the length does not match.
    pub fn from_pixels(bounds: Bounds, data: Vec<f32>) -> Option<Self> {
        (data.len() == bounds.area()).then_some(Self {
            bounds,
            wcs: None,
            data,
        })
    }

    pub fn with_wcs(mut self, wcs: Wcs) -> Self {
        self.wcs = Some(wcs);
        self
    }

    pub fn set_wcs(&mut self, wcs: Wcs) {
        self.wcs = Some(wcs);
    }

    pub fn bounds(&self) -> Bounds {
        self.bounds
    }

    pub fn wcs(&self) -> Option<&Wcs> {
        self.wcs.as_ref()
    }

    pub fn is_defined(&self) -> bool {
        self.bounds.is_defined()
    }

    pub fn width(&self) -> usize {
        self.bounds.width()
    }

    pub fn height(&self) -> usize {
        self.bounds.height()
    }

    pub fn pixels(&self) -> &[f32] {
        &self.data
    }

    pub fn pixels_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    /// Value at `(x, y)`, `None` outside the bounds.
    pub fn get(&self, x: i32, y: i32) -> Option<f32> {
        self.bounds
            .contains(x, y)
            .then(|| self.data[self.bounds.offset(x, y)])
    }

    pub fn set(&mut self, x: i32, y: i32, value: f32) -> bool {
        if !self.bounds.contains(x, y) {
            return false;
        }
        let i = self.bounds.offset(x, y);
        self.data[i] = value;
        true
    }

    /// Add `source` pixel-by-pixel over `region`. Returns the number of pixels
    /// touched: 0, with nothing written, unless `region` lies inside both canvases.
    /// Callers that treat a misplaced region as fatal check containment first.
    pub fn add_region(&mut self, source: &Canvas, region: Bounds) -> usize {
        if !self.bounds.includes(&region) || !source.bounds.includes(&region) {
            return 0;
        }
        for y in region.ymin..=region.ymax {
            let dst = self.bounds.offset(region.xmin, y);
            let src = source.bounds.offset(region.xmin, y);
            let w = region.width();
            for (d, s) in self.data[dst..dst + w]
                .iter_mut()
                .zip(&source.data[src..src + w])
            {
                *d += *s;
            }
        }
        region.area()
    }

    /// Add the overlap of `source` with this canvas. Returns the overlap bounds.
    pub fn add_overlap(&mut self, source: &Canvas) -> Bounds {
        let region = self.bounds.intersection(&source.bounds);
        if region.is_defined() {
            self.add_region(source, region);
        }
        region
    }

    pub fn fill(&mut self, value: f32) {
        self.data.fill(value);
    }

    pub fn add_constant(&mut self, value: f64) {
        let v = value as f32;
        self.data.iter_mut().for_each(|p| *p += v);
    }

    /// Add independent Gaussian noise with one variance for every pixel.
    pub fn add_gaussian_noise(&mut self, variance: f64, rng: &mut Generator) {
        if variance <= 0.0 {
            return;
        }
        let sigma = variance.sqrt();
        for p in self.data.iter_mut() {
            *p += rng.gaussian(sigma) as f32;
        }
    }

    /// Add independent Gaussian noise whose variance varies per pixel. `variances`
    /// is row-major over the canvas bounds; non-positive entries add nothing and
    /// consume no draws.
    pub fn add_variable_gaussian_noise(&mut self, variances: &[f64], rng: &mut Generator) {
        debug_assert_eq!(variances.len(), self.data.len());
        for (p, v) in self.data.iter_mut().zip(variances) {
            if *v > 0.0 {
                *p += rng.gaussian(v.sqrt()) as f32;
            }
        }
    }

    pub fn sum(&self) -> f64 {
        self.data.iter().map(|p| *p as f64).sum()
    }
}
