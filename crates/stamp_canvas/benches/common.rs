use std::time::Duration;

use criterion::{Criterion, Throughput};
use stamp_canvas::prelude::{Canvas, Generator, Result, StampRequest, StampResult};

pub const SAMPLE_SIZE: usize = 20;
pub const WARM_UP: Duration = Duration::from_secs(1);
pub const MEASUREMENT_TIME: Duration = Duration::from_secs(2);

pub fn default_criterion() -> Criterion {
    Criterion::default()
        .configure_from_args()
        .sample_size(SAMPLE_SIZE)
        .warm_up_time(WARM_UP)
        .measurement_time(MEASUREMENT_TIME)
}

pub fn elements_throughput(elements: usize) -> Throughput {
    Throughput::Elements(elements.max(1) as u64)
}

/// Flat stamp with a little per-object noise, sized by the request or `fallback`.
#[allow(dead_code)]
pub fn flat_stamp(
    fallback: i32,
    variance: f64,
) -> impl Fn(&StampRequest, &mut Generator) -> Result<StampResult> + Send + Sync {
    move |req: &StampRequest, rng: &mut Generator| {
        let w = if req.xsize > 0 { req.xsize } else { fallback };
        let h = if req.ysize > 0 { req.ysize } else { fallback };
        let mut canvas = Canvas::new(req.placed_bounds(w, h));
        canvas.fill(1.0);
        canvas.add_gaussian_noise(0.25, rng);
        Ok(StampResult::new(canvas, variance))
    }
}
