use std::time::Instant;

use stamp_canvas::prelude::*;
use stamp_canvas_examples::{
    init_tracing, load_config, save_canvas_png, GaussianBlobStamps, PreviewConfig,
};

fn main() -> anyhow::Result<()> {
    init_tracing();
    let config = load_config(concat!(env!("CARGO_MANIFEST_DIR"), "/configs/batch-single.ron"))?;
    let orchestrator = ImageOrchestrator::new(config, GaussianBlobStamps::default());

    let count = 12;
    let t0 = Instant::now();
    let serial = orchestrator.build_images(&BuildRequest::new(count))?;
    let serial_time = t0.elapsed();

    let workers = resolve_worker_count(0);
    let t0 = Instant::now();
    let parallel = orchestrator.build_images(&BuildRequest::new(count).with_workers(workers))?;
    let parallel_time = t0.elapsed();

    // Worker count never changes the pixels.
    let identical = serial
        .iter()
        .zip(&parallel)
        .all(|(a, b)| a.value == b.value);
    anyhow::ensure!(identical, "parallel batch differs from serial batch");
    println!(
        "{count} images: serial {:.3}s, {workers} workers {:.3}s, identical = {identical}",
        serial_time.as_secs_f64(),
        parallel_time.as_secs_f64()
    );

    let levels = PreviewConfig {
        levels: Some((-10.0, 60.0)),
    };
    for (i, built) in parallel.iter().take(3).enumerate() {
        save_canvas_png(&built.value, &levels, format!("batch-parallel-images-{i}.png"))?;
    }
    Ok(())
}
