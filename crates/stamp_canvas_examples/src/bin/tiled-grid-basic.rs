use stamp_canvas::prelude::*;
use stamp_canvas_examples::{
    init_tracing, load_config, save_canvas_png, GaussianBlobStamps, PreviewConfig,
};

fn main() -> anyhow::Result<()> {
    init_tracing();
    let config = load_config(concat!(env!("CARGO_MANIFEST_DIR"), "/configs/tiled-grid.ron"))?;

    // Non-negative borders, so every tile carries its own noise.
    let orchestrator = ImageOrchestrator::new(config, GaussianBlobStamps::default());
    let canvas = orchestrator.build_image(0, 0)?;
    println!(
        "Built {} tiles into a {} x {} canvas with bounds {}.",
        orchestrator.object_count(0)?,
        canvas.width(),
        canvas.height(),
        canvas.bounds()
    );

    save_canvas_png(&canvas, &PreviewConfig::default(), "tiled-grid-basic.png")?;
    Ok(())
}
