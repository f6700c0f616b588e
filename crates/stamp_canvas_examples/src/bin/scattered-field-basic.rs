use std::sync::Arc;

use stamp_canvas::prelude::*;
use stamp_canvas_examples::{
    init_tracing, load_config, save_canvas_png, GaussianBlobStamps, PreviewConfig,
};

fn main() -> anyhow::Result<()> {
    init_tracing();
    let config = load_config(concat!(env!("CARGO_MANIFEST_DIR"), "/configs/scattered-field.ron"))?;

    // Each blob reports some whitened noise, which is leveled over the field before
    // the sky and the final noise are added.
    let stamps = GaussianBlobStamps::default().with_whitened_variance(1.0);
    let recording = Arc::new(RecordingOutput::new());
    let orchestrator =
        ImageOrchestrator::new(config, stamps).with_extra_output(recording.clone());

    let canvas = orchestrator.build_image(0, 0)?;
    for event in recording.events() {
        println!("{event:?}");
    }
    println!(
        "Mean pixel value {:.2} over {} x {} pixels.",
        canvas.sum() / (canvas.width() * canvas.height()) as f64,
        canvas.width(),
        canvas.height()
    );

    save_canvas_png(&canvas, &PreviewConfig::default(), "scattered-field-basic.png")?;
    Ok(())
}
