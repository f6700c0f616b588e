#![forbid(unsafe_code)]

mod rendering;

pub use rendering::{
    init_tracing, load_config, save_canvas_png, GaussianBlobStamps, PreviewConfig,
};
