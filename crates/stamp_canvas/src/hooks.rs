//! Lifecycle hooks fired around each image build.
//!
//! This module defines the [`ImageState`] snapshot handed to hooks, the
//! [`InputCatalog`] and [`ExtraOutput`] collaborator traits, and a few ready-made
//! implementations: `()` as a no-op, [`FnOutput`] forwarding to a closure, and
//! [`RecordingOutput`] collecting every call.
//!
//! Hooks take `&self` and must be `Send + Sync` because image-level workers share
//! them. Implementations that record state use interior mutability.
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::canvas::Canvas;
use crate::geometry::{Bounds, ImageGeometry, Wcs};

/// What is known about the image currently being built.
#[derive(Clone, Debug, PartialEq)]
pub struct ImageState {
    pub image_index: usize,
    /// Index of the first object drawn in this image.
    pub object_index: usize,
    pub geometry: ImageGeometry,
    pub wcs: Wcs,
    /// Flat noise variance recorded by the build (0 when no reconciliation ran).
    pub current_variance: f64,
}

/// Source of per-object input rows (e.g. a catalog).
pub trait InputCatalog: Send + Sync {
    /// Number of objects the catalog provides, if it knows.
    fn nobjects(&self) -> Option<usize>;

    /// Called when an image starts, before any stamp is built.
    fn setup_for_image(&self, _image_index: usize) {}
}

/// Catalog of a fixed number of rows that counts how often it was rewound.
#[derive(Debug, Default)]
pub struct FixedCatalog {
    rows: usize,
    rewinds: AtomicUsize,
}

impl FixedCatalog {
    pub fn new(rows: usize) -> Self {
        Self {
            rows,
            rewinds: AtomicUsize::new(0),
        }
    }

    pub fn rewinds(&self) -> usize {
        self.rewinds.load(Ordering::SeqCst)
    }
}

impl InputCatalog for FixedCatalog {
    fn nobjects(&self) -> Option<usize> {
        Some(self.rows)
    }

    fn setup_for_image(&self, _image_index: usize) {
        self.rewinds.fetch_add(1, Ordering::SeqCst);
    }
}

/// Extra per-image products computed alongside the main canvas.
pub trait ExtraOutput: Send + Sync {
    fn setup_for_image(&self, _state: &ImageState) {}

    fn process_for_image(&self, _state: &ImageState, _canvas: &Canvas) {}
}

/// A no-op extra output.
impl ExtraOutput for () {}

/// Hook call observed by [`FnOutput`] and [`RecordingOutput`].
#[derive(Clone, Debug, PartialEq)]
pub enum OutputEvent {
    Setup {
        image_index: usize,
        object_index: usize,
    },
    Processed {
        image_index: usize,
        bounds: Bounds,
        current_variance: f64,
    },
}

impl OutputEvent {
    pub fn image_index(&self) -> usize {
        match self {
            OutputEvent::Setup { image_index, .. } | OutputEvent::Processed { image_index, .. } => {
                *image_index
            }
        }
    }

    fn setup(state: &ImageState) -> Self {
        OutputEvent::Setup {
            image_index: state.image_index,
            object_index: state.object_index,
        }
    }

    fn processed(state: &ImageState, canvas: &Canvas) -> Self {
        OutputEvent::Processed {
            image_index: state.image_index,
            bounds: canvas.bounds(),
            current_variance: state.current_variance,
        }
    }
}

/// An extra output that forwards every hook call to a closure.
pub struct FnOutput<F>
where
    F: Fn(OutputEvent) + Send + Sync,
{
    f: F,
}

impl<F> FnOutput<F>
where
    F: Fn(OutputEvent) + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> ExtraOutput for FnOutput<F>
where
    F: Fn(OutputEvent) + Send + Sync,
{
    fn setup_for_image(&self, state: &ImageState) {
        (self.f)(OutputEvent::setup(state));
    }

    fn process_for_image(&self, state: &ImageState, canvas: &Canvas) {
        (self.f)(OutputEvent::processed(state, canvas));
    }
}

/// An extra output that records every hook call.
#[derive(Debug, Default)]
pub struct RecordingOutput {
    events: Mutex<Vec<OutputEvent>>,
}

impl RecordingOutput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Recorded events, in call order. Calls from different workers interleave.
    pub fn events(&self) -> Vec<OutputEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Recorded events for one image.
    pub fn events_for(&self, image_index: usize) -> Vec<OutputEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.image_index() == image_index)
            .collect()
    }

    fn push(&self, event: OutputEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

impl ExtraOutput for RecordingOutput {
    fn setup_for_image(&self, state: &ImageState) {
        self.push(OutputEvent::setup(state));
    }

    fn process_for_image(&self, state: &ImageState, canvas: &Canvas) {
        self.push(OutputEvent::processed(state, canvas));
    }
}
