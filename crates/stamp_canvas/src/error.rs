//! Error types and result alias for the crate.
//!
//! This module defines [`enum@crate::error::Error`] and the crate-wide [Result] alias.
//! Variants cover invalid configuration, geometry invariant violations, stamp and
//! worker failures, and generic errors.
use thiserror::Error;

use crate::geometry::Bounds;

pub type Result<T> = std::result::Result<T, Error>;

#[non_exhaustive]
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid configuration for '{key}': {message}")]
    InvalidConfig { key: String, message: String },

    #[error("invalid image.type={0}")]
    UnknownImageType(String),

    #[error("stamp {index} bounds {stamp} are not contained in canvas bounds {canvas}")]
    GeometryViolation {
        index: usize,
        stamp: Bounds,
        canvas: Bounds,
    },

    #[error("stamp build failed for object {object_index}: {message}")]
    Stamp { object_index: usize, message: String },

    #[error("worker {worker} failed on chunk starting at unit {start}: {source}")]
    Worker {
        worker: usize,
        start: usize,
        #[source]
        source: Box<Error>,
    },

    #[error("image {image_index}: {source}")]
    Image {
        image_index: usize,
        #[source]
        source: Box<Error>,
    },

    #[error("worker pool disconnected before all chunks reported")]
    Disconnected,

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Shorthand for [`Error::InvalidConfig`].
    pub fn config(key: impl Into<String>, message: impl Into<String>) -> Self {
        Error::InvalidConfig {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Attaches an image index, leaving errors that already carry one untouched.
    pub fn in_image(self, image_index: usize) -> Self {
        match self {
            err @ Error::Image { .. } => err,
            other => Error::Image {
                image_index,
                source: Box::new(other),
            },
        }
    }

    /// Returns the innermost error, skipping image and worker context wrappers.
    pub fn root(&self) -> &Error {
        match self {
            Error::Image { source, .. } | Error::Worker { source, .. } => source.root(),
            other => other,
        }
    }

    /// Whether the root cause is a configuration problem.
    pub fn is_config(&self) -> bool {
        matches!(
            self.root(),
            Error::InvalidConfig { .. } | Error::UnknownImageType(_)
        )
    }
}

impl From<String> for Error {
    fn from(value: String) -> Self {
        Error::Other(value)
    }
}

impl From<&str> for Error {
    fn from(value: &str) -> Self {
        Error::Other(value.to_owned())
    }
}
