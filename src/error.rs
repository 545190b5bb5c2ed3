use thiserror::Error;

/// Failures surfaced by the analysis.
///
/// `MarkerNotFound` is per image and is recovered by dropping that image from
/// aggregation. Everything else aborts the run before any metric is produced.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum WlError {
    #[error("unable to locate the BB in image '{image}'")]
    MarkerNotFound { image: String },

    #[error("the BB was not found in any of the {images} images")]
    MarkerNeverFound { images: usize },

    #[error("at least 2 images are required, found {found}")]
    TooFewImages { found: usize },

    #[error("unrecognized machine scale '{0}' (expected 'iec61217' or 'varian_iec')")]
    InvalidScale(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("could not read the {axis} value from '{name}': {reason}")]
    AxisParse {
        name: String,
        axis: String,
        reason: String,
    },

    #[error("invalid image '{name}': {reason}")]
    InvalidImage { name: String, reason: String },

    #[error("invalid BB arrangement: {0}")]
    InvalidArrangement(String),
}

pub type WlResult<T> = Result<T, WlError>;
