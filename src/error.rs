use thiserror::Error;

/// Errors raised while building anchor targets or encoding / decoding box deltas.
///
/// An image with no ground truth boxes left after padding is trimmed is *not* an error, every
/// valid anchor simply becomes a negative candidate.
#[derive(Debug, Error)]
pub enum TargetError {
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("degenerate {what} box at row {row}: height {height}, width {width}")]
    DegenerateBox {
        what: &'static str,
        row: usize,
        height: f32,
        width: f32,
    },

    #[error("non-finite value in {what} at row {row}")]
    NonFinite { what: &'static str, row: usize },

    #[error("invalid anchor target config: {0}")]
    InvalidConfig(String),

    #[error("could not read tensor data: {0}")]
    TensorData(String),

    #[error("image {index}: {source}")]
    Image {
        index: usize,
        #[source]
        source: Box<TargetError>,
    },
}

impl TargetError {
    pub fn in_image(self, index: usize) -> Self {
        TargetError::Image {
            index,
            source: Box::new(self),
        }
    }
}
