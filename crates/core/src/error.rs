/// A queue message body could not be turned into a [`Job`](crate::job::Job).
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("Message body is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Unexpected message shape: {0}")]
    Shape(String),

    #[error("Missing required field '{0}'")]
    MissingField(&'static str),

    #[error("Field '{field}' has invalid value '{value}'")]
    InvalidValue { field: &'static str, value: String },

    #[error("Job has no applicationId/interactionToken to report back to")]
    Unaddressable,
}

/// The generated images could not be arranged into a result grid.
#[derive(Debug, thiserror::Error)]
pub enum CompositionError {
    #[error("Expected {expected} images, got {actual}")]
    WrongCount { expected: usize, actual: usize },

    #[error("Image {index} is {actual_w}x{actual_h}, expected {expected_w}x{expected_h}")]
    DimensionMismatch {
        index: usize,
        expected_w: u32,
        expected_h: u32,
        actual_w: u32,
        actual_h: u32,
    },

    #[error("Images have zero width or height")]
    EmptyImage,

    #[error("Failed to encode composed image: {0}")]
    Encode(#[from] image::ImageError),
}
