use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while loading, indexing or ingesting LVIS data.
#[derive(Debug, Error)]
pub enum LvisError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse JSON from {}: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Results are empty")]
    EmptyResults,

    #[error("Detection #{index} is malformed: {reason}")]
    MalformedDetection { index: usize, reason: String },

    #[error("Unsupported segmentation on annotation {ann_id}: {reason}")]
    UnsupportedSegmentation { ann_id: u64, reason: String },

    #[error("Annotation {ann_id} references unknown image {image_id}")]
    MissingImage { ann_id: u64, image_id: u64 },

    #[error("Results do not correspond to current LVIS set: unknown image ids {image_ids:?}")]
    ResultsMismatch { image_ids: Vec<u64> },

    #[error("No {kind} with id {id}")]
    NotFound { kind: &'static str, id: u64 },

    #[error("Failed to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("Failed to download {url}: {reason}")]
    Download { url: String, reason: String },
}

pub type Result<T> = std::result::Result<T, LvisError>;
