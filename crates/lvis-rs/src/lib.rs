pub mod boundary;
#[cfg(feature = "download")]
pub mod download;
pub mod error;
pub mod index;
pub mod lvis;
pub mod mask;
pub mod params;
pub mod results;
pub mod types;

pub use error::{LvisError, Result};
pub use index::Index;
pub use lvis::Lvis;
pub use params::{LvisConfig, ResultsConfig};
pub use types::{Annotation, Category, Dataset, Image, Rle, Segmentation};
