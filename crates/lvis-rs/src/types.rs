use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Top-level LVIS annotation file.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Dataset {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<Value>,
    #[serde(default)]
    pub images: Vec<Image>,
    #[serde(default)]
    pub annotations: Vec<Annotation>,
    #[serde(default)]
    pub categories: Vec<Category>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub licenses: Vec<Value>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Image {
    pub id: u64,
    pub height: u32,
    pub width: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coco_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flickr_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_captured: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<u64>,
    /// Categories verified absent from the image.
    #[serde(default)]
    pub neg_category_ids: Vec<u64>,
    /// Categories whose instances are not exhaustively annotated in the image.
    #[serde(default)]
    pub not_exhaustive_category_ids: Vec<u64>,
    /// Any other fields, carried through untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Category {
    pub id: u64,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synset: Option<String>,
    #[serde(default)]
    pub synonyms: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub def: Option<String>,
    /// Frequency bucket: `r` (rare), `c` (common) or `f` (frequent).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_count: Option<u64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Annotation {
    #[serde(default)]
    pub id: u64,
    pub image_id: u64,
    pub category_id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segmentation: Option<Segmentation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub area: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bbox: Option<[f64; 4]>,
    /// Compressed RLE of the mask boundary, set by boundary precomputation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boundary: Option<Segmentation>,
    /// Detection score (present only in result annotations).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Segmentation {
    /// One object, possibly in several parts; each part is `[x0, y0, x1, y1, ...]`.
    Polygon(Vec<Vec<f64>>),
    CompressedRle { size: [u32; 2], counts: String },
    UncompressedRle { size: [u32; 2], counts: Vec<u32> },
}

impl Segmentation {
    pub fn kind(&self) -> &'static str {
        match self {
            Segmentation::Polygon(_) => "polygon",
            Segmentation::CompressedRle { .. } => "compressed RLE",
            Segmentation::UncompressedRle { .. } => "uncompressed RLE",
        }
    }
}

/// Run-length encoding for masks.
#[derive(Debug, Clone, PartialEq)]
pub struct Rle {
    pub h: u32,
    pub w: u32,
    /// Run counts: alternating runs of 0s and 1s, starting with 0s.
    pub counts: Vec<u32>,
}
