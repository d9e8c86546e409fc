/// Options applied when a ground-truth dataset is loaded.
#[derive(Debug, Clone, PartialEq)]
pub struct LvisConfig {
    /// Attach a `boundary` RLE to every annotation while building the index.
    pub precompute_boundary: bool,
    /// Erosion radius as a fraction of the image diagonal.
    pub dilation_ratio: f64,
    /// Upper bound on boundary workers, regardless of available cores.
    pub max_cpu_num: usize,
}

impl Default for LvisConfig {
    fn default() -> Self {
        LvisConfig {
            precompute_boundary: false,
            dilation_ratio: 0.02,
            max_cpu_num: 80,
        }
    }
}

/// Detection limits applied when results are ingested.
///
/// `None` means unlimited. Defaults follow the standard LVIS protocol: at
/// most 300 detections per image and no per-category limit.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultsConfig {
    pub max_dets_per_cat: Option<usize>,
    pub max_dets_per_im: Option<usize>,
    /// Boundary options for the results; `None` reuses the ground truth's.
    pub boundary: Option<LvisConfig>,
}

impl Default for ResultsConfig {
    fn default() -> Self {
        ResultsConfig {
            max_dets_per_cat: None,
            max_dets_per_im: Some(300),
            boundary: None,
        }
    }
}

impl ResultsConfig {
    /// Limits used by the 2021 LVIS challenge: 10,000 detections per
    /// category and no per-image limit.
    pub fn challenge_2021() -> Self {
        ResultsConfig {
            max_dets_per_cat: Some(10_000),
            max_dets_per_im: None,
            boundary: None,
        }
    }

    /// Build from the signed convention used on the command line, where any
    /// negative value means unlimited.
    pub fn from_signed(max_dets_per_cat: i64, max_dets_per_im: i64) -> Self {
        let limit = |v: i64| usize::try_from(v).ok();
        ResultsConfig {
            max_dets_per_cat: limit(max_dets_per_cat),
            max_dets_per_im: limit(max_dets_per_im),
            boundary: None,
        }
    }

    /// Use `boundary` for the results instead of the ground truth's options.
    pub fn with_boundary(mut self, boundary: LvisConfig) -> Self {
        self.boundary = Some(boundary);
        self
    }
}
