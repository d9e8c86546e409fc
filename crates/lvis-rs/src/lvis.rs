//! LVIS dataset loading and querying API.

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::time::Instant;

use serde_json::Value;
use tracing::{info, warn};

use crate::boundary;
use crate::error::{LvisError, Result};
use crate::index::Index;
use crate::mask;
use crate::params::{LvisConfig, ResultsConfig};
use crate::results;
use crate::types::{Annotation, Category, Dataset, Image, Rle};

/// An indexed LVIS dataset: ground truth, or detections ingested against a
/// ground truth via [`Lvis::load_results`].
#[derive(Debug, Clone)]
pub struct Lvis {
    dataset: Dataset,
    index: Index,
    config: LvisConfig,
}

fn read_json(path: &Path) -> Result<Value> {
    let reader = BufReader::new(File::open(path)?);
    serde_json::from_reader(reader).map_err(|source| LvisError::Json {
        path: path.to_path_buf(),
        source,
    })
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "dict",
    }
}

impl Lvis {
    /// Load an LVIS annotation JSON file and build indices.
    pub fn new(annotation_path: &Path, config: LvisConfig) -> Result<Self> {
        info!("Loading annotations.");
        let value = read_json(annotation_path)?;
        if !value.is_object() {
            return Err(LvisError::UnsupportedFormat(format!(
                "annotation file must be a dict, found {}",
                json_kind(&value)
            )));
        }
        let dataset: Dataset = serde_json::from_value(value).map_err(|source| LvisError::Json {
            path: annotation_path.to_path_buf(),
            source,
        })?;
        Self::from_dataset(dataset, config)
    }

    /// Build from an already-loaded dataset.
    pub fn from_dataset(dataset: Dataset, config: LvisConfig) -> Result<Self> {
        let mut lvis = Lvis {
            dataset,
            index: Index::default(),
            config,
        };
        lvis.create_index()?;
        Ok(lvis)
    }

    fn create_index(&mut self) -> Result<()> {
        info!("Creating index.");

        if self.config.precompute_boundary {
            info!("Adding `boundary` to annotation.");
            let tic = Instant::now();
            let imgs: HashMap<u64, &Image> =
                self.dataset.images.iter().map(|img| (img.id, img)).collect();
            let anns = std::mem::take(&mut self.dataset.annotations);
            self.dataset.annotations = boundary::augment_with_boundary(
                anns,
                &imgs,
                self.config.dilation_ratio,
                self.config.max_cpu_num,
            )?;
            info!(
                "`boundary` added! (t={:.2}s)",
                tic.elapsed().as_secs_f64()
            );
        }

        self.index = Index::build(&self.dataset);
        info!("Index created.");
        Ok(())
    }

    /// The loaded records. Read-only, since the index points into them.
    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    /// Options the dataset was indexed with.
    pub fn config(&self) -> &LvisConfig {
        &self.config
    }

    /// Lookup tables over [`Lvis::dataset`].
    pub fn index(&self) -> &Index {
        &self.index
    }

    /// Get annotation ids that satisfy the given filters.
    ///
    /// With `img_ids`, annotations are gathered image by image in the given
    /// order; otherwise all annotations are taken in dataset order. Without
    /// `cat_ids` and `area_rng` the gathered ids are returned as is. The area
    /// range is open on both ends and defaults to `(0, inf)`.
    pub fn get_ann_ids(
        &self,
        img_ids: Option<&[u64]>,
        cat_ids: Option<&[u64]>,
        area_rng: Option<[f64; 2]>,
    ) -> Vec<u64> {
        let anns: Box<dyn Iterator<Item = &Annotation>> = match img_ids {
            Some(ids) => Box::new(
                ids.iter()
                    .flat_map(|&id| self.index.ann_positions_for_img(id))
                    .map(|&i| &self.dataset.annotations[i]),
            ),
            None => Box::new(self.dataset.annotations.iter()),
        };

        if cat_ids.is_none() && area_rng.is_none() {
            return anns.map(|ann| ann.id).collect();
        }

        let cat_ids: Option<HashSet<u64>> = cat_ids.map(|ids| ids.iter().copied().collect());
        let [lo, hi] = area_rng.unwrap_or([0.0, f64::INFINITY]);
        anns.filter(|ann| {
            let in_cat = cat_ids
                .as_ref()
                .is_none_or(|ids| ids.contains(&ann.category_id));
            let area = ann.area.unwrap_or(0.0);
            in_cat && area > lo && area < hi
        })
        .map(|ann| ann.id)
        .collect()
    }

    /// All category ids, in dataset order.
    pub fn get_cat_ids(&self) -> Vec<u64> {
        self.dataset.categories.iter().map(|c| c.id).collect()
    }

    /// All image ids, in dataset order.
    pub fn get_img_ids(&self) -> Vec<u64> {
        self.dataset.images.iter().map(|img| img.id).collect()
    }

    fn load_helper<'a, T>(
        items: &'a [T],
        positions: &HashMap<u64, usize>,
        kind: &'static str,
        ids: Option<&[u64]>,
    ) -> Result<Vec<&'a T>> {
        match ids {
            None => Ok(items.iter().collect()),
            Some(ids) => ids
                .iter()
                .map(|&id| {
                    positions
                        .get(&id)
                        .map(|&i| &items[i])
                        .ok_or(LvisError::NotFound { kind, id })
                })
                .collect(),
        }
    }

    /// Load annotations by id, or all of them when `ids` is `None`.
    pub fn load_anns(&self, ids: Option<&[u64]>) -> Result<Vec<&Annotation>> {
        Self::load_helper(&self.dataset.annotations, &self.index.anns, "annotation", ids)
    }

    /// Load categories by id, or all of them when `ids` is `None`.
    pub fn load_cats(&self, ids: Option<&[u64]>) -> Result<Vec<&Category>> {
        Self::load_helper(&self.dataset.categories, &self.index.cats, "category", ids)
    }

    /// Load images by id, or all of them when `ids` is `None`.
    pub fn load_imgs(&self, ids: Option<&[u64]>) -> Result<Vec<&Image>> {
        Self::load_helper(&self.dataset.images, &self.index.imgs, "image", ids)
    }

    /// Get a single annotation by id.
    pub fn get_ann(&self, id: u64) -> Option<&Annotation> {
        self.index
            .ann_position(id)
            .map(|i| &self.dataset.annotations[i])
    }

    /// Get a single image by id.
    pub fn get_img(&self, id: u64) -> Option<&Image> {
        self.index.img_position(id).map(|i| &self.dataset.images[i])
    }

    /// Get a single category by id.
    pub fn get_cat(&self, id: u64) -> Option<&Category> {
        self.index
            .cat_position(id)
            .map(|i| &self.dataset.categories[i])
    }

    /// Annotation ids of one image, in dataset order.
    pub fn get_ann_ids_for_img(&self, img_id: u64) -> Vec<u64> {
        self.index
            .ann_positions_for_img(img_id)
            .iter()
            .map(|&i| self.dataset.annotations[i].id)
            .collect()
    }

    /// Image ids of every annotation of one category (repeats included).
    pub fn get_img_ids_for_cat(&self, cat_id: u64) -> &[u64] {
        self.index.img_ids_for_cat(cat_id)
    }

    /// Annotations of one image scoring strictly above `score_thr`.
    pub fn get_top_results(&self, img_id: u64, score_thr: f64) -> Vec<&Annotation> {
        self.index
            .ann_positions_for_img(img_id)
            .iter()
            .map(|&i| &self.dataset.annotations[i])
            .filter(|ann| ann.score.is_some_and(|s| s > score_thr))
            .collect()
    }

    /// Convert an annotation's segmentation to RLE at its image's size.
    pub fn ann_to_rle(&self, ann: &Annotation) -> Result<Rle> {
        let img = self.get_img(ann.image_id).ok_or(LvisError::MissingImage {
            ann_id: ann.id,
            image_id: ann.image_id,
        })?;
        let segm = ann
            .segmentation
            .as_ref()
            .ok_or_else(|| LvisError::UnsupportedSegmentation {
                ann_id: ann.id,
                reason: "annotation has no segmentation".into(),
            })?;
        Ok(mask::segm_to_rle(segm, img.height, img.width))
    }

    /// Convert an annotation to a column-major binary mask.
    pub fn ann_to_mask(&self, ann: &Annotation) -> Result<Vec<u8>> {
        self.ann_to_rle(ann).map(|rle| mask::decode(&rle))
    }

    /// Load detection results from a JSON list and index them against this
    /// ground truth.
    ///
    /// The results are indexed with `config.boundary` when set, otherwise
    /// with this ground truth's options.
    pub fn load_results(&self, res_file: &Path, config: &ResultsConfig) -> Result<Lvis> {
        info!("Loading and preparing results.");
        let value = read_json(res_file)?;
        if !value.is_array() {
            return Err(LvisError::UnsupportedFormat(format!(
                "results must be a list, found {}",
                json_kind(&value)
            )));
        }
        let anns: Vec<Annotation> =
            serde_json::from_value(value).map_err(|source| LvisError::Json {
                path: res_file.to_path_buf(),
                source,
            })?;
        self.ingest_results(anns, config)
    }

    /// Index in-memory detections against this ground truth.
    pub fn from_results(&self, anns: Vec<Annotation>, config: &ResultsConfig) -> Result<Lvis> {
        warn!("Assuming user provided the results in correct format.");
        self.ingest_results(anns, config)
    }

    fn ingest_results(&self, anns: Vec<Annotation>, config: &ResultsConfig) -> Result<Lvis> {
        let gt_img_ids: HashSet<u64> = self.index.imgs.keys().copied().collect();
        let annotations = results::normalize(anns, config, &gt_img_ids)?;
        let boundary = config.boundary.clone().unwrap_or_else(|| self.config.clone());

        let dataset = Dataset {
            info: self.dataset.info.clone(),
            images: self.dataset.images.clone(),
            annotations,
            categories: self.dataset.categories.clone(),
            licenses: self.dataset.licenses.clone(),
        };
        Lvis::from_dataset(dataset, boundary)
    }
}
