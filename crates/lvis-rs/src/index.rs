use std::collections::HashMap;

use crate::types::Dataset;

/// Lookup tables over one [`Dataset`].
///
/// Positions point into the dataset's vectors, so an index is only valid for
/// the dataset it was built from. Replacing the annotations means building a
/// new index.
#[derive(Debug, Default, Clone)]
pub struct Index {
    /// ann_id -> position in `dataset.annotations`
    pub(crate) anns: HashMap<u64, usize>,
    /// img_id -> position in `dataset.images`
    pub(crate) imgs: HashMap<u64, usize>,
    /// cat_id -> position in `dataset.categories`
    pub(crate) cats: HashMap<u64, usize>,
    /// img_id -> annotation positions, in dataset order
    pub(crate) img_ann_map: HashMap<u64, Vec<usize>>,
    /// cat_id -> one image id per annotation of that category (not deduplicated)
    pub(crate) cat_img_map: HashMap<u64, Vec<u64>>,
}

impl Index {
    /// Build every lookup table in one pass per collection. Duplicate ids
    /// keep the last record's position.
    pub fn build(dataset: &Dataset) -> Self {
        let mut index = Index::default();

        for (i, img) in dataset.images.iter().enumerate() {
            index.imgs.insert(img.id, i);
        }

        for (i, ann) in dataset.annotations.iter().enumerate() {
            index.img_ann_map.entry(ann.image_id).or_default().push(i);
            index.anns.insert(ann.id, i);
        }

        for (i, cat) in dataset.categories.iter().enumerate() {
            index.cats.insert(cat.id, i);
        }

        for ann in &dataset.annotations {
            index
                .cat_img_map
                .entry(ann.category_id)
                .or_default()
                .push(ann.image_id);
        }

        index
    }

    /// Position of annotation `id` in `dataset.annotations`.
    pub fn ann_position(&self, id: u64) -> Option<usize> {
        self.anns.get(&id).copied()
    }

    /// Position of image `id` in `dataset.images`.
    pub fn img_position(&self, id: u64) -> Option<usize> {
        self.imgs.get(&id).copied()
    }

    /// Position of category `id` in `dataset.categories`.
    pub fn cat_position(&self, id: u64) -> Option<usize> {
        self.cats.get(&id).copied()
    }

    /// Positions of the annotations of one image; empty for unknown images.
    pub fn ann_positions_for_img(&self, img_id: u64) -> &[usize] {
        self.img_ann_map
            .get(&img_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Image ids referenced by annotations of one category, one per annotation.
    pub fn img_ids_for_cat(&self, cat_id: u64) -> &[u64] {
        self.cat_img_map
            .get(&cat_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}
