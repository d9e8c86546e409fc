//! Boundary masks for boundary-aware evaluation.
//!
//! A boundary is the band of a mask within `dilation_ratio * diagonal`
//! pixels of its edge, computed by eroding the mask and subtracting the
//! result. Precomputation over a whole annotation set is fanned out over a
//! bounded rayon pool, one task per contiguous chunk.

use std::collections::HashMap;

use rayon::prelude::*;
use tracing::{debug, info};

use crate::error::{LvisError, Result};
use crate::mask;
use crate::types::{Annotation, Image, Segmentation};

/// Number of 3x3 erosions for an `h x w` mask. Never less than one.
pub fn erosion_iterations(h: u32, w: u32, dilation_ratio: f64) -> usize {
    let diag = ((h as f64).powi(2) + (w as f64).powi(2)).sqrt();
    let radius = (dilation_ratio * diag).round_ties_even();
    (radius as i64).max(1) as usize
}

/// Convert a column-major binary mask into its boundary mask.
///
/// The mask is padded with one background pixel on every side before
/// erosion, so foreground touching the image border counts as boundary.
pub fn mask_to_boundary(mask: &[u8], h: u32, w: u32, dilation_ratio: f64) -> Vec<u8> {
    let (h, w) = (h as usize, w as usize);
    let (ph, pw) = (h + 2, w + 2);

    let mut padded = vec![0u8; ph * pw];
    for x in 0..w {
        for y in 0..h {
            padded[(y + 1) + ph * (x + 1)] = (mask[y + h * x] != 0) as u8;
        }
    }

    let iterations = erosion_iterations(h as u32, w as u32, dilation_ratio);
    let mut scratch = vec![0u8; ph * pw];
    for _ in 0..iterations {
        if !padded.contains(&1) {
            break;
        }
        erode_3x3(&mut padded, &mut scratch, ph, pw);
    }

    let mut boundary = vec![0u8; h * w];
    for x in 0..w {
        for y in 0..h {
            let on = mask[y + h * x] != 0;
            let kept = padded[(y + 1) + ph * (x + 1)] != 0;
            boundary[y + h * x] = (on && !kept) as u8;
        }
    }
    boundary
}

/// One erosion with a 3x3 square, done as a column pass then a row pass.
/// Pixels outside the buffer do not take part.
fn erode_3x3(buf: &mut [u8], scratch: &mut [u8], h: usize, w: usize) {
    for x in 0..w {
        let col = &buf[h * x..h * (x + 1)];
        for y in 0..h {
            let lo = y.saturating_sub(1);
            let hi = (y + 1).min(h - 1);
            scratch[y + h * x] = col[lo..=hi].iter().copied().min().unwrap_or(0);
        }
    }
    for x in 0..w {
        let lo = x.saturating_sub(1);
        let hi = (x + 1).min(w - 1);
        for y in 0..h {
            buf[y + h * x] = (lo..=hi).map(|xx| scratch[y + h * xx]).min().unwrap_or(0);
        }
    }
}

/// Split `items` into `k` contiguous chunks. The first `len % k` chunks get
/// one extra item; trailing chunks are empty when `len < k`.
pub fn split_chunks<T>(items: Vec<T>, k: usize) -> Vec<Vec<T>> {
    let k = k.max(1);
    let (base, extra) = (items.len() / k, items.len() % k);
    let mut chunks = Vec::with_capacity(k);
    let mut it = items.into_iter();
    for i in 0..k {
        let size = base + usize::from(i < extra);
        chunks.push(it.by_ref().take(size).collect());
    }
    chunks
}

fn boundary_for(
    ann: &Annotation,
    imgs: &HashMap<u64, &Image>,
    dilation_ratio: f64,
) -> Result<Segmentation> {
    let img = imgs.get(&ann.image_id).ok_or(LvisError::MissingImage {
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

    let rle = mask::segm_to_rle(segm, img.height, img.width);
    let binary = mask::decode(&rle);
    let edge = mask_to_boundary(&binary, rle.h, rle.w, dilation_ratio);
    let encoded = mask::encode(&edge, rle.h, rle.w);
    Ok(Segmentation::CompressedRle {
        size: [rle.h, rle.w],
        counts: mask::rle_to_string(&encoded),
    })
}

/// Attach a boundary to every annotation of one chunk, preserving order.
pub fn augment_chunk(
    mut chunk: Vec<Annotation>,
    imgs: &HashMap<u64, &Image>,
    dilation_ratio: f64,
) -> Result<Vec<Annotation>> {
    for ann in &mut chunk {
        ann.boundary = Some(boundary_for(ann, imgs, dilation_ratio)?);
    }
    Ok(chunk)
}

/// Precompute boundaries using exactly `num_chunks` chunks on a pool of the
/// same size. Output is chunk 0's annotations, then chunk 1's, and so on.
///
/// Any failing annotation fails the whole call.
pub fn augment_in_chunks(
    annotations: Vec<Annotation>,
    imgs: &HashMap<u64, &Image>,
    dilation_ratio: f64,
    num_chunks: usize,
) -> Result<Vec<Annotation>> {
    let num_chunks = num_chunks.max(1);
    let chunks = split_chunks(annotations, num_chunks);
    info!(
        "Number of cores: {}, annotations per core: {}",
        num_chunks,
        chunks.first().map_or(0, Vec::len)
    );

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(num_chunks)
        .thread_name(|i| format!("lvis-boundary-{i}"))
        .build()?;

    let done: Vec<Vec<Annotation>> = pool.install(|| {
        chunks
            .into_par_iter()
            .enumerate()
            .map(|(i, chunk)| {
                debug!(chunk = i, len = chunk.len(), "computing boundaries");
                augment_chunk(chunk, imgs, dilation_ratio)
            })
            .collect::<Result<Vec<Vec<Annotation>>>>()
    })?;

    Ok(done.into_iter().flatten().collect())
}

/// Precompute boundaries with `min(available cores, max_workers)` workers.
pub fn augment_with_boundary(
    annotations: Vec<Annotation>,
    imgs: &HashMap<u64, &Image>,
    dilation_ratio: f64,
    max_workers: usize,
) -> Result<Vec<Annotation>> {
    let workers = num_cpus::get().min(max_workers).max(1);
    augment_in_chunks(annotations, imgs, dilation_ratio, workers)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(id: u64, height: u32, width: u32) -> Image {
        serde_json::from_value(serde_json::json!({
            "id": id, "height": height, "width": width
        }))
        .expect("valid image")
    }

    fn square_ann(id: u64, image_id: u64, x: f64, y: f64, side: f64) -> Annotation {
        Annotation {
            id,
            image_id,
            category_id: 1,
            segmentation: Some(Segmentation::Polygon(vec![vec![
                x,
                y,
                x + side,
                y,
                x + side,
                y + side,
                x,
                y + side,
            ]])),
            area: Some(side * side),
            bbox: Some([x, y, side, side]),
            boundary: None,
            score: None,
        }
    }

    fn filled_square(size: usize, x0: usize, y0: usize, side: usize) -> Vec<u8> {
        let mut m = vec![0u8; size * size];
        for x in x0..x0 + side {
            for y in y0..y0 + side {
                m[y + size * x] = 1;
            }
        }
        m
    }

    #[test]
    fn test_erosion_iterations_floor() {
        assert_eq!(erosion_iterations(100, 100, 0.0), 1);
        assert_eq!(erosion_iterations(100, 100, -0.5), 1);
        assert_eq!(erosion_iterations(100, 100, 0.001), 1);
        // diag = 141.42..., 0.02 * diag = 2.83
        assert_eq!(erosion_iterations(100, 100, 0.02), 3);
        // diag = 500, 0.02 * diag = 10
        assert_eq!(erosion_iterations(300, 400, 0.02), 10);
    }

    #[test]
    fn test_full_image_mask_yields_border_ring() {
        let mask = vec![1u8; 25];
        let b = mask_to_boundary(&mask, 5, 5, 0.0);
        assert_eq!(b.iter().filter(|&&p| p == 1).count(), 16);
        // centre pixel stays interior
        assert_eq!(b[2 + 5 * 2], 0);
    }

    #[test]
    fn test_interior_square_single_erosion() {
        let mask = filled_square(20, 5, 5, 7);
        let b = mask_to_boundary(&mask, 20, 20, 0.0);
        assert_eq!(b.iter().filter(|&&p| p == 1).count(), 49 - 25);
        assert_eq!(b[5 + 20 * 5], 1);
        assert_eq!(b[8 + 20 * 8], 0);
    }

    #[test]
    fn test_wide_erosion_consumes_small_mask() {
        let mask = filled_square(20, 5, 5, 3);
        // 0.1 * 28.28 = 2.83 -> 3 erosions, enough to clear a 3x3 square
        let b = mask_to_boundary(&mask, 20, 20, 0.1);
        assert_eq!(b, mask);
    }

    #[test]
    fn test_empty_mask_has_empty_boundary() {
        let b = mask_to_boundary(&[0u8; 30], 5, 6, 0.02);
        assert!(b.iter().all(|&p| p == 0));
    }

    #[test]
    fn test_split_chunks_sizes() {
        let sizes: Vec<usize> = split_chunks((0..7).collect::<Vec<_>>(), 3)
            .iter()
            .map(Vec::len)
            .collect();
        assert_eq!(sizes, vec![3, 2, 2]);

        let chunks = split_chunks(vec![1, 2], 4);
        assert_eq!(chunks, vec![vec![1], vec![2], vec![], vec![]]);
    }

    #[test]
    fn test_augment_seven_over_three_chunks() {
        let img = image(1, 40, 40);
        let imgs: HashMap<u64, &Image> = [(1, &img)].into_iter().collect();
        let anns: Vec<Annotation> = (1..=7)
            .map(|i| square_ann(i, 1, 2.0 + 4.0 * i as f64, 5.0, 3.0))
            .collect();

        let out = augment_in_chunks(anns, &imgs, 0.02, 3).expect("augment");
        assert_eq!(out.len(), 7);
        assert_eq!(
            out.iter().map(|a| a.id).collect::<Vec<_>>(),
            vec![1, 2, 3, 4, 5, 6, 7]
        );
        for ann in &out {
            match &ann.boundary {
                Some(Segmentation::CompressedRle { size, counts }) => {
                    assert_eq!(*size, [40, 40]);
                    assert!(!counts.is_empty());
                }
                other => panic!("unexpected boundary {other:?}"),
            }
        }
    }

    #[test]
    fn test_boundary_of_polygon_is_subset_of_mask() {
        let img = image(1, 30, 30);
        let imgs: HashMap<u64, &Image> = [(1, &img)].into_iter().collect();
        let ann = square_ann(1, 1, 4.0, 4.0, 15.0);

        let out = augment_chunk(vec![ann.clone()], &imgs, 0.05).expect("augment");
        let full = mask::decode(&mask::segm_to_rle(
            ann.segmentation.as_ref().expect("segm"),
            30,
            30,
        ));
        let edge = mask::decode(&mask::segm_to_rle(
            out[0].boundary.as_ref().expect("boundary"),
            30,
            30,
        ));
        assert!(edge.iter().any(|&p| p == 1));
        assert!(edge.iter().zip(&full).all(|(&e, &m)| e <= m));
    }

    #[test]
    fn test_missing_image_fails_whole_call() {
        let img = image(1, 10, 10);
        let imgs: HashMap<u64, &Image> = [(1, &img)].into_iter().collect();
        let anns = vec![
            square_ann(1, 1, 1.0, 1.0, 3.0),
            square_ann(2, 99, 1.0, 1.0, 3.0),
            square_ann(3, 1, 1.0, 1.0, 3.0),
        ];
        let err = augment_in_chunks(anns, &imgs, 0.02, 2).unwrap_err();
        assert!(matches!(
            err,
            LvisError::MissingImage {
                ann_id: 2,
                image_id: 99
            }
        ));
    }

    #[test]
    fn test_missing_segmentation_is_rejected() {
        let img = image(1, 10, 10);
        let imgs: HashMap<u64, &Image> = [(1, &img)].into_iter().collect();
        let mut ann = square_ann(5, 1, 1.0, 1.0, 3.0);
        ann.segmentation = None;
        let err = augment_chunk(vec![ann], &imgs, 0.02).unwrap_err();
        assert!(matches!(
            err,
            LvisError::UnsupportedSegmentation { ann_id: 5, .. }
        ));
    }
}
