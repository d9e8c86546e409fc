//! Ingestion of detection results.
//!
//! Raw detections are capped per image and per category by score, given the
//! geometry fields that are missing, renumbered, and checked against the
//! ground-truth image set. The caller indexes the returned annotations.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use tracing::warn;

use crate::error::{LvisError, Result};
use crate::mask;
use crate::params::ResultsConfig;
use crate::types::{Annotation, Segmentation};

/// A detection tagged with its position in the submitted batch.
type Indexed = (usize, Annotation);

/// Run the full ingestion pipeline over `detections`.
///
/// Caps are applied per image first, then per category on what is left.
/// The geometry branch (box or mask) is chosen once, from the first
/// surviving detection. Errors name detections by batch position.
pub fn normalize(
    detections: Vec<Annotation>,
    config: &ResultsConfig,
    gt_img_ids: &HashSet<u64>,
) -> Result<Vec<Annotation>> {
    let mut anns: Vec<Indexed> = detections.into_iter().enumerate().collect();
    if let Some(max_dets) = config.max_dets_per_im {
        anns = cap_per_image(anns, max_dets)?;
    }
    if let Some(max_dets) = config.max_dets_per_cat {
        anns = cap_per_category_and_warn(anns, max_dets)?;
    }

    let first = anns.first().map(|(_, a)| a).ok_or(LvisError::EmptyResults)?;
    let (has_bbox, has_segm) = (first.bbox.is_some(), first.segmentation.is_some());
    if has_bbox {
        fill_from_bbox(&mut anns)?;
    } else if has_segm {
        fill_from_segmentation(&mut anns)?;
    }

    let mut anns = strip(anns);
    for (i, ann) in anns.iter_mut().enumerate() {
        ann.id = (i + 1) as u64;
    }

    check_image_ids(&anns, gt_img_ids)?;
    Ok(anns)
}

/// Group by key, keeping groups in order of first appearance.
fn group_by_key<F>(anns: Vec<Indexed>, key: F) -> Vec<(u64, Vec<Indexed>)>
where
    F: Fn(&Annotation) -> u64,
{
    let mut slots: HashMap<u64, usize> = HashMap::new();
    let mut groups: Vec<(u64, Vec<Indexed>)> = Vec::new();
    for item in anns {
        let k = key(&item.1);
        let slot = *slots.entry(k).or_insert_with(|| {
            groups.push((k, Vec::new()));
            groups.len() - 1
        });
        groups[slot].1.push(item);
    }
    groups
}

/// Stable sort by descending score, then truncate.
fn keep_top(group: &mut Vec<Indexed>, max_dets: usize) -> Result<()> {
    if let Some((index, ann)) = group.iter().find(|(_, a)| a.score.is_none()) {
        return Err(LvisError::MalformedDetection {
            index: *index,
            reason: format!("no score on detection for image {}", ann.image_id),
        });
    }
    group.sort_by(|(_, a), (_, b)| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
    });
    group.truncate(max_dets);
    Ok(())
}

fn cap_per_image(anns: Vec<Indexed>, max_dets: usize) -> Result<Vec<Indexed>> {
    let mut out = Vec::with_capacity(anns.len());
    for (_, mut group) in group_by_key(anns, |a| a.image_id) {
        if group.len() > max_dets {
            keep_top(&mut group, max_dets)?;
        }
        out.extend(group);
    }
    Ok(out)
}

/// Cap every category; also returns how many categories fall short of
/// `max_dets`.
fn cap_per_category(anns: Vec<Indexed>, max_dets: usize) -> Result<(Vec<Indexed>, usize)> {
    let mut out = Vec::with_capacity(anns.len());
    let mut fewer_dets_cats = 0usize;
    for (_, mut group) in group_by_key(anns, |a| a.category_id) {
        if group.len() < max_dets {
            fewer_dets_cats += 1;
        }
        if group.len() > max_dets {
            keep_top(&mut group, max_dets)?;
        }
        out.extend(group);
    }
    Ok((out, fewer_dets_cats))
}

fn cap_per_category_and_warn(anns: Vec<Indexed>, max_dets: usize) -> Result<Vec<Indexed>> {
    let (out, fewer_dets_cats) = cap_per_category(anns, max_dets)?;
    if fewer_dets_cats > 0 {
        warn!(
            "{} categories had less than {} detections! Outputting {} detections \
             for each category will improve AP further.",
            fewer_dets_cats, max_dets, max_dets
        );
    }
    Ok(out)
}

fn strip(anns: Vec<Indexed>) -> Vec<Annotation> {
    anns.into_iter().map(|(_, ann)| ann).collect()
}

/// Keep at most `max_dets` highest-scoring detections for every image.
pub fn limit_dets_per_image(anns: Vec<Annotation>, max_dets: usize) -> Result<Vec<Annotation>> {
    cap_per_image(anns.into_iter().enumerate().collect(), max_dets).map(strip)
}

/// Keep at most `max_dets` highest-scoring detections for every category.
///
/// Categories with fewer than `max_dets` detections are reported with a
/// warning, since submitting the full budget improves AP.
pub fn limit_dets_per_cat(anns: Vec<Annotation>, max_dets: usize) -> Result<Vec<Annotation>> {
    cap_per_category_and_warn(anns.into_iter().enumerate().collect(), max_dets).map(strip)
}

/// Box results: area from the box, and the box outline as segmentation
/// when none was given.
fn fill_from_bbox(anns: &mut [Indexed]) -> Result<()> {
    for (index, ann) in anns.iter_mut() {
        let [x1, y1, w, h] = ann.bbox.ok_or_else(|| LvisError::MalformedDetection {
            index: *index,
            reason: "expected a bbox like the first detection".into(),
        })?;
        let (x2, y2) = (x1 + w, y1 + h);
        if ann.segmentation.is_none() {
            ann.segmentation = Some(Segmentation::Polygon(vec![vec![
                x1, y1, x1, y2, x2, y2, x2, y1,
            ]]));
        }
        ann.area = Some(w * h);
    }
    Ok(())
}

/// Mask results: area and, when missing, bbox from the RLE.
fn fill_from_segmentation(anns: &mut [Indexed]) -> Result<()> {
    for (index, ann) in anns.iter_mut() {
        let rle = match &ann.segmentation {
            Some(Segmentation::CompressedRle { size, counts }) => {
                mask::rle_from_string(counts, size[0], size[1])
            }
            Some(segm @ Segmentation::UncompressedRle { size, .. }) => {
                mask::segm_to_rle(segm, size[0], size[1])
            }
            Some(segm @ Segmentation::Polygon(_)) => {
                return Err(LvisError::UnsupportedSegmentation {
                    ann_id: ann.id,
                    reason: format!("{} results are not supported, use RLE", segm.kind()),
                })
            }
            None => {
                return Err(LvisError::MalformedDetection {
                    index: *index,
                    reason: "expected a segmentation like the first detection".into(),
                })
            }
        };
        let (area, bbox) = mask::area_and_bbox(&rle);
        ann.area = Some(area as f64);
        if ann.bbox.is_none() {
            ann.bbox = Some(bbox);
        }
    }
    Ok(())
}

fn check_image_ids(anns: &[Annotation], gt_img_ids: &HashSet<u64>) -> Result<()> {
    let mut unknown: Vec<u64> = anns
        .iter()
        .map(|a| a.image_id)
        .filter(|id| !gt_img_ids.contains(id))
        .collect();
    if unknown.is_empty() {
        return Ok(());
    }
    unknown.sort_unstable();
    unknown.dedup();
    Err(LvisError::ResultsMismatch { image_ids: unknown })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(image_id: u64, category_id: u64, score: f64) -> Annotation {
        Annotation {
            id: 0,
            image_id,
            category_id,
            segmentation: None,
            area: None,
            bbox: Some([0.0, 0.0, 10.0, 10.0]),
            boundary: None,
            score: Some(score),
        }
    }

    fn gt_ids(ids: &[u64]) -> HashSet<u64> {
        ids.iter().copied().collect()
    }

    fn scores(anns: &[Annotation]) -> Vec<f64> {
        anns.iter().filter_map(|a| a.score).collect()
    }

    fn unlimited() -> ResultsConfig {
        ResultsConfig {
            max_dets_per_cat: None,
            max_dets_per_im: None,
            boundary: None,
        }
    }

    #[test]
    fn test_per_image_cap_keeps_top_scores() {
        let anns = [0.9, 0.1, 0.5, 0.8, 0.3]
            .iter()
            .map(|&s| det(1, 1, s))
            .collect();
        let kept = limit_dets_per_image(anns, 3).unwrap();
        assert_eq!(scores(&kept), vec![0.9, 0.8, 0.5]);
    }

    #[test]
    fn test_per_image_cap_leaves_small_groups_untouched() {
        let anns = vec![det(1, 1, 0.1), det(2, 1, 0.9), det(1, 1, 0.5)];
        let kept = limit_dets_per_image(anns, 2).unwrap();
        // groups in first-appearance order, original order inside each group
        assert_eq!(scores(&kept), vec![0.1, 0.5, 0.9]);
    }

    #[test]
    fn test_cap_is_stable_for_equal_scores() {
        let mut anns: Vec<Annotation> = (0..4).map(|_| det(1, 1, 0.5)).collect();
        for (i, a) in anns.iter_mut().enumerate() {
            a.bbox = Some([i as f64, 0.0, 1.0, 1.0]);
        }
        let kept = limit_dets_per_image(anns, 2).unwrap();
        let xs: Vec<f64> = kept.iter().map(|a| a.bbox.unwrap()[0]).collect();
        assert_eq!(xs, vec![0.0, 1.0]);
    }

    #[test]
    fn test_category_cap_runs_on_image_capped_list() {
        // Image 1 holds the two best category-7 detections but is capped to
        // one, so the category cap sees only 0.9 from image 1.
        let anns = vec![
            det(1, 7, 0.9),
            det(1, 7, 0.8),
            det(2, 7, 0.7),
            det(2, 7, 0.1),
        ];
        let config = ResultsConfig {
            max_dets_per_cat: Some(2),
            max_dets_per_im: Some(1),
            boundary: None,
        };
        let out = normalize(anns, &config, &gt_ids(&[1, 2])).unwrap();
        assert_eq!(scores(&out), vec![0.9, 0.7]);
    }

    #[test]
    fn test_category_cap_counts_under_filled_categories() {
        let anns = vec![det(1, 1, 0.3), det(1, 2, 0.2), det(1, 2, 0.9), det(1, 2, 0.4)];
        let kept = limit_dets_per_cat(anns, 2).unwrap();
        assert_eq!(scores(&kept), vec![0.3, 0.9, 0.4]);
    }

    #[test]
    fn test_category_cap_reports_short_categories() {
        // Category 1 has one detection, category 2 exactly two, category 3 three.
        let anns: Vec<Indexed> = [(1, 0.3), (2, 0.2), (2, 0.9), (3, 0.5), (3, 0.1), (3, 0.7)]
            .iter()
            .map(|&(cat, s)| det(1, cat, s))
            .enumerate()
            .collect();
        let (kept, fewer_dets_cats) = cap_per_category(anns, 2).unwrap();
        assert_eq!(fewer_dets_cats, 1);
        assert_eq!(
            kept.iter().map(|(i, _)| *i).collect::<Vec<_>>(),
            vec![0, 1, 2, 5, 3]
        );

        let (_, none_short) = cap_per_category(
            vec![(0, det(1, 1, 0.3)), (1, det(1, 1, 0.2))],
            2,
        )
        .unwrap();
        assert_eq!(none_short, 0);
    }

    #[test]
    fn test_missing_score_is_malformed_when_ranking() {
        let mut anns = vec![det(1, 1, 0.3), det(1, 1, 0.2)];
        anns[1].score = None;
        let err = limit_dets_per_image(anns, 1).unwrap_err();
        assert!(matches!(err, LvisError::MalformedDetection { index: 1, .. }));
    }

    #[test]
    fn test_missing_score_reports_batch_position() {
        // The offending detection is second in its image group but fourth
        // in the batch.
        let mut anns = vec![det(1, 1, 0.3), det(1, 1, 0.2), det(2, 1, 0.5), det(2, 1, 0.4)];
        anns[3].score = None;
        let config = ResultsConfig {
            max_dets_per_cat: None,
            max_dets_per_im: Some(1),
            boundary: None,
        };
        let err = normalize(anns, &config, &gt_ids(&[1, 2])).unwrap_err();
        assert!(matches!(err, LvisError::MalformedDetection { index: 3, .. }));
    }

    #[test]
    fn test_missing_bbox_reports_batch_position_after_grouping() {
        // Image grouping moves the box-less detection from position 1 to 2.
        let mut anns = vec![det(1, 1, 0.9), det(2, 1, 0.8), det(1, 1, 0.7)];
        anns[1].bbox = None;
        let err = normalize(anns, &ResultsConfig::default(), &gt_ids(&[1, 2])).unwrap_err();
        assert!(matches!(err, LvisError::MalformedDetection { index: 1, .. }));
    }

    #[test]
    fn test_bbox_geometry_derivation() {
        let mut d = det(1, 1, 0.9);
        d.bbox = Some([10.0, 10.0, 5.0, 5.0]);
        let out = normalize(vec![d], &ResultsConfig::default(), &gt_ids(&[1])).unwrap();
        assert_eq!(out[0].area, Some(25.0));
        assert_eq!(
            out[0].segmentation,
            Some(Segmentation::Polygon(vec![vec![
                10.0, 10.0, 10.0, 15.0, 15.0, 15.0, 15.0, 10.0
            ]]))
        );
    }

    #[test]
    fn test_bbox_branch_keeps_given_segmentation() {
        let mut d = det(1, 1, 0.9);
        let segm = Segmentation::Polygon(vec![vec![0.0, 0.0, 4.0, 0.0, 4.0, 4.0]]);
        d.segmentation = Some(segm.clone());
        let out = normalize(vec![d], &unlimited(), &gt_ids(&[1])).unwrap();
        assert_eq!(out[0].segmentation, Some(segm));
        assert_eq!(out[0].area, Some(100.0));
    }

    #[test]
    fn test_first_record_decides_branch() {
        let mut second = det(1, 1, 0.5);
        second.bbox = None;
        second.segmentation = Some(Segmentation::CompressedRle {
            size: [4, 4],
            counts: "52;".into(),
        });
        let err = normalize(vec![det(1, 1, 0.9), second], &unlimited(), &gt_ids(&[1]))
            .unwrap_err();
        assert!(matches!(err, LvisError::MalformedDetection { index: 1, .. }));
    }

    #[test]
    fn test_segmentation_geometry_derivation() {
        // 4x4 mask with a 2x2 square at x=1, y=1
        let m = [0, 0, 0, 0, 0, 1, 1, 0, 0, 1, 1, 0, 0, 0, 0, 0];
        let rle = mask::encode(&m, 4, 4);
        let mut d = det(1, 1, 0.9);
        d.bbox = None;
        d.segmentation = Some(Segmentation::CompressedRle {
            size: [4, 4],
            counts: mask::rle_to_string(&rle),
        });
        let out = normalize(vec![d], &unlimited(), &gt_ids(&[1])).unwrap();
        assert_eq!(out[0].area, Some(4.0));
        assert_eq!(out[0].bbox, Some([1.0, 1.0, 2.0, 2.0]));
    }

    #[test]
    fn test_polygon_segmentation_results_are_rejected() {
        let mut d = det(1, 1, 0.9);
        d.bbox = None;
        d.segmentation = Some(Segmentation::Polygon(vec![vec![0.0, 0.0, 2.0, 0.0, 2.0, 2.0]]));
        let err = normalize(vec![d], &unlimited(), &gt_ids(&[1])).unwrap_err();
        assert!(matches!(err, LvisError::UnsupportedSegmentation { .. }));
    }

    #[test]
    fn test_ids_are_dense_and_overwrite_input() {
        let mut anns = vec![det(1, 1, 0.9), det(2, 1, 0.8), det(1, 2, 0.7)];
        anns[0].id = 42;
        anns[1].id = 7;
        anns[2].id = 42;
        let out = normalize(anns, &unlimited(), &gt_ids(&[1, 2])).unwrap();
        assert_eq!(out.iter().map(|a| a.id).collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[test]
    fn test_unknown_image_is_rejected() {
        let anns = vec![det(1, 1, 0.9), det(5, 1, 0.8), det(5, 1, 0.7)];
        let err = normalize(anns, &unlimited(), &gt_ids(&[1, 2])).unwrap_err();
        match err {
            LvisError::ResultsMismatch { image_ids } => assert_eq!(image_ids, vec![5]),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_empty_results_are_rejected() {
        let err = normalize(vec![], &unlimited(), &gt_ids(&[1])).unwrap_err();
        assert!(matches!(err, LvisError::EmptyResults));

        let config = ResultsConfig {
            max_dets_per_cat: None,
            max_dets_per_im: Some(0),
            boundary: None,
        };
        let err = normalize(vec![det(1, 1, 0.5)], &config, &gt_ids(&[1])).unwrap_err();
        assert!(matches!(err, LvisError::EmptyResults));
    }
}
