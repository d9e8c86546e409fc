use lvis_rs::boundary::{erosion_iterations, mask_to_boundary};
use lvis_rs::mask;
use proptest::prelude::*;

fn proptest_config() -> ProptestConfig {
    ProptestConfig {
        cases: 128,
        ..ProptestConfig::default()
    }
}

/// A column-major binary mask with its height and width.
fn arb_mask(max_side: u32) -> impl Strategy<Value = (Vec<u8>, u32, u32)> {
    (1..=max_side, 1..=max_side).prop_flat_map(|(h, w)| {
        proptest::collection::vec(0u8..=1u8, (h * w) as usize).prop_map(move |m| (m, h, w))
    })
}

proptest! {
    #![proptest_config(proptest_config())]

    #[test]
    fn boundary_is_subset_of_mask((m, h, w) in arb_mask(24), ratio in 0.0f64..0.2) {
        let boundary = mask_to_boundary(&m, h, w, ratio);
        prop_assert_eq!(boundary.len(), m.len());
        for (b, v) in boundary.iter().zip(&m) {
            prop_assert!(*b <= *v, "boundary pixel outside mask");
        }
    }

    #[test]
    fn empty_mask_has_empty_boundary(h in 1u32..40, w in 1u32..40, ratio in -1.0f64..1.0) {
        let m = vec![0u8; (h * w) as usize];
        prop_assert!(mask_to_boundary(&m, h, w, ratio).iter().all(|&b| b == 0));
    }

    #[test]
    fn non_positive_ratio_erodes_once(h in 1u32..2000, w in 1u32..2000, ratio in -5.0f64..=0.0) {
        prop_assert_eq!(erosion_iterations(h, w, ratio), 1);
    }

    #[test]
    fn non_positive_ratio_matches_single_erosion((m, h, w) in arb_mask(16), ratio in -1.0f64..=0.0) {
        // A tiny positive ratio also rounds to one erosion.
        prop_assert_eq!(
            mask_to_boundary(&m, h, w, ratio),
            mask_to_boundary(&m, h, w, 1e-6)
        );
    }

    #[test]
    fn boundary_survives_rle_encoding((m, h, w) in arb_mask(24), ratio in 0.0f64..0.2) {
        let boundary = mask_to_boundary(&m, h, w, ratio);
        let rle = mask::encode(&boundary, h, w);
        prop_assert_eq!(mask::decode(&rle), boundary.clone());

        let compressed = mask::rle_to_string(&rle);
        let restored = mask::rle_from_string(&compressed, h, w);
        prop_assert_eq!(mask::decode(&restored), boundary);
    }

    #[test]
    fn full_mask_boundary_is_its_outer_ring(h in 3u32..30, w in 3u32..30) {
        // Ratio 0 gives one erosion, so only the border pixels remain.
        let m = vec![1u8; (h * w) as usize];
        let boundary = mask_to_boundary(&m, h, w, 0.0);
        let ones = boundary.iter().filter(|&&b| b == 1).count() as u32;
        prop_assert_eq!(ones, h * w - (h - 2) * (w - 2));
    }
}
