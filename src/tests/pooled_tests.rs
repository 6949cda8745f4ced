#[cfg(test)]
mod pooled_tests {
    use crate::config::ConsensusThresholds;
    use crate::counts::VariantType;
    use crate::pooled::*;
    use crate::tests::single_gene_map;
    use crate::{AlleleCountMap, GeneFilter};

    const ALT: (u32, u32) = (10, 0);
    const REF: (u32, u32) = (0, 10);

    fn four_sample_map() -> AlleleCountMap {
        single_gene_map(
            4,
            VariantType::FourD,
            &[
                &[ALT, REF, REF, REF],
                &[ALT, ALT, ALT, REF],
                &[ALT, ALT, REF, REF],
                &[ALT, ALT, ALT, ALT],
            ],
        )
    }

    #[test]
    fn test_pooled_counts_and_weighted_pi() {
        let map = four_sample_map();
        let thresholds = ConsensusThresholds::default();
        let all = calculate_pooled_counts(&map, None, &GeneFilter::all(), 1, &thresholds).unwrap();
        assert_eq!(all.minor_counts, vec![1, 1, 2]);
        let expected = 0.5 + 0.5 + 2.0 / 3.0;
        assert!((all.pi_weighted_number - expected).abs() < 1e-12);

        let common = calculate_pooled_counts(&map, None, &GeneFilter::all(), 2, &thresholds).unwrap();
        assert_eq!(common.minor_counts, vec![1, 1, 2]);
        assert!((common.pi_weighted_number - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_pooled_freqs_with_sample_mask() {
        let map = four_sample_map();
        let thresholds = ConsensusThresholds::default();
        let freqs = calculate_pooled_freqs(&map, None, &GeneFilter::all(), &thresholds).unwrap();
        assert_eq!(freqs, vec![0.25, 0.25, 0.5]);

        let mask = [true, true, false, false];
        let masked = calculate_pooled_freqs(&map, Some(&mask[..]), &GeneFilter::all(), &thresholds).unwrap();
        assert_eq!(masked, vec![0.5]);

        assert!(calculate_pooled_freqs(&map, Some(&[true][..]), &GeneFilter::all(), &thresholds).is_err());
    }

    #[test]
    fn test_singletons_list_minor_then_major_carriers() {
        let map = four_sample_map();
        let singletons =
            calculate_singletons(&map, None, &GeneFilter::all(), &ConsensusThresholds::default())
                .unwrap();
        assert_eq!(
            singletons,
            vec![(0, VariantType::FourD), (3, VariantType::FourD)]
        );
    }

    #[test]
    fn test_filtered_out_entries_contribute_nothing() {
        let map = four_sample_map();
        let filter = GeneFilter::variant_type(VariantType::OneD);
        let pooled =
            calculate_pooled_counts(&map, None, &filter, 1, &ConsensusThresholds::default()).unwrap();
        assert_eq!(pooled, PooledCounts::default());
    }
}
