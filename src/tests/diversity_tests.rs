#[cfg(test)]
mod diversity_tests {
    use crate::counts::{AlleleCountMap, GeneVariantData, Location, SiteData, VariantType};
    use crate::diversity::*;
    use crate::tests::{counts, single_gene_map};
    use crate::GeneFilter;
    use ndarray::{array, Array2};

    const EPS: f64 = 1e-12;

    #[test]
    fn test_within_sample_pi_uses_sampling_without_replacement() {
        let tensor = counts(&[&[(3, 1), (2, 2), (0, 0), (1, 0)]]);
        let pi = within_sample_pi(&tensor);
        assert!((pi[[0, 0]] - 0.5).abs() < EPS);
        assert!((pi[[0, 1]] - 2.0 / 3.0).abs() < EPS);
        // uncovered and single-read cells have no diversity
        assert_eq!(pi[[0, 2]], 0.0);
        assert_eq!(pi[[0, 3]], 0.0);
    }

    #[test]
    fn test_diagonal_is_within_sample_estimate() {
        let tensor = counts(&[&[(3, 1), (2, 2)]]);
        let (pi, avg_pi) = gene_pi_matrices(&tensor);
        let within = within_sample_pi(&tensor);

        assert!((pi[[0, 0]] - within[[0, 0]]).abs() < EPS);
        assert!((pi[[1, 1]] - within[[0, 1]]).abs() < EPS);
        // cross-sample formula: 1 - (0.75 * 0.5 + 0.25 * 0.5)
        assert!((pi[[0, 1]] - 0.5).abs() < EPS);
        assert!((pi[[1, 0]] - 0.5).abs() < EPS);
        assert!((avg_pi[[0, 1]] - 7.0 / 12.0).abs() < EPS);
    }

    #[test]
    fn test_identical_frequencies_bound_between_sample_pi() {
        let tensor = counts(&[&[(3, 1), (6, 2)], &[(1, 3), (2, 6)], &[(8, 2), (4, 1)]]);
        let (pi, _) = gene_pi_matrices(&tensor);
        let average_self = (pi[[0, 0]] + pi[[1, 1]]) / 2.0;
        assert!(pi[[0, 1]] <= average_self + EPS);
    }

    #[test]
    fn test_empty_entries_still_add_passed_sites() {
        let mut map = single_gene_map(2, VariantType::FourD, &[&[(3, 1), (0, 0)], &[(1, 1), (2, 0)]]);
        map.insert(
            "gene_2",
            VariantType::FourD,
            GeneVariantData {
                passed_sites: Array2::from_elem((2, 2), 5.0),
                sites: SiteData::Empty,
            },
        )
        .unwrap();

        let result = calculate_pi_matrix(&map, &GeneFilter::all());
        assert_eq!(result.passed_sites, array![[7.0, 6.0], [6.0, 6.0]]);
    }

    #[test]
    fn test_gene_filter_restricts_accumulation() {
        let map = single_gene_map(2, VariantType::OneD, &[&[(3, 1), (2, 2)]]);
        let result = calculate_pi_matrix(&map, &GeneFilter::variant_type(VariantType::FourD));
        assert_eq!(result, PiMatrices::zeros(2));
    }

    #[test]
    fn test_normalize_by_passed_sites() {
        let values = array![[2.0, 4.0], [6.0, 8.0]];
        let passed = array![[2.0, 0.0], [3.0, 1.0]];
        let normalized = normalize_by_passed_sites(&values, &passed, 2.0);
        assert_eq!(normalized, array![[1.0, 0.0], [2.0, 0.0]]);

        let no_minimum = normalize_by_passed_sites(&values, &passed, 0.0);
        assert_eq!(no_minimum[[0, 1]], 0.0);
        assert_eq!(no_minimum[[1, 1]], 8.0);
    }

    #[test]
    fn test_sample_freqs_fold_and_skip_zero() {
        let samples = vec!["a".to_string(), "b".to_string()];
        let mut map = AlleleCountMap::new(samples);
        let entry = GeneVariantData::from_sites(
            vec![Location::new("c", 1), Location::new("c", 2)],
            counts(&[&[(9, 1), (0, 4)], &[(0, 5), (1, 3)]]),
        )
        .unwrap();
        map.insert("g", VariantType::FourD, entry).unwrap();

        let unfolded = calculate_sample_freqs(&map, &GeneFilter::all(), false);
        assert_eq!(unfolded.freqs[0], vec![0.9]);
        assert_eq!(unfolded.freqs[1], vec![0.25]);
        assert_eq!(unfolded.passed_sites, array![2.0, 2.0]);

        let folded = calculate_sample_freqs(&map, &GeneFilter::all(), true);
        assert!((folded.freqs[0][0] - 0.1).abs() < EPS);
    }
}
