#[cfg(test)]
mod pca_tests {
    use crate::config::ConsensusThresholds;
    use crate::counts::VariantType;
    use crate::error::StatsError;
    use crate::genotype::ConsensusGenotypes;
    use crate::pca::*;
    use crate::tests::single_gene_map;
    use crate::GeneFilter;
    use ndarray::{array, Array2};

    fn all_passed(genotypes: Array2<u8>) -> ConsensusGenotypes {
        let passed = Array2::from_elem(genotypes.dim(), true);
        ConsensusGenotypes { genotypes, passed }
    }

    #[test]
    fn test_two_groups_split_on_first_axis() {
        let calls = all_passed(array![[1, 1, 0, 0], [1, 1, 0, 0], [0, 0, 1, 1]]);
        let result = calculate_pca_coordinates(&calls).unwrap();

        assert!((result.variance_explained.0 - 1.0).abs() < 1e-9);
        assert!(result.variance_explained.1.abs() < 1e-9);
        assert!((result.eigenvalues[0] - 1.0).abs() < 1e-9);
        for j in 0..4 {
            assert!((result.pc1[j].abs() - 0.5).abs() < 1e-9);
            assert!(result.pc2[j].abs() < 1e-6);
        }
        assert!(result.pc1[0] * result.pc1[1] > 0.0);
        assert!(result.pc1[0] * result.pc1[2] < 0.0);
        assert!(result.pc1[2] * result.pc1[3] > 0.0);
    }

    #[test]
    fn test_covariance_normalizes_per_cell() {
        let calls = ConsensusGenotypes {
            genotypes: array![[1, 0, 0], [1, 1, 0]],
            passed: array![[true, true, false], [true, true, true]],
        };
        let covariance = genotype_covariance(&calls);
        // sample 2 only shares the second site with the others
        let second_site_mean = 2.0 / 3.0;
        let expected = (1.0 - second_site_mean) * (0.0 - second_site_mean);
        assert!((covariance[[0, 2]] - expected).abs() < 1e-12);
        assert!((covariance[[0, 2]] - covariance[[2, 0]]).abs() < 1e-12);
    }

    #[test]
    fn test_uncovered_sample_is_rejected() {
        let calls = ConsensusGenotypes {
            genotypes: array![[1, 0, 1], [0, 1, 0]],
            passed: array![[true, true, false], [true, true, false]],
        };
        match calculate_pca_coordinates(&calls) {
            Err(StatsError::UncoveredSamples(samples)) => assert_eq!(samples, vec![2]),
            other => panic!("expected UncoveredSamples, got {:?}", other),
        }
    }

    #[test]
    fn test_pairs_without_joint_coverage_get_zero_covariance() {
        // samples 0 and 2 never share a covered site
        let calls = ConsensusGenotypes {
            genotypes: array![[1, 0, 0], [0, 1, 1]],
            passed: array![[true, true, false], [false, true, true]],
        };
        assert_eq!(uncovered_sample_pairs(&calls), vec![(0, 2)]);
        assert!(uncovered_sample_pairs(&all_passed(array![[1, 0], [0, 1]])).is_empty());

        let covariance = genotype_covariance(&calls);
        assert_eq!(covariance[[0, 2]], 0.0);
        assert_eq!(covariance[[2, 0]], 0.0);
        let result = calculate_pca_coordinates(&calls).unwrap();
        assert_eq!(result.pc1.len(), 3);
    }

    #[test]
    fn test_too_few_samples() {
        let empty = all_passed(Array2::zeros((3, 0)));
        assert!(matches!(
            calculate_pca_coordinates(&empty),
            Err(StatsError::EmptySampleSet(_))
        ));
        let single = all_passed(array![[1], [0]]);
        assert!(matches!(
            calculate_pca_coordinates(&single),
            Err(StatsError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_collect_polymorphic_genotypes_stacks_genes() {
        let map = single_gene_map(
            3,
            VariantType::FourD,
            &[
                &[(10, 0), (0, 10), (0, 10)],
                &[(10, 0), (10, 0), (10, 0)],
                &[(0, 10), (10, 0), (9, 1)],
            ],
        );
        let calls =
            collect_polymorphic_genotypes(&map, &GeneFilter::all(), &ConsensusThresholds::default())
                .unwrap();
        assert_eq!(calls.genotypes, array![[1u8, 0, 0], [0, 1, 1]]);

        let none = collect_polymorphic_genotypes(
            &map,
            &GeneFilter::variant_type(VariantType::OneD),
            &ConsensusThresholds::default(),
        )
        .unwrap();
        assert_eq!(none.num_sites(), 0);
        assert_eq!(none.num_samples(), 3);
    }
}
