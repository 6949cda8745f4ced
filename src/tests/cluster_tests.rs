#[cfg(test)]
mod cluster_tests {
    use crate::cluster::*;
    use crate::error::StatsError;
    use ndarray::{array, Array2};

    fn two_groups() -> Array2<f64> {
        array![
            [0.0, 1.0, 10.0, 10.0],
            [1.0, 0.0, 10.0, 10.0],
            [10.0, 10.0, 0.0, 1.0],
            [10.0, 10.0, 1.0, 0.0],
        ]
    }

    #[test]
    fn test_condensed_distances() {
        let condensed = condensed_distances(&two_groups()).unwrap();
        assert_eq!(condensed, vec![1.0, 10.0, 10.0, 10.0, 10.0, 1.0]);

        let mut bad = two_groups();
        bad[[0, 3]] = f64::NAN;
        assert!(matches!(
            condensed_distances(&bad),
            Err(StatsError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_average_linkage_heights() {
        // d01 = 2, d02 = 6, d12 = 4
        let dendrogram = average_linkage(&[2.0, 6.0, 4.0], 3).unwrap();
        assert_eq!(dendrogram.num_leaves, 3);
        assert_eq!(
            dendrogram.merges,
            vec![
                Merge { left: 0, right: 1, height: 2.0, size: 2 },
                Merge { left: 2, right: 3, height: 5.0, size: 3 },
            ]
        );
        assert_eq!(dendrogram.cut(1.0), vec![0, 1, 2]);
        assert_eq!(dendrogram.cut(2.0), vec![0, 0, 1]);
        assert_eq!(dendrogram.cut(5.0), vec![0, 0, 0]);
    }

    #[test]
    fn test_two_groups_at_several_cutoffs() {
        let result = cluster_samples(&two_groups(), 0.0, &[5.0, 20.0, 0.5]).unwrap();
        assert_eq!(result.coarse_grained, vec![true; 4]);
        assert_eq!(
            result.clusters[0],
            vec![
                vec![false, false, true, true],
                vec![true, true, false, false],
            ]
        );
        assert_eq!(result.clusters[1], vec![vec![true; 4]]);
        assert!(result.clusters[2].is_empty());
    }

    #[test]
    fn test_coarse_graining_keeps_first_member() {
        let result = cluster_samples(&two_groups(), 2.0, &[5.0, 20.0]).unwrap();
        assert_eq!(result.coarse_grained, vec![true, false, true, false]);
        // each group now has a single representative
        assert!(result.clusters[0].is_empty());
        assert_eq!(result.clusters[1], vec![vec![true, false, true, false]]);
    }

    #[test]
    fn test_larger_clusters_come_first() {
        let distance = array![
            [0.0, 9.0, 9.0, 9.0, 9.0],
            [9.0, 0.0, 9.0, 9.0, 9.0],
            [9.0, 9.0, 0.0, 1.0, 1.0],
            [9.0, 9.0, 1.0, 0.0, 1.0],
            [9.0, 9.0, 1.0, 1.0, 0.0],
        ];
        let result = cluster_samples(&distance, 0.0, &[2.0]).unwrap();
        assert_eq!(result.clusters[0], vec![vec![false, false, true, true, true]]);
    }

    #[test]
    fn test_equal_sized_clusters_put_later_members_first() {
        // three pairs of equal size: {0, 1}, {2, 3}, {4, 5}
        let mut distance = Array2::from_elem((6, 6), 10.0);
        distance.diag_mut().fill(0.0);
        for (i, j) in [(0, 1), (2, 3), (4, 5)] {
            distance[[i, j]] = 1.0;
            distance[[j, i]] = 1.0;
        }
        let result = cluster_samples(&distance, 0.0, &[2.0]).unwrap();
        let first_members: Vec<usize> = result.clusters[0]
            .iter()
            .map(|mask| mask.iter().position(|&m| m).unwrap())
            .collect();
        assert_eq!(first_members, vec![4, 2, 0]);
    }

    #[test]
    fn test_invalid_matrices() {
        let empty = Array2::<f64>::zeros((0, 0));
        assert!(matches!(
            cluster_samples(&empty, 0.0, &[1.0]),
            Err(StatsError::EmptySampleSet(_))
        ));
        let rectangular = Array2::<f64>::zeros((2, 3));
        assert!(matches!(
            cluster_samples(&rectangular, 0.0, &[1.0]),
            Err(StatsError::ShapeMismatch { .. })
        ));
    }
}
