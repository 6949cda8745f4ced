#[cfg(test)]
mod haploid_tests {
    use crate::config::StatsConfig;
    use crate::counts::CoverageHistogram;
    use crate::haploid::*;
    use crate::sfs::SfsMap;
    use std::collections::BTreeMap;

    fn histogram(depth: u32) -> CoverageHistogram {
        CoverageHistogram::new(BTreeMap::from([(0, 1000), (depth, 10)]))
    }

    fn fixture() -> (Vec<String>, BTreeMap<String, CoverageHistogram>, BTreeMap<String, SfsMap>) {
        let samples: Vec<String> = ["s1", "s2", "s3", "s4"].iter().map(|s| s.to_string()).collect();
        let histograms = BTreeMap::from([
            ("s1".to_string(), histogram(30)),
            ("s2".to_string(), histogram(30)),
            ("s3".to_string(), histogram(5)),
            ("s4".to_string(), histogram(30)),
        ]);

        // s1 differs from the population but is never polymorphic itself
        let mut s1 = SfsMap::new();
        s1.add(20, 20, 5.0, 0.0).unwrap();
        // s2 is intermediate everywhere
        let mut s2 = SfsMap::new();
        s2.add(20, 10, 5.0, 0.0).unwrap();
        let mut s3 = SfsMap::new();
        s3.add(5, 5, 5.0, 0.0).unwrap();
        // s4 has no SFS map
        let sfs_maps = BTreeMap::from([
            ("s1".to_string(), s1),
            ("s2".to_string(), s2),
            ("s3".to_string(), s3),
        ]);
        (samples, histograms, sfs_maps)
    }

    #[test]
    fn test_coverage_filter_keeps_sample_order() {
        let (samples, histograms, _) = fixture();
        assert_eq!(
            samples_above_coverage(&samples, &histograms, 20.0),
            vec!["s1", "s2", "s4"]
        );
        assert!(samples_above_coverage(&["missing".to_string()], &histograms, 1.0).is_empty());
    }

    #[test]
    fn test_haploid_classification() {
        let (samples, histograms, sfs_maps) = fixture();
        let haploid = classify_haploid_samples(&samples, &histograms, &sfs_maps, &StatsConfig::default());
        assert_eq!(haploid, vec!["s1"]);
    }

    #[test]
    fn test_low_pi_classification() {
        let (samples, histograms, sfs_maps) = fixture();
        let low_pi = classify_low_pi_samples(&samples, &histograms, &sfs_maps, &StatsConfig::default());
        assert_eq!(low_pi, vec!["s1"]);
    }

    #[test]
    fn test_samples_without_synonymous_sites_are_not_classified() {
        let samples = vec!["s0".to_string()];
        let histograms = BTreeMap::from([("s0".to_string(), histogram(50))]);
        let sfs_maps = BTreeMap::from([("s0".to_string(), SfsMap::new())]);
        let config = StatsConfig::default();

        assert!(classify_haploid_samples(&samples, &histograms, &sfs_maps, &config).is_empty());
        assert!(classify_low_pi_samples(&samples, &histograms, &sfs_maps, &config).is_empty());
    }

    #[test]
    fn test_no_between_sample_differences_is_not_haploid() {
        // covered, but always carrying the population's majority allele
        let samples = vec!["s0".to_string()];
        let histograms = BTreeMap::from([("s0".to_string(), histogram(50))]);
        let mut map = SfsMap::new();
        map.add(20, 0, 8.0, 0.0).unwrap();
        let sfs_maps = BTreeMap::from([("s0".to_string(), map)]);
        let config = StatsConfig::default();

        assert!(classify_haploid_samples(&samples, &histograms, &sfs_maps, &config).is_empty());
        assert_eq!(
            classify_low_pi_samples(&samples, &histograms, &sfs_maps, &config),
            vec!["s0"]
        );
    }
}
