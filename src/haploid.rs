use std::collections::BTreeMap;

use log::{debug, info, warn};

use crate::config::StatsConfig;
use crate::counts::CoverageHistogram;
use crate::sfs::{calculate_pi_from_sfs_map, calculate_polymorphism_rates_from_sfs_map, SfsMap};

/// Samples (in `samples` order) whose non-zero median coverage is at least `min_coverage`.
///
/// A sample without a histogram has median coverage 0.
pub fn samples_above_coverage(
    samples: &[String],
    histograms: &BTreeMap<String, CoverageHistogram>,
    min_coverage: f64,
) -> Vec<String> {
    samples
        .iter()
        .filter(|sample| {
            let median = histograms
                .get(sample.as_str())
                .map_or(0.0, CoverageHistogram::nonzero_median);
            debug!("{}: median coverage {}", sample, median);
            median >= min_coverage
        })
        .cloned()
        .collect()
}

/// Samples that look like a single dominant strain.
///
/// Among samples with enough coverage, a sample is haploid when its
/// within-sample polymorphism rate is at most
/// `threshold_within_between_fraction` times its between-sample rate.
/// Samples without an SFS map, or whose map shows no between-sample
/// differences, cannot be classified and are skipped.
pub fn classify_haploid_samples(
    samples: &[String],
    histograms: &BTreeMap<String, CoverageHistogram>,
    sfs_maps: &BTreeMap<String, SfsMap>,
    config: &StatsConfig,
) -> Vec<String> {
    let covered = samples_above_coverage(samples, histograms, config.min_median_coverage);
    let mut haploid = Vec::new();
    for sample in covered {
        let Some(sfs_map) = sfs_maps.get(&sample) else {
            warn!("No SFS map for {}; skipping haploid classification", sample);
            continue;
        };
        let rates = calculate_polymorphism_rates_from_sfs_map(sfs_map, &config.consensus);
        if rates.total_sites == 0.0 || rates.between == 0.0 {
            warn!(
                "{}: {} synonymous sites and no between-sample differences; skipping haploid classification",
                sample, rates.total_sites
            );
            continue;
        }
        if rates.within <= config.threshold_within_between_fraction * rates.between {
            haploid.push(sample);
        }
    }
    info!(
        "{} of {} samples classified as haploid",
        haploid.len(),
        samples.len()
    );
    haploid
}

/// Older criterion: enough coverage and within-sample π at most `threshold_pi`.
///
/// Samples whose SFS map is missing or empty are skipped.
pub fn classify_low_pi_samples(
    samples: &[String],
    histograms: &BTreeMap<String, CoverageHistogram>,
    sfs_maps: &BTreeMap<String, SfsMap>,
    config: &StatsConfig,
) -> Vec<String> {
    samples_above_coverage(samples, histograms, config.min_median_coverage)
        .into_iter()
        .filter(|sample| match sfs_maps.get(sample) {
            Some(map) if map.total_sites() > 0.0 => {
                calculate_pi_from_sfs_map(map) <= config.threshold_pi
            }
            _ => {
                warn!("No synonymous sites for {}; skipping low-pi classification", sample);
                false
            }
        })
        .collect()
}
