//! Population-level summaries of consensus calls pooled across samples.

use log::debug;

use crate::config::ConsensusThresholds;
use crate::counts::{AlleleCountMap, AlleleCounts, GeneFilter, VariantType};
use crate::error::Result;
use crate::genotype::{calculate_consensus_genotypes, is_polymorphic, ConsensusGenotypes};

/// Minor-allele counts of polymorphic sites plus the matching π numerator.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PooledCounts {
    pub minor_counts: Vec<usize>,
    /// Σ k(n-k)·2/(n(n-1)) over sites whose minor count reaches `pi_min_k`.
    pub pi_weighted_number: f64,
}

fn genotypes_for(
    counts: &AlleleCounts,
    sample_mask: Option<&[bool]>,
    thresholds: &ConsensusThresholds,
) -> Result<ConsensusGenotypes> {
    match sample_mask {
        Some(mask) => Ok(calculate_consensus_genotypes(
            &counts.select_samples(mask)?,
            thresholds,
        )),
        None => Ok(calculate_consensus_genotypes(counts, thresholds)),
    }
}

/// Folded pooled consensus frequency of every polymorphic site.
pub fn calculate_pooled_freqs(
    map: &AlleleCountMap,
    sample_mask: Option<&[bool]>,
    filter: &GeneFilter,
    thresholds: &ConsensusThresholds,
) -> Result<Vec<f64>> {
    let mut pooled_freqs = Vec::new();
    for (_, entry) in map.select(filter) {
        let Some(counts) = entry.sites.counts() else {
            continue;
        };
        let genotypes = genotypes_for(counts, sample_mask, thresholds)?;
        for (prevalence, passed) in genotypes
            .prevalences()
            .into_iter()
            .zip(genotypes.passed_counts())
        {
            if is_polymorphic(prevalence, passed) {
                let freq = prevalence as f64 / passed as f64;
                pooled_freqs.push(freq.min(1.0 - freq));
            }
        }
    }
    Ok(pooled_freqs)
}

pub fn calculate_pooled_counts(
    map: &AlleleCountMap,
    sample_mask: Option<&[bool]>,
    filter: &GeneFilter,
    pi_min_k: usize,
    thresholds: &ConsensusThresholds,
) -> Result<PooledCounts> {
    let mut pooled = PooledCounts::default();
    for (_, entry) in map.select(filter) {
        let Some(counts) = entry.sites.counts() else {
            continue;
        };
        let genotypes = genotypes_for(counts, sample_mask, thresholds)?;
        for (k, n) in genotypes
            .prevalences()
            .into_iter()
            .zip(genotypes.passed_counts())
        {
            if !is_polymorphic(k, n) {
                continue;
            }
            let minor_k = k.min(n - k);
            pooled.minor_counts.push(minor_k);
            if minor_k >= pi_min_k {
                let (k, n) = (k as f64, n as f64);
                pooled.pi_weighted_number += k * (n - k) * 2.0 / (n * (n - 1.0));
            }
        }
    }
    debug!(
        "Pooled {} polymorphic sites, weighted pi {}",
        pooled.minor_counts.len(),
        pooled.pi_weighted_number
    );
    Ok(pooled)
}

/// Carrier of every singleton: the lone alt call when prevalence is 1, the lone
/// ref call when prevalence is n-1. Sample indices refer to the masked sample axis.
pub fn calculate_singletons(
    map: &AlleleCountMap,
    sample_mask: Option<&[bool]>,
    filter: &GeneFilter,
    thresholds: &ConsensusThresholds,
) -> Result<Vec<(usize, VariantType)>> {
    let mut singletons = Vec::new();
    for ((_, variant_type), entry) in map.select(filter) {
        let Some(counts) = entry.sites.counts() else {
            continue;
        };
        let genotypes = genotypes_for(counts, sample_mask, thresholds)?;
        let prevalences = genotypes.prevalences();
        let passed_counts = genotypes.passed_counts();

        let mut minor = Vec::new();
        let mut major = Vec::new();
        for site in 0..genotypes.num_sites() {
            let (k, n) = (prevalences[site], passed_counts[site]);
            for sample in 0..genotypes.num_samples() {
                if !genotypes.passed[[site, sample]] {
                    continue;
                }
                let is_alt = genotypes.genotypes[[site, sample]] == 1;
                if k == 1 && is_alt {
                    minor.push(sample);
                }
                if n >= 1 && k == n - 1 && !is_alt {
                    major.push(sample);
                }
            }
        }
        singletons.extend(minor.into_iter().map(|s| (s, *variant_type)));
        singletons.extend(major.into_iter().map(|s| (s, *variant_type)));
    }
    Ok(singletons)
}
