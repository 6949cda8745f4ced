//! Phylogenetic consistency of polymorphisms with a clustering of samples.
//!
//! A site is polymorphic within a cluster when the cluster holds both a
//! reference and an alternate consensus call. It is inconsistent when it is
//! also polymorphic in the cluster's complement, i.e. the same variant shows
//! up independently on both sides of the split.

use std::collections::BTreeMap;

use log::{debug, info, warn};
use rand::seq::SliceRandom;
use rand::Rng;

use crate::config::ConsensusThresholds;
use crate::counts::{AlleleCountMap, GeneFilter, VariantType};
use crate::error::{Result, StatsError};
use crate::genotype::calculate_consensus_genotypes;

/// Clusters paired with their anticlusters (coarse-grained samples outside the cluster).
#[derive(Debug, Clone, PartialEq)]
pub struct Partition {
    clusters: Vec<Vec<bool>>,
    anticlusters: Vec<Vec<bool>>,
}

/// Outcome of testing one site against every cluster.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SiteClass {
    pub polymorphic: bool,
    pub inconsistent: bool,
}

fn polymorphic_in(mask: &[bool], alt: &[bool], passed: &[bool]) -> bool {
    let mut carriers = 0usize;
    let mut called = 0usize;
    for ((&member, &is_alt), &is_passed) in mask.iter().zip(alt).zip(passed) {
        if member && is_passed {
            called += 1;
            if is_alt {
                carriers += 1;
            }
        }
    }
    carriers >= 1 && carriers + 1 <= called
}

impl Partition {
    pub fn new(clusters: &[Vec<bool>], coarse_grained: &[bool]) -> Result<Self> {
        let n = coarse_grained.len();
        for cluster in clusters {
            StatsError::check_samples("cluster mask", n, cluster.len())?;
        }
        let anticlusters = clusters
            .iter()
            .map(|cluster| {
                cluster
                    .iter()
                    .zip(coarse_grained)
                    .map(|(&inside, &kept)| kept && !inside)
                    .collect()
            })
            .collect();
        Ok(Partition {
            clusters: clusters.to_vec(),
            anticlusters,
        })
    }

    pub fn num_samples(&self) -> usize {
        self.clusters.first().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }

    /// Classifies one site from its per-sample alternate calls and pass flags.
    pub fn classify(&self, alt: &[bool], passed: &[bool]) -> SiteClass {
        let mut class = SiteClass::default();
        for (cluster, anticluster) in self.clusters.iter().zip(&self.anticlusters) {
            if polymorphic_in(cluster, alt, passed) {
                class.polymorphic = true;
                if polymorphic_in(anticluster, alt, passed) {
                    class.inconsistent = true;
                }
            }
        }
        class
    }
}

/// Shuffles a site's calls across samples until some cluster sees a polymorphism.
///
/// `order` is reshuffled in place on every attempt, so successive attempts
/// continue from the previous permutation. Returns whether the accepted
/// shuffle is inconsistent, or `None` once `max_attempts` shuffles all failed.
pub fn permute_until_polymorphic<R: Rng + ?Sized>(
    alt: &[bool],
    passed: &[bool],
    partition: &Partition,
    order: &mut [usize],
    max_attempts: usize,
    rng: &mut R,
) -> Option<bool> {
    let mut permuted_alt = vec![false; alt.len()];
    let mut permuted_passed = vec![false; passed.len()];
    for _ in 0..max_attempts {
        order.shuffle(rng);
        for (k, &source) in order.iter().enumerate() {
            permuted_alt[k] = alt[source];
            permuted_passed[k] = passed[source];
        }
        let class = partition.classify(&permuted_alt, &permuted_passed);
        if class.polymorphic {
            return Some(class.inconsistent);
        }
    }
    None
}

/// Folded population frequencies and per-variant-type tallies of the consistency test.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConsistencyReport {
    /// Sites polymorphic in some cluster whose minor allele has a single carrier.
    pub singleton_freqs: Vec<f64>,
    /// Sites polymorphic in some cluster with at least two minor-allele carriers.
    pub polymorphic_freqs: Vec<f64>,
    pub inconsistent_freqs: Vec<f64>,
    /// Informative polymorphic sites whose accepted shuffle was inconsistent.
    pub null_inconsistent_freqs: Vec<f64>,
    pub singleton_counts: BTreeMap<VariantType, usize>,
    pub polymorphic_counts: BTreeMap<VariantType, usize>,
    pub inconsistent_counts: BTreeMap<VariantType, usize>,
    pub null_inconsistent_counts: BTreeMap<VariantType, usize>,
    /// Sites for which no shuffle within the attempt cap reproduced a polymorphism.
    pub null_exhausted: usize,
}

impl ConsistencyReport {
    fn with_variant_types(types: &[VariantType]) -> Self {
        let zeros: BTreeMap<VariantType, usize> = types.iter().map(|&vt| (vt, 0)).collect();
        ConsistencyReport {
            singleton_counts: zeros.clone(),
            polymorphic_counts: zeros.clone(),
            inconsistent_counts: zeros.clone(),
            null_inconsistent_counts: zeros,
            ..ConsistencyReport::default()
        }
    }

    /// Fraction of informative polymorphic sites that are inconsistent.
    pub fn inconsistency_rate(&self) -> Option<f64> {
        let total = self.polymorphic_freqs.len();
        (total > 0).then(|| self.inconsistent_freqs.len() as f64 / total as f64)
    }

    /// Same fraction under the shuffled null, over sites where a shuffle was accepted.
    pub fn null_inconsistency_rate(&self) -> Option<f64> {
        let total = self.polymorphic_freqs.len().saturating_sub(self.null_exhausted);
        (total > 0).then(|| self.null_inconsistent_freqs.len() as f64 / total as f64)
    }
}

fn bump(counts: &mut BTreeMap<VariantType, usize>, variant_type: VariantType) {
    *counts.entry(variant_type).or_insert(0) += 1;
}

/// Tests every selected site for consistency with `clusters`, with a permutation null.
///
/// `clusters` are membership masks over all samples and `coarse_grained` marks
/// the representatives that make up each cluster's complement. The null draw
/// for an informative site uses `rng` and at most `max_attempts` shuffles.
pub fn calculate_phylogenetic_consistency<R: Rng + ?Sized>(
    map: &AlleleCountMap,
    filter: &GeneFilter,
    clusters: &[Vec<bool>],
    coarse_grained: &[bool],
    thresholds: &ConsensusThresholds,
    max_attempts: usize,
    rng: &mut R,
) -> Result<ConsistencyReport> {
    let n = map.num_samples();
    StatsError::check_samples("coarse-grained mask", n, coarse_grained.len())?;
    let partition = Partition::new(clusters, coarse_grained)?;

    let variant_types: Vec<VariantType> = match &filter.variant_types {
        Some(types) => types.iter().copied().collect(),
        None => VariantType::ALL.to_vec(),
    };
    let mut report = ConsistencyReport::with_variant_types(&variant_types);
    if partition.is_empty() {
        warn!("No clusters supplied; every site is trivially consistent");
        return Ok(report);
    }

    for ((gene, variant_type), entry) in map.select(filter) {
        let Some(counts) = entry.sites.counts() else {
            continue;
        };
        let calls = calculate_consensus_genotypes(counts, thresholds);
        let prevalences = calls.prevalences();
        let passed_counts = calls.passed_counts();

        for site in 0..calls.num_sites() {
            let alt: Vec<bool> = (0..n).map(|j| calls.is_alt(site, j)).collect();
            let passed: Vec<bool> = (0..n).map(|j| calls.passed[[site, j]]).collect();
            let class = partition.classify(&alt, &passed);
            if !class.polymorphic {
                continue;
            }

            let (prevalence, called) = (prevalences[site], passed_counts[site]);
            let minor = prevalence.min(called - prevalence);
            let freq = prevalence as f64 / called as f64;
            let freq = freq.min(1.0 - freq);

            if class.inconsistent {
                report.inconsistent_freqs.push(freq);
                bump(&mut report.inconsistent_counts, *variant_type);
            }
            if minor == 1 {
                report.singleton_freqs.push(freq);
                bump(&mut report.singleton_counts, *variant_type);
                continue;
            }
            if minor < 2 {
                continue;
            }
            report.polymorphic_freqs.push(freq);
            bump(&mut report.polymorphic_counts, *variant_type);

            let mut order: Vec<usize> = (0..n).collect();
            match permute_until_polymorphic(&alt, &passed, &partition, &mut order, max_attempts, rng) {
                Some(true) => {
                    report.null_inconsistent_freqs.push(freq);
                    bump(&mut report.null_inconsistent_counts, *variant_type);
                }
                Some(false) => {}
                None => {
                    report.null_exhausted += 1;
                    warn!(
                        "No polymorphic shuffle within {} attempts for {} {} site {}",
                        max_attempts, gene, variant_type, site
                    );
                }
            }
        }
        debug!("Consistency pass over {} {} done", gene, variant_type);
    }

    info!(
        "Consistency: {} singletons, {} informative polymorphisms, {} inconsistent, {} inconsistent under the null",
        report.singleton_freqs.len(),
        report.polymorphic_freqs.len(),
        report.inconsistent_freqs.len(),
        report.null_inconsistent_freqs.len()
    );
    Ok(report)
}
