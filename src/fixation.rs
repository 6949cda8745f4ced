//! Fixed differences, mutation/reversion splits and new polymorphisms between samples.
//!
//! All accumulators start at zero and add one gene entry at a time, so results
//! from disjoint gene sets can simply be summed.

use log::{info, warn};
use ndarray::Array2;
use rayon::prelude::*;

use crate::config::{ConsensusThresholds, StatsConfig};
use crate::counts::{AlleleCountMap, AlleleCounts, GeneFilter, GeneVariantData, Location, VariantType};
use crate::error::{Result, StatsError};

/// Fixed-difference counts and the sites usable for calling them.
#[derive(Debug, Clone, PartialEq)]
pub struct FixationMatrices {
    pub fixations: Array2<f64>,
    /// Jointly covered sites minus those intermediate in either sample.
    pub passed_sites: Array2<f64>,
}

/// Distance given to sample pairs without any passed site.
pub const UNCOVERED_DISTANCE: f64 = 1.0;

impl FixationMatrices {
    /// Fixed differences per passed site, usable as a clustering distance.
    ///
    /// Off-diagonal pairs with no passed site get [`UNCOVERED_DISTANCE`], the
    /// largest rate possible. The diagonal is 0.
    pub fn distance_matrix(&self) -> Array2<f64> {
        let distance = Array2::from_shape_fn(self.fixations.dim(), |(i, j)| {
            let passed = self.passed_sites[[i, j]];
            if i == j {
                0.0
            } else if passed > 0.0 {
                self.fixations[[i, j]] / passed
            } else {
                UNCOVERED_DISTANCE
            }
        });
        let uncovered = self.passed_sites.iter().filter(|&&p| p <= 0.0).count();
        if uncovered > 0 {
            warn!(
                "{} matrix cells have no passed sites; using distance {}",
                uncovered, UNCOVERED_DISTANCE
            );
        }
        distance
    }
}

/// Fixed differences split by direction. Entry `[i, j]` looks from sample i to sample j.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationReversionMatrices {
    /// Sites where f_j - f_i >= min_change.
    pub mutations: Array2<f64>,
    /// Sites where f_j - f_i <= -min_change.
    pub reversions: Array2<f64>,
    pub passed_sites: Array2<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewSnpMatrices {
    pub new_snps: Array2<f64>,
    pub passed_sites: Array2<f64>,
}

/// One site whose frequency changed by at least the requested amount between two samples.
#[derive(Debug, Clone, PartialEq)]
pub struct SnpChange {
    pub gene: String,
    pub variant_type: VariantType,
    pub location: Location,
    /// (alt, depth) in the first sample.
    pub counts_i: (u32, u32),
    /// (alt, depth) in the second sample.
    pub counts_j: (u32, u32),
}

/// Per-gene frequency view shared by the pairwise accumulators.
struct GeneFreqs {
    freqs: Array2<f64>,
    covered: Array2<bool>,
}

impl GeneFreqs {
    fn new(counts: &AlleleCounts) -> Self {
        GeneFreqs {
            freqs: counts.alt_freqs(),
            covered: counts.depths().mapv(|d| d > 0),
        }
    }

    fn both_covered(&self, site: usize, i: usize, j: usize) -> bool {
        self.covered[[site, i]] && self.covered[[site, j]]
    }
}

/// Visits every gene entry in parallel and sums the matrices each one yields.
fn accumulate_over_genes<const K: usize, F>(
    map: &AlleleCountMap,
    filter: &GeneFilter,
    per_gene: F,
) -> [Array2<f64>; K]
where
    F: Fn(&GeneVariantData) -> [Array2<f64>; K] + Sync,
{
    let zeros = || -> [Array2<f64>; K] { std::array::from_fn(|_| map.zero_matrix()) };
    map.select(filter)
        .par_iter()
        .map(|(_, entry)| per_gene(entry))
        .reduce(zeros, |mut acc, other| {
            for (a, o) in acc.iter_mut().zip(other.iter()) {
                *a += o;
            }
            acc
        })
}

/// Counts sites whose alt frequency differs by at least `min_change` between two samples.
///
/// Only sites covered in both samples and intermediate in neither are counted.
/// The passed-sites total starts from each entry's passed-sites matrix and
/// drops every jointly covered site that is intermediate in either sample.
pub fn calculate_fixation_matrix(
    map: &AlleleCountMap,
    filter: &GeneFilter,
    thresholds: &ConsensusThresholds,
    min_change: f64,
) -> FixationMatrices {
    let n = map.num_samples();
    let [fixations, passed_sites] = accumulate_over_genes(map, filter, |entry| {
        let mut fixations = Array2::<f64>::zeros((n, n));
        let mut passed = entry.passed_sites.clone();
        if let Some(counts) = entry.sites.counts() {
            let gene = GeneFreqs::new(counts);
            for site in 0..counts.num_sites() {
                for i in 0..n {
                    for j in 0..n {
                        if !gene.both_covered(site, i, j) {
                            continue;
                        }
                        let (f_i, f_j) = (gene.freqs[[site, i]], gene.freqs[[site, j]]);
                        if thresholds.is_intermediate(f_i) || thresholds.is_intermediate(f_j) {
                            passed[[i, j]] -= 1.0;
                        } else if (f_i - f_j).abs() >= min_change {
                            fixations[[i, j]] += 1.0;
                        }
                    }
                }
            }
        }
        [fixations, passed]
    });
    info!(
        "Fixation matrix accumulated over {} samples, {} total fixed differences",
        n,
        fixations.sum() / 2.0
    );
    FixationMatrices {
        fixations,
        passed_sites,
    }
}

/// Like [`calculate_fixation_matrix`], split by the sign of f_j - f_i.
pub fn calculate_fixation_matrix_mutation_reversion(
    map: &AlleleCountMap,
    filter: &GeneFilter,
    thresholds: &ConsensusThresholds,
    min_change: f64,
) -> MutationReversionMatrices {
    let n = map.num_samples();
    let [mutations, reversions, passed_sites] = accumulate_over_genes(map, filter, |entry| {
        let mut mutations = Array2::<f64>::zeros((n, n));
        let mut reversions = Array2::<f64>::zeros((n, n));
        let mut passed = entry.passed_sites.clone();
        if let Some(counts) = entry.sites.counts() {
            let gene = GeneFreqs::new(counts);
            for site in 0..counts.num_sites() {
                for i in 0..n {
                    for j in 0..n {
                        if !gene.both_covered(site, i, j) {
                            continue;
                        }
                        let (f_i, f_j) = (gene.freqs[[site, i]], gene.freqs[[site, j]]);
                        if thresholds.is_intermediate(f_i) || thresholds.is_intermediate(f_j) {
                            passed[[i, j]] -= 1.0;
                            continue;
                        }
                        let delta = f_j - f_i;
                        if delta >= min_change {
                            mutations[[i, j]] += 1.0;
                        } else if delta <= -min_change {
                            reversions[[i, j]] += 1.0;
                        }
                    }
                }
            }
        }
        [mutations, reversions, passed]
    });
    MutationReversionMatrices {
        mutations,
        reversions,
        passed_sites,
    }
}

/// Counts sites that are essentially monomorphic in one sample and polymorphic in the other.
///
/// With minor-allele frequencies m_i and m_j, a site counts when one is below
/// `min_freq` and the other above `max_freq`, in either order.
pub fn calculate_new_snp_matrix(
    map: &AlleleCountMap,
    filter: &GeneFilter,
    min_freq: f64,
    max_freq: f64,
) -> NewSnpMatrices {
    let n = map.num_samples();
    let [new_snps, passed_sites] = accumulate_over_genes(map, filter, |entry| {
        let mut new_snps = Array2::<f64>::zeros((n, n));
        if let Some(counts) = entry.sites.counts() {
            let gene = GeneFreqs::new(counts);
            let mafs = gene.freqs.mapv(|f| f.min(1.0 - f));
            for site in 0..counts.num_sites() {
                for i in 0..n {
                    for j in 0..n {
                        if !gene.both_covered(site, i, j) {
                            continue;
                        }
                        let (m_i, m_j) = (mafs[[site, i]], mafs[[site, j]]);
                        if (m_i < min_freq && m_j > max_freq) || (m_i > max_freq && m_j < min_freq) {
                            new_snps[[i, j]] += 1.0;
                        }
                    }
                }
            }
        }
        [new_snps, entry.passed_sites.clone()]
    });
    NewSnpMatrices {
        new_snps,
        passed_sites,
    }
}

/// Fixation, mutation/reversion and new-SNP matrices with thresholds taken from `config`.
pub fn fixation_from_config(
    map: &AlleleCountMap,
    filter: &GeneFilter,
    config: &StatsConfig,
) -> (FixationMatrices, MutationReversionMatrices, NewSnpMatrices) {
    (
        calculate_fixation_matrix(map, filter, &config.consensus, config.fixation_min_change),
        calculate_fixation_matrix_mutation_reversion(
            map,
            filter,
            &config.consensus,
            config.fixation_min_change,
        ),
        calculate_new_snp_matrix(map, filter, config.new_snp_min_freq, config.new_snp_max_freq),
    )
}

/// Lists sites whose frequency moved by at least `min_change` from sample i to sample j.
///
/// Frequencies below `min_freq` snap to 0 and those at or above `1 - min_freq`
/// snap to 1 before comparing. Both samples must be covered.
pub fn calculate_snp_differences_between(
    i: usize,
    j: usize,
    map: &AlleleCountMap,
    filter: &GeneFilter,
    min_freq: f64,
    min_change: f64,
) -> Result<Vec<SnpChange>> {
    let n = map.num_samples();
    for idx in [i, j] {
        if idx >= n {
            return Err(StatsError::InvalidInput(format!(
                "sample index {} out of range for {} samples",
                idx, n
            )));
        }
    }

    let snap = |f: f64| {
        if f < min_freq {
            0.0
        } else if f >= 1.0 - min_freq {
            1.0
        } else {
            f
        }
    };

    let mut changes = Vec::new();
    for ((gene, variant_type), entry) in map.select(filter) {
        let Some(counts) = entry.sites.counts() else {
            continue;
        };
        let locations = entry.sites.locations();
        let freqs = counts.alt_freqs();
        for site in 0..counts.num_sites() {
            let (depth_i, depth_j) = (counts.depth(site, i), counts.depth(site, j));
            if depth_i == 0 || depth_j == 0 {
                continue;
            }
            let delta = (snap(freqs[[site, j]]) - snap(freqs[[site, i]])).abs();
            if delta >= min_change && delta > 0.0 {
                changes.push(SnpChange {
                    gene: gene.clone(),
                    variant_type: *variant_type,
                    location: locations[site].clone(),
                    counts_i: (counts.alt(site, i), depth_i),
                    counts_j: (counts.alt(site, j), depth_j),
                });
            }
        }
    }
    Ok(changes)
}
