//! Linkage disequilibrium between pairs of sites, measured as
//! σ² = E[(p_ab - p_a·p_b)²] / E[p_a(1-p_a)·p_b(1-p_b)] (McVean 2002).
//!
//! Every function returns numerator and denominator matrices indexed
//! `[site of first tensor, site of second tensor]`. Estimates are pooled as a
//! ratio of sums, never as a mean of per-pair ratios.

use log::{debug, info};
use ndarray::Array2;
use rayon::prelude::*;

use crate::config::ConsensusThresholds;
use crate::counts::{AlleleCountMap, AlleleCounts, GeneFilter};
use crate::error::{Result, StatsError};
use crate::genotype::calculate_consensus_genotypes;

/// Frequencies at or below this value are treated as exactly zero.
const FREQ_EPSILON: f64 = 1e-10;

#[derive(Debug, Clone, PartialEq)]
pub struct LdMatrices {
    pub numerators: Array2<f64>,
    pub denominators: Array2<f64>,
}

impl LdMatrices {
    /// Per-pair σ², with undefined pairs (zero denominator) reported as `None`.
    pub fn pair_sigma_squared(&self, site_1: usize, site_2: usize) -> Option<f64> {
        let denominator = self.denominators[[site_1, site_2]];
        (denominator != 0.0).then(|| self.numerators[[site_1, site_2]] / denominator)
    }
}

/// Running ratio-of-sums σ² estimate over any number of site pairs.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SigmaSquaredAccumulator {
    pub numerator: f64,
    pub denominator: f64,
    pub pairs: usize,
    /// Pairs skipped because their denominator was 0.
    pub undefined_pairs: usize,
}

impl SigmaSquaredAccumulator {
    pub fn add_pair(&mut self, numerator: f64, denominator: f64) {
        if denominator == 0.0 {
            self.undefined_pairs += 1;
            return;
        }
        self.numerator += numerator;
        self.denominator += denominator;
        self.pairs += 1;
    }

    /// Adds every pair whose indices satisfy `keep`.
    pub fn add_matrices<F>(&mut self, ld: &LdMatrices, mut keep: F)
    where
        F: FnMut(usize, usize) -> bool,
    {
        for ((i, j), &numerator) in ld.numerators.indexed_iter() {
            if keep(i, j) {
                self.add_pair(numerator, ld.denominators[[i, j]]);
            }
        }
    }

    /// Pooled σ², or `None` when no defined pair was added.
    pub fn estimate(&self) -> Option<f64> {
        (self.denominator != 0.0).then(|| self.numerator / self.denominator)
    }
}

fn clamp_noise(freq: f64) -> f64 {
    if freq > FREQ_EPSILON {
        freq
    } else {
        0.0
    }
}

/// Computes every (site_1, site_2) cell in parallel over rows.
fn fill_pairs<F>(rows: usize, cols: usize, cell: F) -> LdMatrices
where
    F: Fn(usize, usize) -> (f64, f64) + Sync,
{
    let values: Vec<Vec<(f64, f64)>> = (0..rows)
        .into_par_iter()
        .map(|a| (0..cols).map(|b| cell(a, b)).collect())
        .collect();

    let mut numerators = Array2::zeros((rows, cols));
    let mut denominators = Array2::zeros((rows, cols));
    for (a, row) in values.into_iter().enumerate() {
        for (b, (numerator, denominator)) in row.into_iter().enumerate() {
            numerators[[a, b]] = numerator;
            denominators[[a, b]] = denominator;
        }
    }
    LdMatrices {
        numerators,
        denominators,
    }
}

/// Pooled-frequency σ² terms over samples passing at both sites.
fn pooled_frequency_terms(
    genotypes_1: &Array2<u8>,
    passed_1: &Array2<bool>,
    genotypes_2: &Array2<u8>,
    passed_2: &Array2<bool>,
) -> LdMatrices {
    let num_samples = genotypes_1.ncols();
    fill_pairs(genotypes_1.nrows(), genotypes_2.nrows(), |a, b| {
        let mut joint = 0.0;
        let mut n_ab = 0.0;
        let mut n_a = 0.0;
        let mut n_b = 0.0;
        for j in 0..num_samples {
            if !(passed_1[[a, j]] && passed_2[[b, j]]) {
                continue;
            }
            joint += 1.0;
            let g_a = genotypes_1[[a, j]] as f64;
            let g_b = genotypes_2[[b, j]] as f64;
            n_ab += g_a * g_b;
            n_a += g_a;
            n_b += g_b;
        }
        // no jointly passed sample leaves every frequency at 0
        let total = if joint == 0.0 { 1.0 } else { joint };
        let p_ab = clamp_noise(n_ab / total);
        let p_a = clamp_noise(n_a / total);
        let p_b = clamp_noise(n_b / total);

        let numerator = (p_ab - p_a * p_b).powi(2);
        let denominator = p_a * (1.0 - p_a) * p_b * (1.0 - p_b);
        (numerator, denominator)
    })
}

fn check_pair(counts_1: &AlleleCounts, counts_2: &AlleleCounts) -> Result<()> {
    StatsError::check_samples(
        "linkage disequilibrium sample axis",
        counts_1.num_samples(),
        counts_2.num_samples(),
    )
}

/// Naive σ² terms from consensus genotypes.
///
/// For each pair of sites, frequencies are pooled over the samples whose
/// consensus call passes at both sites.
pub fn calculate_sigmasquared(
    counts_1: &AlleleCounts,
    counts_2: &AlleleCounts,
    thresholds: &ConsensusThresholds,
) -> Result<LdMatrices> {
    check_pair(counts_1, counts_2)?;
    let calls_1 = calculate_consensus_genotypes(counts_1, thresholds);
    let calls_2 = calculate_consensus_genotypes(counts_2, thresholds);
    Ok(pooled_frequency_terms(
        &calls_1.genotypes,
        &calls_1.passed,
        &calls_2.genotypes,
        &calls_2.passed,
    ))
}

/// Naive σ² terms restricted to sites whose folded pooled frequency lies in `[low_freq, high_freq]`.
///
/// Genotypes are rounded frequencies over every covered sample (no consensus
/// mask). Pooled frequencies are taken over covered samples only; sites outside
/// the range get a zero numerator and denominator.
pub fn calculate_sigmasquared_condition_freq(
    counts_1: &AlleleCounts,
    counts_2: &AlleleCounts,
    low_freq: f64,
    high_freq: f64,
) -> Result<LdMatrices> {
    check_pair(counts_1, counts_2)?;

    let rounded_calls = |counts: &AlleleCounts| -> (Array2<u8>, Array2<bool>) {
        let depths = counts.depths();
        let freqs = counts.alt_freqs();
        let genotypes = freqs.mapv(|f| u8::from(f > 0.5));
        let mut passed = depths.mapv(|d| d > 0);
        for (site, mut row) in passed.outer_iter_mut().enumerate() {
            let covered = row.iter().filter(|&&p| p).count();
            let carriers = (0..row.len())
                .filter(|&j| row[j] && genotypes[[site, j]] == 1)
                .count();
            let pooled = if covered == 0 {
                0.0
            } else {
                carriers as f64 / covered as f64
            };
            let folded = pooled.min(1.0 - pooled);
            if !(folded >= low_freq && folded <= high_freq) {
                row.fill(false);
            }
        }
        (genotypes, passed)
    };

    let (genotypes_1, passed_1) = rounded_calls(counts_1);
    let (genotypes_2, passed_2) = rounded_calls(counts_2);
    Ok(pooled_frequency_terms(
        &genotypes_1,
        &passed_1,
        &genotypes_2,
        &passed_2,
    ))
}

/// Haplotype counts of two consensus sites over their jointly passed samples.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct HaplotypeCounts {
    pub n11: f64,
    pub n10: f64,
    pub n01: f64,
    pub n00: f64,
}

impl HaplotypeCounts {
    pub fn total(&self) -> f64 {
        self.n11 + self.n10 + self.n01 + self.n00
    }

    /// Finite-sample-unbiased `(numerator, denominator)` of σ².
    ///
    /// Both terms are 0 when fewer than four samples are available, marking the
    /// pair as undefined.
    pub fn unbiased_terms(&self) -> (f64, f64) {
        let HaplotypeCounts { n11, n10, n01, n00 } = *self;
        let n = self.total();
        if n < 3.5 {
            return (0.0, 0.0);
        }

        let numerator = n11 * (n11 - 1.0) * n00 * (n00 - 1.0) - 2.0 * n10 * n01 * n11 * n00
            + n10 * (n10 - 1.0) * n01 * (n01 - 1.0);

        let denominator = n10 * (n10 - 1.0) * n01 * (n01 - 1.0)
            + n10 * n01 * (n01 - 1.0) * n00
            + n10 * (n10 - 1.0) * n01 * n11
            + n10 * n01 * n11 * n00
            + n10 * (n10 - 1.0) * n01 * n00
            + n10 * n01 * n00 * (n00 - 1.0)
            + n10 * (n10 - 1.0) * n11 * n00
            + n10 * n11 * n00 * (n00 - 1.0)
            + n10 * n01 * (n01 - 1.0) * n11
            + n01 * (n01 - 1.0) * n11 * n00
            + n10 * n01 * n11 * (n11 - 1.0)
            + n01 * n11 * (n11 - 1.0) * n00
            + n10 * n01 * n11 * n00
            + n01 * n11 * n00 * (n00 - 1.0)
            + n10 * n11 * (n11 - 1.0) * n00
            + n11 * (n11 - 1.0) * n00 * (n00 - 1.0);

        let falling = n * (n - 1.0) * (n - 2.0) * (n - 3.0);
        (numerator / falling, denominator / falling)
    }
}

/// σ² terms corrected for the finite number of jointly covered samples.
pub fn calculate_unbiased_sigmasquared(
    counts_1: &AlleleCounts,
    counts_2: &AlleleCounts,
    thresholds: &ConsensusThresholds,
) -> Result<LdMatrices> {
    check_pair(counts_1, counts_2)?;
    let calls_1 = calculate_consensus_genotypes(counts_1, thresholds);
    let calls_2 = calculate_consensus_genotypes(counts_2, thresholds);
    let num_samples = counts_1.num_samples();

    let ld = fill_pairs(calls_1.num_sites(), calls_2.num_sites(), |a, b| {
        let mut haplotypes = HaplotypeCounts::default();
        for j in 0..num_samples {
            if !(calls_1.passed[[a, j]] && calls_2.passed[[b, j]]) {
                continue;
            }
            match (calls_1.genotypes[[a, j]], calls_2.genotypes[[b, j]]) {
                (1, 1) => haplotypes.n11 += 1.0,
                (1, _) => haplotypes.n10 += 1.0,
                (_, 1) => haplotypes.n01 += 1.0,
                _ => haplotypes.n00 += 1.0,
            }
        }
        haplotypes.unbiased_terms()
    });

    debug!(
        "Unbiased sigma^2 over {} x {} site pairs",
        ld.numerators.nrows(),
        ld.numerators.ncols()
    );
    Ok(ld)
}

/// Pools unbiased σ² over every pair of distinct sites within each selected gene.
///
/// Pairs are taken once (first site before second); undefined pairs are
/// counted but excluded from the ratio.
pub fn calculate_within_gene_sigmasquared(
    map: &AlleleCountMap,
    filter: &GeneFilter,
    thresholds: &ConsensusThresholds,
) -> Result<SigmaSquaredAccumulator> {
    let mut accumulator = SigmaSquaredAccumulator::default();
    for ((gene, variant_type), entry) in map.select(filter) {
        let Some(counts) = entry.sites.counts() else {
            continue;
        };
        if counts.num_sites() < 2 {
            continue;
        }
        let ld = calculate_unbiased_sigmasquared(counts, counts, thresholds)?;
        accumulator.add_matrices(&ld, |site_1, site_2| site_1 < site_2);
        debug!(
            "{} {}: {} defined pairs so far",
            gene, variant_type, accumulator.pairs
        );
    }
    info!(
        "Pooled sigma^2 over {} site pairs ({} undefined)",
        accumulator.pairs, accumulator.undefined_pairs
    );
    Ok(accumulator)
}
