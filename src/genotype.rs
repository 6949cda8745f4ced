use ndarray::{Array2, Axis};

use crate::config::ConsensusThresholds;
use crate::counts::AlleleCounts;

/// Consensus calls for a block of sites.
///
/// `genotypes[[site, sample]]` is 1 for an alternate consensus and 0 otherwise.
/// A 0 only means "reference" where `passed[[site, sample]]` is true.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsensusGenotypes {
    pub genotypes: Array2<u8>,
    pub passed: Array2<bool>,
}

/// True if `prevalence` carriers out of `passed` covered samples is neither unanimous nor empty.
pub fn is_polymorphic(prevalence: usize, passed: usize) -> bool {
    let prevalence = prevalence as f64;
    prevalence > 0.5 && prevalence < passed as f64 - 0.5
}

impl ConsensusGenotypes {
    pub fn num_sites(&self) -> usize {
        self.genotypes.nrows()
    }

    pub fn num_samples(&self) -> usize {
        self.genotypes.ncols()
    }

    /// Whether the cell carries a trusted alternate call.
    pub fn is_alt(&self, site: usize, sample: usize) -> bool {
        self.passed[[site, sample]] && self.genotypes[[site, sample]] == 1
    }

    /// Number of samples called alternate at each site.
    pub fn prevalences(&self) -> Vec<usize> {
        (0..self.num_sites())
            .map(|s| (0..self.num_samples()).filter(|&j| self.is_alt(s, j)).count())
            .collect()
    }

    /// Number of samples with a consensus call at each site.
    pub fn passed_counts(&self) -> Vec<usize> {
        self.passed
            .axis_iter(Axis(0))
            .map(|row| row.iter().filter(|&&p| p).count())
            .collect()
    }

    /// Per-site flag for sites polymorphic across the called samples.
    pub fn polymorphic_mask(&self) -> Vec<bool> {
        self.prevalences()
            .into_iter()
            .zip(self.passed_counts())
            .map(|(prevalence, passed)| is_polymorphic(prevalence, passed))
            .collect()
    }

    /// Keeps the listed sites, in the given order.
    pub fn select_sites(&self, sites: &[usize]) -> ConsensusGenotypes {
        ConsensusGenotypes {
            genotypes: self.genotypes.select(Axis(0), sites),
            passed: self.passed.select(Axis(0), sites),
        }
    }

    /// Drops every site that is not polymorphic.
    pub fn polymorphic_only(&self) -> ConsensusGenotypes {
        let kept: Vec<usize> = self
            .polymorphic_mask()
            .into_iter()
            .enumerate()
            .filter_map(|(s, polymorphic)| polymorphic.then_some(s))
            .collect();
        self.select_sites(&kept)
    }

    /// Pass mask as 0/1 floats, handy for matrix products.
    pub fn passed_f64(&self) -> Array2<f64> {
        self.passed.mapv(|p| if p { 1.0 } else { 0.0 })
    }

    /// Genotypes with failed cells forced to 0, as floats.
    pub fn masked_genotypes_f64(&self) -> Array2<f64> {
        Array2::from_shape_fn(self.genotypes.dim(), |(s, j)| {
            if self.is_alt(s, j) {
                1.0
            } else {
                0.0
            }
        })
    }
}

/// Calls consensus genotypes from raw counts.
///
/// A cell passes when it is covered and its alt frequency is not intermediate.
/// Its genotype is the rounded frequency (0.5 rounds down) masked by the pass flag.
pub fn calculate_consensus_genotypes(
    counts: &AlleleCounts,
    thresholds: &ConsensusThresholds,
) -> ConsensusGenotypes {
    let depths = counts.depths();
    let freqs = counts.alt_freqs();

    let passed = Array2::from_shape_fn(freqs.dim(), |(s, j)| {
        let freq = freqs[[s, j]];
        depths[[s, j]] > 0 && (freq <= thresholds.lower || freq >= thresholds.upper)
    });
    let genotypes = Array2::from_shape_fn(freqs.dim(), |(s, j)| {
        u8::from(passed[[s, j]] && freqs[[s, j]] > 0.5)
    });

    ConsensusGenotypes { genotypes, passed }
}

/// Consensus calls restricted to polymorphic sites.
pub fn calculate_consensus_polymorphic_genotypes(
    counts: &AlleleCounts,
    thresholds: &ConsensusThresholds,
) -> ConsensusGenotypes {
    calculate_consensus_genotypes(counts, thresholds).polymorphic_only()
}
