use itertools::Itertools;
use log::{debug, info, warn};
use nalgebra::{DMatrix, SymmetricEigen};
use ndarray::{concatenate, Array1, Array2, ArrayView2, Axis};

use crate::config::ConsensusThresholds;
use crate::counts::{AlleleCountMap, GeneFilter};
use crate::error::{Result, StatsError};
use crate::genotype::{calculate_consensus_polymorphic_genotypes, ConsensusGenotypes};

/// Sample coordinates on the two leading axes of the consensus-genotype covariance.
#[derive(Debug, Clone, PartialEq)]
pub struct PcaResult {
    /// Sample coordinates on the first axis, scaled by sqrt(eigenvalue).
    pub pc1: Array1<f64>,
    /// Sample coordinates on the second axis, scaled by sqrt(eigenvalue).
    pub pc2: Array1<f64>,
    /// Fraction of total variance explained by the first two axes.
    pub variance_explained: (f64, f64),
    /// All eigenvalues, largest first.
    pub eigenvalues: Vec<f64>,
}

/// Sample x sample covariance of mean-centred consensus genotypes.
///
/// Each site is centred on its mean over covered samples; every cell is then
/// normalized by the number of sites covered in both samples of that cell
/// (McVean 2009). Cells with no jointly covered site are 0 and logged.
pub fn genotype_covariance(calls: &ConsensusGenotypes) -> Array2<f64> {
    let genotypes = calls.masked_genotypes_f64();
    let passed = calls.passed_f64();

    let carriers = genotypes.sum_axis(Axis(1));
    let covered = passed.sum_axis(Axis(1));
    let site_means = Array1::from_shape_fn(carriers.len(), |s| {
        if covered[s] > 0.0 {
            carriers[s] / covered[s]
        } else {
            0.0
        }
    });

    let centred = Array2::from_shape_fn(genotypes.dim(), |(s, j)| {
        (genotypes[[s, j]] - site_means[s]) * passed[[s, j]]
    });

    let numerators = centred.t().dot(&centred);
    let joint_passed = passed.t().dot(&passed);
    let uncovered = pairs_without_joint_coverage(&joint_passed);
    if !uncovered.is_empty() {
        warn!(
            "{} sample pairs share no covered site; their covariance is set to 0: {:?}",
            uncovered.len(),
            uncovered
        );
    }
    let mut covariance = numerators;
    covariance.zip_mut_with(&joint_passed, |m, &p| {
        *m = if p > 0.0 { *m / p } else { 0.0 };
    });
    covariance
}

/// Sample pairs `(i, j)`, `i < j`, with no jointly covered site.
pub fn uncovered_sample_pairs(calls: &ConsensusGenotypes) -> Vec<(usize, usize)> {
    let passed = calls.passed_f64();
    pairs_without_joint_coverage(&passed.t().dot(&passed))
}

fn pairs_without_joint_coverage(joint_passed: &Array2<f64>) -> Vec<(usize, usize)> {
    (0..joint_passed.nrows())
        .tuple_combinations()
        .filter(|&(i, j)| joint_passed[[i, j]] == 0.0)
        .collect()
}

/// Projects samples onto the top two principal axes of the genotype covariance.
///
/// # Arguments
/// * `calls` - Consensus genotypes and pass mask (site x sample), usually polymorphic sites only
///
/// # Returns
/// PCA coordinates and explained-variance fractions, or an error when the
/// sample set is empty or some sample has no covered site at all.
pub fn calculate_pca_coordinates(calls: &ConsensusGenotypes) -> Result<PcaResult> {
    let num_samples = calls.num_samples();
    if num_samples == 0 {
        return Err(StatsError::EmptySampleSet("PCA"));
    }
    if num_samples < 2 {
        return Err(StatsError::InvalidInput(
            "PCA needs at least two samples".to_string(),
        ));
    }

    info!(
        "Starting PCA computation on {} sites across {} samples",
        calls.num_sites(),
        num_samples
    );

    // Samples without any covered site would turn whole rows into noise
    let uncovered: Vec<usize> = calls
        .passed
        .axis_iter(Axis(1))
        .enumerate()
        .filter(|(_, column)| !column.iter().any(|&p| p))
        .map(|(j, _)| j)
        .collect();
    if !uncovered.is_empty() {
        return Err(StatsError::UncoveredSamples(uncovered));
    }

    let covariance = genotype_covariance(calls);
    let matrix = DMatrix::from_fn(num_samples, num_samples, |i, j| covariance[[i, j]]);
    let eigen = SymmetricEigen::new(matrix);

    // nalgebra does not sort eigenvalues
    let mut order: Vec<usize> = (0..num_samples).collect();
    order.sort_by(|&a, &b| eigen.eigenvalues[b].total_cmp(&eigen.eigenvalues[a]));
    let eigenvalues: Vec<f64> = order.iter().map(|&k| eigen.eigenvalues[k]).collect();

    let total: f64 = eigenvalues.iter().sum();
    let fraction = |value: f64| if total != 0.0 { value / total } else { 0.0 };

    let coordinates = |rank: usize| -> Array1<f64> {
        let column = order[rank];
        let scale = eigenvalues[rank].max(0.0).sqrt();
        Array1::from_shape_fn(num_samples, |j| scale * eigen.eigenvectors[(j, column)])
    };

    let result = PcaResult {
        pc1: coordinates(0),
        pc2: coordinates(1),
        variance_explained: (fraction(eigenvalues[0]), fraction(eigenvalues[1])),
        eigenvalues,
    };

    debug!("Leading eigenvalues: {:?}", &result.eigenvalues[..2]);
    info!(
        "PCA computation complete: PC1 explains {:.3}, PC2 explains {:.3} of variance",
        result.variance_explained.0, result.variance_explained.1
    );
    Ok(result)
}

/// Stacks the polymorphic consensus sites of every selected gene into one block.
///
/// Genes without sites contribute nothing; the result may have zero sites.
pub fn collect_polymorphic_genotypes(
    map: &AlleleCountMap,
    filter: &GeneFilter,
    thresholds: &ConsensusThresholds,
) -> Result<ConsensusGenotypes> {
    let blocks: Vec<ConsensusGenotypes> = map
        .select(filter)
        .into_iter()
        .filter_map(|(_, entry)| entry.sites.counts())
        .map(|counts| calculate_consensus_polymorphic_genotypes(counts, thresholds))
        .filter(|calls| calls.num_sites() > 0)
        .collect();

    if blocks.is_empty() {
        let n = map.num_samples();
        return Ok(ConsensusGenotypes {
            genotypes: Array2::zeros((0, n)),
            passed: Array2::from_elem((0, n), false),
        });
    }

    let genotypes = stack_rows(blocks.iter().map(|b| b.genotypes.view()).collect())?;
    let passed = stack_rows(blocks.iter().map(|b| b.passed.view()).collect())?;
    debug!("Stacked {} polymorphic sites from {} genes", genotypes.nrows(), blocks.len());
    Ok(ConsensusGenotypes { genotypes, passed })
}

fn stack_rows<T: Clone>(views: Vec<ArrayView2<'_, T>>) -> Result<Array2<T>> {
    concatenate(Axis(0), &views)
        .map_err(|e| StatsError::InvalidInput(format!("cannot stack genotype blocks: {}", e)))
}
