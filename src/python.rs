use ndarray::Array2;
use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;

use crate::config::ConsensusThresholds;
use crate::counts::AlleleCounts;
use crate::error::StatsError;
use crate::genotype::calculate_consensus_genotypes;
use crate::ld::calculate_unbiased_sigmasquared;
use crate::sfs::{calculate_pi_from_sfs_map, estimate_sfs_downsampling, fold_sfs, truong_pvalue, SfsMap};

fn to_py_err(e: StatsError) -> PyErr {
    PyValueError::new_err(e.to_string())
}

fn rows<T: Clone>(matrix: &Array2<T>) -> Vec<Vec<T>> {
    matrix.outer_iter().map(|row| row.to_vec()).collect()
}

/// Extracts a site x sample table of `(alt, ref)` tuples into a count tensor.
fn counts_from_python(sites: Vec<Vec<(i64, i64)>>) -> PyResult<AlleleCounts> {
    AlleleCounts::from_signed(&sites).map_err(to_py_err)
}

/// PyO3 wrapper for calculate_consensus_genotypes
///
/// # Arguments
/// * `sites` - One list of `(alt, ref)` tuples per site, one tuple per sample
/// * `lower`, `upper` - Consensus thresholds
///
/// # Returns
/// * `(genotypes, passed)` as nested lists indexed [site][sample]
#[pyfunction]
#[pyo3(signature = (sites, lower = 0.2, upper = 0.8))]
fn calculate_consensus_genotypes_py(
    sites: Vec<Vec<(i64, i64)>>,
    lower: f64,
    upper: f64,
) -> PyResult<(Vec<Vec<u8>>, Vec<Vec<bool>>)> {
    let thresholds = ConsensusThresholds::new(lower, upper).map_err(to_py_err)?;
    let calls = calculate_consensus_genotypes(&counts_from_python(sites)?, &thresholds);
    Ok((rows(&calls.genotypes), rows(&calls.passed)))
}

/// PyO3 wrapper for calculate_unbiased_sigmasquared
///
/// Returns `(numerators, denominators)` indexed [site of first][site of second].
#[pyfunction]
#[pyo3(signature = (sites_1, sites_2, lower = 0.2, upper = 0.8))]
fn calculate_unbiased_sigmasquared_py(
    sites_1: Vec<Vec<(i64, i64)>>,
    sites_2: Vec<Vec<(i64, i64)>>,
    lower: f64,
    upper: f64,
) -> PyResult<(Vec<Vec<f64>>, Vec<Vec<f64>>)> {
    let thresholds = ConsensusThresholds::new(lower, upper).map_err(to_py_err)?;
    let ld = calculate_unbiased_sigmasquared(
        &counts_from_python(sites_1)?,
        &counts_from_python(sites_2)?,
        &thresholds,
    )
    .map_err(to_py_err)?;
    Ok((rows(&ld.numerators), rows(&ld.denominators)))
}

#[pyfunction]
fn estimate_sfs_downsampling_py(sites: Vec<(u32, u32)>, target_depth: u32) -> Vec<f64> {
    estimate_sfs_downsampling(&sites, target_depth)
}

#[pyfunction]
fn fold_sfs_py(fs: Vec<f64>) -> Vec<f64> {
    fold_sfs(&fs)
}

/// PyO3 wrapper for calculate_pi_from_sfs_map
///
/// # Arguments
/// * `entries` - `(depth, alt, forward, reverse)` tuples
#[pyfunction]
fn calculate_pi_from_sfs_map_py(entries: Vec<(u32, u32, f64, f64)>) -> PyResult<f64> {
    let mut map = SfsMap::new();
    for (depth, alt, forward, reverse) in entries {
        map.add(depth, alt, forward, reverse).map_err(to_py_err)?;
    }
    Ok(calculate_pi_from_sfs_map(&map))
}

#[pyfunction]
fn truong_pvalue_py(alt: u32, depth: u32) -> f64 {
    truong_pvalue(alt, depth)
}

/// PyO3 module definition
#[pymodule]
fn metapop(_py: Python, m: &PyModule) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(calculate_consensus_genotypes_py, m)?)?;
    m.add_function(wrap_pyfunction!(calculate_unbiased_sigmasquared_py, m)?)?;
    m.add_function(wrap_pyfunction!(estimate_sfs_downsampling_py, m)?)?;
    m.add_function(wrap_pyfunction!(fold_sfs_py, m)?)?;
    m.add_function(wrap_pyfunction!(calculate_pi_from_sfs_map_py, m)?)?;
    m.add_function(wrap_pyfunction!(truong_pvalue_py, m)?)?;
    Ok(())
}
