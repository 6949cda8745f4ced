//! Site-frequency-spectrum estimation from per-site (depth, alt) observations.
//!
//! Zero-depth observations never enter any estimator. The EM estimators run a
//! fixed number of iterations with no tolerance-based early exit, so results
//! are reproducible for a given configuration.

use std::collections::BTreeMap;

use log::debug;
use statrs::distribution::{Binomial, Discrete, DiscreteCDF};
use statrs::function::beta::checked_beta_reg;
use statrs::function::gamma::ln_gamma;

use crate::config::ConsensusThresholds;
use crate::counts::{AlleleCountMap, AlleleCounts, GeneFilter};
use crate::error::{Result, StatsError};
use crate::genotype::calculate_consensus_genotypes;

const TRUONG_ERROR_RATE: f64 = 1e-2;
const TRUONG_ALPHA: f64 = 0.05;

/// Histogram of observed `(depth, alt)` pairs.
///
/// Each key maps to `(forward, reverse)`: `forward` counts every observation,
/// `reverse` counts those where the alt allele is the population majority.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SfsMap {
    entries: BTreeMap<(u32, u32), (f64, f64)>,
}

/// One SFS map key with its weights, flattened for the estimators.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Observation {
    alt: f64,
    reference: f64,
    depth: f64,
    count: f64,
}

impl SfsMap {
    pub fn new() -> Self {
        SfsMap::default()
    }

    /// Adds `forward`/`reverse` weight at `(depth, alt)`. Zero-depth observations are ignored.
    pub fn add(&mut self, depth: u32, alt: u32, forward: f64, reverse: f64) -> Result<()> {
        if alt > depth {
            return Err(StatsError::InvalidInput(format!(
                "alt count {} exceeds depth {}",
                alt, depth
            )));
        }
        if depth == 0 {
            return Ok(());
        }
        let entry = self.entries.entry((depth, alt)).or_insert((0.0, 0.0));
        entry.0 += forward;
        entry.1 += reverse;
        Ok(())
    }

    /// Builds the map of one sample.
    ///
    /// A covered site is "reversed" when its consensus alt allele is carried by
    /// more than half of the samples with a consensus call.
    pub fn from_allele_counts(
        counts: &AlleleCounts,
        sample: usize,
        thresholds: &ConsensusThresholds,
    ) -> Result<Self> {
        if sample >= counts.num_samples() {
            return Err(StatsError::InvalidInput(format!(
                "sample index {} out of range for {} samples",
                sample,
                counts.num_samples()
            )));
        }
        let calls = calculate_consensus_genotypes(counts, thresholds);
        let prevalences = calls.prevalences();
        let passed = calls.passed_counts();

        let mut map = SfsMap::new();
        for site in 0..counts.num_sites() {
            let depth = counts.depth(site, sample);
            if depth == 0 {
                continue;
            }
            let pooled = if passed[site] == 0 {
                0.0
            } else {
                prevalences[site] as f64 / passed[site] as f64
            };
            let reverse = if pooled > 0.5 { 1.0 } else { 0.0 };
            map.add(depth, counts.alt(site, sample), 1.0, reverse)?;
        }
        Ok(map)
    }

    pub fn merge(&mut self, other: &SfsMap) {
        for (&key, &(forward, reverse)) in &other.entries {
            let entry = self.entries.entry(key).or_insert((0.0, 0.0));
            entry.0 += forward;
            entry.1 += reverse;
        }
    }

    pub fn get(&self, depth: u32, alt: u32) -> Option<(f64, f64)> {
        self.entries.get(&(depth, alt)).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&(u32, u32), &(f64, f64))> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sum of forward counts.
    pub fn total_sites(&self) -> f64 {
        self.entries.values().map(|&(forward, _)| forward).sum()
    }

    fn observations(&self) -> Vec<Observation> {
        self.entries
            .iter()
            .map(|(&(depth, alt), &(forward, _))| Observation {
                alt: alt as f64,
                reference: (depth - alt) as f64,
                depth: depth as f64,
                count: forward,
            })
            .collect()
    }
}

/// One SFS map per sample, merged over every selected gene entry.
pub fn calculate_sample_sfs_maps(
    map: &AlleleCountMap,
    filter: &GeneFilter,
    thresholds: &ConsensusThresholds,
) -> Result<BTreeMap<String, SfsMap>> {
    let mut maps: BTreeMap<String, SfsMap> = map
        .samples()
        .iter()
        .map(|sample| (sample.clone(), SfsMap::new()))
        .collect();
    for (_, entry) in map.select(filter) {
        let Some(counts) = entry.sites.counts() else {
            continue;
        };
        for (sample_idx, sample) in map.samples().iter().enumerate() {
            let gene_map = SfsMap::from_allele_counts(counts, sample_idx, thresholds)?;
            if let Some(sample_map) = maps.get_mut(sample) {
                sample_map.merge(&gene_map);
            }
        }
    }
    Ok(maps)
}

/// Folds an unfolded spectrum over allele counts 0..=D onto the minor allele.
///
/// Entry k of the result is `fs[k] + fs[D-k]`; the middle class of an odd-length
/// spectrum is kept once.
pub fn fold_sfs(fs: &[f64]) -> Vec<f64> {
    let len = fs.len();
    (0..(len + 1) / 2)
        .map(|k| {
            let mirror = len - 1 - k;
            if mirror == k {
                fs[k]
            } else {
                fs[k] + fs[mirror]
            }
        })
        .collect()
}

/// Histogram of alt/depth ratios into `target_depth + 1` bins centred on k/target_depth.
///
/// `sites` holds `(alt, ref)` counts; zero-depth sites are skipped. With `fold`
/// the frequencies are mapped to min(f, 1-f) first.
pub fn estimate_sfs_naive_binning(sites: &[(u32, u32)], target_depth: u32, fold: bool) -> Vec<f64> {
    let mut counts = vec![0.0; target_depth as usize + 1];
    if target_depth == 0 {
        return counts;
    }
    for &(alt, reference) in sites {
        let depth = alt + reference;
        if depth == 0 {
            continue;
        }
        let mut freq = alt as f64 / depth as f64;
        if fold {
            freq = freq.min(1.0 - freq);
        }
        let bin = ((freq * target_depth as f64) + 0.5).floor() as usize;
        counts[bin.min(target_depth as usize)] += 1.0;
    }
    counts
}

fn ln_choose(n: f64, k: f64) -> f64 {
    ln_gamma(n + 1.0) - ln_gamma(k + 1.0) - ln_gamma(n - k + 1.0)
}

/// Expected spectrum after hypergeometric downsampling of every site to `target_depth` reads.
///
/// Entry k is Σ_sites P(k alt reads | draw target_depth of the site's reads
/// without replacement). Sites shallower than `target_depth` are skipped, so the
/// entries sum to the number of contributing sites.
pub fn estimate_sfs_downsampling(sites: &[(u32, u32)], target_depth: u32) -> Vec<f64> {
    let t = target_depth as usize;
    let mut density = vec![0.0; t + 1];
    let mut contributing = 0usize;

    for &(alt, reference) in sites {
        let depth = alt + reference;
        if depth == 0 || depth < target_depth {
            continue;
        }
        contributing += 1;
        let (a, r, d) = (alt as usize, reference as usize, depth as f64);
        let ln_total = ln_choose(d, t as f64);
        let k_min = t.saturating_sub(r);
        let k_max = a.min(t);
        for k in k_min..=k_max {
            density[k] += (ln_choose(a as f64, k as f64) + ln_choose(r as f64, (t - k) as f64)
                - ln_total)
                .exp();
        }
    }
    debug!(
        "Downsampled {} of {} sites to depth {}",
        contributing,
        sites.len(),
        target_depth
    );
    density
}

/// Mean within-sample π over the sites of an SFS map.
///
/// Alt counts of a single read (or under 5% of the depth) are treated as
/// errors and zeroed; likewise near-fixed sites are raised to full depth.
pub fn calculate_pi_from_sfs_map(map: &SfsMap) -> f64 {
    let mut total_pi = 0.0;
    let mut opportunities = 0.0;
    for obs in map.observations() {
        let depth = obs.depth;
        let lower = (depth * 0.05).ceil() + 0.5;
        let upper = (depth * 0.95).floor() - 0.5;
        let mut alt = obs.alt;
        if alt < lower {
            alt = 0.0;
        }
        if alt > upper {
            alt = depth;
        }
        let pairs = depth * (depth - 1.0) + if depth < 1.1 { 1.0 } else { 0.0 };
        total_pi += 2.0 * alt * (depth - alt) / pairs * obs.count;
        opportunities += obs.count;
    }
    if opportunities == 0.0 {
        0.0
    } else {
        total_pi / opportunities
    }
}

/// Fractions of sites that are polymorphic within a sample vs. fixed away from the majority allele.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PolymorphismRates {
    pub within: f64,
    pub between: f64,
    pub total_sites: f64,
}

/// Splits SFS-map sites into within-sample polymorphisms and between-sample differences.
///
/// Intermediate-frequency sites count as "within". Otherwise a site counts as
/// "between" when the sample's majority allele differs from the population's.
pub fn calculate_polymorphism_rates_from_sfs_map(
    map: &SfsMap,
    thresholds: &ConsensusThresholds,
) -> PolymorphismRates {
    let mut total_sites = 0.0;
    let mut within_sites = 0.0;
    let mut between_sites = 0.0;
    for (&(depth, alt), &(n, reverse_n)) in map.iter() {
        let f = alt as f64 / depth as f64;
        total_sites += n;
        if thresholds.is_intermediate(f) {
            within_sites += n;
        } else if f > 0.5 {
            between_sites += n - reverse_n;
        } else {
            between_sites += reverse_n;
        }
    }
    if total_sites == 0.0 {
        return PolymorphismRates::default();
    }
    PolymorphismRates {
        within: within_sites / total_sites,
        between: between_sites / total_sites,
        total_sites,
    }
}

/// Output of [`calculate_smoothed_sfs`].
#[derive(Debug, Clone, PartialEq)]
pub struct SmoothedSfs {
    /// Frequency grid k / D̄ for k = 0..=D̄, where D̄ is the median depth.
    pub fs: Vec<f64>,
    /// Normalized weight of each grid frequency.
    pub pfs: Vec<f64>,
    /// Mean posterior probability that a site is a true intermediate-frequency polymorphism.
    pub p_intermediate: f64,
    /// Estimated fraction of truly polymorphic sites.
    pub p_poly: f64,
    pub median_depth: u32,
}

fn beta_reg(a: f64, b: f64, x: f64) -> Result<f64> {
    checked_beta_reg(a, b, x).map_err(|e| {
        StatsError::Numerical(format!("incomplete beta I_{}({}, {}): {}", x, a, b, e))
    })
}

/// Smallest depth whose cumulative weight exceeds one half.
fn median_depth(map: &SfsMap) -> u32 {
    let mut by_depth: BTreeMap<u32, f64> = BTreeMap::new();
    for (&(depth, _), &(forward, _)) in map.iter() {
        *by_depth.entry(depth).or_insert(0.0) += forward;
    }
    let total: f64 = by_depth.values().sum();
    let mut cumulative = 0.0;
    for (&depth, &weight) in &by_depth {
        cumulative += weight;
        if cumulative / total > 0.5 {
            return depth;
        }
    }
    by_depth.keys().next_back().copied().unwrap_or(0)
}

/// Smoothed within-sample SFS with an EM estimate of the polymorphism rate.
///
/// First `p_poly` is fitted by EM against a sequencing-error model with error
/// rate `perr`. The spectrum itself spreads each observation's ±0.5-read
/// frequency interval over the grid bins it overlaps.
pub fn calculate_smoothed_sfs(
    map: &SfsMap,
    num_iterations: usize,
    perr: f64,
    thresholds: &ConsensusThresholds,
) -> Result<SmoothedSfs> {
    let observations = map.observations();
    let total: f64 = observations.iter().map(|o| o.count).sum();
    if observations.is_empty() || total <= 0.0 {
        return Err(StatsError::InvalidInput(
            "cannot smooth an empty SFS map".to_string(),
        ));
    }
    if !(perr > 0.0 && perr <= 1.0) {
        return Err(StatsError::Config(format!("error rate {} outside (0, 1]", perr)));
    }
    let weights: Vec<f64> = observations.iter().map(|o| o.count / total).collect();

    let dbar = median_depth(map);
    let grid_len = dbar as usize + 1;
    let df = 1.0 / dbar as f64;
    let fs: Vec<f64> = (0..grid_len).map(|k| k as f64 / dbar as f64).collect();
    let mut lowers: Vec<f64> = fs.iter().map(|f| f - df / 2.0).collect();
    let mut uppers: Vec<f64> = fs.iter().map(|f| f + df / 2.0).collect();
    lowers[0] = -1e-10;
    uppers[grid_len - 1] = 1.0 + 1e-10;

    // Likelihood of the data if every alt read is an error; independent of p_poly
    let mut pdata_errs = Vec::with_capacity(observations.len());
    let mut pdata_intermediates = Vec::with_capacity(observations.len());
    for obs in &observations {
        let (a, r) = (obs.alt + 1.0, obs.reference + 1.0);
        pdata_errs.push((beta_reg(a, r, perr)? + beta_reg(r, a, perr)?) / (2.0 * perr));
        pdata_intermediates.push(
            1.0 - (beta_reg(a, r, thresholds.lower)? + beta_reg(r, a, 1.0 - thresholds.upper)?),
        );
    }

    let posteriors_for = |p_poly: f64| -> Vec<f64> {
        pdata_errs
            .iter()
            .map(|&err| 1.0 / (1.0 + (1.0 - p_poly) / p_poly * err))
            .collect()
    };

    let mut p_poly = 1e-4;
    let mut posterior_polys = posteriors_for(p_poly);
    for _ in 0..num_iterations {
        posterior_polys = posteriors_for(p_poly);
        p_poly = posterior_polys
            .iter()
            .zip(&weights)
            .map(|(post, w)| post * w)
            .sum();
    }

    let p_intermediate = posterior_polys
        .iter()
        .zip(&pdata_intermediates)
        .zip(&weights)
        .map(|((post, inter), w)| post * inter * w)
        .sum();

    // Bin-overlap smoothing: each observation covers [A-0.5, A+0.5]/D
    let mut pfs = vec![0.0; grid_len];
    for (obs, w) in observations.iter().zip(&weights) {
        let plus_half = ((obs.alt + 0.5) / obs.depth).clamp(0.0, 1.0);
        let minus_half = ((obs.alt - 0.5) / obs.depth).clamp(0.0, 1.0);
        let width = plus_half - minus_half;
        for (k, pf) in pfs.iter_mut().enumerate() {
            let a = lowers[k].max(minus_half);
            let b = uppers[k].min(plus_half);
            if b > a {
                *pf += (b - a) / width * w;
            }
        }
    }
    let pfs_total: f64 = pfs.iter().sum();
    if pfs_total > 0.0 {
        pfs.iter_mut().for_each(|p| *p /= pfs_total);
    }

    debug!(
        "Smoothed SFS: p_poly={:.3e}, p_intermediate={:.3e}, median depth {}",
        p_poly, p_intermediate, dbar
    );
    Ok(SmoothedSfs {
        fs,
        pfs,
        p_intermediate,
        p_poly,
        median_depth: dbar,
    })
}

/// Default grid for [`calculate_smoothed_sfs_continuous_em`]: 0.01, 0.02, ..., 0.99.
pub fn default_frequency_grid() -> Vec<f64> {
    (1..100).map(|k| k as f64 / 100.0).collect()
}

/// SFS over an arbitrary frequency grid by direct multinomial-likelihood EM.
///
/// Each grid frequency must lie strictly inside (0, 1). Returns the grid and the
/// normalized weight of every grid point after `num_iterations` iterations.
pub fn calculate_smoothed_sfs_continuous_em(
    map: &SfsMap,
    grid: Option<&[f64]>,
    num_iterations: usize,
) -> Result<(Vec<f64>, Vec<f64>)> {
    let fs: Vec<f64> = match grid {
        Some(g) if !g.is_empty() => g.to_vec(),
        _ => default_frequency_grid(),
    };
    if let Some(bad) = fs.iter().find(|&&f| !(f > 0.0 && f < 1.0)) {
        return Err(StatsError::InvalidInput(format!(
            "grid frequency {} outside (0, 1)",
            bad
        )));
    }
    let observations = map.observations();
    let total: f64 = observations.iter().map(|o| o.count).sum();
    if observations.is_empty() || total <= 0.0 {
        return Err(StatsError::InvalidInput(
            "cannot smooth an empty SFS map".to_string(),
        ));
    }
    let weights: Vec<f64> = observations.iter().map(|o| o.count / total).collect();

    let log_fs: Vec<f64> = fs.iter().map(|f| f.ln()).collect();
    let log_1m_fs: Vec<f64> = fs.iter().map(|f| (1.0 - f).ln()).collect();

    // Initial guess: mostly near-zero frequencies, a little near fixation
    let mut pfs = vec![0.0; fs.len()];
    let groups: [(fn(f64) -> bool, f64); 3] = [
        (|f| f >= 0.99, 1e-2),
        (|f| f < 0.99 && f > 0.01, 1e-4),
        (|f| f <= 0.01, 1.0 - 1e-2 - 1e-4),
    ];
    for (in_group, mass) in groups {
        let members = fs.iter().filter(|&&f| in_group(f)).count();
        if members == 0 {
            continue;
        }
        for (p, &f) in pfs.iter_mut().zip(&fs) {
            if in_group(f) {
                *p = mass / members as f64;
            }
        }
    }
    normalize_in_place(&mut pfs);

    let mut posterior = vec![0.0; fs.len()];
    for _ in 0..num_iterations {
        let log_pfs: Vec<f64> = pfs.iter().map(|p| p.ln()).collect();
        let mut next = vec![0.0; fs.len()];
        for (obs, w) in observations.iter().zip(&weights) {
            for k in 0..fs.len() {
                posterior[k] = obs.alt * log_fs[k] + obs.reference * log_1m_fs[k] + log_pfs[k];
            }
            let max = posterior.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
            posterior.iter_mut().for_each(|p| *p = (*p - max).exp());
            let norm: f64 = posterior.iter().sum();
            for (n, p) in next.iter_mut().zip(&posterior) {
                *n += p / norm * w;
            }
        }
        pfs = next.into_iter().map(|p| p.clamp(1e-100, 1e100)).collect();
        normalize_in_place(&mut pfs);
    }
    Ok((fs, pfs))
}

fn normalize_in_place(values: &mut [f64]) {
    let total: f64 = values.iter().sum();
    if total > 0.0 {
        values.iter_mut().for_each(|v| *v /= total);
    }
}

/// P(X >= minor count) for X ~ Binomial(depth, 0.01).
pub fn truong_pvalue(alt: u32, depth: u32) -> f64 {
    let minor = alt.min(depth.saturating_sub(alt)) as u64;
    match Binomial::new(TRUONG_ERROR_RATE, depth as u64) {
        Ok(binomial) => binomial.sf(minor) + binomial.pmf(minor),
        Err(_) => 1.0,
    }
}

/// Whether `(alt, depth)` is too far from the error expectation to be a sequencing error.
pub fn is_polymorphic_truong(alt: u32, depth: u32) -> bool {
    truong_pvalue(alt, depth) < TRUONG_ALPHA
}
