use log::{debug, info};
use ndarray::{Array1, Array2, Axis, Zip};
use rayon::prelude::*;

use crate::counts::{AlleleCountMap, AlleleCounts, GeneFilter};

/// Site-summed diversity numerators together with their shared denominator.
///
/// Nothing here is normalized; divide by `passed_sites` only after every gene
/// of interest has been accumulated (see [`normalize_by_passed_sites`]).
#[derive(Debug, Clone, PartialEq)]
pub struct PiMatrices {
    /// Between-sample π numerator; the diagonal holds the within-sample estimate.
    pub pi: Array2<f64>,
    /// Average of the two within-sample π values over jointly covered sites.
    pub avg_pi: Array2<f64>,
    pub passed_sites: Array2<f64>,
}

impl PiMatrices {
    pub fn zeros(num_samples: usize) -> Self {
        PiMatrices {
            pi: Array2::zeros((num_samples, num_samples)),
            avg_pi: Array2::zeros((num_samples, num_samples)),
            passed_sites: Array2::zeros((num_samples, num_samples)),
        }
    }

    fn merge(mut self, other: PiMatrices) -> PiMatrices {
        self.pi += &other.pi;
        self.avg_pi += &other.avg_pi;
        self.passed_sites += &other.passed_sites;
        self
    }

    /// Per-site π and average π, with poorly covered cells zeroed.
    pub fn normalized(&self, min_passed_sites: f64) -> (Array2<f64>, Array2<f64>) {
        (
            normalize_by_passed_sites(&self.pi, &self.passed_sites, min_passed_sites),
            normalize_by_passed_sites(&self.avg_pi, &self.passed_sites, min_passed_sites),
        )
    }
}

/// Within-sample heterozygosity numerator for every (site, sample) cell.
///
/// Uses sampling without replacement, i.e. 1 - Σ_a (n_a/D)·((n_a-1)/(D-1)).
/// Cells with fewer than two reads contribute 0.
pub fn within_sample_pi(counts: &AlleleCounts) -> Array2<f64> {
    let view = counts.view();
    let (sites, samples, _) = view.dim();
    Array2::from_shape_fn((sites, samples), |(s, j)| {
        let depth = counts.depth(s, j) as f64;
        if depth < 2.0 {
            return 0.0;
        }
        let same = (0..2)
            .map(|a| {
                let n = view[[s, j, a]] as f64;
                (n / depth) * ((n - 1.0) / (depth - 1.0))
            })
            .sum::<f64>();
        1.0 - same
    })
}

/// π numerators contributed by a single gene's sites.
///
/// Returns `(pi, avg_pi)`. Between samples i and j, each jointly covered site
/// adds 1 - Σ_a f_ia·f_ja; the diagonal of `pi` is overwritten with the
/// within-sample estimate.
pub fn gene_pi_matrices(counts: &AlleleCounts) -> (Array2<f64>, Array2<f64>) {
    let depths = counts.depths();
    let covered = depths.mapv(|d| if d > 0 { 1.0 } else { 0.0 });
    let view = counts.view();

    let allele_freqs = |allele: usize| -> Array2<f64> {
        Array2::from_shape_fn(depths.dim(), |(s, j)| {
            let depth = depths[[s, j]];
            if depth == 0 {
                0.0
            } else {
                view[[s, j, allele]] as f64 / depth as f64
            }
        })
    };
    let alt_freqs = allele_freqs(0);
    let ref_freqs = allele_freqs(1);

    let mut pi = covered.t().dot(&covered);
    pi -= &alt_freqs.t().dot(&alt_freqs);
    pi -= &ref_freqs.t().dot(&ref_freqs);

    let self_pi = within_sample_pi(counts);
    let mut avg_pi = self_pi.t().dot(&covered);
    avg_pi += &covered.t().dot(&self_pi);
    avg_pi.mapv_inplace(|x| x / 2.0);

    pi.diag_mut().assign(&avg_pi.diag());
    (pi, avg_pi)
}

/// Accumulates π numerators and passed sites over every selected gene entry.
///
/// Entries without sites still add their passed-sites matrix.
pub fn calculate_pi_matrix(map: &AlleleCountMap, filter: &GeneFilter) -> PiMatrices {
    let n = map.num_samples();
    let entries = map.select(filter);
    info!(
        "Accumulating pi over {} gene entries and {} samples",
        entries.len(),
        n
    );

    entries
        .par_iter()
        .map(|(_, entry)| {
            let mut contribution = PiMatrices::zeros(n);
            contribution.passed_sites += &entry.passed_sites;
            if let Some(counts) = entry.sites.counts() {
                let (pi, avg_pi) = gene_pi_matrices(counts);
                contribution.pi = pi;
                contribution.avg_pi = avg_pi;
            }
            contribution
        })
        .reduce(|| PiMatrices::zeros(n), PiMatrices::merge)
}

/// Divides `values` by `passed`, zeroing cells whose passed count is below `min_passed`.
///
/// Cells with no passed sites come out as 0 rather than NaN.
pub fn normalize_by_passed_sites(
    values: &Array2<f64>,
    passed: &Array2<f64>,
    min_passed: f64,
) -> Array2<f64> {
    let mut out = Array2::zeros(values.dim());
    Zip::from(&mut out)
        .and(values)
        .and(passed)
        .for_each(|o, &v, &p| {
            if p >= min_passed && p > 0.0 {
                *o = v / p;
            }
        });
    out
}

/// Non-zero alt frequencies observed in each sample, plus covered sites per sample.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleFreqs {
    pub freqs: Vec<Vec<f64>>,
    pub passed_sites: Array1<f64>,
}

/// Collects per-sample alt frequencies across genes, folded to the minor allele if asked.
pub fn calculate_sample_freqs(map: &AlleleCountMap, filter: &GeneFilter, fold: bool) -> SampleFreqs {
    let n = map.num_samples();
    let mut freqs = vec![Vec::new(); n];
    let mut passed_sites = Array1::<f64>::zeros(n);

    for (_, entry) in map.select(filter) {
        passed_sites += &entry.passed_sites.diag();
        let Some(counts) = entry.sites.counts() else {
            continue;
        };
        let mut gene_freqs = counts.alt_freqs();
        if fold {
            gene_freqs.mapv_inplace(|f| f.min(1.0 - f));
        }
        for (sample_idx, column) in gene_freqs.axis_iter(Axis(1)).enumerate() {
            freqs[sample_idx].extend(column.iter().copied().filter(|&f| f > 0.0));
        }
    }
    debug!(
        "Collected {} non-zero frequencies",
        freqs.iter().map(Vec::len).sum::<usize>()
    );
    SampleFreqs {
        freqs,
        passed_sites,
    }
}
