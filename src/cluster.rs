//! Average-linkage (UPGMA) clustering of samples from a distance matrix.

use itertools::Itertools;
use log::{debug, info};
use ndarray::Array2;

use crate::error::{Result, StatsError};

/// One agglomeration step. Leaves are `0..n`; the k-th merge creates cluster `n + k`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Merge {
    pub left: usize,
    pub right: usize,
    pub height: f64,
    pub size: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Dendrogram {
    pub num_leaves: usize,
    pub merges: Vec<Merge>,
}

/// Upper triangle of a square distance matrix, row by row.
pub fn condensed_distances(distance: &Array2<f64>) -> Result<Vec<f64>> {
    let (rows, cols) = distance.dim();
    StatsError::check_samples("distance matrix columns", rows, cols)?;
    if let Some(((i, j), value)) = distance.indexed_iter().find(|(_, v)| !v.is_finite()) {
        return Err(StatsError::InvalidInput(format!(
            "non-finite distance {} at ({}, {})",
            value, i, j
        )));
    }
    Ok((0..rows)
        .tuple_combinations()
        .map(|(i, j)| distance[[i, j]])
        .collect())
}

fn condensed_index(n: usize, i: usize, j: usize) -> usize {
    let (i, j) = if i < j { (i, j) } else { (j, i) };
    n * i - i * (i + 1) / 2 + (j - i - 1)
}

/// Builds the average-linkage dendrogram of `n` items from their condensed distances.
///
/// Among equally close pairs, the one with the lowest (row, column) position
/// among active clusters is merged first.
pub fn average_linkage(condensed: &[f64], n: usize) -> Result<Dendrogram> {
    if n == 0 {
        return Err(StatsError::EmptySampleSet("clustering"));
    }
    StatsError::check_samples("condensed distances", n * (n - 1) / 2, condensed.len())?;

    // slot -> (cluster id, size); distances between slots kept in a full matrix
    let mut slots: Vec<Option<(usize, usize)>> = (0..n).map(|i| Some((i, 1))).collect();
    let mut dist = Array2::<f64>::zeros((n, n));
    for (i, j) in (0..n).tuple_combinations() {
        let d = condensed[condensed_index(n, i, j)];
        dist[[i, j]] = d;
        dist[[j, i]] = d;
    }

    let mut merges = Vec::with_capacity(n.saturating_sub(1));
    for step in 0..n.saturating_sub(1) {
        let active: Vec<usize> = (0..n).filter(|&s| slots[s].is_some()).collect();
        let mut best: Option<(usize, usize, f64)> = None;
        for (a, b) in active.iter().copied().tuple_combinations() {
            let d = dist[[a, b]];
            if best.map_or(true, |(_, _, bd)| d < bd) {
                best = Some((a, b, d));
            }
        }
        let Some((a, b, height)) = best else {
            break;
        };
        let (Some((id_a, size_a)), Some((id_b, size_b))) = (slots[a], slots[b]) else {
            break;
        };

        // new cluster lives in slot a; distances are size-weighted averages
        for &other in &active {
            if other == a || other == b {
                continue;
            }
            let merged = (dist[[a, other]] * size_a as f64 + dist[[b, other]] * size_b as f64)
                / (size_a + size_b) as f64;
            dist[[a, other]] = merged;
            dist[[other, a]] = merged;
        }
        slots[a] = Some((n + step, size_a + size_b));
        slots[b] = None;
        merges.push(Merge {
            left: id_a.min(id_b),
            right: id_a.max(id_b),
            height,
            size: size_a + size_b,
        });
    }

    Ok(Dendrogram {
        num_leaves: n,
        merges,
    })
}

fn find(parent: &mut [usize], mut x: usize) -> usize {
    while parent[x] != x {
        parent[x] = parent[parent[x]];
        x = parent[x];
    }
    x
}

impl Dendrogram {
    /// Flat cluster label of every leaf when the tree is cut at height `max_d`.
    ///
    /// Leaves joined by merges at height `<= max_d` share a label. Labels are
    /// numbered from 0 in order of each cluster's first leaf.
    pub fn cut(&self, max_d: f64) -> Vec<usize> {
        let total = self.num_leaves + self.merges.len();
        let mut parent: Vec<usize> = (0..total).collect();
        for (k, merge) in self.merges.iter().enumerate() {
            if merge.height > max_d {
                continue;
            }
            let node = self.num_leaves + k;
            for child in [merge.left, merge.right] {
                let root = find(&mut parent, child);
                parent[root] = node;
            }
        }

        let mut labels = Vec::with_capacity(self.num_leaves);
        let mut seen: Vec<usize> = Vec::new();
        for leaf in 0..self.num_leaves {
            let root = find(&mut parent, leaf);
            let label = match seen.iter().position(|&r| r == root) {
                Some(label) => label,
                None => {
                    seen.push(root);
                    seen.len() - 1
                }
            };
            labels.push(label);
        }
        labels
    }
}

/// Coarse-grained representatives and the multi-member clusters at each cutoff.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterResult {
    /// True for the first sample of each group closer than `min_d`.
    pub coarse_grained: Vec<bool>,
    /// For each cutoff: membership masks over all samples, largest cluster first.
    pub clusters: Vec<Vec<Vec<bool>>>,
}

/// Clusters samples by average linkage.
///
/// Samples within `min_d` of each other are first collapsed onto the lowest
/// index among them. Then, for every `max_d`, the tree is cut and clusters with
/// more than one representative are kept. They are ordered by size, largest
/// first; among equal sizes the cluster whose first member comes later leads.
pub fn cluster_samples(distance: &Array2<f64>, min_d: f64, max_ds: &[f64]) -> Result<ClusterResult> {
    let n = distance.nrows();
    if n == 0 {
        return Err(StatsError::EmptySampleSet("clustering"));
    }
    let condensed = condensed_distances(distance)?;
    let dendrogram = average_linkage(&condensed, n)?;

    let coarse_labels = dendrogram.cut(min_d);
    let mut seen_labels = Vec::new();
    let coarse_grained: Vec<bool> = coarse_labels
        .iter()
        .map(|label| {
            if seen_labels.contains(label) {
                false
            } else {
                seen_labels.push(*label);
                true
            }
        })
        .collect();
    info!(
        "Coarse-grained {} samples to {} representatives at min_d={}",
        n,
        seen_labels.len(),
        min_d
    );

    let mut clusters = Vec::with_capacity(max_ds.len());
    for &max_d in max_ds {
        let labels = dendrogram.cut(max_d);
        // labels are numbered by first leaf, so label order is encounter order
        let num_labels = labels.iter().max().map_or(0, |&m| m + 1);
        let mut members: Vec<Vec<usize>> = vec![Vec::new(); num_labels];
        for (sample, &label) in labels.iter().enumerate() {
            if coarse_grained[sample] {
                members[label].push(sample);
            }
        }

        let mut kept: Vec<Vec<usize>> = members.into_iter().filter(|m| m.len() > 1).collect();
        kept.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| b[0].cmp(&a[0])));
        debug!("max_d={}: {} clusters with more than one member", max_d, kept.len());

        clusters.push(
            kept.into_iter()
                .map(|m| {
                    let mut mask = vec![false; n];
                    for idx in m {
                        mask[idx] = true;
                    }
                    mask
                })
                .collect(),
        );
    }

    Ok(ClusterResult {
        coarse_grained,
        clusters,
    })
}
