mod cluster_tests;
mod diversity_tests;
mod haploid_tests;
mod io_tests;
mod pca_tests;
mod pooled_tests;

use crate::counts::{AlleleCountMap, AlleleCounts, GeneVariantData, Location, VariantType};

/// Count tensor from `(alt, ref)` rows; panics on inconsistent input.
pub(crate) fn counts(sites: &[&[(u32, u32)]]) -> AlleleCounts {
    let rows: Vec<Vec<(u32, u32)>> = sites.iter().map(|s| s.to_vec()).collect();
    AlleleCounts::from_sites(&rows).expect("valid test counts")
}

/// Map holding a single gene entry built from `sites`.
pub(crate) fn single_gene_map(num_samples: usize, variant_type: VariantType, sites: &[&[(u32, u32)]]) -> AlleleCountMap {
    let samples = (0..num_samples).map(|i| format!("sample_{}", i)).collect();
    let mut map = AlleleCountMap::new(samples);
    let locations = (0..sites.len())
        .map(|i| Location::new("contig_1", 100 + i as u64))
        .collect();
    let entry = GeneVariantData::from_sites(locations, counts(sites)).expect("valid entry");
    map.insert("gene_1", variant_type, entry).expect("matching samples");
    map
}
