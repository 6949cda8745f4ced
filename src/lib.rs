// Module declarations
pub mod cluster;
pub mod config;
pub mod consistency;
pub mod counts;
pub mod diversity;
pub mod error;
pub mod fixation;
pub mod genotype;
pub mod haploid;
pub mod io;
pub mod ld;
pub mod pca;
pub mod pooled;
pub mod sfs;

#[cfg(feature = "python")]
mod python;

#[cfg(test)]
mod tests;

pub use config::{ConsensusThresholds, StatsConfig};
pub use counts::{
    AlleleCountMap, AlleleCountMapBuilder, AlleleCounts, CoverageHistogram, GeneFilter,
    GeneVariantData, Location, SiteData, VariantType,
};
pub use error::{Result, StatsError};
