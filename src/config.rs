use std::io::BufRead;

use log::debug;

use crate::error::{Result, StatsError};

/// Frequency cut-offs used to call a consensus allele.
///
/// A cell with alt frequency `<= lower` is called reference, `>= upper` is
/// called alternate, anything strictly between is left uncalled.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConsensusThresholds {
    pub lower: f64,
    pub upper: f64,
}

impl Default for ConsensusThresholds {
    fn default() -> Self {
        ConsensusThresholds {
            lower: 0.2,
            upper: 0.8,
        }
    }
}

impl ConsensusThresholds {
    pub fn new(lower: f64, upper: f64) -> Result<Self> {
        let thresholds = ConsensusThresholds { lower, upper };
        thresholds.validate()?;
        Ok(thresholds)
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.lower) || !(0.0..=1.0).contains(&self.upper) {
            return Err(StatsError::Config(format!(
                "consensus thresholds must lie in [0, 1], got {}/{}",
                self.lower, self.upper
            )));
        }
        if self.lower >= self.upper {
            return Err(StatsError::Config(format!(
                "consensus lower threshold {} must be below upper threshold {}",
                self.lower, self.upper
            )));
        }
        Ok(())
    }

    /// True when `freq` sits strictly between the two thresholds.
    pub fn is_intermediate(&self, freq: f64) -> bool {
        freq > self.lower && freq < self.upper
    }
}

/// All tunable parameters of the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct StatsConfig {
    pub consensus: ConsensusThresholds,
    /// Minimum |Δ freq| for a site to count as a fixed difference.
    pub fixation_min_change: f64,
    /// A sample below this minor-allele frequency is "not polymorphic" for new-SNP calling.
    pub new_snp_min_freq: f64,
    /// A sample above this minor-allele frequency is "polymorphic" for new-SNP calling.
    pub new_snp_max_freq: f64,
    /// Minimum non-zero median coverage for a sample to enter the haploidy test.
    pub min_median_coverage: f64,
    pub threshold_within_between_fraction: f64,
    pub threshold_pi: f64,
    /// Cells with fewer passed sites are zeroed before normalization.
    pub min_passed_sites_per_person: f64,
    pub sfs_error_rate: f64,
    pub em_iterations: usize,
    pub permutation_max_attempts: usize,
}

impl Default for StatsConfig {
    fn default() -> Self {
        StatsConfig {
            consensus: ConsensusThresholds::default(),
            fixation_min_change: 0.8,
            new_snp_min_freq: 0.05,
            new_snp_max_freq: 0.2,
            min_median_coverage: 20.0,
            threshold_within_between_fraction: 0.1,
            threshold_pi: 1e-3,
            min_passed_sites_per_person: 100.0,
            sfs_error_rate: 0.01,
            em_iterations: 100,
            permutation_max_attempts: 10_000,
        }
    }
}

/// Names accepted by [`StatsConfig::set_option`].
pub const RECOGNIZED_OPTIONS: &[&str] = &[
    "consensus_lower_threshold",
    "consensus_upper_threshold",
    "fixation_min_change",
    "new_snp_min_freq",
    "new_snp_max_freq",
    "min_median_coverage",
    "threshold_within_between_fraction",
    "threshold_pi",
    "min_passed_sites_per_person",
    "sfs_error_rate",
    "em_iterations",
    "permutation_max_attempts",
];

fn parse_value<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value.trim().parse::<T>().map_err(|_| {
        StatsError::Config(format!("invalid value '{}' for option '{}'", value.trim(), name))
    })
}

impl StatsConfig {
    pub fn validate(&self) -> Result<()> {
        self.consensus.validate()?;

        let unit_interval = [
            ("fixation_min_change", self.fixation_min_change),
            ("new_snp_min_freq", self.new_snp_min_freq),
            ("new_snp_max_freq", self.new_snp_max_freq),
            ("sfs_error_rate", self.sfs_error_rate),
        ];
        for (name, value) in unit_interval {
            if !(0.0..=1.0).contains(&value) {
                return Err(StatsError::Config(format!(
                    "{} must lie in [0, 1], got {}",
                    name, value
                )));
            }
        }
        if self.new_snp_min_freq > self.new_snp_max_freq {
            return Err(StatsError::Config(format!(
                "new_snp_min_freq {} exceeds new_snp_max_freq {}",
                self.new_snp_min_freq, self.new_snp_max_freq
            )));
        }
        if self.sfs_error_rate <= 0.0 {
            return Err(StatsError::Config("sfs_error_rate must be positive".to_string()));
        }
        if self.min_median_coverage < 0.0
            || self.threshold_within_between_fraction < 0.0
            || self.threshold_pi < 0.0
            || self.min_passed_sites_per_person < 0.0
        {
            return Err(StatsError::Config(
                "coverage and fraction thresholds must be non-negative".to_string(),
            ));
        }
        if self.permutation_max_attempts == 0 {
            return Err(StatsError::Config(
                "permutation_max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Sets one option by its recognized name.
    pub fn set_option(&mut self, name: &str, value: &str) -> Result<()> {
        match name {
            "consensus_lower_threshold" => self.consensus.lower = parse_value(name, value)?,
            "consensus_upper_threshold" => self.consensus.upper = parse_value(name, value)?,
            "fixation_min_change" => self.fixation_min_change = parse_value(name, value)?,
            "new_snp_min_freq" => self.new_snp_min_freq = parse_value(name, value)?,
            "new_snp_max_freq" => self.new_snp_max_freq = parse_value(name, value)?,
            "min_median_coverage" => self.min_median_coverage = parse_value(name, value)?,
            "threshold_within_between_fraction" => {
                self.threshold_within_between_fraction = parse_value(name, value)?
            }
            "threshold_pi" => self.threshold_pi = parse_value(name, value)?,
            "min_passed_sites_per_person" => {
                self.min_passed_sites_per_person = parse_value(name, value)?
            }
            "sfs_error_rate" => self.sfs_error_rate = parse_value(name, value)?,
            "em_iterations" => self.em_iterations = parse_value(name, value)?,
            "permutation_max_attempts" => self.permutation_max_attempts = parse_value(name, value)?,
            _ => {
                return Err(StatsError::Config(format!(
                    "unrecognized option '{}' (expected one of: {})",
                    name,
                    RECOGNIZED_OPTIONS.join(", ")
                )))
            }
        }
        debug!("Config option {} set to {}", name, value.trim());
        Ok(())
    }

    /// Reads `name<TAB>value` or `name = value` lines on top of the defaults.
    ///
    /// Blank lines and lines starting with `#` are skipped. The result is validated.
    pub fn from_reader<R: BufRead>(reader: R) -> Result<Self> {
        let mut config = StatsConfig::default();
        for (idx, line) in reader.lines().enumerate() {
            let line = line?;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let (name, value) = trimmed
                .split_once('=')
                .or_else(|| trimmed.split_once('\t'))
                .ok_or_else(|| {
                    StatsError::parse(idx + 1, format!("expected 'name = value', found '{}'", trimmed))
                })?;
            config.set_option(name.trim(), value)?;
        }
        config.validate()?;
        Ok(config)
    }
}
