use thiserror::Error;

/// Errors raised by the statistics engine and its loaders.
///
/// Only malformed input is fatal. Missing gene/variant-type entries and empty
/// site sets contribute nothing and never surface here.
#[derive(Debug, Error)]
pub enum StatsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error at line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("Shape mismatch in {context}: expected {expected}, found {found}")]
    ShapeMismatch {
        context: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("Negative read count {value} at site {site}, sample {sample}")]
    NegativeCount { site: usize, sample: usize, value: i64 },

    #[error("Empty sample set passed to {0}")]
    EmptySampleSet(&'static str),

    #[error("Samples without any covered site: {0:?}")]
    UncoveredSamples(Vec<usize>),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Numerical error: {0}")]
    Numerical(String),
}

impl From<csv::Error> for StatsError {
    fn from(e: csv::Error) -> Self {
        let line = e.position().map(|p| p.line() as usize).unwrap_or(0);
        StatsError::Parse {
            line,
            message: format!("CSV error: {}", e),
        }
    }
}

impl StatsError {
    pub fn parse(line: usize, message: impl Into<String>) -> Self {
        StatsError::Parse {
            line,
            message: message.into(),
        }
    }

    /// Guard used by every pairwise computation that needs matching sample axes.
    pub fn check_samples(context: &'static str, expected: usize, found: usize) -> Result<()> {
        if expected != found {
            return Err(StatsError::ShapeMismatch {
                context,
                expected,
                found,
            });
        }
        Ok(())
    }
}

pub type Result<T> = std::result::Result<T, StatsError>;
