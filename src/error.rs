//src/error.rs

use std::path::PathBuf;
use thiserror::Error;

/// Exit status used when no ORF passes the length threshold in a sample.
pub const NO_ORFS_EXIT_CODE: i32 = 128;

pub type Result<T> = std::result::Result<T, GraftError>;

#[derive(Debug, Error)]
pub enum GraftError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Placement file error: {0}")]
    Json(#[from] serde_json::Error),

    /// Malformed line in a sequence, search or taxonomy file
    #[error("Invalid {format} record at line {line}: {msg}")]
    Parse {
        format: &'static str,
        line: usize,
        msg: String,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{count} search profiles were supplied without an alignment profile to disambiguate them")]
    AmbiguousAlignmentProfile { count: usize },

    #[error("No ORF of at least {min_orf_length} bp was found in sample {sample}; the minimum ORF length is likely too long for this marker")]
    NoOrfsFound { sample: String, min_orf_length: usize },

    #[error("{tool} failed with exit status {}: {stderr}", display_status(.status))]
    ExternalTool {
        tool: String,
        status: Option<i32>,
        stderr: String,
    },

    #[error("Output directory {} already exists, use --force to overwrite", .0.display())]
    OutputExists(PathBuf),

    #[error("Sample {sample}: {source}")]
    Sample {
        sample: String,
        #[source]
        source: Box<GraftError>,
    },
}

fn display_status(status: &Option<i32>) -> String {
    status
        .map(|s| s.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

impl GraftError {
    pub fn parse(format: &'static str, line: usize, msg: impl Into<String>) -> Self {
        GraftError::Parse {
            format,
            line,
            msg: msg.into(),
        }
    }

    pub fn in_sample(self, sample: &str) -> Self {
        match self {
            GraftError::Sample { .. } => self,
            other => GraftError::Sample {
                sample: sample.to_string(),
                source: Box::new(other),
            },
        }
    }

    /// Process exit status for this failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            GraftError::NoOrfsFound { .. } => NO_ORFS_EXIT_CODE,
            GraftError::ExternalTool { status, .. } => status.filter(|&s| s != 0).unwrap_or(1),
            GraftError::Config(_)
            | GraftError::AmbiguousAlignmentProfile { .. }
            | GraftError::OutputExists(_) => 2,
            GraftError::Sample { source, .. } => source.exit_code(),
            _ => 1,
        }
    }
}
