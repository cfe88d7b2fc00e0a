use std::path::PathBuf;

use polars::prelude::PolarsError;
use thiserror::Error;

use crate::attributes::names;

pub const PEPTIDE_ERROR_PREFIX: &str = "peptide_error_";

/// Fatal errors. Anything of this type aborts the run and ends up in the
/// pipeline error sentinel file.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("schema error: {0}")]
    Schema(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid input: {0}")]
    Input(String),

    #[error("internal consistency error: {0}")]
    Internal(String),

    #[error("benchmark error: {0}")]
    Benchmark(String),

    #[error("command `{command}` failed: {stderr}")]
    Subprocess { command: String, stderr: String },

    #[error("timed out waiting for {path} after {attempts} attempts")]
    FileTimeout { path: PathBuf, attempts: u32 },

    #[error("error file {path} from a previous run exists: {message}")]
    ErrorExists { path: PathBuf, message: String },

    #[error("I/O error on {path}: {source}")]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Polars(#[from] PolarsError),
}

impl PipelineError {
    pub fn file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PipelineError::File { path: path.into(), source }
    }
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;

/// Which per-residue predictor produced a sequence feature error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PredictorKind {
    Disorder,
    SecondaryStructure,
}

impl PredictorKind {
    pub fn code_name(&self) -> &'static str {
        match self {
            PredictorKind::Disorder => "disorder",
            PredictorKind::SecondaryStructure => "secondary_structure",
        }
    }

    pub fn call_attribute(&self) -> &'static str {
        match self {
            PredictorKind::Disorder => names::DISORDER_CALLS,
            PredictorKind::SecondaryStructure => names::SECONDARY_CALLS,
        }
    }

    pub fn score_attribute(&self) -> &'static str {
        match self {
            PredictorKind::Disorder => names::DISORDER_SCORES,
            PredictorKind::SecondaryStructure => names::SECONDARY_SCORES,
        }
    }
}

/// Errors scoped to a single peptide. They are recorded on the peptide's
/// error feature and on the features they invalidate; processing continues.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum FeatureError {
    #[error("{} result does not cover residue {position}", .predictor.code_name())]
    ResidueNotCovered { predictor: PredictorKind, position: usize },

    #[error("{} result residue {residue} at position {position} does not match protein residue {expected}", .predictor.code_name())]
    ProteinMismatch {
        predictor: PredictorKind,
        position: usize,
        residue: char,
        expected: char,
    },

    #[error("{} command failed: {message}", .predictor.code_name())]
    CommandFailed { predictor: PredictorKind, message: String },

    #[error("{} result line could not be parsed: '{line}'", .predictor.code_name())]
    BadLine { predictor: PredictorKind, line: String },

    #[error("{} result has unexpected call code '{call}'", .predictor.code_name())]
    BadCall { predictor: PredictorKind, call: String },

    #[error("no source file found for model {model_id}; searched {searched}")]
    NoSourceModel { model_id: String, searched: String },

    #[error("structure engine failed on model {model_id}: {message}")]
    StructureEngine { model_id: String, message: String },

    #[error("model {model_id} residue {residue} at position {position} does not match peptide residue {expected}")]
    StructureMismatch {
        model_id: String,
        position: usize,
        residue: char,
        expected: char,
    },
}

impl FeatureError {
    /// Coded string written to the peptide error feature.
    pub fn code(&self) -> String {
        let suffix = match self {
            FeatureError::ResidueNotCovered { predictor, .. } => {
                format!("{}_peptide_not_found", predictor.code_name())
            }
            FeatureError::ProteinMismatch { predictor, .. } => {
                format!("{}_protein_mismatch", predictor.code_name())
            }
            FeatureError::CommandFailed { predictor, .. } => {
                format!("{}_bad_command", predictor.code_name())
            }
            FeatureError::BadLine { predictor, .. } => format!("{}_bad_line", predictor.code_name()),
            FeatureError::BadCall { predictor, .. } => format!("{}_bad_call", predictor.code_name()),
            FeatureError::NoSourceModel { .. } => "no_source_model".to_string(),
            FeatureError::StructureEngine { .. } => "dssp_error".to_string(),
            FeatureError::StructureMismatch { .. } => "dssp_mismatch".to_string(),
        };
        format!("{PEPTIDE_ERROR_PREFIX}{suffix}")
    }

    /// The two features left holding this error's code.
    pub fn affected_features(&self) -> [&'static str; 2] {
        match self {
            FeatureError::ResidueNotCovered { predictor, .. }
            | FeatureError::ProteinMismatch { predictor, .. }
            | FeatureError::CommandFailed { predictor, .. }
            | FeatureError::BadLine { predictor, .. }
            | FeatureError::BadCall { predictor, .. } => {
                [predictor.call_attribute(), predictor.score_attribute()]
            }
            FeatureError::NoSourceModel { .. }
            | FeatureError::StructureEngine { .. }
            | FeatureError::StructureMismatch { .. } => {
                [names::DSSP_STRUCTURE, names::DSSP_ACCESSIBILITY]
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProteinError {
    NoPeptidesParsed,
}

impl ProteinError {
    pub fn code(&self) -> &'static str {
        match self {
            ProteinError::NoPeptidesParsed => "no_peptides_parsed",
        }
    }

    pub fn from_code(code: &str) -> Result<Self> {
        match code {
            "no_peptides_parsed" => Ok(ProteinError::NoPeptidesParsed),
            other => Err(PipelineError::Input(format!("unknown protein error code '{other}'"))),
        }
    }
}

/// Outcome of a stage that can fail either for one protein's peptides or
/// for the whole run.
#[derive(Debug, Error)]
pub enum ProcessingError {
    #[error(transparent)]
    Feature(#[from] FeatureError),
    #[error(transparent)]
    Fatal(#[from] PipelineError),
}

impl From<std::io::Error> for ProcessingError {
    fn from(err: std::io::Error) -> Self {
        ProcessingError::Fatal(PipelineError::Io(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feature_error_codes_carry_prefix() {
        let err = FeatureError::ResidueNotCovered { predictor: PredictorKind::Disorder, position: 3 };
        assert_eq!(err.code(), "peptide_error_disorder_peptide_not_found");
        assert_eq!(err.affected_features(), [names::DISORDER_CALLS, names::DISORDER_SCORES]);

        let err = FeatureError::StructureMismatch {
            model_id: "m1".into(),
            position: 4,
            residue: 'A',
            expected: 'G',
        };
        assert_eq!(err.code(), "peptide_error_dssp_mismatch");
        assert_eq!(err.affected_features(), [names::DSSP_STRUCTURE, names::DSSP_ACCESSIBILITY]);
    }

    #[test]
    fn protein_error_codes() {
        assert_eq!(ProteinError::NoPeptidesParsed.code(), "no_peptides_parsed");
        assert_eq!(ProteinError::from_code("no_peptides_parsed").unwrap(), ProteinError::NoPeptidesParsed);
        assert!(ProteinError::from_code("bogus").is_err());
    }
}
