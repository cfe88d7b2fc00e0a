use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::{PipelineError, Result};

/// Run configuration, read from a JSON document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub run_directory: PathBuf,
    pub run_name: String,

    #[serde(default)]
    pub fasta_file: Option<PathBuf>,
    #[serde(default)]
    pub rules_file: Option<PathBuf>,
    #[serde(default = "default_peptide_length")]
    pub peptide_length: usize,
    #[serde(default)]
    pub peptide_importer: PeptideImporterKind,

    pub attribute_files: AttributeFiles,

    #[serde(default)]
    pub input_annotation_file: Option<PathBuf>,
    #[serde(default = "default_annotation_output")]
    pub annotation_output_file: String,

    #[serde(default)]
    pub disorder: Option<PredictorConfig>,
    #[serde(default)]
    pub secondary_structure: Option<PredictorConfig>,
    #[serde(default)]
    pub models: Option<ModelConfig>,

    pub svm: SvmConfig,

    #[serde(default)]
    pub keywords: StatusKeywords,
    #[serde(default)]
    pub file_wait: FileWait,
    #[serde(default)]
    pub error_files: ErrorFiles,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeptideImporterKind {
    #[default]
    Scan,
    Defined,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributeFiles {
    pub annotation: PathBuf,
    pub training: PathBuf,
    pub application: PathBuf,
}

/// Location of precomputed results and the command that produces missing ones.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictorConfig {
    pub root_dir: PathBuf,
    /// Program followed by its arguments; the FASTA path is appended.
    pub command: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelLayout {
    #[default]
    Current,
    Legacy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSourceConfig {
    pub path: PathBuf,
    #[serde(default)]
    pub layout: ModelLayout,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub table_file: PathBuf,
    pub column_file: PathBuf,
    #[serde(default = "default_rank_attribute")]
    pub rank_attribute: String,
    #[serde(default = "default_dssp_command")]
    pub dssp_command: Vec<String>,
    #[serde(default)]
    pub runs: HashMap<String, ModelSourceConfig>,
    #[serde(default)]
    pub url_template: Option<String>,
    #[serde(default = "default_wild_card")]
    pub wild_card: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SvmConfig {
    pub train_command: String,
    pub classify_command: String,
    #[serde(default = "default_gamma")]
    pub gamma: String,
    #[serde(default = "default_c")]
    pub c: String,
    pub feature_order: Vec<String>,
    #[serde(default = "default_jackknife_fraction")]
    pub jackknife_fraction: f64,
    #[serde(default = "default_training_iterations")]
    pub training_iterations: usize,
    #[serde(default = "default_true")]
    pub random_test_set: bool,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub model_file: Option<PathBuf>,
    #[serde(default)]
    pub benchmark_file: Option<PathBuf>,
    #[serde(default)]
    pub files: SvmFileNames,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SvmFileNames {
    pub training_set: String,
    pub test_set: String,
    pub test_output: String,
    pub model: String,
    pub application_set: String,
    pub application_output: String,
}

impl Default for SvmFileNames {
    fn default() -> Self {
        SvmFileNames {
            training_set: "svmTrainingSet.txt".into(),
            test_set: "svmTestSet.txt".into(),
            test_output: "svmTestSetOutput.txt".into(),
            model: "svmNewModel.txt".into(),
            application_set: "svmApplicationSet.txt".into(),
            application_output: "svmApplicationOutput.txt".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusKeywords {
    pub positive: String,
    pub negative: String,
    pub application: String,
}

impl Default for StatusKeywords {
    fn default() -> Self {
        StatusKeywords {
            positive: "positive".into(),
            negative: "negative".into(),
            application: "application".into(),
        }
    }
}

/// Polling budget used while waiting for files written by other processes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct FileWait {
    pub retries: u32,
    pub interval_ms: u64,
}

impl Default for FileWait {
    fn default() -> Self {
        FileWait { retries: 10, interval_ms: 1000 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorFiles {
    pub pipeline: String,
    pub internal: String,
}

impl Default for ErrorFiles {
    fn default() -> Self {
        ErrorFiles {
            pipeline: "pipeline_errors.out".into(),
            internal: "internal_errors.out".into(),
        }
    }
}

fn default_peptide_length() -> usize {
    8
}
fn default_annotation_output() -> String {
    "annotationOutput.txt".into()
}
fn default_rank_attribute() -> String {
    "no35".into()
}
fn default_dssp_command() -> Vec<String> {
    vec!["mkdssp".into(), "--output-format".into(), "dssp".into()]
}
fn default_wild_card() -> String {
    "XXX".into()
}
fn default_gamma() -> String {
    "0.05".into()
}
fn default_c() -> String {
    "1".into()
}
fn default_jackknife_fraction() -> f64 {
    0.1
}
fn default_training_iterations() -> usize {
    10
}
fn default_true() -> bool {
    true
}

impl PipelineConfig {
    pub fn from_path(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| PipelineError::file(path, e))?;
        let config: PipelineConfig = serde_json::from_reader(BufReader::new(file))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.peptide_length == 0 {
            return Err(PipelineError::Config("peptide_length must be positive".into()));
        }
        let fraction = self.svm.jackknife_fraction;
        if !(fraction > 0.0 && fraction < 1.0) {
            return Err(PipelineError::Config(format!(
                "jackknife_fraction must lie strictly between 0 and 1, got {fraction}"
            )));
        }
        if self.svm.feature_order.is_empty() {
            return Err(PipelineError::Config("svm.feature_order is empty".into()));
        }
        Ok(())
    }

    pub fn run_dir(&self) -> PathBuf {
        self.run_directory.join(&self.run_name)
    }

    /// `<run_dir>/<run_name>_<suffix>`
    pub fn result_file(&self, suffix: &str) -> PathBuf {
        self.run_dir().join(format!("{}_{}", self.run_name, suffix))
    }

    pub fn run_file(&self, name: &str) -> PathBuf {
        self.run_dir().join(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"{
        "run_directory": "/tmp/runs",
        "run_name": "r1",
        "attribute_files": {
            "annotation": "a.txt",
            "training": "t.txt",
            "application": "p.txt"
        },
        "svm": {
            "train_command": "svm_learn",
            "classify_command": "svm_classify",
            "feature_order": ["peptide_sequence"]
        }
    }"#;

    #[test]
    fn defaults_fill_missing_keys() {
        let config: PipelineConfig = serde_json::from_str(MINIMAL).unwrap();
        config.validate().unwrap();
        assert_eq!(config.peptide_length, 8);
        assert_eq!(config.peptide_importer, PeptideImporterKind::Scan);
        assert_eq!(config.keywords.positive, "positive");
        assert_eq!(config.file_wait.retries, 10);
        assert_eq!(config.error_files.pipeline, "pipeline_errors.out");
        assert_eq!(config.svm.files.training_set, "svmTrainingSet.txt");
        assert!(config.svm.random_test_set);
        assert_eq!(config.result_file("model.txt"), PathBuf::from("/tmp/runs/r1/r1_model.txt"));
    }

    #[test]
    fn rejects_bad_fraction() {
        let mut config: PipelineConfig = serde_json::from_str(MINIMAL).unwrap();
        config.svm.jackknife_fraction = 1.5;
        assert!(matches!(config.validate(), Err(PipelineError::Config(_))));
    }
}
