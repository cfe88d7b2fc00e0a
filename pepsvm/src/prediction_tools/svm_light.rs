use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::process::Command;

use tracing::{debug, info};

use crate::config::{StatusKeywords, SvmConfig};
use crate::errors::{PipelineError, Result};
use crate::features::svm_encoder::SvmLineBuilder;
use crate::helper_functions::run_subprocess;
use crate::models::Peptide;

const UNLABELED: &str = "0";

/// External SVM trainer and classifier.
pub trait SvmTool {
    fn train(&self, training_file: &Path, model_file: &Path) -> Result<()>;
    fn classify(&self, input_file: &Path, model_file: &Path, output_file: &Path) -> Result<()>;
}

/// `svm_learn`/`svm_classify` style command line tools.
#[derive(Debug, Clone)]
pub struct SvmLightCommands {
    pub train_command: String,
    pub classify_command: String,
    pub gamma: String,
    pub c: String,
}

impl SvmLightCommands {
    pub fn from_config(config: &SvmConfig) -> Result<Self> {
        for program in [&config.train_command, &config.classify_command] {
            which::which(program)
                .map_err(|e| PipelineError::Config(format!("SVM executable '{program}' not found: {e}")))?;
        }
        Ok(SvmLightCommands {
            train_command: config.train_command.clone(),
            classify_command: config.classify_command.clone(),
            gamma: config.gamma.clone(),
            c: config.c.clone(),
        })
    }
}

fn require_file(path: &Path, what: &str) -> Result<()> {
    if path.exists() {
        Ok(())
    } else {
        Err(PipelineError::Input(format!("{what} {} does not exist", path.display())))
    }
}

impl SvmTool for SvmLightCommands {
    fn train(&self, training_file: &Path, model_file: &Path) -> Result<()> {
        require_file(training_file, "SVM training file")?;
        let mut cmd = Command::new(&self.train_command);
        cmd.arg("-g").arg(&self.gamma)
            .arg("-c").arg(&self.c)
            .arg(training_file)
            .arg(model_file);
        run_subprocess(&mut cmd, true)?;
        debug!("Trained SVM model {}", model_file.display());
        Ok(())
    }

    fn classify(&self, input_file: &Path, model_file: &Path, output_file: &Path) -> Result<()> {
        require_file(input_file, "SVM classification input")?;
        require_file(model_file, "SVM model")?;
        let mut cmd = Command::new(&self.classify_command);
        cmd.arg(input_file).arg(model_file).arg(output_file);
        run_subprocess(&mut cmd, true)?;
        Ok(())
    }
}

/// Labeled lines: `1` for positives, `-1` for negatives.
pub fn write_training_file(
    path: &Path,
    peptides: &[&Peptide],
    builder: &SvmLineBuilder,
    keywords: &StatusKeywords,
) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path).map_err(|e| PipelineError::file(path, e))?);
    for peptide in peptides {
        let label = peptide.classify(keywords)?.training_label()?;
        writeln!(writer, "{}", builder.line(label, peptide)?)?;
    }
    writer.flush()?;
    info!("Wrote {} training peptides to {}", peptides.len(), path.display());
    Ok(())
}

/// Unlabeled lines for the classifier.
pub fn write_classification_file(path: &Path, peptides: &[&Peptide], builder: &SvmLineBuilder) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path).map_err(|e| PipelineError::file(path, e))?);
    for peptide in peptides {
        writeln!(writer, "{}", builder.line(UNLABELED, peptide)?)?;
    }
    writer.flush()?;
    Ok(())
}

/// One score per line; the count must equal the number of peptides sent.
pub fn read_scores(path: &Path, expected: usize) -> Result<Vec<f64>> {
    let contents = fs::read_to_string(path).map_err(|e| PipelineError::file(path, e))?;
    let scores = contents
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            line.trim()
                .parse::<f64>()
                .map_err(|_| PipelineError::Input(format!("classifier output line '{line}' is not a score")))
        })
        .collect::<Result<Vec<_>>>()?;
    if scores.len() != expected {
        return Err(PipelineError::Benchmark(format!(
            "classifier wrote {} scores to {} for {} peptides",
            scores.len(),
            path.display(),
            expected
        )));
    }
    Ok(scores)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::names;
    use crate::features::FeatureValue;
    use crate::test_fixtures::{peptide, schema};
    use tempfile::tempdir;

    #[test]
    fn training_labels_follow_status() {
        let schema = schema();
        let dir = tempdir().unwrap();
        let path = dir.path().join("train.txt");
        let order = vec![names::DISORDER_SCORES.to_string()];
        let builder = SvmLineBuilder::new(&schema, &order, 2).unwrap();

        let mut pos = peptide(&schema, "AC", 0);
        pos.set_feature(&schema, names::STATUS, FeatureValue::text("positive")).unwrap();
        pos.set_feature(&schema, names::DISORDER_SCORES, FeatureValue::Scores(Some(vec![0.5, 1.0]))).unwrap();
        let mut neg = peptide(&schema, "DE", 2);
        neg.set_feature(&schema, names::STATUS, FeatureValue::text("Negative")).unwrap();

        write_training_file(&path, &[&pos, &neg], &builder, &StatusKeywords::default()).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "1 1:0.5 2:1\n-1\n");

        write_classification_file(&path, &[&pos], &builder).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "0 1:0.5 2:1\n");
    }

    #[test]
    fn invalid_status_is_fatal() {
        let schema = schema();
        let dir = tempdir().unwrap();
        let order = vec![names::DISORDER_SCORES.to_string()];
        let builder = SvmLineBuilder::new(&schema, &order, 2).unwrap();
        let mut pep = peptide(&schema, "AC", 0);
        pep.set_feature(&schema, names::STATUS, FeatureValue::text("unsure")).unwrap();
        let result = write_training_file(&dir.path().join("t.txt"), &[&pep], &builder, &StatusKeywords::default());
        assert!(matches!(result, Err(PipelineError::Input(_))));
    }

    #[test]
    fn score_count_must_match() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.txt");
        fs::write(&path, "1.5\n-0.25\n").unwrap();
        assert_eq!(read_scores(&path, 2).unwrap(), vec![1.5, -0.25]);
        assert!(matches!(read_scores(&path, 3), Err(PipelineError::Benchmark(_))));
        assert!(read_scores(&dir.path().join("missing.txt"), 2).is_err());
    }

    #[test]
    fn missing_training_file_is_fatal() {
        let dir = tempdir().unwrap();
        let tool = SvmLightCommands {
            train_command: "svm_learn".into(),
            classify_command: "svm_classify".into(),
            gamma: "0.05".into(),
            c: "1".into(),
        };
        let result = tool.train(&dir.path().join("absent.txt"), &dir.path().join("model.txt"));
        assert!(matches!(result, Err(PipelineError::Input(_))));
    }
}
