use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{debug, info, warn};

use crate::attributes::AttributeSchema;
use crate::config::{FileWait, PredictorConfig};
use crate::errors::{FeatureError, PipelineError, PredictorKind, ProcessingError, Result};
use crate::features::FeatureValue;
use crate::helper_functions::{run_subprocess, two_letter_dir, wait_for_file, write_single_fasta};
use crate::models::{Peptide, Protein};

impl PredictorKind {
    pub fn result_suffix(&self) -> &'static str {
        match self {
            PredictorKind::Disorder => "diso",
            PredictorKind::SecondaryStructure => "ss2",
        }
    }

    fn header_lines(&self) -> usize {
        match self {
            PredictorKind::Disorder => 4,
            PredictorKind::SecondaryStructure => 0,
        }
    }

    fn column_count(&self) -> usize {
        match self {
            PredictorKind::Disorder => 5,
            PredictorKind::SecondaryStructure => 6,
        }
    }

    /// Collapses the predictor's raw call into the stored call character.
    fn collapse_call(&self, raw: &str) -> Option<char> {
        match (self, raw) {
            (PredictorKind::Disorder, "*") => Some('D'),
            (PredictorKind::Disorder, ".") => Some('O'),
            (PredictorKind::SecondaryStructure, "H") => Some('A'),
            (PredictorKind::SecondaryStructure, "E") => Some('B'),
            (PredictorKind::SecondaryStructure, "C") => Some('L'),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResidueCall {
    pub residue_number: usize,
    pub residue: char,
    pub call: char,
    pub score: f64,
}

impl ResidueCall {
    fn parse(predictor: PredictorKind, line: &str) -> std::result::Result<Self, FeatureError> {
        let bad_line = || FeatureError::BadLine { predictor, line: line.to_string() };
        let cols: Vec<&str> = line.split_whitespace().collect();
        if cols.len() != predictor.column_count() {
            return Err(bad_line());
        }
        let residue_number = cols[0].parse().map_err(|_| bad_line())?;
        let mut residue = cols[1].chars();
        let residue = match (residue.next(), residue.next()) {
            (Some(c), None) => c,
            _ => return Err(bad_line()),
        };
        let call = predictor
            .collapse_call(cols[2])
            .ok_or_else(|| FeatureError::BadCall { predictor, call: cols[2].to_string() })?;
        let score = cols[3].parse().map_err(|_| bad_line())?;
        Ok(ResidueCall { residue_number, residue, call, score })
    }
}

/// Per-residue calls of one predictor over a whole protein, keyed by
/// 1-based residue number.
#[derive(Debug, Clone)]
pub struct SequenceFeatureCallSet {
    predictor: PredictorKind,
    calls: BTreeMap<usize, ResidueCall>,
}

impl SequenceFeatureCallSet {
    pub fn new(predictor: PredictorKind) -> Self {
        SequenceFeatureCallSet { predictor, calls: BTreeMap::new() }
    }

    pub fn from_result_text(predictor: PredictorKind, text: &str) -> std::result::Result<Self, FeatureError> {
        let mut set = Self::new(predictor);
        for line in text.lines().skip(predictor.header_lines()) {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            set.add_call(ResidueCall::parse(predictor, trimmed)?);
        }
        Ok(set)
    }

    pub fn from_result_file(predictor: PredictorKind, path: &Path) -> std::result::Result<Self, ProcessingError> {
        let text = fs::read_to_string(path).map_err(|e| PipelineError::file(path, e))?;
        Ok(Self::from_result_text(predictor, &text)?)
    }

    pub fn add_call(&mut self, call: ResidueCall) {
        self.calls.insert(call.residue_number, call);
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    /// Fails at the first stored residue that disagrees with the protein.
    pub fn check_sequence_match(&self, protein_sequence: &str) -> std::result::Result<(), FeatureError> {
        let residues: Vec<char> = protein_sequence.chars().collect();
        for call in self.calls.values() {
            let expected = call
                .residue_number
                .checked_sub(1)
                .and_then(|i| residues.get(i))
                .copied()
                .unwrap_or('-');
            if call.residue != expected {
                return Err(FeatureError::ProteinMismatch {
                    predictor: self.predictor,
                    position: call.residue_number,
                    residue: call.residue,
                    expected,
                });
            }
        }
        Ok(())
    }

    pub fn call(&self, position: usize) -> std::result::Result<&ResidueCall, FeatureError> {
        self.calls
            .get(&position)
            .ok_or(FeatureError::ResidueNotCovered { predictor: self.predictor, position })
    }

    /// Calls of every covered residue in residue order.
    pub fn full_call_string(&self) -> String {
        self.calls.values().map(|c| c.call).collect()
    }

    /// Calls and scores over the peptide's residues.
    pub fn peptide_features(&self, peptide: &Peptide) -> std::result::Result<(Vec<char>, Vec<f64>), FeatureError> {
        let mut calls = Vec::with_capacity(peptide.len());
        let mut scores = Vec::with_capacity(peptide.len());
        for position in peptide.start..=peptide.end {
            let call = self.call(position + 1)?;
            calls.push(call.call);
            scores.push(call.score);
        }
        Ok((calls, scores))
    }
}

/// Finds or produces a predictor's result file for a protein.
pub struct SequencePredictorRunner<'a> {
    pub predictor: PredictorKind,
    pub config: &'a PredictorConfig,
    pub wait: FileWait,
}

impl SequencePredictorRunner<'_> {
    pub fn result_file(&self, sequence_id: &str) -> PathBuf {
        two_letter_dir(&self.config.root_dir, sequence_id)
            .join(format!("{sequence_id}.{}", self.predictor.result_suffix()))
    }

    pub fn load_calls(&self, protein: &Protein) -> std::result::Result<SequenceFeatureCallSet, ProcessingError> {
        let path = self.result_file(&protein.sequence_id);
        if !path.exists() {
            self.run_predictor(protein, &path)?;
        }
        let calls = SequenceFeatureCallSet::from_result_file(self.predictor, &path)?;
        calls.check_sequence_match(&protein.sequence)?;
        Ok(calls)
    }

    fn run_predictor(&self, protein: &Protein, target: &Path) -> std::result::Result<(), ProcessingError> {
        let command_failed =
            |message: String| FeatureError::CommandFailed { predictor: self.predictor, message };
        let (program, args) = self
            .config
            .command
            .split_first()
            .ok_or_else(|| PipelineError::Config(format!("{} command is empty", self.predictor.code_name())))?;

        let work_dir = tempfile::tempdir()?;
        let fasta = work_dir.path().join(format!("{}.fasta", protein.sequence_id));
        write_single_fasta(&fasta, &protein.sequence_id, &protein.sequence)?;

        info!("Running {} predictor for {}", self.predictor.code_name(), protein.sequence_id);
        let mut cmd = Command::new(program);
        cmd.args(args).arg(&fasta).current_dir(work_dir.path());
        match run_subprocess(&mut cmd, false) {
            Ok(_) => {}
            Err(PipelineError::Subprocess { stderr, .. }) => return Err(command_failed(stderr).into()),
            Err(other) => return Err(other.into()),
        }

        let produced = work_dir.path().join(format!("{}.{}", protein.sequence_id, self.predictor.result_suffix()));
        if !produced.exists() {
            return Err(command_failed(format!("no output file {}", produced.display())).into());
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| PipelineError::file(parent, e))?;
        }
        fs::copy(&produced, target).map_err(|e| PipelineError::file(target, e))?;
        wait_for_file(target, &self.wait)?;
        debug!("Stored {} result at {}", self.predictor.code_name(), target.display());
        Ok(())
    }
}

/// Fills a protein's peptides with this predictor's calls and scores.
/// Failures are recorded on the peptides; only run-fatal errors propagate.
pub fn add_sequence_features(
    protein: &mut Protein,
    schema: &AttributeSchema,
    runner: &SequencePredictorRunner,
) -> Result<()> {
    if protein.has_errors() {
        return Ok(());
    }
    let predictor = runner.predictor;
    let calls = match runner.load_calls(protein) {
        Ok(calls) => calls,
        Err(ProcessingError::Feature(err)) => {
            warn!("{} failed for {}: {}", predictor.code_name(), protein.sequence_id, err);
            for peptide in protein.peptides_mut() {
                peptide.record_error(schema, &err)?;
            }
            return Ok(());
        }
        Err(ProcessingError::Fatal(err)) => return Err(err),
    };

    let sequence_id = protein.sequence_id.clone();
    for peptide in protein.peptides_mut() {
        match calls.peptide_features(peptide) {
            Ok((call_string, scores)) => {
                peptide.set_feature(schema, predictor.call_attribute(), FeatureValue::Calls(Some(call_string)))?;
                peptide.set_feature(schema, predictor.score_attribute(), FeatureValue::Scores(Some(scores)))?;
            }
            Err(err) => {
                debug!("Peptide at {} of {}: {}", peptide.start, sequence_id, err);
                peptide.record_error(schema, &err)?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::names;
    use crate::test_fixtures::{peptide, schema};
    use tempfile::tempdir;

    const DISORDER_RESULT: &str = "# header one\n# header two\n# header three\n\n   1 A . 0.01 0.99\n   2 R * 0.9 0.1\n";

    #[test]
    fn boundary_scenario() {
        let schema = schema();
        let calls = SequenceFeatureCallSet::from_result_text(PredictorKind::Disorder, DISORDER_RESULT).unwrap();
        calls.check_sequence_match("ARGGG").unwrap();
        assert_eq!(calls.full_call_string(), "OD");

        let pep = peptide(&schema, "A", 0);
        let (call_string, scores) = calls.peptide_features(&pep).unwrap();
        assert_eq!(FeatureValue::Calls(Some(call_string)).value_string(), "O");
        assert_eq!(scores, vec![0.01]);
    }

    #[test]
    fn sequence_mismatch_at_first_position() {
        let calls = SequenceFeatureCallSet::from_result_text(PredictorKind::Disorder, DISORDER_RESULT).unwrap();
        match calls.check_sequence_match("GRGGG") {
            Err(FeatureError::ProteinMismatch { position, residue, expected, .. }) => {
                assert_eq!(position, 1);
                assert_eq!(residue, 'A');
                assert_eq!(expected, 'G');
            }
            other => panic!("expected mismatch, got {other:?}"),
        }
    }

    #[test]
    fn sequence_match_is_case_sensitive() {
        let calls = SequenceFeatureCallSet::from_result_text(PredictorKind::Disorder, DISORDER_RESULT).unwrap();
        match calls.check_sequence_match("aRGGG") {
            Err(FeatureError::ProteinMismatch { position, expected, .. }) => {
                assert_eq!(position, 1);
                assert_eq!(expected, 'a');
            }
            other => panic!("expected mismatch, got {other:?}"),
        }
    }

    #[test]
    fn uncovered_residue_is_not_found() {
        let schema = schema();
        let calls = SequenceFeatureCallSet::from_result_text(PredictorKind::Disorder, DISORDER_RESULT).unwrap();
        let pep = peptide(&schema, "RG", 1);
        assert_eq!(
            calls.peptide_features(&pep).unwrap_err(),
            FeatureError::ResidueNotCovered { predictor: PredictorKind::Disorder, position: 3 }
        );
    }

    #[test]
    fn malformed_lines_and_calls() {
        let bad_line = "h\nh\nh\nh\n1 A . 0.5\n";
        assert!(matches!(
            SequenceFeatureCallSet::from_result_text(PredictorKind::Disorder, bad_line),
            Err(FeatureError::BadLine { .. })
        ));
        let bad_call = "h\nh\nh\nh\n1 A ? 0.5 0.5\n";
        assert!(matches!(
            SequenceFeatureCallSet::from_result_text(PredictorKind::Disorder, bad_call),
            Err(FeatureError::BadCall { .. })
        ));
    }

    #[test]
    fn secondary_structure_calls_collapse() {
        let text = "1 M C 0.9 0.05 0.05\n2 A H 0.1 0.8 0.1\n3 K E 0.2 0.1 0.7\n";
        let calls = SequenceFeatureCallSet::from_result_text(PredictorKind::SecondaryStructure, text).unwrap();
        assert_eq!(calls.full_call_string(), "LAB");
        assert_eq!(calls.call(2).unwrap().score, 0.1);
    }

    #[test]
    fn stored_results_populate_peptides() {
        let schema = schema();
        let dir = tempdir().unwrap();
        let config = PredictorConfig { root_dir: dir.path().to_path_buf(), command: vec!["unused".into()] };
        let runner = SequencePredictorRunner {
            predictor: PredictorKind::Disorder,
            config: &config,
            wait: FileWait { retries: 0, interval_ms: 1 },
        };
        let path = runner.result_file("seq1");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, DISORDER_RESULT).unwrap();

        let mut protein = Protein::new("seq1", "ARG");
        protein.set_peptides(vec![peptide(&schema, "AR", 0), peptide(&schema, "RG", 1)]).unwrap();
        add_sequence_features(&mut protein, &schema, &runner).unwrap();

        let first = protein.peptide(0).unwrap();
        assert_eq!(first.value_string(names::DISORDER_CALLS), "OD");
        assert_eq!(first.value_string(names::DISORDER_SCORES), "0.01, 0.9");
        let second = protein.peptide(1).unwrap();
        assert_eq!(second.error_codes(), &["peptide_error_disorder_peptide_not_found".to_string()]);
    }

    #[test]
    fn failing_command_marks_every_peptide() {
        let schema = schema();
        let dir = tempdir().unwrap();
        let config = PredictorConfig {
            root_dir: dir.path().to_path_buf(),
            command: vec!["/nonexistent/disorder/predictor".into()],
        };
        let runner = SequencePredictorRunner {
            predictor: PredictorKind::Disorder,
            config: &config,
            wait: FileWait { retries: 0, interval_ms: 1 },
        };

        let mut protein = Protein::new("seq1", "ARGK");
        protein.set_peptides(vec![peptide(&schema, "AR", 0), peptide(&schema, "GK", 2)]).unwrap();
        add_sequence_features(&mut protein, &schema, &runner).unwrap();

        for pep in protein.peptides() {
            assert_eq!(pep.error_codes(), &["peptide_error_disorder_bad_command".to_string()]);
            assert!(pep.feature(names::DISORDER_SCORES).unwrap().is_error());
        }
    }

    #[test]
    fn mismatch_marks_every_peptide() {
        let schema = schema();
        let dir = tempdir().unwrap();
        let config = PredictorConfig { root_dir: dir.path().to_path_buf(), command: vec!["unused".into()] };
        let runner = SequencePredictorRunner {
            predictor: PredictorKind::Disorder,
            config: &config,
            wait: FileWait::default(),
        };
        let path = runner.result_file("seq1");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, DISORDER_RESULT).unwrap();

        let mut protein = Protein::new("seq1", "GRG");
        protein.set_peptides(vec![peptide(&schema, "GR", 0)]).unwrap();
        add_sequence_features(&mut protein, &schema, &runner).unwrap();
        assert_eq!(
            protein.peptide(0).unwrap().error_codes(),
            &["peptide_error_disorder_protein_mismatch".to_string()]
        );
    }
}
