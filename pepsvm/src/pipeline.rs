use std::fs;
use std::path::PathBuf;

use clap::ValueEnum;
use tracing::{error, info, warn};

use crate::analysis::benchmark::{BenchmarkFiles, LeaveOneOutBenchmarker, SvmBenchmarker};
use crate::analysis::benchmark_scores::BenchmarkScores;
use crate::analysis::partition::{SamplingMode, TrainTestPartitioner};
use crate::analysis::tracker::TestSetResultTracker;
use crate::attributes::{names, AttributeSchema};
use crate::config::{PeptideImporterKind, PipelineConfig};
use crate::data_handling::annotation_file::{read_annotation_file, write_annotation_file};
use crate::data_handling::model_table::ModelTable;
use crate::data_handling::peptide_import::{
    DefinedPeptideImporter, ParsingRules, PeptideImporter, ScanPeptideImporter,
};
use crate::errors::{PipelineError, PredictorKind, Result};
use crate::features::svm_encoder::SvmLineBuilder;
use crate::features::FeatureValue;
use crate::helper_functions::round_to;
use crate::models::{collect_peptides, Protein};
use crate::prediction_tools::sequence_features::{add_sequence_features, SequencePredictorRunner};
use crate::prediction_tools::structure_features::{ModelFileHandler, StructureEngine, StructureFeatureProcessor};
use crate::prediction_tools::svm_light::{read_scores, write_classification_file, write_training_file, SvmTool};

pub const PIPELINE_ERROR_TAG: &str = "pipeline_error";
pub const INTERNAL_ERROR_TAG: &str = "internal_error";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RunKind {
    /// Import peptides from FASTA and compute their features.
    Annotate,
    /// Import labeled peptides from FASTA headers and compute their features.
    TrainingAnnotate,
    /// Annotate peptides from FASTA and score them with a trained model.
    Apply,
    /// Score peptides of an existing annotation file.
    ApplyAnnotated,
    /// Repeated jackknife benchmark of an annotated training set.
    Benchmark,
    /// Leave-one-out benchmark of an annotated training set.
    LeaveOneOut,
    /// Train a model on every peptide of an annotated training set.
    TrainModel,
}

impl RunKind {
    pub fn uses_svm(&self) -> bool {
        !matches!(self, RunKind::Annotate | RunKind::TrainingAnnotate)
    }

    pub fn computes_features(&self) -> bool {
        matches!(self, RunKind::Annotate | RunKind::TrainingAnnotate | RunKind::Apply)
    }

    fn schema_file<'c>(&self, config: &'c PipelineConfig) -> &'c PathBuf {
        let files = &config.attribute_files;
        match self {
            RunKind::Annotate => &files.annotation,
            RunKind::Apply | RunKind::ApplyAnnotated => &files.application,
            RunKind::TrainingAnnotate | RunKind::Benchmark | RunKind::LeaveOneOut | RunKind::TrainModel => {
                &files.training
            }
        }
    }
}

/// Fails if a previous run left an error file in the run directory.
pub fn check_error_files(config: &PipelineConfig) -> Result<()> {
    for name in [&config.error_files.pipeline, &config.error_files.internal] {
        let path = config.run_file(name);
        if path.exists() {
            let contents = fs::read_to_string(&path).map_err(|e| PipelineError::file(&path, e))?;
            let message = contents.lines().nth(1).unwrap_or_default().to_string();
            error!("Previous run failed ({}): {}", path.display(), message);
            return Err(PipelineError::ErrorExists { path, message });
        }
    }
    Ok(())
}

/// Persists a fatal error: a type tag, the message, then the cause chain
/// and backtrace.
pub fn write_error_file(config: &PipelineConfig, err: &anyhow::Error) -> Result<PathBuf> {
    let (tag, name) = if err.downcast_ref::<PipelineError>().is_some() {
        (PIPELINE_ERROR_TAG, &config.error_files.pipeline)
    } else {
        (INTERNAL_ERROR_TAG, &config.error_files.internal)
    };
    let contents = format!("{tag}\n{err:#}\n{err:?}\n");

    let dir = config.run_dir();
    fs::create_dir_all(&dir).map_err(|e| PipelineError::file(&dir, e))?;
    let path = config.run_file(name);
    fs::write(&path, contents).map_err(|e| PipelineError::file(&path, e))?;
    Ok(path)
}

pub struct Pipeline<'a, T: SvmTool, E: StructureEngine> {
    config: &'a PipelineConfig,
    kind: RunKind,
    schema: AttributeSchema,
    svm: Option<T>,
    structure_engine: Option<E>,
}

impl<'a, T: SvmTool, E: StructureEngine> Pipeline<'a, T, E> {
    /// Prepares the run directory and loads the run type's schema.
    pub fn new(config: &'a PipelineConfig, kind: RunKind, svm: Option<T>, structure_engine: Option<E>) -> Result<Self> {
        let dir = config.run_dir();
        fs::create_dir_all(&dir).map_err(|e| PipelineError::file(&dir, e))?;
        check_error_files(config)?;
        let schema = AttributeSchema::from_path(kind.schema_file(config))?;
        Ok(Pipeline { config, kind, schema, svm, structure_engine })
    }

    fn svm(&self) -> Result<&T> {
        self.svm
            .as_ref()
            .ok_or_else(|| PipelineError::Internal(format!("{:?} run needs an SVM tool", self.kind)))
    }

    fn line_builder(&self) -> Result<SvmLineBuilder<'_>> {
        SvmLineBuilder::new(&self.schema, &self.config.svm.feature_order, self.config.peptide_length)
    }

    fn annotation_output(&self) -> PathBuf {
        self.config.run_file(&self.config.annotation_output_file)
    }

    pub fn run(&self) -> Result<()> {
        info!("Starting {:?} run '{}'", self.kind, self.config.run_name);
        match self.kind {
            RunKind::Annotate => {
                let mut proteins = self.read_proteins(self.config.peptide_importer)?;
                self.add_peptide_features(&mut proteins)?;
                write_annotation_file(&self.annotation_output(), &self.schema, &proteins)?;
            }
            RunKind::TrainingAnnotate => {
                let mut proteins = self.read_proteins(PeptideImporterKind::Defined)?;
                self.add_peptide_features(&mut proteins)?;
                write_annotation_file(&self.annotation_output(), &self.schema, &proteins)?;
            }
            RunKind::Apply => {
                let mut proteins = self.read_proteins(self.config.peptide_importer)?;
                self.add_peptide_features(&mut proteins)?;
                self.apply_svm(&mut proteins)?;
                write_annotation_file(&self.annotation_output(), &self.schema, &proteins)?;
            }
            RunKind::ApplyAnnotated => {
                let mut proteins = self.read_annotated_proteins()?;
                self.apply_svm(&mut proteins)?;
                write_annotation_file(&self.annotation_output(), &self.schema, &proteins)?;
            }
            RunKind::Benchmark => {
                let proteins = self.read_annotated_proteins()?;
                self.benchmark(&proteins)?;
            }
            RunKind::LeaveOneOut => {
                let proteins = self.read_annotated_proteins()?;
                self.leave_one_out(&proteins)?;
            }
            RunKind::TrainModel => {
                let proteins = self.read_annotated_proteins()?;
                self.train_model(&proteins)?;
            }
        }
        info!("Finished {:?} run '{}'", self.kind, self.config.run_name);
        Ok(())
    }

    pub fn read_proteins(&self, importer: PeptideImporterKind) -> Result<Vec<Protein>> {
        let fasta = self
            .config
            .fasta_file
            .as_ref()
            .ok_or_else(|| PipelineError::Config(format!("{:?} run needs fasta_file", self.kind)))?;
        match importer {
            PeptideImporterKind::Scan => {
                let rules = match &self.config.rules_file {
                    Some(path) => ParsingRules::from_path(path)?,
                    None => ParsingRules::default(),
                };
                let importer = ScanPeptideImporter {
                    schema: &self.schema,
                    rules: &rules,
                    peptide_length: self.config.peptide_length,
                };
                importer.read_proteins(fasta)
            }
            PeptideImporterKind::Defined => {
                let importer = DefinedPeptideImporter { schema: &self.schema, keywords: &self.config.keywords };
                importer.read_proteins(fasta)
            }
        }
    }

    fn read_annotated_proteins(&self) -> Result<Vec<Protein>> {
        let path = self
            .config
            .input_annotation_file
            .as_ref()
            .ok_or_else(|| PipelineError::Config(format!("{:?} run needs input_annotation_file", self.kind)))?;
        read_annotation_file(path, &self.schema)
    }

    /// Disorder, secondary structure, best models and structure features,
    /// each only when configured.
    pub fn add_peptide_features(&self, proteins: &mut [Protein]) -> Result<()> {
        let predictors = [
            (PredictorKind::Disorder, self.config.disorder.as_ref()),
            (PredictorKind::SecondaryStructure, self.config.secondary_structure.as_ref()),
        ];
        for (predictor, predictor_config) in predictors {
            let Some(predictor_config) = predictor_config else { continue };
            let runner = SequencePredictorRunner { predictor, config: predictor_config, wait: self.config.file_wait };
            for protein in proteins.iter_mut() {
                add_sequence_features(protein, &self.schema, &runner)?;
            }
        }

        let Some(models) = &self.config.models else { return Ok(()) };
        let table = ModelTable::from_paths(&models.table_file, &models.column_file)?;
        let url = models.url_template.as_deref().map(|template| (template, models.wild_card.as_str()));
        for protein in proteins.iter_mut().filter(|p| !p.has_errors()) {
            protein.add_models(&table, &models.rank_attribute, url)?;
            protein.assign_best_models()?;
        }

        match &self.structure_engine {
            Some(engine) => {
                let processor = StructureFeatureProcessor {
                    files: ModelFileHandler::new(self.config.run_file("structures"), models),
                    engine,
                };
                for protein in proteins.iter_mut() {
                    processor.add_structure_features(protein, &self.schema)?;
                }
            }
            None => warn!("No structure engine available; skipping structure features"),
        }
        Ok(())
    }

    /// Scores every peptide of every error-free protein and converts the
    /// scores to benchmark error rates.
    pub fn apply_svm(&self, proteins: &mut [Protein]) -> Result<()> {
        let svm = self.svm()?;
        let svm_config = &self.config.svm;
        let model_file = svm_config
            .model_file
            .as_ref()
            .ok_or_else(|| PipelineError::Config("svm.model_file is not set".into()))?;
        let benchmark_file = svm_config
            .benchmark_file
            .as_ref()
            .ok_or_else(|| PipelineError::Config("svm.benchmark_file is not set".into()))?;
        let benchmark = BenchmarkScores::from_path(benchmark_file)?;
        let builder = self.line_builder()?;

        let input = self.config.run_file(&svm_config.files.application_set);
        let output = self.config.run_file(&svm_config.files.application_output);
        let scores = {
            let peptides = collect_peptides(proteins);
            if peptides.is_empty() {
                warn!("No peptides to classify");
                return Ok(());
            }
            write_classification_file(&input, &peptides, &builder)?;
            svm.classify(&input, model_file, &output)?;
            read_scores(&output, peptides.len())?
        };

        let mut scores = scores.into_iter();
        for protein in proteins.iter_mut().filter(|p| !p.has_errors()) {
            for peptide in protein.peptides_mut() {
                let score = scores
                    .next()
                    .ok_or_else(|| PipelineError::Internal("fewer scores than classified peptides".into()))?;
                let (fpr, tpr) = match benchmark.closest_score_tuple(score) {
                    Some(tuple) => (tuple.fpr, tuple.tpr),
                    None => (1.0, 1.0),
                };
                peptide.set_feature(&self.schema, names::SVM_SCORE, FeatureValue::text(score))?;
                peptide.set_feature(&self.schema, names::SVM_FPR, FeatureValue::text(round_to(fpr, 3)))?;
                peptide.set_feature(&self.schema, names::SVM_TPR, FeatureValue::text(round_to(tpr, 3)))?;
            }
        }
        info!("Applied SVM model {}", model_file.display());
        Ok(())
    }

    pub fn benchmark(&self, proteins: &[Protein]) -> Result<()> {
        let svm = self.svm()?;
        let svm_config = &self.config.svm;
        let builder = self.line_builder()?;
        let peptides = collect_peptides(proteins);
        let mode = if svm_config.random_test_set { SamplingMode::Random } else { SamplingMode::Prefix };
        let partitioner = TrainTestPartitioner::new(svm_config.jackknife_fraction, mode, svm_config.seed);
        let mut benchmarker = SvmBenchmarker::new(
            svm,
            &builder,
            &self.config.keywords,
            BenchmarkFiles::from_config(self.config),
            partitioner,
        );

        let mut tracker = TestSetResultTracker::new(self.config.keywords.clone());
        for iteration in 0..svm_config.training_iterations {
            info!("Benchmark iteration {} of {}", iteration + 1, svm_config.training_iterations);
            let result = benchmarker.run_iteration(&peptides)?;
            tracker.add_test_set_result(&result);
        }
        tracker.finalize()?;
        tracker.write_result_file(&self.config.result_file("benchmark_results.txt"))
    }

    pub fn leave_one_out(&self, proteins: &[Protein]) -> Result<()> {
        let svm = self.svm()?;
        let builder = self.line_builder()?;
        let peptides = collect_peptides(proteins);
        info!("Leave-one-out over {} peptides", peptides.len());
        let mut benchmarker = LeaveOneOutBenchmarker::new(
            svm,
            &builder,
            &self.config.keywords,
            BenchmarkFiles::from_config(self.config),
            peptides,
        );
        benchmarker.run_all()?;
        let result = benchmarker.finish()?;

        let mut tracker = TestSetResultTracker::new(self.config.keywords.clone());
        tracker.add_test_set_result(&result);
        tracker.finalize()?;
        tracker.write_result_file(&self.config.result_file("loo_results.txt"))
    }

    pub fn train_model(&self, proteins: &[Protein]) -> Result<()> {
        let svm = self.svm()?;
        let builder = self.line_builder()?;
        let peptides = collect_peptides(proteins);
        let training_file = self.config.run_file(&self.config.svm.files.training_set);
        write_training_file(&training_file, &peptides, &builder, &self.config.keywords)?;

        let model_file = self.config.result_file("model.txt");
        svm.train(&training_file, &model_file)?;
        info!("Trained model on {} peptides: {}", peptides.len(), model_file.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::analysis::benchmark::tests::{scored_peptides, FirstFeatureSvm};
    use crate::config::{AttributeFiles, FileWait, PredictorConfig, SvmConfig};
    use crate::prediction_tools::structure_features::DsspExecutable;
    use crate::test_fixtures::{schema, schema_text};
    use tempfile::tempdir;

    type TestPipeline<'a> = Pipeline<'a, FirstFeatureSvm, DsspExecutable>;

    fn config(root: &Path) -> PipelineConfig {
        let schema_file = root.join("attributes.txt");
        fs::write(&schema_file, schema_text()).unwrap();
        PipelineConfig {
            run_directory: root.join("runs"),
            run_name: "test".into(),
            fasta_file: None,
            rules_file: None,
            peptide_length: 4,
            peptide_importer: PeptideImporterKind::Scan,
            attribute_files: AttributeFiles {
                annotation: schema_file.clone(),
                training: schema_file.clone(),
                application: schema_file,
            },
            input_annotation_file: None,
            annotation_output_file: "annotationOutput.txt".into(),
            disorder: None,
            secondary_structure: None,
            models: None,
            svm: SvmConfig {
                train_command: "svm_learn".into(),
                classify_command: "svm_classify".into(),
                gamma: "0.05".into(),
                c: "1".into(),
                feature_order: vec![names::DISORDER_SCORES.to_string()],
                jackknife_fraction: 0.2,
                training_iterations: 3,
                random_test_set: false,
                seed: None,
                model_file: None,
                benchmark_file: None,
                files: Default::default(),
            },
            keywords: Default::default(),
            file_wait: FileWait { retries: 0, interval_ms: 1 },
            error_files: Default::default(),
        }
    }

    /// Ten positives scoring above twenty negatives.
    fn training_annotation(path: &Path) {
        let schema = schema();
        let mut values: Vec<(bool, f64)> = (0..10).map(|i| (true, 1.0 + i as f64)).collect();
        values.extend((0..20).map(|i| (false, -1.0 - i as f64)));
        let mut protein = Protein::new("seq1", &"ACDE".repeat(30));
        protein.set_peptides(scored_peptides(&schema, &values)).unwrap();
        write_annotation_file(path, &schema, &[protein]).unwrap();
    }

    #[test]
    fn training_annotation_uses_stored_predictions() {
        let dir = tempdir().unwrap();
        let mut config = config(dir.path());
        let fasta = dir.path().join("input.fasta");
        fs::write(&fasta, ">seq1|P12345|0_ARG_positive|2_GK_negative\nARGK\n>seq2|P99999\nMM\n").unwrap();
        config.fasta_file = Some(fasta);

        let predictions = dir.path().join("disorder");
        let stored = predictions.join("se").join("seq1.diso");
        fs::create_dir_all(stored.parent().unwrap()).unwrap();
        fs::write(&stored, "#\n#\n#\n\n 1 A . 0.1 0.9\n 2 R * 0.8 0.2\n 3 G . 0.3 0.7\n 4 K * 0.6 0.4\n").unwrap();
        config.disorder = Some(PredictorConfig { root_dir: predictions, command: vec!["false".into()] });

        let pipeline = TestPipeline::new(&config, RunKind::TrainingAnnotate, None, None).unwrap();
        pipeline.run().unwrap();

        let proteins = read_annotation_file(&config.run_file("annotationOutput.txt"), &schema()).unwrap();
        assert_eq!(proteins.len(), 2);
        let first = proteins.iter().find(|p| p.sequence_id == "seq1").unwrap();
        let peptide = first.peptide(0).unwrap();
        assert_eq!(peptide.status().as_deref(), Some("positive"));
        assert_eq!(peptide.value_string(names::DISORDER_CALLS), "ODO");
        assert_eq!(first.peptide(2).unwrap().value_string(names::DISORDER_SCORES), "0.3, 0.6");

        let second = proteins.iter().find(|p| p.sequence_id == "seq2").unwrap();
        assert!(second.has_errors());
    }

    #[test]
    fn benchmark_then_apply_annotated() {
        let dir = tempdir().unwrap();
        let mut config = config(dir.path());
        let annotation = dir.path().join("training.txt");
        training_annotation(&annotation);
        config.input_annotation_file = Some(annotation);

        let pipeline = TestPipeline::new(&config, RunKind::Benchmark, Some(FirstFeatureSvm::default()), None).unwrap();
        pipeline.run().unwrap();
        assert_eq!(pipeline.svm().unwrap().training_sizes.borrow().as_slice(), &[16, 16, 16]);

        let benchmark_file = config.result_file("benchmark_results.txt");
        let scores = BenchmarkScores::from_path(&benchmark_file).unwrap();
        assert_eq!(scores.len(), 2);

        config.svm.benchmark_file = Some(benchmark_file);
        config.svm.model_file = Some(config.run_file("svmNewModel.txt"));
        let pipeline = TestPipeline::new(&config, RunKind::ApplyAnnotated, Some(FirstFeatureSvm::default()), None).unwrap();
        pipeline.run().unwrap();

        let proteins = read_annotation_file(&config.run_file("annotationOutput.txt"), &schema()).unwrap();
        let top = proteins[0].peptide(90).unwrap();
        assert_eq!(top.value_string(names::SVM_SCORE), "10");
        assert_eq!(top.value_string(names::SVM_TPR), "1");
        let bottom = proteins[0].peptide(290).unwrap();
        assert_eq!(bottom.value_string(names::SVM_FPR), "1");
    }

    #[test]
    fn leave_one_out_and_model_training() {
        let dir = tempdir().unwrap();
        let mut config = config(dir.path());
        let annotation = dir.path().join("training.txt");
        training_annotation(&annotation);
        config.input_annotation_file = Some(annotation);

        let pipeline = TestPipeline::new(&config, RunKind::LeaveOneOut, Some(FirstFeatureSvm::default()), None).unwrap();
        pipeline.run().unwrap();
        assert_eq!(pipeline.svm().unwrap().training_sizes.borrow().len(), 30);
        let scores = BenchmarkScores::from_path(&config.result_file("loo_results.txt")).unwrap();
        assert_eq!(scores.len(), 10);

        let pipeline = TestPipeline::new(&config, RunKind::TrainModel, Some(FirstFeatureSvm::default()), None).unwrap();
        pipeline.run().unwrap();
        assert!(config.result_file("model.txt").exists());
        assert_eq!(pipeline.svm().unwrap().training_sizes.borrow().as_slice(), &[30]);
    }

    #[test]
    fn previous_error_file_blocks_the_run() {
        let dir = tempdir().unwrap();
        let config = config(dir.path());
        let err = anyhow::Error::new(PipelineError::Benchmark("too few negatives".into()));
        let path = write_error_file(&config, &err).unwrap();
        assert_eq!(path, config.run_file("pipeline_errors.out"));
        let contents = fs::read_to_string(&path).unwrap();
        let mut lines = contents.lines();
        assert_eq!(lines.next(), Some(PIPELINE_ERROR_TAG));
        assert_eq!(lines.next(), Some("benchmark error: too few negatives"));

        match TestPipeline::new(&config, RunKind::Benchmark, None, None) {
            Err(PipelineError::ErrorExists { message, .. }) => assert_eq!(message, "benchmark error: too few negatives"),
            Err(other) => panic!("expected ErrorExists, got {other:?}"),
            Ok(_) => panic!("expected ErrorExists"),
        }
    }

    #[test]
    fn error_file_keeps_the_cause_under_context() {
        let dir = tempdir().unwrap();
        let config = config(dir.path());
        let err = anyhow::Error::new(PipelineError::Benchmark("too few negatives".into()))
            .context("Benchmark run 'test' failed");
        let path = write_error_file(&config, &err).unwrap();
        assert_eq!(path, config.run_file("pipeline_errors.out"));
        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(
            contents.lines().nth(1),
            Some("Benchmark run 'test' failed: benchmark error: too few negatives")
        );
    }

    #[test]
    fn non_pipeline_errors_are_internal() {
        let dir = tempdir().unwrap();
        let config = config(dir.path());
        let err = anyhow::anyhow!("index out of range");
        let path = write_error_file(&config, &err).unwrap();
        assert_eq!(path, config.run_file("internal_errors.out"));
        assert!(fs::read_to_string(&path).unwrap().starts_with("internal_error\nindex out of range\n"));
    }

    #[test]
    fn svm_runs_need_a_tool() {
        let dir = tempdir().unwrap();
        let mut config = config(dir.path());
        let annotation = dir.path().join("training.txt");
        training_annotation(&annotation);
        config.input_annotation_file = Some(annotation);
        let pipeline = TestPipeline::new(&config, RunKind::TrainModel, None, None).unwrap();
        assert!(matches!(pipeline.run(), Err(PipelineError::Internal(_))));
    }
}
