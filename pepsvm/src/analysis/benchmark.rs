use std::path::PathBuf;

use tracing::{debug, info};

use crate::analysis::partition::TrainTestPartitioner;
use crate::analysis::roc::{calculate_auc, calculate_roc};
use crate::config::{PipelineConfig, StatusKeywords};
use crate::errors::{PipelineError, Result};
use crate::features::svm_encoder::SvmLineBuilder;
use crate::models::{Peptide, PeptideStatus};
use crate::prediction_tools::svm_light::{read_scores, write_classification_file, write_training_file, SvmTool};

/// A scored test-set peptide with the cumulative class counts and rates up
/// to and including its rank.
#[derive(Debug, Clone)]
pub struct RankedPeptide<'a> {
    pub peptide: &'a Peptide,
    pub score: f64,
    pub positive_count: usize,
    pub negative_count: usize,
    pub tpr: f64,
    pub fpr: f64,
}

/// A point on a test-set curve where the true-positive rate went up.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CurvePoint {
    pub positive_count: usize,
    pub tpr: f64,
    pub fpr: f64,
    pub score: f64,
}

/// Scored test set ranked by ascending score.
#[derive(Debug, Clone)]
pub struct TestSetResult<'a> {
    ranked: Vec<RankedPeptide<'a>>,
    total_positive: usize,
    total_negative: usize,
}

impl<'a> TestSetResult<'a> {
    pub fn from_scores(scored: Vec<(&'a Peptide, f64)>, keywords: &StatusKeywords) -> Result<Self> {
        let mut labeled = Vec::with_capacity(scored.len());
        for (peptide, score) in scored {
            let status = peptide.classify(keywords)?;
            if status == PeptideStatus::Application {
                return Err(PipelineError::Input(format!(
                    "test set peptide {} at {} is not labeled {} or {}",
                    peptide.sequence, peptide.start, keywords.positive, keywords.negative
                )));
            }
            labeled.push((peptide, score, status == PeptideStatus::Positive));
        }
        labeled.sort_by(|a, b| a.1.total_cmp(&b.1));

        let total_positive = labeled.iter().filter(|(_, _, positive)| *positive).count();
        let total_negative = labeled.len() - total_positive;
        if total_positive == 0 || total_negative == 0 {
            return Err(PipelineError::Benchmark(format!(
                "test set has {total_positive} {} and {total_negative} {} peptides; both classes are required",
                keywords.positive, keywords.negative
            )));
        }

        let mut positive_count = 0;
        let mut negative_count = 0;
        let ranked = labeled
            .into_iter()
            .map(|(peptide, score, positive)| {
                if positive {
                    positive_count += 1;
                } else {
                    negative_count += 1;
                }
                RankedPeptide {
                    peptide,
                    score,
                    positive_count,
                    negative_count,
                    tpr: positive_count as f64 / total_positive as f64,
                    fpr: negative_count as f64 / total_negative as f64,
                }
            })
            .collect();

        Ok(TestSetResult { ranked, total_positive, total_negative })
    }

    pub fn get(&self, rank: usize) -> Option<&RankedPeptide<'a>> {
        self.ranked.get(rank)
    }

    pub fn len(&self) -> usize {
        self.ranked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranked.is_empty()
    }

    pub fn total_positive(&self) -> usize {
        self.total_positive
    }

    pub fn total_negative(&self) -> usize {
        self.total_negative
    }

    /// Points where the true-positive rate strictly increases over the
    /// previous point, in ranking order.
    pub fn incremented_tpr_points(&self) -> Vec<CurvePoint> {
        let mut last_tpr = 0.0;
        let mut points = Vec::new();
        for ranked in &self.ranked {
            if ranked.tpr > last_tpr {
                points.push(CurvePoint {
                    positive_count: ranked.positive_count,
                    tpr: ranked.tpr,
                    fpr: ranked.fpr,
                    score: ranked.score,
                });
                last_tpr = ranked.tpr;
            }
        }
        points
    }

    pub fn auc(&self) -> f64 {
        let scored: Vec<(f64, bool)> = self
            .ranked
            .iter()
            .enumerate()
            .map(|(i, r)| {
                let previous = if i == 0 { 0 } else { self.ranked[i - 1].positive_count };
                (r.score, r.positive_count > previous)
            })
            .collect();
        let (fpr, tpr) = calculate_roc(&scored);
        calculate_auc(&fpr, &tpr)
    }
}

/// Working files of one train/classify round.
#[derive(Debug, Clone)]
pub struct BenchmarkFiles {
    pub training_set: PathBuf,
    pub test_set: PathBuf,
    pub test_output: PathBuf,
    pub model: PathBuf,
}

impl BenchmarkFiles {
    pub fn from_config(config: &PipelineConfig) -> Self {
        let files = &config.svm.files;
        BenchmarkFiles {
            training_set: config.run_file(&files.training_set),
            test_set: config.run_file(&files.test_set),
            test_output: config.run_file(&files.test_output),
            model: config.run_file(&files.model),
        }
    }
}

/// Trains on `training`, classifies `test` and returns the scores in test
/// set order.
fn train_and_classify<T: SvmTool>(
    tool: &T,
    builder: &SvmLineBuilder,
    keywords: &StatusKeywords,
    files: &BenchmarkFiles,
    training: &[&Peptide],
    test: &[&Peptide],
) -> Result<Vec<f64>> {
    write_training_file(&files.training_set, training, builder, keywords)?;
    tool.train(&files.training_set, &files.model)?;
    write_classification_file(&files.test_set, test, builder)?;
    tool.classify(&files.test_set, &files.model, &files.test_output)?;
    read_scores(&files.test_output, test.len())
}

/// Repeated jackknife benchmark: each iteration draws a fresh train/test
/// partition.
pub struct SvmBenchmarker<'a, T: SvmTool> {
    tool: &'a T,
    builder: &'a SvmLineBuilder<'a>,
    keywords: &'a StatusKeywords,
    files: BenchmarkFiles,
    partitioner: TrainTestPartitioner,
}

impl<'a, T: SvmTool> SvmBenchmarker<'a, T> {
    pub fn new(
        tool: &'a T,
        builder: &'a SvmLineBuilder<'a>,
        keywords: &'a StatusKeywords,
        files: BenchmarkFiles,
        partitioner: TrainTestPartitioner,
    ) -> Self {
        SvmBenchmarker { tool, builder, keywords, files, partitioner }
    }

    pub fn run_iteration<'p>(&mut self, peptides: &[&'p Peptide]) -> Result<TestSetResult<'p>> {
        let split = self.partitioner.partition(peptides, self.keywords)?;
        let training = split.training_set();
        let test = split.test_set();

        let scores = train_and_classify(self.tool, self.builder, self.keywords, &self.files, &training, &test)?;
        let result = TestSetResult::from_scores(test.into_iter().zip(scores).collect(), self.keywords)?;
        info!(
            "Benchmark iteration: {} test peptides ({} positive), AUC {:.3}",
            result.len(),
            result.total_positive(),
            result.auc()
        );
        Ok(result)
    }
}

/// Leave-one-out benchmark: every peptide is classified once by a model
/// trained on all the others.
pub struct LeaveOneOutBenchmarker<'a, 'p, T: SvmTool> {
    tool: &'a T,
    builder: &'a SvmLineBuilder<'a>,
    keywords: &'a StatusKeywords,
    files: BenchmarkFiles,
    peptides: Vec<&'p Peptide>,
    iteration: usize,
    scored: Vec<(&'p Peptide, f64)>,
}

impl<'a, 'p, T: SvmTool> LeaveOneOutBenchmarker<'a, 'p, T> {
    pub fn new(
        tool: &'a T,
        builder: &'a SvmLineBuilder<'a>,
        keywords: &'a StatusKeywords,
        files: BenchmarkFiles,
        peptides: Vec<&'p Peptide>,
    ) -> Self {
        LeaveOneOutBenchmarker { tool, builder, keywords, files, peptides, iteration: 0, scored: Vec::new() }
    }

    pub fn peptide_count(&self) -> usize {
        self.peptides.len()
    }

    pub fn run_iteration(&mut self) -> Result<()> {
        if self.iteration >= self.peptides.len() {
            return Err(PipelineError::Internal(format!(
                "leave-one-out iteration {} exceeds the {} available peptides",
                self.iteration + 1,
                self.peptides.len()
            )));
        }
        let test = vec![self.peptides[self.iteration]];
        let training: Vec<&Peptide> = self
            .peptides
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != self.iteration)
            .map(|(_, p)| *p)
            .collect();

        let scores = train_and_classify(self.tool, self.builder, self.keywords, &self.files, &training, &test)?;
        self.score_test_set(&test, &scores)?;
        debug!("Leave-one-out iteration {} of {}", self.iteration + 1, self.peptides.len());
        self.iteration += 1;
        Ok(())
    }

    fn score_test_set(&mut self, test: &[&'p Peptide], scores: &[f64]) -> Result<()> {
        if test.len() != 1 || scores.len() != 1 {
            return Err(PipelineError::Internal(format!(
                "leave-one-out test set holds {} peptides and {} scores, expected exactly one",
                test.len(),
                scores.len()
            )));
        }
        self.scored.push((test[0], scores[0]));
        Ok(())
    }

    pub fn run_all(&mut self) -> Result<()> {
        while self.iteration < self.peptides.len() {
            self.run_iteration()?;
        }
        Ok(())
    }

    /// Ranks every left-out peptide by its score.
    pub fn finish(self) -> Result<TestSetResult<'p>> {
        if self.iteration != self.peptides.len() {
            return Err(PipelineError::Internal(format!(
                "leave-one-out finished after {} of {} iterations",
                self.iteration,
                self.peptides.len()
            )));
        }
        let result = TestSetResult::from_scores(self.scored, self.keywords)?;
        info!("Leave-one-out over {} peptides, AUC {:.3}", result.len(), result.auc());
        Ok(result)
    }
}
