use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use polars::prelude::*;
use statrs::statistics::Statistics;
use tracing::info;

use crate::analysis::benchmark::{CurvePoint, TestSetResult};
use crate::config::StatusKeywords;
use crate::errors::{PipelineError, Result};

/// One averaged row of the benchmark curve.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BenchmarkPoint {
    pub fpr: f64,
    pub tpr: f64,
    pub score: f64,
    pub fpr_std: f64,
    pub score_std: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AucSummary {
    pub runs: usize,
    pub mean: f64,
    pub std_dev: f64,
}

#[derive(Debug, Clone)]
struct RunCurve {
    total_positive: usize,
    total_negative: usize,
    points: Vec<CurvePoint>,
    auc: f64,
}

/// Collects the curves of repeated benchmark runs and averages them per
/// true-positive-rate level.
#[derive(Debug, Clone)]
pub struct TestSetResultTracker {
    keywords: StatusKeywords,
    runs: Vec<RunCurve>,
    points: Option<Vec<BenchmarkPoint>>,
}

impl TestSetResultTracker {
    pub fn new(keywords: StatusKeywords) -> Self {
        TestSetResultTracker { keywords, runs: Vec::new(), points: None }
    }

    pub fn add_test_set_result(&mut self, result: &TestSetResult) {
        self.runs.push(RunCurve {
            total_positive: result.total_positive(),
            total_negative: result.total_negative(),
            points: result.incremented_tpr_points(),
            auc: result.auc(),
        });
        self.points = None;
    }

    pub fn run_count(&self) -> usize {
        self.runs.len()
    }

    fn validate_counts(&self) -> Result<()> {
        let first = self
            .runs
            .first()
            .ok_or_else(|| PipelineError::Benchmark("no test set results to aggregate".into()))?;
        for (i, run) in self.runs.iter().enumerate().skip(1) {
            if run.total_positive != first.total_positive {
                return Err(PipelineError::Benchmark(format!(
                    "run {} has {} {} test peptides but the first run had {}",
                    i + 1,
                    run.total_positive,
                    self.keywords.positive.to_lowercase(),
                    first.total_positive
                )));
            }
            if run.total_negative != first.total_negative {
                return Err(PipelineError::Benchmark(format!(
                    "run {} has {} {} test peptides but the first run had {}",
                    i + 1,
                    run.total_negative,
                    self.keywords.negative.to_lowercase(),
                    first.total_negative
                )));
            }
        }
        Ok(())
    }

    /// Averages fpr and score across runs for each distinct tpr level;
    /// rows are ordered by descending tpr.
    pub fn finalize(&mut self) -> Result<()> {
        self.validate_counts()?;

        let mut positive_count = Vec::new();
        let mut tpr = Vec::new();
        let mut fpr = Vec::new();
        let mut score = Vec::new();
        for run in &self.runs {
            for point in &run.points {
                positive_count.push(point.positive_count as u32);
                tpr.push(point.tpr);
                fpr.push(point.fpr);
                score.push(point.score);
            }
        }

        let df = DataFrame::new(vec![
            Column::from(Series::new("positive_count".into(), positive_count)),
            Column::from(Series::new("tpr".into(), tpr)),
            Column::from(Series::new("fpr".into(), fpr)),
            Column::from(Series::new("score".into(), score)),
        ])?;

        let averaged = df
            .lazy()
            .group_by([col("positive_count")])
            .agg([
                col("tpr").first().alias("tpr"),
                col("fpr").mean().alias("fpr"),
                col("score").mean().alias("score"),
                col("fpr").std(1).fill_null(lit(0.0)).alias("fpr_std"),
                col("score").std(1).fill_null(lit(0.0)).alias("score_std"),
            ])
            .sort_by_exprs([col("positive_count")], SortMultipleOptions::default().with_order_descending(true))
            .collect()?;

        let tpr = averaged.column("tpr")?.f64()?;
        let fpr = averaged.column("fpr")?.f64()?;
        let score = averaged.column("score")?.f64()?;
        let fpr_std = averaged.column("fpr_std")?.f64()?;
        let score_std = averaged.column("score_std")?.f64()?;

        let required = |value: Option<f64>, name: &str, row: usize| {
            value.ok_or_else(|| PipelineError::Internal(format!("missing {name} in aggregated row {row}")))
        };
        let spread = |value: Option<f64>| value.filter(|v| v.is_finite()).unwrap_or(0.0);

        let mut points = Vec::with_capacity(averaged.height());
        for i in 0..averaged.height() {
            points.push(BenchmarkPoint {
                fpr: required(fpr.get(i), "fpr", i)?,
                tpr: required(tpr.get(i), "tpr", i)?,
                score: required(score.get(i), "score", i)?,
                fpr_std: spread(fpr_std.get(i)),
                score_std: spread(score_std.get(i)),
            });
        }

        info!("Aggregated {} runs into {} benchmark points", self.runs.len(), points.len());
        self.points = Some(points);
        Ok(())
    }

    fn finalized_points(&self) -> Result<&[BenchmarkPoint]> {
        self.points
            .as_deref()
            .ok_or_else(|| PipelineError::Internal("benchmark tracker used before finalize()".into()))
    }

    pub fn benchmark_point(&self, index: usize) -> Option<&BenchmarkPoint> {
        self.points.as_ref().and_then(|points| points.get(index))
    }

    pub fn benchmark_points(&self) -> Result<&[BenchmarkPoint]> {
        self.finalized_points()
    }

    pub fn auc_summary(&self) -> Option<AucSummary> {
        if self.runs.is_empty() {
            return None;
        }
        let aucs: Vec<f64> = self.runs.iter().map(|run| run.auc).collect();
        let std_dev = if aucs.len() > 1 { aucs.iter().std_dev() } else { 0.0 };
        Some(AucSummary { runs: aucs.len(), mean: aucs.iter().mean(), std_dev })
    }

    /// Writes `0\t0`, the averaged rows as `fpr tpr score fpr_std score_std`,
    /// then `1\t1`.
    pub fn write_result_file(&self, path: &Path) -> Result<()> {
        let points = self.finalized_points()?;
        let file = File::create(path).map_err(|e| PipelineError::file(path, e))?;
        let mut writer = BufWriter::new(file);
        writeln!(writer, "0\t0")?;
        for p in points {
            writeln!(writer, "{}\t{}\t{}\t{}\t{}", p.fpr, p.tpr, p.score, p.fpr_std, p.score_std)?;
        }
        writeln!(writer, "1\t1")?;
        writer.flush()?;

        if let Some(summary) = self.auc_summary() {
            info!(
                "Wrote {} ({} runs, AUC {:.3} ± {:.3})",
                path.display(),
                summary.runs,
                summary.mean,
                summary.std_dev
            );
        }
        Ok(())
    }
}
