use std::path::Path;

use crate::errors::{PipelineError, Result};
use crate::helper_functions::read_lines;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreTuple {
    pub fpr: f64,
    pub tpr: f64,
    pub score: f64,
}

/// Benchmark curve used to turn raw classifier scores into error rates.
/// Rows are stored by non-increasing score.
#[derive(Debug, Clone, Default)]
pub struct BenchmarkScores {
    results: Vec<ScoreTuple>,
}

fn is_boundary_line(line: &str, value: &str) -> bool {
    let cols: Vec<&str> = line.trim_end().split('\t').collect();
    cols.len() == 2 && cols[0] == value && cols[1] == value
}

impl BenchmarkScores {
    pub fn from_path(path: &Path) -> Result<Self> {
        let lines = read_lines(path)?;
        Self::from_lines(&lines).map_err(|e| match e {
            PipelineError::Benchmark(message) => {
                PipelineError::Benchmark(format!("{}: {message}", path.display()))
            }
            other => other,
        })
    }

    pub fn from_lines(lines: &[String]) -> Result<Self> {
        let (first, last) = match (lines.first(), lines.last()) {
            (Some(first), Some(last)) if lines.len() >= 2 => (first, last),
            _ => return Err(PipelineError::Benchmark("benchmark file needs boundary rows".into())),
        };
        if !is_boundary_line(first, "0") {
            return Err(PipelineError::Benchmark("expected a first line of 0\\t0".into()));
        }
        if !is_boundary_line(last, "1") {
            return Err(PipelineError::Benchmark("expected a last line of 1\\t1".into()));
        }

        let mut scores = BenchmarkScores::default();
        for line in &lines[1..lines.len() - 1] {
            let cols: Vec<&str> = line.split_whitespace().collect();
            if cols.len() < 3 {
                return Err(PipelineError::Benchmark(format!("malformed benchmark row '{line}'")));
            }
            let parse = |value: &str| {
                value
                    .parse::<f64>()
                    .map_err(|_| PipelineError::Benchmark(format!("non-numeric value '{value}' in row '{line}'")))
            };
            scores.push(ScoreTuple { fpr: parse(cols[0])?, tpr: parse(cols[1])?, score: parse(cols[2])? })?;
        }
        Ok(scores)
    }

    fn push(&mut self, tuple: ScoreTuple) -> Result<()> {
        if let Some(previous) = self.results.last() {
            if tuple.score > previous.score {
                return Err(PipelineError::Benchmark(format!(
                    "score {} is larger than the score {} on the previous line",
                    tuple.score, previous.score
                )));
            }
        }
        self.results.push(tuple);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// First stored row whose score is strictly below `score`.
    pub fn closest_score_tuple(&self, score: f64) -> Option<ScoreTuple> {
        self.results.iter().find(|st| score > st.score).copied()
    }
}
