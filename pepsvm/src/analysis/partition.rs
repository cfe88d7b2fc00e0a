use rand::rngs::StdRng;
use rand::seq::index::sample;
use rand::SeedableRng;
use tracing::info;

use crate::config::StatusKeywords;
use crate::errors::{PipelineError, Result};
use crate::models::{Peptide, PeptideStatus};

/// How test-set members are drawn from each class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplingMode {
    Random,
    Prefix,
}

/// Class counts of one train/test split.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionCounts {
    pub total_positive: usize,
    pub total_negative: usize,
    pub test_positive: usize,
    pub training_positive: usize,
    pub training_negative: usize,
    pub test_negative: usize,
}

impl PartitionCounts {
    /// Test positives are `floor(total_positive * fraction)`; training
    /// negatives match training positives and the remaining negatives are
    /// test negatives.
    pub fn new(total_positive: usize, total_negative: usize, fraction: f64) -> Result<Self> {
        let test_positive = (total_positive as f64 * fraction).floor() as usize;
        let training_positive = total_positive - test_positive;
        let training_negative = training_positive;
        let test_negative = total_negative.checked_sub(training_negative).ok_or_else(|| {
            PipelineError::Benchmark(format!(
                "{total_negative} negatives cannot balance {training_positive} training positives"
            ))
        })?;
        let counts = PartitionCounts {
            total_positive,
            total_negative,
            test_positive,
            training_positive,
            training_negative,
            test_negative,
        };
        counts.validate()?;
        Ok(counts)
    }

    fn validate(&self) -> Result<()> {
        if self.test_positive < 1 {
            return Err(PipelineError::Benchmark(format!(
                "test set would have no positives ({} positives in total)",
                self.total_positive
            )));
        }
        if self.test_positive > self.test_negative {
            return Err(PipelineError::Benchmark(format!(
                "test set positives ({}) exceed test set negatives ({})",
                self.test_positive, self.test_negative
            )));
        }
        if self.training_positive + self.test_positive != self.total_positive
            || self.training_negative + self.test_negative != self.total_negative
        {
            return Err(PipelineError::Internal(format!("partition counts do not add up: {self:?}")));
        }
        Ok(())
    }
}

/// Disjoint training and test sets of borrowed peptides.
#[derive(Debug, Clone)]
pub struct TrainTestSplit<'a> {
    pub training_positive: Vec<&'a Peptide>,
    pub training_negative: Vec<&'a Peptide>,
    pub test_positive: Vec<&'a Peptide>,
    pub test_negative: Vec<&'a Peptide>,
}

impl<'a> TrainTestSplit<'a> {
    pub fn training_set(&self) -> Vec<&'a Peptide> {
        self.training_positive.iter().chain(&self.training_negative).copied().collect()
    }

    pub fn test_set(&self) -> Vec<&'a Peptide> {
        self.test_positive.iter().chain(&self.test_negative).copied().collect()
    }
}

/// Splits labeled peptides into positives and negatives; any other status
/// is rejected.
pub fn split_by_class<'a>(
    peptides: &[&'a Peptide],
    keywords: &StatusKeywords,
) -> Result<(Vec<&'a Peptide>, Vec<&'a Peptide>)> {
    let mut positives = Vec::new();
    let mut negatives = Vec::new();
    for peptide in peptides {
        match peptide.classify(keywords)? {
            PeptideStatus::Positive => positives.push(*peptide),
            PeptideStatus::Negative => negatives.push(*peptide),
            PeptideStatus::Application => {
                return Err(PipelineError::Input(format!(
                    "peptide {} at {} is not labeled for training",
                    peptide.sequence, peptide.start
                )))
            }
        }
    }
    Ok((positives, negatives))
}

pub struct TrainTestPartitioner {
    fraction: f64,
    mode: SamplingMode,
    rng: StdRng,
}

impl TrainTestPartitioner {
    pub fn new(fraction: f64, mode: SamplingMode, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        TrainTestPartitioner { fraction, mode, rng }
    }

    /// Picks `count` members for the test set, returning (test, rest).
    fn take<'a>(&mut self, peptides: &[&'a Peptide], count: usize) -> (Vec<&'a Peptide>, Vec<&'a Peptide>) {
        let chosen: Vec<usize> = match self.mode {
            SamplingMode::Prefix => (0..count).collect(),
            SamplingMode::Random => sample(&mut self.rng, peptides.len(), count).into_vec(),
        };
        let mut selected = vec![false; peptides.len()];
        for i in &chosen {
            selected[*i] = true;
        }
        let test = chosen.iter().map(|i| peptides[*i]).collect();
        let rest = peptides.iter().zip(&selected).filter(|(_, s)| !**s).map(|(p, _)| *p).collect();
        (test, rest)
    }

    pub fn partition<'a>(&mut self, peptides: &[&'a Peptide], keywords: &StatusKeywords) -> Result<TrainTestSplit<'a>> {
        let (positives, negatives) = split_by_class(peptides, keywords)?;
        let counts = PartitionCounts::new(positives.len(), negatives.len(), self.fraction)?;
        info!(
            "Partition: {} training positives, {} training negatives, {} test positives, {} test negatives",
            counts.training_positive, counts.training_negative, counts.test_positive, counts.test_negative
        );

        let (test_positive, training_positive) = self.take(&positives, counts.test_positive);
        let (test_negative, training_negative) = self.take(&negatives, counts.test_negative);
        Ok(TrainTestSplit { training_positive, training_negative, test_positive, test_negative })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::names;
    use crate::features::FeatureValue;
    use crate::test_fixtures::schema;

    fn labeled(positives: usize, negatives: usize) -> Vec<Peptide> {
        let schema = schema();
        (0..positives + negatives)
            .map(|i| {
                let mut p = Peptide::new(&schema, "ACDE", i * 10, i * 10 + 3).unwrap();
                let status = if i < positives { "positive" } else { "negative" };
                p.set_feature(&schema, names::STATUS, FeatureValue::text(status)).unwrap();
                p
            })
            .collect()
    }

    #[test]
    fn counts_follow_fraction() {
        let counts = PartitionCounts::new(67, 134, 0.1).unwrap();
        assert_eq!(counts.test_positive, 6);
        assert_eq!(counts.training_positive, 61);
        assert_eq!(counts.training_negative, 61);
        assert_eq!(counts.test_negative, 73);
    }

    #[test]
    fn invalid_splits_are_rejected() {
        assert!(PartitionCounts::new(5, 50, 0.1).is_err());
        assert!(PartitionCounts::new(20, 19, 0.1).is_err());
        assert!(PartitionCounts::new(20, 10, 0.1).is_err());
    }

    #[test]
    fn partition_invariants_hold() {
        let peptides = labeled(30, 60);
        let refs: Vec<&Peptide> = peptides.iter().collect();
        for fraction in [0.1, 0.25, 0.5] {
            let mut partitioner = TrainTestPartitioner::new(fraction, SamplingMode::Random, Some(7));
            let split = partitioner.partition(&refs, &StatusKeywords::default()).unwrap();
            assert_eq!(split.training_positive.len() + split.test_positive.len(), 30);
            assert_eq!(split.training_negative.len() + split.test_negative.len(), 60);
            assert!(!split.test_positive.is_empty());
            assert!(split.test_positive.len() <= split.test_negative.len());
            assert_eq!(split.training_positive.len(), split.training_negative.len());

            let training = split.training_set();
            assert!(split.test_set().iter().all(|t| !training.iter().any(|p| std::ptr::eq(*p, *t))));
        }
    }

    #[test]
    fn prefix_mode_is_deterministic() {
        let peptides = labeled(10, 20);
        let refs: Vec<&Peptide> = peptides.iter().collect();
        let mut partitioner = TrainTestPartitioner::new(0.2, SamplingMode::Prefix, None);
        let split = partitioner.partition(&refs, &StatusKeywords::default()).unwrap();
        let starts: Vec<usize> = split.test_positive.iter().map(|p| p.start).collect();
        assert_eq!(starts, vec![0, 10]);
        assert_eq!(split.test_negative[0].start, 100);
        assert_eq!(split.training_negative[0].start, 100 + 10 * split.test_negative.len());
    }

    #[test]
    fn random_mode_varies_with_seed() {
        let peptides = labeled(40, 80);
        let refs: Vec<&Peptide> = peptides.iter().collect();
        let keywords = StatusKeywords::default();
        let starts = |seed| {
            let mut partitioner = TrainTestPartitioner::new(0.25, SamplingMode::Random, Some(seed));
            let split = partitioner.partition(&refs, &keywords).unwrap();
            let mut starts: Vec<usize> = split.test_positive.iter().map(|p| p.start).collect();
            starts.sort_unstable();
            starts
        };
        assert_eq!(starts(1), starts(1));
        assert_ne!(starts(1), starts(2));
    }

    #[test]
    fn unlabeled_peptides_are_rejected() {
        let schema = schema();
        let peptide = Peptide::new(&schema, "ACDE", 0, 3).unwrap();
        let refs = vec![&peptide];
        let mut partitioner = TrainTestPartitioner::new(0.1, SamplingMode::Prefix, None);
        assert!(partitioner.partition(&refs, &StatusKeywords::default()).is_err());
    }
}
