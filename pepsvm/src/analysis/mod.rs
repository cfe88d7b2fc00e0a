pub mod benchmark;
pub mod benchmark_scores;
pub mod partition;
pub mod roc;
pub mod tracker;
