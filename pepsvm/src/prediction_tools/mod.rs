pub mod sequence_features;
pub mod structure_features;
pub mod svm_light;
