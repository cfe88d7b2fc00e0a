use crate::attributes::AttributeSchema;
use crate::errors::{PipelineError, Result};
use crate::models::Peptide;

/// Running 1-based feature number for one peptide's SVM line.
#[derive(Debug, Clone)]
pub struct SvmFeatureEncoder {
    feature_number: usize,
    reference_length: usize,
}

impl SvmFeatureEncoder {
    pub fn new(reference_length: usize) -> Self {
        SvmFeatureEncoder { feature_number: 1, reference_length }
    }

    pub fn feature_number(&self) -> usize {
        self.feature_number
    }

    pub fn reference_length(&self) -> usize {
        self.reference_length
    }

    /// Renders `value` at the current slot and moves to the next one.
    pub fn emit(&mut self, value: f64) -> String {
        let pair = format!("{}:{}", self.feature_number, value);
        self.feature_number += 1;
        pair
    }

    pub fn advance(&mut self, slots: usize) {
        self.feature_number += slots;
    }

    /// Skips a feature that contributes nothing for this peptide.
    pub fn process_empty_feature(&mut self, width: usize, per_residue: bool) {
        let positions = if per_residue { self.reference_length } else { 1 };
        self.advance(width * positions);
    }

    /// Skips the slots a shorter peptide leaves unused so later features
    /// start at the same index for every peptide.
    pub fn pad(&mut self, actual_length: usize, width: usize) {
        self.advance(self.reference_length.saturating_sub(actual_length) * width);
    }
}

/// Turns peptides into `label idx:val ...` lines for a fixed feature order.
pub struct SvmLineBuilder<'a> {
    schema: &'a AttributeSchema,
    feature_order: &'a [String],
    reference_length: usize,
}

impl<'a> SvmLineBuilder<'a> {
    pub fn new(schema: &'a AttributeSchema, feature_order: &'a [String], reference_length: usize) -> Result<Self> {
        for name in feature_order {
            let attribute = schema.attribute(name)?;
            if attribute.feature_class.svm_width().is_none() {
                return Err(PipelineError::Schema(format!("feature '{name}' cannot be used as an SVM feature")));
            }
        }
        Ok(SvmLineBuilder { schema, feature_order, reference_length })
    }

    pub fn features(&self, peptide: &Peptide) -> Result<String> {
        if peptide.len() > self.reference_length {
            return Err(PipelineError::Config(format!(
                "peptide {} at {} has length {} which exceeds the reference peptide length {}",
                peptide.sequence,
                peptide.start,
                peptide.len(),
                self.reference_length
            )));
        }

        let mut encoder = SvmFeatureEncoder::new(self.reference_length);
        let mut pairs = Vec::new();
        for name in self.feature_order {
            let class = self.schema.attribute(name)?.feature_class;
            let width = class
                .svm_width()
                .ok_or_else(|| PipelineError::Schema(format!("feature '{name}' cannot be used as an SVM feature")))?;

            match peptide.feature(name) {
                Some(value) if value.is_initialized() && !value.is_error() => {
                    if class.is_per_residue() && value.residue_count() != Some(peptide.len()) {
                        return Err(PipelineError::Internal(format!(
                            "feature '{name}' of peptide at {} covers {:?} residues, expected {}",
                            peptide.start,
                            value.residue_count(),
                            peptide.len()
                        )));
                    }
                    pairs.extend(value.make_svm_feature(&mut encoder)?);
                    if class.is_per_residue() {
                        encoder.pad(peptide.len(), width);
                    }
                }
                _ => encoder.process_empty_feature(width, class.is_per_residue()),
            }
        }
        Ok(pairs.join(" "))
    }

    pub fn line(&self, label: &str, peptide: &Peptide) -> Result<String> {
        let features = self.features(peptide)?;
        if features.is_empty() {
            Ok(label.to_string())
        } else {
            Ok(format!("{label} {features}"))
        }
    }
}
