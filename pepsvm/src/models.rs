use std::collections::BTreeMap;

use tracing::debug;

use crate::attributes::{names, AttributeSchema};
use crate::config::StatusKeywords;
use crate::data_handling::model_table::{ModelTable, StructureModel};
use crate::errors::{FeatureError, PipelineError, ProteinError, Result};
use crate::features::FeatureValue;

/// Label of a peptide for training and benchmarking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeptideStatus {
    Positive,
    Negative,
    Application,
}

impl PeptideStatus {
    pub fn from_keyword(status: &str, keywords: &StatusKeywords) -> Result<Self> {
        let status = status.trim();
        if status.eq_ignore_ascii_case(&keywords.positive) {
            Ok(PeptideStatus::Positive)
        } else if status.eq_ignore_ascii_case(&keywords.negative) {
            Ok(PeptideStatus::Negative)
        } else if status.eq_ignore_ascii_case(&keywords.application) {
            Ok(PeptideStatus::Application)
        } else {
            Err(PipelineError::Input(format!(
                "peptide status '{status}' is not one of '{}', '{}', '{}'",
                keywords.positive, keywords.negative, keywords.application
            )))
        }
    }

    /// Label for a training line; application peptides have none.
    pub fn training_label(&self) -> Result<&'static str> {
        match self {
            PeptideStatus::Positive => Ok("1"),
            PeptideStatus::Negative => Ok("-1"),
            PeptideStatus::Application => {
                Err(PipelineError::Input("application peptides cannot be used for training".into()))
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct Peptide {
    pub sequence: String,
    /// 0-based, protein-relative.
    pub start: usize,
    /// Inclusive.
    pub end: usize,
    features: BTreeMap<String, FeatureValue>,
    pub best_model: Option<StructureModel>,
}

impl Peptide {
    pub fn new(schema: &AttributeSchema, sequence: &str, start: usize, end: usize) -> Result<Self> {
        if end < start || end - start + 1 != sequence.chars().count() {
            return Err(PipelineError::Input(format!(
                "peptide {sequence} has coordinates {start}..={end} that do not match its length"
            )));
        }
        let mut peptide = Peptide {
            sequence: sequence.to_string(),
            start,
            end,
            features: BTreeMap::new(),
            best_model: None,
        };
        peptide.set_feature(schema, names::PEPTIDE_SEQUENCE, FeatureValue::Sequence(Some(sequence.chars().collect())))?;
        peptide.set_feature(schema, names::PEPTIDE_START, FeatureValue::text(start))?;
        peptide.set_feature(schema, names::PEPTIDE_END, FeatureValue::text(end))?;
        peptide.set_feature(schema, names::PEPTIDE_ERRORS, FeatureValue::Errors(Vec::new()))?;
        Ok(peptide)
    }

    pub fn len(&self) -> usize {
        self.end - self.start + 1
    }

    pub fn set_feature(&mut self, schema: &AttributeSchema, name: &str, value: FeatureValue) -> Result<()> {
        schema.validate_attribute(name)?;
        self.features.insert(name.to_string(), value);
        Ok(())
    }

    pub fn feature(&self, name: &str) -> Option<&FeatureValue> {
        self.features.get(name)
    }

    pub fn value_string(&self, name: &str) -> String {
        self.features.get(name).map(FeatureValue::value_string).unwrap_or_default()
    }

    pub fn status(&self) -> Option<String> {
        match self.features.get(names::STATUS) {
            Some(FeatureValue::Text(Some(status))) => Some(status.clone()),
            _ => None,
        }
    }

    pub fn classify(&self, keywords: &StatusKeywords) -> Result<PeptideStatus> {
        let status = self.status().ok_or_else(|| {
            PipelineError::Input(format!("peptide {} at {} has no status", self.sequence, self.start))
        })?;
        PeptideStatus::from_keyword(&status, keywords)
    }

    /// Marks the affected features with the error code and appends it to
    /// the peptide's error list.
    pub fn record_error(&mut self, schema: &AttributeSchema, error: &FeatureError) -> Result<()> {
        let code = error.code();
        for name in error.affected_features() {
            self.set_feature(schema, name, FeatureValue::ErrorMarker(code.clone()))?;
        }
        match self.features.get_mut(names::PEPTIDE_ERRORS) {
            Some(FeatureValue::Errors(codes)) => {
                if !codes.contains(&code) {
                    codes.push(code);
                }
            }
            _ => {
                self.set_feature(schema, names::PEPTIDE_ERRORS, FeatureValue::Errors(vec![code]))?;
            }
        }
        Ok(())
    }

    pub fn error_codes(&self) -> &[String] {
        match self.features.get(names::PEPTIDE_ERRORS) {
            Some(FeatureValue::Errors(codes)) => codes,
            _ => &[],
        }
    }

    /// Attribute-wise equality on rendered values, including the best model.
    pub fn matches(&self, other: &Peptide) -> bool {
        let names_match = self
            .features
            .keys()
            .chain(other.features.keys())
            .all(|name| self.value_string(name) == other.value_string(name));
        let models_match = match (&self.best_model, &other.best_model) {
            (None, None) => true,
            (Some(mine), Some(theirs)) => mine.matches(theirs),
            _ => false,
        };
        names_match && models_match
    }
}

#[derive(Debug, Clone)]
pub struct Protein {
    pub sequence_id: String,
    pub sequence: String,
    attributes: BTreeMap<String, String>,
    peptides: BTreeMap<usize, Peptide>,
    error: Option<ProteinError>,
    models: Vec<StructureModel>,
}

impl Protein {
    pub fn new(sequence_id: &str, sequence: &str) -> Self {
        Protein {
            sequence_id: sequence_id.to_string(),
            sequence: sequence.to_string(),
            attributes: BTreeMap::new(),
            peptides: BTreeMap::new(),
            error: None,
            models: Vec::new(),
        }
    }

    pub fn set_attribute(&mut self, schema: &AttributeSchema, name: &str, value: &str) -> Result<()> {
        schema.validate_attribute(name)?;
        match name {
            names::SEQUENCE_ID => self.sequence_id = value.to_string(),
            names::PROTEIN_ERRORS => {
                self.error = match value.trim() {
                    "" | "none" => None,
                    code => Some(ProteinError::from_code(code)?),
                }
            }
            _ => {
                self.attributes.insert(name.to_string(), value.to_string());
            }
        }
        Ok(())
    }

    /// Rendered value of a protein-scoped attribute, `None` if never set.
    pub fn attribute_value(&self, name: &str) -> Option<String> {
        match name {
            names::SEQUENCE_ID => Some(self.sequence_id.clone()),
            names::PROTEIN_ERRORS => {
                Some(self.error.map(|e| e.code().to_string()).unwrap_or_else(|| "none".to_string()))
            }
            _ => self.attributes.get(name).cloned(),
        }
    }

    pub fn error(&self) -> Option<ProteinError> {
        self.error
    }

    pub fn set_error(&mut self, error: ProteinError) {
        debug!("Protein {} marked with {}", self.sequence_id, error.code());
        self.error = Some(error);
    }

    pub fn has_errors(&self) -> bool {
        self.error.is_some()
    }

    pub fn add_peptide(&mut self, peptide: Peptide) -> Result<()> {
        if self.peptides.contains_key(&peptide.start) {
            return Err(PipelineError::Input(format!(
                "protein {} already has a peptide starting at {}",
                self.sequence_id, peptide.start
            )));
        }
        self.peptides.insert(peptide.start, peptide);
        Ok(())
    }

    /// Installs the parsed peptides, marking the protein when there are none.
    pub fn set_peptides(&mut self, peptides: Vec<Peptide>) -> Result<()> {
        if peptides.is_empty() {
            self.set_error(ProteinError::NoPeptidesParsed);
            return Ok(());
        }
        for peptide in peptides {
            self.add_peptide(peptide)?;
        }
        Ok(())
    }

    pub fn peptide(&self, start: usize) -> Option<&Peptide> {
        self.peptides.get(&start)
    }

    pub fn peptide_mut(&mut self, start: usize) -> Option<&mut Peptide> {
        self.peptides.get_mut(&start)
    }

    pub fn peptides(&self) -> impl Iterator<Item = &Peptide> {
        self.peptides.values()
    }

    pub fn peptides_mut(&mut self) -> impl Iterator<Item = &mut Peptide> {
        self.peptides.values_mut()
    }

    pub fn peptide_count(&self) -> usize {
        self.peptides.len()
    }

    /// Defined peptides must sit exactly where they claim in the sequence.
    pub fn validate_peptide_sequences(&self) -> Result<()> {
        for peptide in self.peptides.values() {
            let actual = self.sequence.get(peptide.start..=peptide.end);
            if actual != Some(peptide.sequence.as_str()) {
                return Err(PipelineError::Input(format!(
                    "peptide {} at {} of protein {} does not match the protein sequence (found {:?})",
                    peptide.sequence, peptide.start, self.sequence_id, actual
                )));
            }
        }
        Ok(())
    }

    /// Attaches this protein's models from the table, ranked by
    /// `rank_attribute` descending.
    pub fn add_models(
        &mut self,
        table: &ModelTable,
        rank_attribute: &str,
        url: Option<(&str, &str)>,
    ) -> Result<()> {
        let protein_length = self.sequence.chars().count();
        let mut ranked = Vec::new();
        for model in table.models_for(&self.sequence_id) {
            let mut model = model.clone();
            model.calculate_coverage(protein_length)?;
            if let Some((template, wild_card)) = url {
                model.set_model_url(template, wild_card)?;
            }
            let rank = model.rank_value(rank_attribute)?;
            ranked.push((rank, model));
        }
        ranked.sort_by(|a, b| b.0.total_cmp(&a.0));
        self.models = ranked.into_iter().map(|(_, model)| model).collect();
        Ok(())
    }

    pub fn models(&self) -> &[StructureModel] {
        &self.models
    }

    /// Gives each peptide the highest-ranked model that contains it.
    pub fn assign_best_models(&mut self) -> Result<()> {
        for peptide in self.peptides.values_mut() {
            peptide.best_model = None;
            for model in &self.models {
                if model.contains_peptide(peptide)? {
                    peptide.best_model = Some(model.clone());
                    break;
                }
            }
        }
        Ok(())
    }

    pub fn matches(&self, other: &Protein) -> bool {
        if self.sequence_id != other.sequence_id || self.error != other.error {
            return false;
        }
        // Unset and empty attributes render identically in annotation files.
        let attributes_match = self.attributes.keys().chain(other.attributes.keys()).all(|name| {
            self.attribute_value(name).unwrap_or_default() == other.attribute_value(name).unwrap_or_default()
        });
        if !attributes_match {
            return false;
        }
        if self.peptides.len() != other.peptides.len() {
            return false;
        }
        self.peptides.iter().all(|(start, peptide)| {
            other.peptides.get(start).map(|theirs| peptide.matches(theirs)).unwrap_or(false)
        })
    }
}

/// Every peptide of every protein without a protein-level error.
pub fn collect_peptides(proteins: &[Protein]) -> Vec<&Peptide> {
    proteins.iter().filter(|p| !p.has_errors()).flat_map(|p| p.peptides()).collect()
}
