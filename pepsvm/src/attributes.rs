use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;

use tracing::debug;

use crate::errors::{PipelineError, Result};
use crate::helper_functions::read_lines;

/// Attribute names the pipeline itself reads or writes.
pub mod names {
    pub const SEQUENCE_ID: &str = "seq_id";
    pub const UNIPROT_ID: &str = "uniprot_id";
    pub const PROTEIN_ERRORS: &str = "protein_errors";
    pub const PEPTIDE_SEQUENCE: &str = "peptide_sequence";
    pub const PEPTIDE_START: &str = "peptide_start";
    pub const PEPTIDE_END: &str = "peptide_end";
    pub const PEPTIDE_ERRORS: &str = "peptide_errors";
    pub const STATUS: &str = "status";
    pub const DISORDER_CALLS: &str = "disorder_calls";
    pub const DISORDER_SCORES: &str = "disorder_scores";
    pub const SECONDARY_CALLS: &str = "secondary_calls";
    pub const SECONDARY_SCORES: &str = "secondary_scores";
    pub const DSSP_STRUCTURE: &str = "dssp_structure";
    pub const DSSP_ACCESSIBILITY: &str = "dssp_accessibility";
    pub const MODEL_ID: &str = "model_id";
    pub const COVERAGE: &str = "coverage";
    pub const MODEL_URL: &str = "model_url";
    pub const SVM_SCORE: &str = "svm_score";
    pub const SVM_FPR: &str = "svm_fpr";
    pub const SVM_TPR: &str = "svm_tpr";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeScope {
    Protein,
    Peptide,
    Model,
}

impl FromStr for AttributeScope {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "protein" => Ok(AttributeScope::Protein),
            "peptide" => Ok(AttributeScope::Peptide),
            "model" => Ok(AttributeScope::Model),
            other => Err(PipelineError::Schema(format!("unknown attribute scope '{other}'"))),
        }
    }
}

/// Tag naming the feature value implementation that handles an attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureClass {
    StringAttribute,
    PeptideSequence,
    CallString,
    ScoreList,
    StructureCalls,
    AccessibilityList,
    PeptideErrors,
}

impl FeatureClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeatureClass::StringAttribute => "string_attribute",
            FeatureClass::PeptideSequence => "peptide_sequence",
            FeatureClass::CallString => "call_string",
            FeatureClass::ScoreList => "score_list",
            FeatureClass::StructureCalls => "structure_calls",
            FeatureClass::AccessibilityList => "accessibility_list",
            FeatureClass::PeptideErrors => "peptide_errors",
        }
    }

    /// Whether the feature holds one value per residue.
    pub fn is_per_residue(&self) -> bool {
        !matches!(self, FeatureClass::StringAttribute | FeatureClass::PeptideErrors)
    }

    /// SVM slots consumed per position, `None` for classes that never
    /// reach the classifier.
    pub fn svm_width(&self) -> Option<usize> {
        match self {
            FeatureClass::PeptideSequence => Some(20),
            FeatureClass::StringAttribute
            | FeatureClass::CallString
            | FeatureClass::ScoreList
            | FeatureClass::StructureCalls
            | FeatureClass::AccessibilityList => Some(1),
            FeatureClass::PeptideErrors => None,
        }
    }
}

impl FromStr for FeatureClass {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        let class = match s {
            "string_attribute" => FeatureClass::StringAttribute,
            "peptide_sequence" => FeatureClass::PeptideSequence,
            "call_string" => FeatureClass::CallString,
            "score_list" => FeatureClass::ScoreList,
            "structure_calls" => FeatureClass::StructureCalls,
            "accessibility_list" => FeatureClass::AccessibilityList,
            "peptide_errors" => FeatureClass::PeptideErrors,
            other => return Err(PipelineError::Schema(format!("unknown feature class '{other}'"))),
        };
        Ok(class)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub name: String,
    pub scope: AttributeScope,
    pub optional: bool,
    pub display_name: String,
    pub feature_class: FeatureClass,
    pub input: bool,
    pub output: bool,
    pub input_order: Option<usize>,
    pub output_order: Option<usize>,
}

impl Attribute {
    fn from_row(row: &str) -> Result<Self> {
        let cols: Vec<&str> = row.split('\t').map(str::trim).collect();
        if cols.len() < 5 || cols.len() > 6 {
            return Err(PipelineError::Schema(format!(
                "attribute row needs 6 tab-separated columns, got {}: '{row}'",
                cols.len()
            )));
        }
        let optional = match cols[2].to_ascii_lowercase().as_str() {
            "true" => true,
            "false" | "" => false,
            other => {
                return Err(PipelineError::Schema(format!(
                    "optional flag for '{}' must be True or False, got '{other}'",
                    cols[0]
                )))
            }
        };
        let mut input = false;
        let mut output = false;
        for flag in cols.get(5).copied().unwrap_or("").split(',').map(str::trim) {
            match flag {
                "input" => input = true,
                "output" => output = true,
                "" | "none" => {}
                other => {
                    return Err(PipelineError::Schema(format!(
                        "unknown io flag '{other}' for attribute '{}'",
                        cols[0]
                    )))
                }
            }
        }
        Ok(Attribute {
            name: cols[0].to_string(),
            scope: cols[1].parse()?,
            optional,
            display_name: cols[3].to_string(),
            feature_class: cols[4].parse()?,
            input,
            output,
            input_order: None,
            output_order: None,
        })
    }
}

/// Column model for one run: every attribute that may exist, in file order.
#[derive(Debug, Clone)]
pub struct AttributeSchema {
    attributes: Vec<Attribute>,
    index: HashMap<String, usize>,
}

impl AttributeSchema {
    pub fn from_path(path: &Path) -> Result<Self> {
        let lines = read_lines(path)?;
        let schema = Self::from_rows(lines.iter().map(String::as_str))?;
        debug!("Loaded {} attributes from {}", schema.attributes.len(), path.display());
        Ok(schema)
    }

    pub fn from_rows<'a>(rows: impl IntoIterator<Item = &'a str>) -> Result<Self> {
        let mut attributes = Vec::new();
        let mut index = HashMap::new();
        let (mut next_input, mut next_output) = (0, 0);

        for row in rows {
            let mut attribute = Attribute::from_row(row)?;
            if index.contains_key(&attribute.name) {
                return Err(PipelineError::Schema(format!("attribute '{}' declared twice", attribute.name)));
            }
            if attribute.input {
                attribute.input_order = Some(next_input);
                next_input += 1;
            }
            if attribute.output {
                attribute.output_order = Some(next_output);
                next_output += 1;
            }
            index.insert(attribute.name.clone(), attributes.len());
            attributes.push(attribute);
        }
        Ok(AttributeSchema { attributes, index })
    }

    pub fn attribute(&self, name: &str) -> Result<&Attribute> {
        self.index
            .get(name)
            .map(|&i| &self.attributes[i])
            .ok_or_else(|| PipelineError::Schema(format!("attribute '{name}' is not registered")))
    }

    pub fn validate_attribute(&self, name: &str) -> Result<()> {
        self.attribute(name).map(|_| ())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    pub fn column_sorted_input_attributes(&self) -> Vec<&Attribute> {
        self.attributes.iter().filter(|a| a.input).collect()
    }

    pub fn column_sorted_output_attributes(&self) -> Vec<&Attribute> {
        self.attributes.iter().filter(|a| a.output).collect()
    }

    pub fn input_header(&self) -> Vec<&str> {
        self.column_sorted_input_attributes().iter().map(|a| a.display_name.as_str()).collect()
    }

    pub fn output_header(&self) -> Vec<&str> {
        self.column_sorted_output_attributes().iter().map(|a| a.display_name.as_str()).collect()
    }

    #[cfg(test)]
    pub fn set_all_optional(&mut self) {
        for attribute in &mut self.attributes {
            attribute.optional = true;
        }
    }
}
