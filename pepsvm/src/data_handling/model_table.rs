use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use tracing::info;

use crate::attributes::names;
use crate::errors::{PipelineError, Result};
use crate::helper_functions::{read_lines, round_to};
use crate::models::Peptide;

const TARGET_BEGIN: &str = "target_beg";
const TARGET_END: &str = "target_end";
const MODEL_SEQUENCE_ID: &str = "seq_id";
const MODEL_RUN: &str = "run";

/// A homology model, carried as the attribute bag of its table row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StructureModel {
    attributes: BTreeMap<String, String>,
}

impl StructureModel {
    pub fn from_table_line(line: &str, columns: &[String]) -> Result<Self> {
        let values: Vec<&str> = line.split('\t').collect();
        if values.len() != columns.len() {
            return Err(PipelineError::Schema(format!(
                "model table line has {} columns but the column file names {}: '{line}'",
                values.len(),
                columns.len()
            )));
        }
        let attributes = columns
            .iter()
            .zip(values)
            .map(|(name, value)| (name.clone(), value.trim().to_string()))
            .collect();
        Ok(StructureModel { attributes })
    }

    pub fn from_attributes<K: Into<String>, V: Into<String>>(pairs: impl IntoIterator<Item = (K, V)>) -> Self {
        StructureModel { attributes: pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect() }
    }

    pub fn attribute_value(&self, name: &str) -> Result<&str> {
        self.attributes
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| PipelineError::Schema(format!("model has no attribute '{name}'")))
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    pub fn set_attribute(&mut self, name: &str, value: &str) {
        self.attributes.insert(name.to_string(), value.to_string());
    }

    pub fn id(&self) -> Result<&str> {
        self.attribute_value(names::MODEL_ID)
    }

    pub fn sequence_id(&self) -> Result<&str> {
        self.attribute_value(MODEL_SEQUENCE_ID)
    }

    pub fn run_name(&self) -> Result<&str> {
        self.attribute_value(MODEL_RUN)
    }

    fn coordinate(&self, name: &str) -> Result<usize> {
        let raw = self.attribute_value(name)?;
        raw.parse()
            .map_err(|_| PipelineError::Input(format!("model attribute {name} = '{raw}' is not a residue number")))
    }

    pub fn target_begin(&self) -> Result<usize> {
        self.coordinate(TARGET_BEGIN)
    }

    pub fn target_end(&self) -> Result<usize> {
        self.coordinate(TARGET_END)
    }

    /// Length of the modelled target region.
    pub fn length(&self) -> Result<usize> {
        let (begin, end) = (self.target_begin()?, self.target_end()?);
        if end <= begin {
            return Err(PipelineError::Input(format!(
                "model {} has target_end {end} not after target_beg {begin}",
                self.id().unwrap_or("?")
            )));
        }
        Ok(end - begin)
    }

    /// Strict containment of the peptide's interval in the target region.
    pub fn contains_peptide(&self, peptide: &Peptide) -> Result<bool> {
        self.length()?;
        Ok(peptide.start > self.target_begin()? && peptide.end < self.target_end()?)
    }

    pub fn calculate_coverage(&mut self, protein_length: usize) -> Result<()> {
        if protein_length == 0 {
            return Err(PipelineError::Input(format!("cannot compute coverage of model {} on an empty protein", self.id()?)));
        }
        let coverage = round_to(self.length()? as f64 / protein_length as f64, 3);
        self.set_attribute(names::COVERAGE, &coverage.to_string());
        Ok(())
    }

    pub fn set_model_url(&mut self, template: &str, wild_card: &str) -> Result<()> {
        let url = template.replace(wild_card, self.id()?);
        self.set_attribute(names::MODEL_URL, &url);
        Ok(())
    }

    pub fn rank_value(&self, rank_attribute: &str) -> Result<f64> {
        let raw = self.attribute_value(rank_attribute)?;
        raw.parse().map_err(|_| {
            PipelineError::Input(format!("model rank attribute {rank_attribute} = '{raw}' is not numeric"))
        })
    }

    /// Every attribute of `other` is present here with the same value.
    pub fn matches(&self, other: &StructureModel) -> bool {
        other.attributes.iter().all(|(name, value)| self.attributes.get(name) == Some(value))
    }
}

/// All models of a run, grouped by protein sequence id.
#[derive(Debug, Default)]
pub struct ModelTable {
    by_sequence: HashMap<String, Vec<StructureModel>>,
}

impl ModelTable {
    pub fn from_paths(table_file: &Path, column_file: &Path) -> Result<Self> {
        let columns = read_lines(column_file)?.into_iter().map(|c| c.trim().to_string()).collect::<Vec<_>>();
        let models = read_lines(table_file)?
            .iter()
            .map(|line| StructureModel::from_table_line(line, &columns))
            .collect::<Result<Vec<_>>>()?;
        info!("Read {} models from {}", models.len(), table_file.display());
        Ok(Self::from_models(models))
    }

    /// Models without a sequence id cannot belong to any protein and are dropped.
    pub fn from_models(models: Vec<StructureModel>) -> Self {
        let mut by_sequence: HashMap<String, Vec<StructureModel>> = HashMap::new();
        for model in models {
            if let Some(seq_id) = model.get(MODEL_SEQUENCE_ID) {
                by_sequence.entry(seq_id.to_string()).or_default().push(model);
            }
        }
        ModelTable { by_sequence }
    }

    pub fn models_for(&self, sequence_id: &str) -> &[StructureModel] {
        self.by_sequence.get(sequence_id).map(Vec::as_slice).unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::{model, peptide, schema};
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn containment_is_strict() {
        let schema = schema();
        let pep = peptide(&schema, "ACDEFGHI", 10);
        assert_eq!(pep.end, 17);

        let m1 = model("M1", "seq1", 5, 20, "0.9");
        let m2 = model("M2", "seq1", 12, 15, "0.8");
        let touching = model("M3", "seq1", 10, 30, "0.8");
        assert!(m1.contains_peptide(&pep).unwrap());
        assert!(!m2.contains_peptide(&pep).unwrap());
        assert!(!touching.contains_peptide(&pep).unwrap());
    }

    #[test]
    fn inverted_target_range_is_fatal() {
        let schema = schema();
        let pep = peptide(&schema, "ACDE", 10);
        let broken = model("M1", "seq1", 20, 20, "0.9");
        assert!(broken.length().is_err());
        assert!(broken.contains_peptide(&pep).is_err());
    }

    #[test]
    fn one_directional_match() {
        let full = model("M1", "seq1", 5, 20, "0.9");
        let partial = StructureModel::from_attributes([(names::MODEL_ID, "M1")]);
        assert!(full.matches(&partial));
        assert!(!partial.matches(&full));
    }

    #[test]
    fn reads_table_with_column_file() {
        let mut columns = NamedTempFile::new().unwrap();
        for name in ["model_id", "seq_id", "run", "target_beg", "target_end", "no35"] {
            writeln!(columns, "{name}").unwrap();
        }
        let mut table = NamedTempFile::new().unwrap();
        writeln!(table, "M1\tseq1\trunA\t5\t20\t0.9").unwrap();
        writeln!(table, "M2\tseq1\trunA\t12\t15\t0.8").unwrap();
        writeln!(table, "M3\tseq2\trunA\t1\t9\t0.7").unwrap();

        let models = ModelTable::from_paths(table.path(), columns.path()).unwrap();
        assert_eq!(models.models_for("seq1").len(), 2);
        assert_eq!(models.models_for("seq2")[0].run_name().unwrap(), "runA");
        assert!(models.models_for("seq3").is_empty());
    }

    #[test]
    fn column_count_mismatch_is_schema_error() {
        let columns = vec!["model_id".to_string(), "seq_id".to_string()];
        assert!(matches!(
            StructureModel::from_table_line("M1\tseq1\textra", &columns),
            Err(PipelineError::Schema(_))
        ));
    }

    #[test]
    fn model_url_replaces_wild_card() {
        let mut m = model("M1", "seq1", 5, 20, "0.9");
        m.set_model_url("https://models.example.org/XXX.pdb", "XXX").unwrap();
        assert_eq!(m.get(names::MODEL_URL), Some("https://models.example.org/M1.pdb"));
    }
}
