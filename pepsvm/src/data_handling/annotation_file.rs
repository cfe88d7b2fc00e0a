use std::collections::HashMap;
use std::path::Path;

use csv::{QuoteStyle, ReaderBuilder, StringRecord, WriterBuilder};
use tracing::info;

use crate::attributes::{names, Attribute, AttributeSchema, AttributeScope};
use crate::data_handling::model_table::StructureModel;
use crate::errors::{PipelineError, Result};
use crate::features::FeatureValue;
use crate::models::{Peptide, Protein};

/// Writes one row per peptide (or one row per errored protein), with the
/// schema's output columns in output order.
pub fn write_annotation_file(path: &Path, schema: &AttributeSchema, proteins: &[Protein]) -> Result<()> {
    let attributes = schema.column_sorted_output_attributes();
    let mut writer = WriterBuilder::new()
        .delimiter(b'\t')
        .quote_style(QuoteStyle::Never)
        .from_path(path)?;
    writer.write_record(schema.output_header())?;

    let mut rows = 0;
    for protein in proteins {
        if protein.has_errors() {
            writer.write_record(error_row(&attributes, protein))?;
            rows += 1;
            continue;
        }
        for peptide in protein.peptides() {
            let row = attributes
                .iter()
                .map(|attribute| render(attribute, protein, peptide))
                .collect::<Result<Vec<_>>>()?;
            writer.write_record(&row)?;
            rows += 1;
        }
    }
    writer.flush()?;
    info!("Wrote {} annotation rows to {}", rows, path.display());
    Ok(())
}

fn error_row(attributes: &[&Attribute], protein: &Protein) -> Vec<String> {
    attributes
        .iter()
        .map(|attribute| match attribute.name.as_str() {
            names::SEQUENCE_ID | names::PROTEIN_ERRORS => {
                protein.attribute_value(&attribute.name).unwrap_or_default()
            }
            _ => String::new(),
        })
        .collect()
}

fn render(attribute: &Attribute, protein: &Protein, peptide: &Peptide) -> Result<String> {
    let value = match attribute.scope {
        AttributeScope::Protein => protein.attribute_value(&attribute.name),
        AttributeScope::Peptide => peptide.feature(&attribute.name).map(FeatureValue::value_string),
        AttributeScope::Model => match &peptide.best_model {
            Some(model) => model.get(&attribute.name).map(str::to_string),
            None => Some(String::new()),
        },
    };
    match value {
        Some(value) => Ok(value),
        None if attribute.optional => Ok(String::new()),
        None => Err(PipelineError::Schema(format!(
            "mandatory attribute '{}' was never set for peptide {} at {} of protein {}",
            attribute.name, peptide.sequence, peptide.start, protein.sequence_id
        ))),
    }
}

/// Rebuilds proteins, peptides and best models from an annotation file
/// whose header matches the schema's input columns.
pub fn read_annotation_file(path: &Path, schema: &AttributeSchema) -> Result<Vec<Protein>> {
    let attributes = schema.column_sorted_input_attributes();
    let mut reader = ReaderBuilder::new()
        .delimiter(b'\t')
        .quoting(false)
        .has_headers(true)
        .from_path(path)?;

    let header: Vec<String> = reader.headers()?.iter().map(|h| h.trim().to_string()).collect();
    let expected = schema.input_header();
    if header != expected {
        return Err(PipelineError::Schema(format!(
            "header of {} does not match the attribute schema: expected {:?}, found {:?}",
            path.display(),
            expected,
            header
        )));
    }

    let column = |name: &str| -> Result<usize> {
        schema
            .attribute(name)?
            .input_order
            .ok_or_else(|| PipelineError::Schema(format!("attribute '{name}' must be an input column")))
    };
    let id_column = column(names::SEQUENCE_ID)?;

    let mut proteins: Vec<Protein> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    for record in reader.records() {
        let record = record?;
        let sequence_id = field(&record, id_column)?.to_string();
        let position = *index.entry(sequence_id.clone()).or_insert_with(|| {
            proteins.push(Protein::new(&sequence_id, ""));
            proteins.len() - 1
        });
        let protein = &mut proteins[position];

        for (attribute, value) in attributes.iter().zip(record.iter()) {
            if attribute.scope == AttributeScope::Protein {
                protein.set_attribute(schema, &attribute.name, value.trim())?;
            }
        }
        if protein.has_errors() {
            continue;
        }

        let peptide = read_peptide(schema, &attributes, &record, &column)?;
        protein.add_peptide(peptide)?;
    }
    info!("Read {} proteins from {}", proteins.len(), path.display());
    Ok(proteins)
}

fn field(record: &StringRecord, column: usize) -> Result<&str> {
    record
        .get(column)
        .map(str::trim)
        .ok_or_else(|| PipelineError::Input(format!("annotation row is missing column {column}")))
}

fn read_peptide(
    schema: &AttributeSchema,
    attributes: &[&Attribute],
    record: &StringRecord,
    column: &dyn Fn(&str) -> Result<usize>,
) -> Result<Peptide> {
    let coordinate = |name: &str| -> Result<usize> {
        let raw = field(record, column(name)?)?;
        raw.parse().map_err(|_| PipelineError::Input(format!("{name} '{raw}' is not a residue position")))
    };
    let sequence = field(record, column(names::PEPTIDE_SEQUENCE)?)?;
    let mut peptide = Peptide::new(schema, sequence, coordinate(names::PEPTIDE_START)?, coordinate(names::PEPTIDE_END)?)?;

    let mut model_attributes = Vec::new();
    for (attribute, raw) in attributes.iter().zip(record.iter()) {
        let raw = raw.trim();
        match attribute.scope {
            AttributeScope::Protein => {}
            AttributeScope::Model => {
                if !raw.is_empty() {
                    model_attributes.push((attribute.name.clone(), raw.to_string()));
                }
            }
            AttributeScope::Peptide => {
                let value = FeatureValue::from_file_value(attribute.feature_class, raw)?;
                peptide.set_feature(schema, &attribute.name, value)?;
            }
        }
    }
    if model_attributes.iter().any(|(name, _)| name == names::MODEL_ID) {
        peptide.best_model = Some(StructureModel::from_attributes(model_attributes));
    }
    Ok(peptide)
}
