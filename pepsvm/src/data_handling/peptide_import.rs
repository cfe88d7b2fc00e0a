use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use needletail::parse_fastx_file;
use regex::Regex;
use tracing::{info, warn};

use crate::attributes::{names, AttributeSchema};
use crate::config::StatusKeywords;
use crate::errors::{PipelineError, Result};
use crate::features::FeatureValue;
use crate::helper_functions::read_lines;
use crate::models::{Peptide, PeptideStatus, Protein};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FastaRecord {
    pub id: String,
    pub sequence: String,
}

pub fn read_fasta(path: &Path) -> Result<Vec<FastaRecord>> {
    let mut reader = parse_fastx_file(path)
        .map_err(|e| PipelineError::Input(format!("could not open FASTA {}: {e}", path.display())))?;
    let mut records = Vec::new();
    while let Some(record) = reader.next() {
        let record = record.map_err(|e| PipelineError::Input(format!("malformed FASTA {}: {e}", path.display())))?;
        records.push(FastaRecord {
            id: String::from_utf8_lossy(record.id()).trim().to_string(),
            sequence: String::from_utf8_lossy(&record.seq()).to_ascii_uppercase(),
        });
    }
    Ok(records)
}

/// Residues disallowed at given 1-based peptide positions.
#[derive(Debug, Clone, Default)]
pub struct ParsingRules {
    disallowed: BTreeMap<usize, HashSet<char>>,
}

impl ParsingRules {
    pub fn from_path(path: &Path) -> Result<Self> {
        let lines = read_lines(path)?;
        Self::from_lines(lines.iter().map(String::as_str))
    }

    /// Each line: `<position> <residue> <residue> ...`
    pub fn from_lines<'a>(lines: impl IntoIterator<Item = &'a str>) -> Result<Self> {
        let mut rules = ParsingRules::default();
        for line in lines {
            let mut cols = line.split_whitespace();
            let Some(position) = cols.next() else { continue };
            let position: usize = position
                .parse()
                .ok()
                .filter(|p| *p > 0)
                .ok_or_else(|| PipelineError::Config(format!("bad position in parsing rule '{line}'")))?;
            let residues = rules.disallowed.entry(position).or_default();
            for residue in cols {
                let mut chars = residue.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => {
                        residues.insert(c.to_ascii_uppercase());
                    }
                    _ => return Err(PipelineError::Config(format!("bad residue '{residue}' in parsing rule '{line}'"))),
                }
            }
        }
        Ok(rules)
    }

    pub fn is_valid_peptide(&self, sequence: &str) -> bool {
        sequence.chars().enumerate().all(|(i, residue)| {
            self.disallowed
                .get(&(i + 1))
                .map(|residues| !residues.contains(&residue.to_ascii_uppercase()))
                .unwrap_or(true)
        })
    }
}

/// Source of proteins and their candidate peptides.
pub trait PeptideImporter {
    fn import(&self, records: &[FastaRecord]) -> Result<Vec<Protein>>;

    fn read_proteins(&self, fasta: &Path) -> Result<Vec<Protein>> {
        let records = read_fasta(fasta)?;
        let proteins = self.import(&records)?;
        let errored = proteins.iter().filter(|p| p.has_errors()).count();
        info!(
            "Imported {} proteins ({} without peptides) from {}",
            proteins.len(),
            errored,
            fasta.display()
        );
        Ok(proteins)
    }
}

fn split_header(id: &str, min_fields: usize) -> Result<Vec<&str>> {
    let fields: Vec<&str> = id.split('|').map(str::trim).collect();
    if fields.len() < min_fields || fields[0].is_empty() {
        return Err(PipelineError::Input(format!(
            "FASTA header '{id}' needs at least {min_fields} '|'-separated fields"
        )));
    }
    Ok(fields)
}

/// Every window of the run's peptide length that the rules allow.
pub struct ScanPeptideImporter<'a> {
    pub schema: &'a AttributeSchema,
    pub rules: &'a ParsingRules,
    pub peptide_length: usize,
}

impl PeptideImporter for ScanPeptideImporter<'_> {
    fn import(&self, records: &[FastaRecord]) -> Result<Vec<Protein>> {
        let mut proteins = Vec::with_capacity(records.len());
        for record in records {
            let fields = split_header(&record.id, 2)?;
            let mut protein = Protein::new(fields[0], &record.sequence);
            protein.set_attribute(self.schema, names::UNIPROT_ID, fields[1])?;

            let residues: Vec<char> = record.sequence.chars().collect();
            let mut peptides = Vec::new();
            if residues.len() >= self.peptide_length {
                for (start, window) in residues.windows(self.peptide_length).enumerate() {
                    let candidate: String = window.iter().collect();
                    if self.rules.is_valid_peptide(&candidate) {
                        peptides.push(Peptide::new(self.schema, &candidate, start, start + self.peptide_length - 1)?);
                    }
                }
            }
            if peptides.is_empty() {
                warn!("No peptides parsed from {}", protein.sequence_id);
            }
            protein.set_peptides(peptides)?;
            proteins.push(protein);
        }
        Ok(proteins)
    }
}

/// Peptides listed in the FASTA header as `<start>_<SEQUENCE>_<status>`.
pub struct DefinedPeptideImporter<'a> {
    pub schema: &'a AttributeSchema,
    pub keywords: &'a StatusKeywords,
}

impl PeptideImporter for DefinedPeptideImporter<'_> {
    fn import(&self, records: &[FastaRecord]) -> Result<Vec<Protein>> {
        let code = Regex::new(r"^(\d+)_([A-Za-z]+)_(\w+)$")
            .map_err(|e| PipelineError::Internal(format!("peptide code pattern: {e}")))?;

        let mut proteins = Vec::with_capacity(records.len());
        for record in records {
            let fields = split_header(&record.id, 2)?;
            let mut protein = Protein::new(fields[0], &record.sequence);
            protein.set_attribute(self.schema, names::UNIPROT_ID, fields[1])?;

            let mut peptides = Vec::new();
            for peptide_code in fields[2..].iter().filter(|c| !c.is_empty()) {
                let caps = code.captures(peptide_code).ok_or_else(|| {
                    PipelineError::Input(format!("peptide code '{peptide_code}' in '{}' is malformed", record.id))
                })?;
                let start: usize = caps[1]
                    .parse()
                    .map_err(|_| PipelineError::Input(format!("bad peptide start in '{peptide_code}'")))?;
                let sequence = caps[2].to_ascii_uppercase();
                PeptideStatus::from_keyword(&caps[3], self.keywords)?;

                let mut peptide = Peptide::new(self.schema, &sequence, start, start + sequence.len() - 1)?;
                peptide.set_feature(self.schema, names::STATUS, FeatureValue::text(&caps[3]))?;
                peptides.push(peptide);
            }
            protein.set_peptides(peptides)?;
            protein.validate_peptide_sequences()?;
            proteins.push(protein);
        }
        Ok(proteins)
    }
}
