use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;

use flate2::read::GzDecoder;
use tracing::{debug, info, warn};

use crate::attributes::{names, AttributeSchema};
use crate::config::{ModelConfig, ModelLayout};
use crate::data_handling::model_table::StructureModel;
use crate::errors::{FeatureError, PipelineError, ProcessingError, Result};
use crate::features::{FeatureValue, StructureCall};
use crate::helper_functions::three_letter_dir;
use crate::models::{Peptide, Protein};

/// Maximal solvent accessibility per residue type (Sander & Rost).
fn max_accessibility(residue: char) -> Option<f64> {
    let value = match residue {
        'A' => 106.0,
        'R' => 248.0,
        'N' => 157.0,
        'D' => 163.0,
        'C' => 135.0,
        'Q' => 198.0,
        'E' => 194.0,
        'G' => 84.0,
        'H' => 184.0,
        'I' => 169.0,
        'L' => 164.0,
        'K' => 205.0,
        'M' => 188.0,
        'F' => 197.0,
        'P' => 136.0,
        'S' => 130.0,
        'T' => 142.0,
        'W' => 227.0,
        'Y' => 222.0,
        'V' => 142.0,
        _ => return None,
    };
    Some(value)
}

#[derive(Debug, Clone, PartialEq)]
pub struct DsspResidue {
    pub amino_acid: char,
    pub structure: char,
    pub accessibility: f64,
}

impl DsspResidue {
    pub fn relative_accessibility(&self) -> Option<f64> {
        max_accessibility(self.amino_acid).map(|max| self.accessibility / max)
    }
}

/// Residues of one model, keyed by author residue number.
#[derive(Debug, Clone, Default)]
pub struct DsspResult {
    residues: BTreeMap<usize, DsspResidue>,
}

impl DsspResult {
    /// Parses classic DSSP output. Chain breaks are skipped and lowercase
    /// residue codes (bridged cysteines) read as `C`.
    pub fn parse(text: &str) -> std::result::Result<Self, String> {
        let mut lines = text.lines();
        if !lines.by_ref().any(|line| line.starts_with("  #  RESIDUE")) {
            return Err("no residue table in DSSP output".to_string());
        }

        let mut residues = BTreeMap::new();
        for line in lines {
            let chars: Vec<char> = line.chars().collect();
            if chars.len() < 38 {
                continue;
            }
            let amino_acid = chars[13];
            if amino_acid == '!' {
                continue;
            }
            let number: String = chars[5..10].iter().collect();
            let number: usize = number
                .trim()
                .parse()
                .map_err(|_| format!("bad residue number in DSSP line '{line}'"))?;
            let accessibility: String = chars[34..38].iter().collect();
            let accessibility: f64 = accessibility
                .trim()
                .parse()
                .map_err(|_| format!("bad accessibility in DSSP line '{line}'"))?;
            let amino_acid = if amino_acid.is_ascii_lowercase() { 'C' } else { amino_acid };

            residues
                .entry(number)
                .or_insert(DsspResidue { amino_acid, structure: chars[16], accessibility });
        }
        Ok(DsspResult { residues })
    }

    pub fn residue(&self, number: usize) -> Option<&DsspResidue> {
        self.residues.get(&number)
    }

    pub fn len(&self) -> usize {
        self.residues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.residues.is_empty()
    }
}

/// Computes per-residue structure and accessibility for a model file.
pub trait StructureEngine {
    fn analyze(&self, model_file: &Path) -> std::result::Result<DsspResult, String>;
}

impl<E: StructureEngine + ?Sized> StructureEngine for &E {
    fn analyze(&self, model_file: &Path) -> std::result::Result<DsspResult, String> {
        (**self).analyze(model_file)
    }
}

/// Runs a DSSP executable and parses its stdout.
pub struct DsspExecutable {
    command: Vec<String>,
}

impl DsspExecutable {
    pub fn from_command(command: &[String]) -> Result<Self> {
        let program = command
            .first()
            .ok_or_else(|| PipelineError::Config("DSSP command is empty".into()))?;
        which::which(program)
            .map_err(|e| PipelineError::Config(format!("DSSP executable '{program}' not found: {e}")))?;
        Ok(DsspExecutable { command: command.to_vec() })
    }
}

impl StructureEngine for DsspExecutable {
    fn analyze(&self, model_file: &Path) -> std::result::Result<DsspResult, String> {
        let (program, args) = self.command.split_first().ok_or("DSSP command is empty")?;
        let mut cmd = Command::new(program);
        cmd.args(args).arg(model_file);
        debug!("About to spawn: {:?}", cmd);
        let output = cmd.output().map_err(|e| format!("could not run {program}: {e}"))?;
        if !output.status.success() {
            return Err(format!(
                "{program} exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }
        DsspResult::parse(&String::from_utf8_lossy(&output.stdout))
    }
}

/// Locates model files in the configured source runs and stages
/// decompressed copies under the run's structure directory.
pub struct ModelFileHandler<'a> {
    structure_dir: PathBuf,
    config: &'a ModelConfig,
}

impl<'a> ModelFileHandler<'a> {
    pub fn new(structure_dir: PathBuf, config: &'a ModelConfig) -> Self {
        ModelFileHandler { structure_dir, config }
    }

    pub fn local_file(&self, model_id: &str) -> PathBuf {
        self.structure_dir.join(format!("{model_id}.pdb"))
    }

    fn layout_path(base: &Path, layout: ModelLayout, model: &StructureModel) -> Result<PathBuf> {
        let file_name = format!("{}.pdb.gz", model.id()?);
        Ok(match layout {
            ModelLayout::Current => {
                let sequence_id = model.sequence_id()?;
                three_letter_dir(base, sequence_id).join(sequence_id).join("models").join(file_name)
            }
            ModelLayout::Legacy => base.join(file_name),
        })
    }

    /// Source locations in search order: configured layout first.
    pub fn source_candidates(&self, model: &StructureModel) -> Result<Vec<PathBuf>> {
        let run = model.run_name()?;
        let source = self
            .config
            .runs
            .get(run)
            .ok_or_else(|| PipelineError::Config(format!("no source configured for model run '{run}'")))?;
        let other = match source.layout {
            ModelLayout::Current => ModelLayout::Legacy,
            ModelLayout::Legacy => ModelLayout::Current,
        };
        Ok(vec![
            Self::layout_path(&source.path, source.layout, model)?,
            Self::layout_path(&source.path, other, model)?,
        ])
    }

    /// Path of a local, uncompressed copy of the model.
    pub fn model_file(&self, model: &StructureModel) -> std::result::Result<PathBuf, ProcessingError> {
        let model_id = model.id()?;
        let local = self.local_file(model_id);
        if local.exists() {
            return Ok(local);
        }
        let candidates = self.source_candidates(model)?;
        let Some(source) = candidates.iter().find(|c| c.exists()) else {
            let searched = candidates.iter().map(|c| c.display().to_string()).collect::<Vec<_>>().join(", ");
            return Err(FeatureError::NoSourceModel { model_id: model_id.to_string(), searched }.into());
        };

        fs::create_dir_all(&self.structure_dir).map_err(|e| PipelineError::file(&self.structure_dir, e))?;
        let partial = self.structure_dir.join(format!("{model_id}.pdb.part"));
        let input = File::open(source).map_err(|e| PipelineError::file(source, e))?;
        let mut output = File::create(&partial).map_err(|e| PipelineError::file(&partial, e))?;
        if let Err(e) = io::copy(&mut GzDecoder::new(input), &mut output) {
            let _ = fs::remove_file(&partial);
            return Err(FeatureError::StructureEngine {
                model_id: model_id.to_string(),
                message: format!("could not decompress {}: {e}", source.display()),
            }
            .into());
        }
        fs::rename(&partial, &local).map_err(|e| PipelineError::file(&local, e))?;
        debug!("Staged model {} from {}", model_id, source.display());
        Ok(local)
    }
}

/// Structure calls and relative accessibility of the peptide's residues.
pub fn map_peptide(
    peptide: &Peptide,
    model_id: &str,
    dssp: &DsspResult,
) -> std::result::Result<(Vec<StructureCall>, Vec<f64>), FeatureError> {
    let engine_error = |message: String| FeatureError::StructureEngine { model_id: model_id.to_string(), message };
    let mut calls = Vec::with_capacity(peptide.len());
    let mut accessibility = Vec::with_capacity(peptide.len());
    for (offset, expected) in peptide.sequence.chars().enumerate() {
        let position = peptide.start + offset + 1;
        let residue = dssp
            .residue(position)
            .ok_or_else(|| engine_error(format!("no residue {position} in model")))?;
        if residue.amino_acid != expected {
            return Err(FeatureError::StructureMismatch {
                model_id: model_id.to_string(),
                position,
                residue: residue.amino_acid,
                expected,
            });
        }
        let call = StructureCall::from_dssp_code(residue.structure)
            .ok_or_else(|| engine_error(format!("unknown structure code '{}' at {position}", residue.structure)))?;
        let relative = residue
            .relative_accessibility()
            .ok_or_else(|| engine_error(format!("no maximal accessibility for '{}'", residue.amino_acid)))?;
        calls.push(call);
        accessibility.push(relative);
    }
    Ok((calls, accessibility))
}

pub struct StructureFeatureProcessor<'a, E: StructureEngine> {
    pub files: ModelFileHandler<'a>,
    pub engine: E,
}

impl<E: StructureEngine> StructureFeatureProcessor<'_, E> {
    fn analyze_model(&self, model: &StructureModel) -> std::result::Result<DsspResult, ProcessingError> {
        let model_id = model.id()?;
        let file = self.files.model_file(model)?;
        let result = self
            .engine
            .analyze(&file)
            .map_err(|message| FeatureError::StructureEngine { model_id: model_id.to_string(), message })?;
        if result.is_empty() {
            return Err(FeatureError::StructureEngine {
                model_id: model_id.to_string(),
                message: "no residues returned".into(),
            }
            .into());
        }
        Ok(result)
    }

    /// Sets structure and accessibility on every peptide of the protein.
    /// Peptides without a best model get both features uninitialized.
    pub fn add_structure_features(&self, protein: &mut Protein, schema: &AttributeSchema) -> Result<()> {
        if protein.has_errors() {
            return Ok(());
        }
        let mut analyzed: HashMap<String, std::result::Result<DsspResult, FeatureError>> = HashMap::new();
        let sequence_id = protein.sequence_id.clone();

        for peptide in protein.peptides_mut() {
            let Some(model) = peptide.best_model.clone() else {
                peptide.set_feature(schema, names::DSSP_STRUCTURE, FeatureValue::Structure(None))?;
                peptide.set_feature(schema, names::DSSP_ACCESSIBILITY, FeatureValue::Accessibility(None))?;
                continue;
            };
            let model_id = model.id()?.to_string();
            if !analyzed.contains_key(&model_id) {
                let outcome = match self.analyze_model(&model) {
                    Ok(result) => {
                        info!("Model {} of {}: {} residues", model_id, sequence_id, result.len());
                        Ok(result)
                    }
                    Err(ProcessingError::Feature(err)) => {
                        warn!("Model {} of {}: {}", model_id, sequence_id, err);
                        Err(err)
                    }
                    Err(ProcessingError::Fatal(err)) => return Err(err),
                };
                analyzed.insert(model_id.clone(), outcome);
            }

            let mapped = match analyzed.get(&model_id) {
                Some(Ok(dssp)) => map_peptide(peptide, &model_id, dssp),
                Some(Err(err)) => Err(err.clone()),
                None => Err(FeatureError::StructureEngine { model_id: model_id.clone(), message: "not analyzed".into() }),
            };
            match mapped {
                Ok((structure, accessibility)) => {
                    peptide.set_feature(schema, names::DSSP_STRUCTURE, FeatureValue::Structure(Some(structure)))?;
                    peptide.set_feature(
                        schema,
                        names::DSSP_ACCESSIBILITY,
                        FeatureValue::Accessibility(Some(accessibility)),
                    )?;
                }
                Err(err) => peptide.record_error(schema, &err)?,
            }
        }
        Ok(())
    }
}
