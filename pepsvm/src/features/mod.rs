pub mod svm_encoder;

use crate::attributes::FeatureClass;
use crate::errors::{PipelineError, Result, PEPTIDE_ERROR_PREFIX};
use crate::helper_functions::format_float_list;

use self::svm_encoder::SvmFeatureEncoder;

/// Residue order of the one-hot sequence encoding.
pub const STANDARD_RESIDUES: [char; 20] = [
    'A', 'C', 'D', 'E', 'F', 'G', 'H', 'I', 'K', 'L', 'M', 'N', 'P', 'Q', 'R', 'S', 'T', 'V', 'W', 'Y',
];

const NO_ERRORS: &str = "none";

/// Three-state secondary structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StructureCall {
    Helix,
    Strand,
    Loop,
}

impl StructureCall {
    /// Collapses a DSSP structure code.
    pub fn from_dssp_code(code: char) -> Option<Self> {
        match code {
            'H' | 'G' | 'I' => Some(StructureCall::Helix),
            'B' | 'E' => Some(StructureCall::Strand),
            'T' | 'S' | 'P' | '-' | ' ' => Some(StructureCall::Loop),
            _ => None,
        }
    }

    pub fn from_char(c: char) -> Option<Self> {
        match c {
            'A' => Some(StructureCall::Helix),
            'B' => Some(StructureCall::Strand),
            'L' => Some(StructureCall::Loop),
            _ => None,
        }
    }

    pub fn as_char(&self) -> char {
        match self {
            StructureCall::Helix => 'A',
            StructureCall::Strand => 'B',
            StructureCall::Loop => 'L',
        }
    }

    pub fn svm_value(&self) -> u8 {
        match self {
            StructureCall::Helix => 2,
            StructureCall::Strand => 3,
            StructureCall::Loop => 1,
        }
    }
}

/// Numeric code for a predictor call character.
fn call_svm_value(call: char) -> Result<u8> {
    match call {
        'A' => Ok(2),
        'B' => Ok(3),
        'L' => Ok(1),
        'D' => Ok(1),
        'O' => Ok(0),
        other => Err(PipelineError::Input(format!("no SVM encoding for call '{other}'"))),
    }
}

/// One measurement attached to a peptide.
///
/// `None` payloads are the uninitialized state. An `ErrorMarker` replaces
/// the nominal value when the computation producing it failed.
#[derive(Debug, Clone, PartialEq)]
pub enum FeatureValue {
    Text(Option<String>),
    Sequence(Option<Vec<char>>),
    Calls(Option<Vec<char>>),
    Scores(Option<Vec<f64>>),
    Structure(Option<Vec<StructureCall>>),
    Accessibility(Option<Vec<f64>>),
    Errors(Vec<String>),
    ErrorMarker(String),
}

impl FeatureValue {
    pub fn empty(class: FeatureClass) -> Self {
        match class {
            FeatureClass::StringAttribute => FeatureValue::Text(None),
            FeatureClass::PeptideSequence => FeatureValue::Sequence(None),
            FeatureClass::CallString => FeatureValue::Calls(None),
            FeatureClass::ScoreList => FeatureValue::Scores(None),
            FeatureClass::StructureCalls => FeatureValue::Structure(None),
            FeatureClass::AccessibilityList => FeatureValue::Accessibility(None),
            FeatureClass::PeptideErrors => FeatureValue::Errors(Vec::new()),
        }
    }

    pub fn text(value: impl ToString) -> Self {
        FeatureValue::Text(Some(value.to_string()))
    }

    /// Parses a value read from an annotation file.
    pub fn from_file_value(class: FeatureClass, raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if class == FeatureClass::PeptideErrors {
            if raw.is_empty() || raw == NO_ERRORS {
                return Ok(FeatureValue::Errors(Vec::new()));
            }
            return Ok(FeatureValue::Errors(raw.split(';').map(|c| c.trim().to_string()).collect()));
        }
        if raw.starts_with(PEPTIDE_ERROR_PREFIX) {
            return Ok(FeatureValue::ErrorMarker(raw.to_string()));
        }
        if raw.is_empty() {
            return Ok(FeatureValue::empty(class));
        }

        let value = match class {
            FeatureClass::StringAttribute => FeatureValue::Text(Some(raw.to_string())),
            FeatureClass::PeptideSequence => FeatureValue::Sequence(Some(raw.chars().collect())),
            FeatureClass::CallString => FeatureValue::Calls(Some(raw.chars().collect())),
            FeatureClass::ScoreList => FeatureValue::Scores(Some(parse_float_list(raw)?)),
            FeatureClass::AccessibilityList => FeatureValue::Accessibility(Some(parse_float_list(raw)?)),
            FeatureClass::StructureCalls => {
                let calls = raw
                    .chars()
                    .map(|c| {
                        StructureCall::from_char(c)
                            .ok_or_else(|| PipelineError::Input(format!("unknown structure call '{c}' in '{raw}'")))
                    })
                    .collect::<Result<Vec<_>>>()?;
                FeatureValue::Structure(Some(calls))
            }
            FeatureClass::PeptideErrors => unreachable!("handled above"),
        };
        Ok(value)
    }

    /// Text rendering for output files; empty when uninitialized.
    pub fn value_string(&self) -> String {
        match self {
            FeatureValue::Text(v) => v.clone().unwrap_or_default(),
            FeatureValue::Sequence(v) | FeatureValue::Calls(v) => {
                v.as_ref().map(|chars| chars.iter().collect()).unwrap_or_default()
            }
            FeatureValue::Scores(v) | FeatureValue::Accessibility(v) => {
                v.as_deref().map(format_float_list).unwrap_or_default()
            }
            FeatureValue::Structure(v) => {
                v.as_ref().map(|calls| calls.iter().map(StructureCall::as_char).collect()).unwrap_or_default()
            }
            FeatureValue::Errors(codes) if codes.is_empty() => NO_ERRORS.to_string(),
            FeatureValue::Errors(codes) => codes.join("; "),
            FeatureValue::ErrorMarker(code) => code.clone(),
        }
    }

    pub fn is_initialized(&self) -> bool {
        match self {
            FeatureValue::Text(v) => v.is_some(),
            FeatureValue::Sequence(v) | FeatureValue::Calls(v) => v.is_some(),
            FeatureValue::Scores(v) | FeatureValue::Accessibility(v) => v.is_some(),
            FeatureValue::Structure(v) => v.is_some(),
            FeatureValue::Errors(_) | FeatureValue::ErrorMarker(_) => true,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, FeatureValue::ErrorMarker(_))
    }

    /// Number of residues held by a populated per-residue feature.
    pub fn residue_count(&self) -> Option<usize> {
        match self {
            FeatureValue::Sequence(Some(v)) | FeatureValue::Calls(Some(v)) => Some(v.len()),
            FeatureValue::Scores(Some(v)) | FeatureValue::Accessibility(Some(v)) => Some(v.len()),
            FeatureValue::Structure(Some(v)) => Some(v.len()),
            _ => None,
        }
    }

    /// SVM slots this feature consumes: width per position times the
    /// number of positions it holds.
    pub fn feature_length(&self) -> usize {
        match self {
            FeatureValue::Sequence(Some(v)) => 20 * v.len(),
            FeatureValue::Text(Some(_)) => 1,
            _ => self.residue_count().unwrap_or(0),
        }
    }

    /// Emits `index:value` pairs, advancing the encoder by exactly
    /// `feature_length()` slots.
    pub fn make_svm_feature(&self, encoder: &mut SvmFeatureEncoder) -> Result<Vec<String>> {
        let mut pairs = Vec::new();
        match self {
            FeatureValue::Text(Some(value)) => {
                let number: f64 = value.trim().parse().map_err(|_| {
                    PipelineError::Input(format!("string feature value '{value}' is not numeric"))
                })?;
                pairs.push(encoder.emit(number));
            }
            FeatureValue::Sequence(Some(residues)) => {
                for residue in residues {
                    let hot = STANDARD_RESIDUES
                        .iter()
                        .position(|r| r == residue)
                        .ok_or_else(|| PipelineError::Input(format!("nonstandard residue '{residue}' in peptide")))?;
                    for i in 0..STANDARD_RESIDUES.len() {
                        let value = if i == hot { 1.0 } else { 0.0 };
                        pairs.push(encoder.emit(value));
                    }
                }
            }
            FeatureValue::Calls(Some(calls)) => {
                for call in calls {
                    pairs.push(encoder.emit(f64::from(call_svm_value(*call)?)));
                }
            }
            FeatureValue::Scores(Some(values)) | FeatureValue::Accessibility(Some(values)) => {
                for value in values {
                    pairs.push(encoder.emit(*value));
                }
            }
            FeatureValue::Structure(Some(calls)) => {
                for call in calls {
                    pairs.push(encoder.emit(f64::from(call.svm_value())));
                }
            }
            FeatureValue::Errors(_) => {
                return Err(PipelineError::Schema("peptide error lists cannot be encoded for the SVM".into()))
            }
            _ => {
                return Err(PipelineError::Internal(
                    "uninitialized or error feature passed to the SVM encoder".into(),
                ))
            }
        }
        Ok(pairs)
    }
}

fn parse_float_list(raw: &str) -> Result<Vec<f64>> {
    raw.split(',')
        .map(|v| {
            v.trim()
                .parse::<f64>()
                .map_err(|_| PipelineError::Input(format!("could not parse '{v}' in score list '{raw}'")))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disorder_boundary_rendering() {
        let calls = FeatureValue::Calls(Some(vec!['O']));
        let scores = FeatureValue::Scores(Some(vec![0.01]));
        assert_eq!(calls.value_string(), "O");
        assert_eq!(scores.value_string(), "0.01");
    }

    #[test]
    fn uninitialized_renders_empty() {
        for class in [
            FeatureClass::StringAttribute,
            FeatureClass::PeptideSequence,
            FeatureClass::CallString,
            FeatureClass::ScoreList,
            FeatureClass::StructureCalls,
            FeatureClass::AccessibilityList,
        ] {
            let value = FeatureValue::empty(class);
            assert!(!value.is_initialized());
            assert_eq!(value.value_string(), "");
            assert_eq!(FeatureValue::from_file_value(class, "").unwrap(), value);
        }
        assert_eq!(FeatureValue::empty(FeatureClass::PeptideErrors).value_string(), "none");
    }

    #[test]
    fn file_values_parse_by_class() {
        assert_eq!(
            FeatureValue::from_file_value(FeatureClass::ScoreList, "0.5, 0.25").unwrap(),
            FeatureValue::Scores(Some(vec![0.5, 0.25]))
        );
        assert_eq!(
            FeatureValue::from_file_value(FeatureClass::StructureCalls, "ABL").unwrap(),
            FeatureValue::Structure(Some(vec![StructureCall::Helix, StructureCall::Strand, StructureCall::Loop]))
        );
        assert_eq!(
            FeatureValue::from_file_value(FeatureClass::PeptideErrors, "peptide_error_a; peptide_error_b").unwrap(),
            FeatureValue::Errors(vec!["peptide_error_a".into(), "peptide_error_b".into()])
        );
        assert!(FeatureValue::from_file_value(FeatureClass::ScoreList, "0.5, abc").is_err());
        assert!(FeatureValue::from_file_value(FeatureClass::StructureCalls, "AXL").is_err());
    }

    #[test]
    fn error_codes_route_to_marker() {
        let value =
            FeatureValue::from_file_value(FeatureClass::ScoreList, "peptide_error_disorder_bad_line").unwrap();
        assert!(value.is_error());
        assert_eq!(value.value_string(), "peptide_error_disorder_bad_line");
    }

    #[test]
    fn dssp_codes_collapse_to_three_states() {
        assert_eq!(StructureCall::from_dssp_code('G'), Some(StructureCall::Helix));
        assert_eq!(StructureCall::from_dssp_code('E'), Some(StructureCall::Strand));
        assert_eq!(StructureCall::from_dssp_code('-'), Some(StructureCall::Loop));
        assert_eq!(StructureCall::from_dssp_code('Z'), None);
        assert_eq!(StructureCall::Strand.svm_value(), 3);
    }

    #[test]
    fn one_hot_sequence_consumes_twenty_slots_per_residue() {
        let mut encoder = SvmFeatureEncoder::new(2);
        let pairs = FeatureValue::Sequence(Some(vec!['C', 'A'])).make_svm_feature(&mut encoder).unwrap();
        assert_eq!(pairs.len(), 40);
        assert_eq!(pairs[1], "2:1");
        assert_eq!(pairs[0], "1:0");
        assert_eq!(pairs[20], "21:1");
        assert_eq!(encoder.feature_number(), 41);
    }

    #[test]
    fn nonstandard_residue_is_fatal() {
        let mut encoder = SvmFeatureEncoder::new(2);
        assert!(FeatureValue::Sequence(Some(vec!['X'])).make_svm_feature(&mut encoder).is_err());
    }
}
