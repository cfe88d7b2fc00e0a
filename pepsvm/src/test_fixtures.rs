//! Shared fixtures for unit tests.

use crate::attributes::AttributeSchema;
use crate::data_handling::model_table::StructureModel;
use crate::models::Peptide;

pub const SCHEMA_ROWS: [&str; 21] = [
    "seq_id\tprotein\tFalse\tSequence ID\tstring_attribute\tinput,output",
    "uniprot_id\tprotein\tTrue\tUniprot Accession\tstring_attribute\tinput,output",
    "protein_errors\tprotein\tFalse\tProtein Errors\tstring_attribute\tinput,output",
    "peptide_start\tpeptide\tFalse\tPeptide Start\tstring_attribute\tinput,output",
    "peptide_end\tpeptide\tFalse\tPeptide End\tstring_attribute\tinput,output",
    "peptide_sequence\tpeptide\tFalse\tPeptide Sequence\tpeptide_sequence\tinput,output",
    "status\tpeptide\tTrue\tStatus\tstring_attribute\tinput,output",
    "disorder_calls\tpeptide\tTrue\tDisorder Calls\tcall_string\tinput,output",
    "disorder_scores\tpeptide\tTrue\tDisorder Scores\tscore_list\tinput,output",
    "secondary_calls\tpeptide\tTrue\tSecondary Structure Calls\tcall_string\tinput,output",
    "secondary_scores\tpeptide\tTrue\tSecondary Structure Scores\tscore_list\tinput,output",
    "model_id\tmodel\tTrue\tModel ID\tstring_attribute\tinput,output",
    "no35\tmodel\tTrue\tModel Score\tstring_attribute\tinput,output",
    "coverage\tmodel\tTrue\tModel Coverage\tstring_attribute\tinput,output",
    "model_url\tmodel\tTrue\tModel URL\tstring_attribute\tinput,output",
    "dssp_structure\tpeptide\tTrue\tDSSP Structure\tstructure_calls\tinput,output",
    "dssp_accessibility\tpeptide\tTrue\tDSSP Accessibility\taccessibility_list\tinput,output",
    "peptide_errors\tpeptide\tFalse\tPeptide Errors\tpeptide_errors\tinput,output",
    "svm_score\tpeptide\tTrue\tSVM Score\tstring_attribute\tinput,output",
    "svm_fpr\tpeptide\tTrue\tSVM FPR\tstring_attribute\tinput,output",
    "svm_tpr\tpeptide\tTrue\tSVM TPR\tstring_attribute\tinput,output",
];

pub fn schema_text() -> String {
    SCHEMA_ROWS.join("\n") + "\n"
}

pub fn schema() -> AttributeSchema {
    AttributeSchema::from_rows(SCHEMA_ROWS).unwrap()
}

pub fn peptide(schema: &AttributeSchema, sequence: &str, start: usize) -> Peptide {
    Peptide::new(schema, sequence, start, start + sequence.len() - 1).unwrap()
}

pub fn model(id: &str, seq_id: &str, begin: usize, end: usize, score: &str) -> StructureModel {
    StructureModel::from_attributes([
        ("model_id", id.to_string()),
        ("seq_id", seq_id.to_string()),
        ("run", "runA".to_string()),
        ("target_beg", begin.to_string()),
        ("target_end", end.to_string()),
        ("no35", score.to_string()),
    ])
}
