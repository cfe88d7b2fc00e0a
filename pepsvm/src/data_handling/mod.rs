pub mod annotation_file;
pub mod model_table;
pub mod peptide_import;
