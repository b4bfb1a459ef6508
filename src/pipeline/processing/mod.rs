// Pipeline processing: parsing, normalization, merging, validation,
// anonymization and fuzzing

pub mod parser;
pub mod normalize;
pub mod merge;
pub mod validate;
pub mod anonymize;
pub mod fuzz;
