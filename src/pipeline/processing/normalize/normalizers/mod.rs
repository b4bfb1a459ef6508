// Base trait and utilities for vendor normalizers
pub mod base;

pub mod cmt;
pub mod verifone;

pub use base::{NormalizerUtils, SourceNormalizer};
pub use cmt::CmtNormalizer;
pub use verifone::VerifoneNormalizer;
