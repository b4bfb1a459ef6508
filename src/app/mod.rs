pub mod ports;
pub mod normalize_use_case;
pub mod validate_use_case;
pub mod anonymize_use_case;
pub mod fuzz_use_case;
pub mod upload_use_case;
pub mod run_use_case;
