//! Shared utility functions for labforge.

pub mod json_extraction;

pub use json_extraction::{find_matching_brace, try_extract_json_from_response, JsonExtractionResult};
