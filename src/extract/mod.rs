// src/extract/mod.rs

pub mod fragment;
pub mod orf;
pub mod orientation;

pub use fragment::{
    extract_fragments, extract_read, ExtractOptions, ExtractionStats, DEFAULT_MERGE_DISTANCE,
};
pub use orf::{call_orfs, OrfSpan, DEFAULT_MIN_ORF_LENGTH};
pub use orientation::{resolve_orientation, Orientation};
