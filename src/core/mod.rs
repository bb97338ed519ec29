//! Core duplicate-detection pipeline

pub mod dedup;
pub mod hash;
pub mod matcher;
pub mod video;
