//! Utilities module - text processing shared by the memory stores and the pipeline

pub mod text_utils;

pub use text_utils::TextUtils;
