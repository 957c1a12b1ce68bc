//! Report rendering.
//!
//! This module renders the composite analysis report as Markdown or JSON.

pub mod generator;

pub use generator::{generate_json_report, generate_markdown_report};
