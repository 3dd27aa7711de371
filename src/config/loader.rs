// src/config/loader.rs

use std::fs;
use std::path::Path;

use crate::config::model::{DagFile, RawDagFile};
use crate::errors::Result;

/// Load a DAG description from a given path and return the raw `RawDagFile`.
///
/// This only performs TOML deserialization; it does **not** perform semantic
/// validation. Use [`load_and_validate`] for that.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawDagFile> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;

    let raw: RawDagFile = toml::from_str(&contents)?;

    Ok(raw)
}

/// Load a DAG description from path and validate it.
///
/// This is the recommended entry point for the rest of the application:
///
/// - Reads TOML.
/// - Applies defaults (handled by `serde` + `Default` impls).
/// - Checks edge endpoints, engine values and the topology itself.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<DagFile> {
    let raw = load_from_path(&path)?;
    let file = DagFile::try_from(raw)?;
    Ok(file)
}
