// src/history/reader.rs

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use tracing::{debug, warn};

use crate::errors::{DagError, Result};
use crate::ids::DagId;

use super::record::TransitionRecord;

/// Read the records of one DAG from a JSON-lines history file.
///
/// With `dag: None` the DAG of the first record is used. Records of other
/// DAGs are skipped with a warning; blank lines are ignored; a malformed
/// line is an error.
pub fn read_history(path: impl AsRef<Path>, dag: Option<DagId>) -> Result<Vec<TransitionRecord>> {
    let path = path.as_ref();
    let file = File::open(path)?;
    debug!(path = %path.display(), "reading history");
    parse_history(BufReader::new(file), dag)
}

pub fn parse_history(reader: impl BufRead, dag: Option<DagId>) -> Result<Vec<TransitionRecord>> {
    let mut wanted = dag;
    let mut records = Vec::new();
    let mut skipped = 0usize;

    for (lineno, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record: TransitionRecord = serde_json::from_str(&line).map_err(|e| {
            DagError::Config(format!("history line {}: {e}", lineno + 1))
        })?;

        let target = *wanted.get_or_insert(record.dag);
        if record.dag != target {
            skipped += 1;
            continue;
        }
        records.push(record);
    }

    if skipped > 0 {
        warn!(skipped, "history contains records of other DAGs; ignoring them");
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};

    fn line(dag: DagId, to: &str) -> String {
        let rec = TransitionRecord::new(
            dag.into(),
            None,
            to,
            DateTime::<Utc>::UNIX_EPOCH,
            "init",
        );
        serde_json::to_string(&rec).unwrap()
    }

    #[test]
    fn keeps_only_the_first_dag() {
        let a = DagId::new(1, 1);
        let b = DagId::new(1, 2);
        let input = format!(
            "{}\n\n{}\n{}\n",
            line(a, "NEW"),
            line(b, "NEW"),
            line(a, "INITED")
        );

        let records = parse_history(input.as_bytes(), None).unwrap();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.dag == a));
    }

    #[test]
    fn malformed_line_is_an_error() {
        let err = parse_history("{not json}\n".as_bytes(), None).unwrap_err();
        assert!(err.to_string().contains("history line 1"));
    }
}
