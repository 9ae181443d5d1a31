//! Control-file item source
//!
//! A control file is a newline-delimited JSON object per file to load.
//! Bad lines are collected rather than failing fast, so one report shows
//! the caller everything wrong with the file, capped at the configured
//! number of reported lines.

use thiserror::Error;

use super::BulkLoadSource;
use crate::load::LoadFileSpec;
use crate::storage::{ObjectStore, StorageError};

/// Errors resolving a request's items.
#[derive(Error, Debug)]
pub enum SpecResolveError {
    #[error("Control file {path} has {bad_count} bad line(s):\n{report}")]
    BadLines {
        path: String,
        bad_count: usize,
        report: String,
    },

    #[error("Control file is empty: {0}")]
    Empty(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Resolve a request source into its file specs.
///
/// # Errors
///
/// [`SpecResolveError::BadLines`] when any control-file line fails to
/// parse; the report carries at most `max_bad_lines` line-level messages
/// plus a count of the rest.
pub async fn resolve_specs(
    object_store: &dyn ObjectStore,
    source: &BulkLoadSource,
    max_bad_lines: usize,
) -> Result<Vec<LoadFileSpec>, SpecResolveError> {
    match source {
        BulkLoadSource::Array { files } => Ok(files.clone()),
        BulkLoadSource::ControlFile { path } => {
            let raw = object_store.read(path).await?;
            parse_control_file(path, &raw, max_bad_lines)
        },
    }
}

fn parse_control_file(
    path: &str,
    raw: &[u8],
    max_bad_lines: usize,
) -> Result<Vec<LoadFileSpec>, SpecResolveError> {
    let text = String::from_utf8_lossy(raw);
    let mut specs = Vec::new();
    let mut bad_count = 0usize;
    let mut reports: Vec<String> = Vec::new();

    for (line_no, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<LoadFileSpec>(line) {
            Ok(spec) => specs.push(spec),
            Err(e) => {
                bad_count += 1;
                if reports.len() < max_bad_lines {
                    reports.push(format!("line {}: {}", line_no + 1, e));
                }
            },
        }
    }

    if bad_count > 0 {
        if bad_count > reports.len() {
            reports.push(format!(
                "... and {} more bad line(s) not reported",
                bad_count - reports.len()
            ));
        }
        return Err(SpecResolveError::BadLines {
            path: path.to_string(),
            bad_count,
            report: reports.join("\n"),
        });
    }
    if specs.is_empty() {
        return Err(SpecResolveError::Empty(path.to_string()));
    }
    Ok(specs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_valid_lines() {
        let raw = br#"{"source_path": "s3://ext/a", "target_path": "/a"}
{"source_path": "s3://ext/b", "target_path": "/b", "mime_type": "text/plain"}

"#;
        let specs = parse_control_file("s3://ctl/f.json", raw, 5).unwrap();
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[1].mime_type.as_deref(), Some("text/plain"));
    }

    #[test]
    fn test_bad_lines_collected_and_capped() {
        let raw = b"not json\n{\"source_path\": \"s\", \"target_path\": \"/t\"}\nalso bad\nbad again\n";
        let err = parse_control_file("s3://ctl/f.json", raw, 2).unwrap_err();
        match err {
            SpecResolveError::BadLines {
                bad_count, report, ..
            } => {
                assert_eq!(bad_count, 3);
                // Two reported lines plus the remainder note.
                assert_eq!(report.lines().count(), 3);
                assert!(report.contains("line 1"));
                assert!(report.contains("1 more bad line"));
            },
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_empty_control_file_rejected() {
        let err = parse_control_file("s3://ctl/empty.json", b"\n\n", 5).unwrap_err();
        assert!(matches!(err, SpecResolveError::Empty(_)));
    }
}
