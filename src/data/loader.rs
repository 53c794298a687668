// ============================================================
// Layer 4 — Delimited Dialogue Loader
// ============================================================
// Reads a CSV or TSV file of (source, target) rows into
// DialoguePairs using the csv crate.
//
// File layout:
//   source<TAB>target          ← header row, always skipped
//   hello there<TAB>hi back
//   ...
//
// Every row must carry exactly two fields. What happens to a
// row that doesn't is decided by MalformedRowPolicy:
//   Abort → the whole load fails with DataFormat
//   Skip  → a warning is logged and the row is dropped

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::domain::dialogue_pair::DialoguePair;
use crate::domain::error::{FinetuneError, FinetuneResult};
use crate::domain::traits::PairSource;

/// Number of fields every data row must contain.
pub const EXPECTED_FIELDS: usize = 2;

/// What to do with a row that has the wrong number of fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MalformedRowPolicy {
    #[default]
    Abort,
    Skip,
}

/// Parse a delimiter given on the command line.
/// Accepts `tab`, `comma`, `\t` or any single ASCII character.
pub fn parse_delimiter(s: &str) -> Result<u8, String> {
    match s {
        "tab" | "\\t" | "\t" => Ok(b'\t'),
        "comma" | ","        => Ok(b','),
        other => {
            let bytes = other.as_bytes();
            if bytes.len() == 1 && bytes[0].is_ascii() {
                Ok(bytes[0])
            } else {
                Err(format!("delimiter must be a single ASCII character, got '{other}'"))
            }
        }
    }
}

/// Loads dialogue pairs from one delimited file.
pub struct DelimitedLoader {
    path:      PathBuf,
    delimiter: u8,
    policy:    MalformedRowPolicy,
}

impl DelimitedLoader {
    pub fn new(path: impl AsRef<Path>, delimiter: u8, policy: MalformedRowPolicy) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            delimiter,
            policy,
        }
    }

    /// Apply the malformed-row policy to one rejected row.
    fn reject(&self, err: FinetuneError, skipped: &mut usize) -> FinetuneResult<()> {
        match self.policy {
            MalformedRowPolicy::Abort => Err(err),
            MalformedRowPolicy::Skip  => {
                tracing::warn!("Skipping malformed row in '{}': {}", self.path.display(), err);
                *skipped += 1;
                Ok(())
            }
        }
    }
}

impl PairSource for DelimitedLoader {
    fn load_all(&self) -> FinetuneResult<Vec<DialoguePair>> {
        // flexible(true) hands us rows of any width so the field
        // count check below can apply the configured policy.
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(self.delimiter)
            .has_headers(true)
            .flexible(true)
            .from_path(&self.path)
            .map_err(|e| csv_error(&self.path, e))?;

        let mut pairs   = Vec::new();
        let mut skipped = 0usize;

        for result in reader.records() {
            let record = match result {
                Ok(record) => record,
                Err(e) if e.is_io_error() => return Err(csv_error(&self.path, e)),
                Err(e) => {
                    let line = e.position().map(|p| p.line()).unwrap_or(0);
                    self.reject(
                        FinetuneError::Decode { line, reason: e.to_string() },
                        &mut skipped,
                    )?;
                    continue;
                }
            };

            if record.len() != EXPECTED_FIELDS {
                let line = record.position().map(|p| p.line()).unwrap_or(0);
                self.reject(
                    FinetuneError::DataFormat {
                        line,
                        expected: EXPECTED_FIELDS,
                        found:    record.len(),
                    },
                    &mut skipped,
                )?;
                continue;
            }

            pairs.push(DialoguePair::new(&record[0], &record[1]));
        }

        tracing::info!(
            "Loaded {} dialogue pairs from '{}' ({} skipped)",
            pairs.len(),
            self.path.display(),
            skipped,
        );
        Ok(pairs)
    }
}

fn csv_error(path: &Path, e: csv::Error) -> FinetuneError {
    let line = e.position().map(|p| p.line()).unwrap_or(0);
    match e.into_kind() {
        csv::ErrorKind::Io(io) => FinetuneError::io(path, io),
        other => FinetuneError::Decode { line, reason: format!("{other:?}") },
    }
}
