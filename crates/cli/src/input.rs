//! JSON-lines event input.
//!
//! One [`NormalizedEvent`] per line. Blank lines and lines starting with `#`
//! are skipped; malformed lines are logged, counted and skipped.

use std::path::Path;

use anyhow::{Context, Result};
use signalscan_core::NormalizedEvent;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};

/// Parses one input line.
///
/// # Errors
/// Returns an error if the line is not a valid event.
pub fn parse_event_line(line: &str) -> Result<Option<NormalizedEvent>> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Ok(None);
    }
    let event = serde_json::from_str(trimmed).context("Malformed event line")?;
    Ok(Some(event))
}

pub struct EventSource {
    lines: Lines<Box<dyn AsyncBufRead + Unpin + Send>>,
    line_no: u64,
    malformed: u64,
}

impl EventSource {
    /// Opens a file, or stdin when `path` is `None` or `-`.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened.
    pub async fn open(path: Option<&Path>) -> Result<Self> {
        let reader: Box<dyn AsyncBufRead + Unpin + Send> = match path {
            Some(p) if p != Path::new("-") => {
                let file = tokio::fs::File::open(p)
                    .await
                    .with_context(|| format!("Failed to open event file {}", p.display()))?;
                Box::new(BufReader::new(file))
            }
            _ => Box::new(BufReader::new(tokio::io::stdin())),
        };
        Ok(Self {
            lines: reader.lines(),
            line_no: 0,
            malformed: 0,
        })
    }

    /// Next well-formed event, or `None` at end of input.
    ///
    /// # Errors
    /// Returns an error only if reading from the underlying source fails.
    pub async fn next_event(&mut self) -> Result<Option<NormalizedEvent>> {
        while let Some(line) = self.lines.next_line().await? {
            self.line_no += 1;
            match parse_event_line(&line) {
                Ok(Some(event)) => return Ok(Some(event)),
                Ok(None) => {}
                Err(e) => {
                    self.malformed += 1;
                    tracing::warn!(line = self.line_no, "Skipping event: {:#}", e);
                }
            }
        }
        Ok(None)
    }

    #[must_use]
    pub const fn malformed(&self) -> u64 {
        self.malformed
    }
}
