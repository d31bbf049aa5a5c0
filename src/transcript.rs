//! Transcript ingestion.
//!
//! Turns a plain-text conversation transcript into [`Metadata`] records, one per
//! non-empty line. Each line is normalized, then classified into a role and a
//! content string:
//!
//! - `role|content` splits on the first `|`
//! - `user:`, `assistant:`, `human:` and `ai:` prefixes (any case) split on the first `:`
//! - anything else is `unknown` with the whole line as content
//!
//! Lines that normalize to nothing are skipped but still consume a line number,
//! so `sequence_id` always points at the original 1-based line. `\n`, `\r\n` and
//! a lone `\r` all end a line.

use std::fmt;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{IndexError, Result};
use crate::index::Metadata;

const ROLE_PREFIXES: [&str; 4] = ["user:", "assistant:", "human:", "ai:"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    Unknown,
}

impl Role {
    /// Map a classified role label onto the stored role.
    /// Labels other than `user` and `assistant` are `Unknown`.
    pub fn from_label(label: &str) -> Self {
        match label {
            "user" => Role::User,
            "assistant" => Role::Assistant,
            _ => Role::Unknown,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
            Role::Unknown => write!(f, "unknown"),
        }
    }
}

/// Per-role line counts gathered during ingestion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestStats {
    pub user: usize,
    pub assistant: usize,
    pub unknown: usize,
    pub empty: usize,
}

impl IngestStats {
    fn record(&mut self, role: Role) {
        match role {
            Role::User => self.user += 1,
            Role::Assistant => self.assistant += 1,
            Role::Unknown => self.unknown += 1,
        }
    }

    /// Number of lines that produced a record.
    pub fn records(&self) -> usize {
        self.user + self.assistant + self.unknown
    }
}

#[derive(Debug, Clone)]
pub struct ParsedTranscript {
    pub records: Vec<Metadata>,
    pub stats: IngestStats,
}

/// Trim, turn line breaks into spaces and collapse runs of spaces.
pub fn normalize_line(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut last_space = false;

    for c in line.trim().chars() {
        let c = if c == '\n' || c == '\r' { ' ' } else { c };
        if c == ' ' {
            if last_space {
                continue;
            }
            last_space = true;
        } else {
            last_space = false;
        }
        out.push(c);
    }

    out.trim().to_string()
}

/// Split a normalized line into a lower-cased role label and its content.
/// Returns `None` for a line that is empty after normalization.
pub fn classify_line(line: &str) -> Option<(String, String)> {
    let line = normalize_line(line);
    if line.is_empty() {
        return None;
    }

    if let Some((role, content)) = line.split_once('|') {
        return Some((role.trim().to_lowercase(), content.trim().to_string()));
    }

    let lowered = line.to_lowercase();
    if ROLE_PREFIXES.iter().any(|p| lowered.starts_with(p)) {
        let (role, content) = line.split_once(':').unwrap_or((line.as_str(), ""));
        return Some((role.trim().to_lowercase(), content.trim().to_string()));
    }

    Some(("unknown".to_string(), line))
}

/// Parse a whole transcript, stamping every record with the same creation time.
pub fn parse_transcript(text: &str) -> ParsedTranscript {
    parse_transcript_at(text, Utc::now())
}

pub fn parse_transcript_at(text: &str, created_at: DateTime<Utc>) -> ParsedTranscript {
    let mut records = Vec::new();
    let mut stats = IngestStats::default();

    for (i, line) in split_lines(text).enumerate() {
        let (label, content) = match classify_line(line) {
            Some(pair) => pair,
            None => {
                stats.empty += 1;
                continue;
            }
        };

        // "user:" with nothing after it carries no content
        if content.is_empty() {
            stats.empty += 1;
            continue;
        }

        let role = Role::from_label(&label);
        stats.record(role);

        records.push(Metadata {
            length: content.chars().count(),
            text: content,
            sequence_id: (i + 1) as u64,
            role,
            created_at,
        });
    }

    ParsedTranscript { records, stats }
}

fn split_lines(text: &str) -> impl Iterator<Item = &str> {
    let mut rest = text;
    std::iter::from_fn(move || {
        if rest.is_empty() {
            return None;
        }
        let (line, tail) = match rest.find(['\n', '\r']) {
            Some(i) if rest[i..].starts_with("\r\n") => (&rest[..i], &rest[i + 2..]),
            Some(i) => (&rest[..i], &rest[i + 1..]),
            None => (rest, ""),
        };
        rest = tail;
        Some(line)
    })
}

/// Read and parse a transcript file.
pub fn read_transcript(path: &Path) -> Result<ParsedTranscript> {
    let text = std::fs::read_to_string(path).map_err(|source| IndexError::SourceUnavailable {
        path: path.to_path_buf(),
        source,
    })?;

    let parsed = parse_transcript(&text);
    tracing::info!(
        path = %path.display(),
        records = parsed.records.len(),
        empty = parsed.stats.empty,
        "parsed transcript"
    );
    Ok(parsed)
}
