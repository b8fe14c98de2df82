//! Mail access for the harvest stage.
//!
//! `MailSource` is the seam the pipeline driver consumes: list message ids
//! newer than a date floor, then fetch raw bytes per id. `MaildirSource` is
//! the production implementation, reading a label folder laid out as a
//! maildir (`<root>/<label>/{cur,new}`). Delivery-in-progress files under
//! `tmp` are never touched. Listing only scans the `Date:` header line; full
//! MIME parsing happens downstream in the extractor.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, NaiveDate};
use log::{debug, warn};

/// A fetched message, still in wire form.
#[derive(Debug, Clone, PartialEq)]
pub struct RawMessage {
    pub id: String,
    pub bytes: Vec<u8>,
}

pub trait MailSource {
    /// Ids of messages sent on or after `floor`, sorted oldest delivery
    /// first. Messages without a parseable `Date:` header cannot satisfy a
    /// date-floor query and are excluded.
    fn list(&self, floor: NaiveDate) -> Result<Vec<String>>;

    /// Reads one listed message in full.
    fn fetch(&self, id: &str) -> Result<RawMessage>;
}

pub struct MaildirSource {
    folder: PathBuf,
}

impl MaildirSource {
    pub fn new(root: &Path, label: &str) -> Self {
        Self {
            folder: root.join(label),
        }
    }
}

impl MailSource for MaildirSource {
    fn list(&self, floor: NaiveDate) -> Result<Vec<String>> {
        if !self.folder.is_dir() {
            return Err(anyhow!("Mail label folder {:?} not found", self.folder));
        }
        let mut ids = Vec::new();
        for subdir in ["cur", "new"] {
            let dir = self.folder.join(subdir);
            if !dir.is_dir() {
                continue;
            }
            for path in folder_files(&dir)? {
                let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                    continue;
                };
                if name.starts_with('.') {
                    continue;
                }
                let raw = match fs::read(&path) {
                    Ok(raw) => raw,
                    Err(err) => {
                        warn!("Skipping unreadable message {path:?}: {err}");
                        continue;
                    }
                };
                match scan_date_header(&raw) {
                    Some(sent) if sent >= floor => ids.push(name.to_string()),
                    Some(sent) => debug!("Skipping {name}: sent {sent} before floor {floor}"),
                    None => debug!("Skipping {name}: no parseable Date header"),
                }
            }
        }
        // Maildir file names begin with a delivery timestamp, so name order
        // is arrival order.
        ids.sort();
        Ok(ids)
    }

    fn fetch(&self, id: &str) -> Result<RawMessage> {
        for subdir in ["cur", "new"] {
            let path = self.folder.join(subdir).join(id);
            if path.is_file() {
                let bytes =
                    fs::read(&path).with_context(|| format!("Reading message {path:?}"))?;
                return Ok(RawMessage {
                    id: id.to_string(),
                    bytes,
                });
            }
        }
        Err(anyhow!("Message {id} not found under {:?}", self.folder))
    }
}

fn folder_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("Reading mail folder {dir:?}"))? {
        let entry = entry.with_context(|| format!("Reading mail folder {dir:?}"))?;
        if entry.path().is_file() {
            paths.push(entry.path());
        }
    }
    Ok(paths)
}

/// Scans the raw header block for the RFC 2822 `Date:` value, tolerating
/// trailing zone commentary like `(UTC)` and the obsolete `-0000` zone. The
/// calendar date is taken as written in the header, unshifted.
fn scan_date_header(raw: &[u8]) -> Option<NaiveDate> {
    let text = String::from_utf8_lossy(raw);
    for line in text.lines() {
        if line.is_empty() {
            break;
        }
        let Some(value) = line.strip_prefix("Date:") else {
            continue;
        };
        let mut value = value.trim().to_string();
        if let Some(open) = value.rfind('(')
            && value.ends_with(')')
        {
            value.truncate(open);
            value = value.trim_end().to_string();
        }
        if let Some(stripped) = value.strip_suffix("-0000") {
            value = format!("{stripped}+0000");
        }
        if let Ok(parsed) = DateTime::parse_from_rfc2822(&value) {
            return Some(parsed.date_naive());
        }
    }
    None
}
