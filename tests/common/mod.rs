#![allow(dead_code)]

use std::cell::RefCell;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use anyhow::{Result, anyhow};
use chrono::NaiveDate;
use tempfile::{TempDir, tempdir};

use mailmeter::config::{DatabaseSettings, FolderSettings, MailSettings, Settings};
use mailmeter::execute::StatementExecutor;
use mailmeter::mail::{MailSource, RawMessage};

/// Statement template used across the integration tests.
pub const TEMPLATE: &str = "INSERT INTO {table_name} (sourcefile, readingdate, {value_column}) \
                            VALUES ('{sourcefile}', '{ts}', {value});";

/// A mail date whose weekday is correct for RFC 2822 parsing.
pub const EML_DATE: &str = "Wed, 01 May 2024 09:30:00 +0000";

/// Returns the absolute path to a fixture under `tests/data`.
pub fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("data")
        .join(name)
}

/// Scratch pipeline deployment: staging folders, a statement template, and
/// a maildir root, all cleaned up on drop.
pub struct TestWorkspace {
    temp_dir: TempDir,
}

impl TestWorkspace {
    pub fn new() -> Self {
        let workspace = Self {
            temp_dir: tempdir().expect("temp dir"),
        };
        workspace
            .settings()
            .folders
            .ensure_exist()
            .expect("staging folders");
        workspace.write("insert.sql.tmpl", TEMPLATE);
        workspace
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Settings rooted in this workspace. The database section is inert;
    /// tests inject their own executor.
    pub fn settings(&self) -> Settings {
        Settings {
            database: DatabaseSettings {
                host: "localhost".to_string(),
                port: 5432,
                dbname: "metering".to_string(),
                user: "extractor".to_string(),
                password: "secret".to_string(),
            },
            folders: FolderSettings {
                attachments: self.path().join("attachments"),
                normalized: self.path().join("normalized"),
                pending: self.path().join("pending"),
                archive: self.path().join("archive"),
            },
            mail: MailSettings {
                root: self.path().join("mail"),
                label: "Extractor".to_string(),
            },
            template: self.path().join("insert.sql.tmpl"),
        }
    }

    /// Writes `contents` into a file under the workspace and returns the path.
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        let mut file = File::create(&path).expect("create temp file");
        file.write_all(contents.as_bytes())
            .expect("write temp file contents");
        path
    }

    /// Delivers a raw message into the workspace maildir under the label.
    pub fn deliver(&self, subdir: &str, name: &str, raw: &[u8]) -> PathBuf {
        let dir = self.path().join("mail").join("Extractor").join(subdir);
        fs::create_dir_all(&dir).expect("maildir subdir");
        let path = dir.join(name);
        fs::write(&path, raw).expect("deliver message");
        path
    }

    /// Sorted file names currently staged in one of the pipeline folders.
    pub fn staged(&self, folder: &str) -> Vec<String> {
        let dir = self.path().join(folder);
        let mut names: Vec<String> = fs::read_dir(&dir)
            .unwrap_or_else(|err| panic!("reading {dir:?}: {err}"))
            .map(|entry| entry.expect("dir entry").file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }
}

/// Builds a multipart message carrying one named attachment.
pub fn eml_with_attachment(date_header: &str, name: &str, body: &str) -> Vec<u8> {
    eml_with_attachments(date_header, &[(name, body)])
}

/// Builds a multipart message carrying several named attachments.
pub fn eml_with_attachments(date_header: &str, attachments: &[(&str, &str)]) -> Vec<u8> {
    let mut message = format!(
        "Date: {date_header}\r\n\
         From: meters@example.com\r\n\
         To: loader@example.com\r\n\
         Subject: Daily readings\r\n\
         MIME-Version: 1.0\r\n\
         Content-Type: multipart/mixed; boundary=\"b1\"\r\n\
         \r\n\
         --b1\r\n\
         Content-Type: text/plain\r\n\
         \r\n\
         Readings attached.\r\n"
    );
    for (name, body) in attachments {
        message.push_str(&format!(
            "--b1\r\n\
             Content-Type: application/octet-stream; name=\"{name}\"\r\n\
             Content-Disposition: attachment; filename=\"{name}\"\r\n\
             Content-Transfer-Encoding: 8bit\r\n\
             \r\n\
             {body}\r\n"
        ));
    }
    message.push_str("--b1--\r\n");
    message.into_bytes()
}

/// Builds a plain message with no attachments at all.
pub fn eml_plain(date_header: &str) -> Vec<u8> {
    format!(
        "Date: {date_header}\r\n\
         From: meters@example.com\r\n\
         To: loader@example.com\r\n\
         Subject: Nothing attached\r\n\
         \r\n\
         Just checking in.\r\n"
    )
    .into_bytes()
}

/// In-memory mail source; `sent` drives the date-floor filter.
#[derive(Default)]
pub struct FakeMailSource {
    messages: Vec<(NaiveDate, RawMessage)>,
}

impl FakeMailSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, sent: NaiveDate, id: &str, bytes: Vec<u8>) {
        self.messages.push((
            sent,
            RawMessage {
                id: id.to_string(),
                bytes,
            },
        ));
    }
}

impl MailSource for FakeMailSource {
    fn list(&self, floor: NaiveDate) -> Result<Vec<String>> {
        Ok(self
            .messages
            .iter()
            .filter(|(sent, _)| *sent >= floor)
            .map(|(_, message)| message.id.clone())
            .collect())
    }

    fn fetch(&self, id: &str) -> Result<RawMessage> {
        self.messages
            .iter()
            .find(|(_, message)| message.id == id)
            .map(|(_, message)| message.clone())
            .ok_or_else(|| anyhow!("No message with id {id}"))
    }
}

/// Records every applied batch; batches containing `fail_marker` are
/// rejected instead, as a stand-in for a mid-batch database failure.
/// Clones share one recording, so a test can hand a clone to the pipeline
/// and keep the original for its assertions.
#[derive(Default, Clone)]
pub struct RecordingExecutor {
    applied: Rc<RefCell<Vec<String>>>,
    fail_marker: Option<String>,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_on(marker: &str) -> Self {
        Self {
            fail_marker: Some(marker.to_string()),
            ..Self::default()
        }
    }

    pub fn applied(&self) -> Vec<String> {
        self.applied.borrow().clone()
    }
}

impl StatementExecutor for RecordingExecutor {
    fn apply_batch(&mut self, sql: &str) -> Result<()> {
        if let Some(marker) = &self.fail_marker
            && sql.contains(marker.as_str())
        {
            return Err(anyhow!("injected batch failure"));
        }
        self.applied.borrow_mut().push(sql.to_string());
        Ok(())
    }
}
