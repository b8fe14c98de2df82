//! Attachment extraction: pulls spreadsheet attachments out of a raw mail
//! message and stages them for normalization.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::NaiveDate;
use log::{debug, info, warn};
use mail_parser::{MessageParser, MimeHeaders};

use crate::mail::RawMessage;
use crate::sheet::is_spreadsheet_name;

/// What one message contributed to the attachment staging folder.
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    /// Calendar date from the message's own Date header, when present and
    /// parseable. Staged attachments without one cannot be promoted.
    pub message_date: Option<NaiveDate>,
    pub staged: Vec<PathBuf>,
}

/// Stages every recognized spreadsheet attachment of `message` into
/// `attachments_dir`, overwriting same-named files from earlier runs. A
/// message the MIME parser cannot make sense of stages nothing; that is a
/// no-op, not an error.
pub fn extract_attachments(message: &RawMessage, attachments_dir: &Path) -> Result<Extraction> {
    fs::create_dir_all(attachments_dir)
        .with_context(|| format!("Creating staging folder {attachments_dir:?}"))?;

    let Some(parsed) = MessageParser::default().parse(&message.bytes) else {
        warn!("Message {} is not parseable as MIME; nothing staged", message.id);
        return Ok(Extraction {
            message_date: None,
            staged: Vec::new(),
        });
    };

    let message_date = parsed.date().and_then(|date| {
        NaiveDate::from_ymd_opt(date.year as i32, date.month as u32, date.day as u32)
    });

    let mut staged = Vec::new();
    for part in parsed.attachments() {
        let Some(name) = part.attachment_name() else {
            debug!("Skipping unnamed attachment in message {}", message.id);
            continue;
        };
        if !is_spreadsheet_name(name) {
            debug!("Skipping non-spreadsheet attachment '{name}' in message {}", message.id);
            continue;
        }
        // Mail-supplied names are untrusted; keep only the final component.
        let Some(file_name) = Path::new(name).file_name() else {
            debug!("Skipping attachment with unusable name '{name}'");
            continue;
        };
        let target = attachments_dir.join(file_name);
        fs::write(&target, part.contents())
            .with_context(|| format!("Staging attachment {target:?}"))?;
        info!("Staged attachment {file_name:?} from message {}", message.id);
        staged.push(target);
    }
    Ok(Extraction {
        message_date,
        staged,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn multipart_message(attachment_name: &str, attachment_body: &str) -> RawMessage {
        let bytes = format!(
            "Date: Wed, 01 May 2024 09:30:00 +0000\r\n\
             From: meters@example.com\r\n\
             To: loader@example.com\r\n\
             Subject: Daily readings\r\n\
             MIME-Version: 1.0\r\n\
             Content-Type: multipart/mixed; boundary=\"b1\"\r\n\
             \r\n\
             --b1\r\n\
             Content-Type: text/plain\r\n\
             \r\n\
             Readings attached.\r\n\
             --b1\r\n\
             Content-Type: text/csv; name=\"{attachment_name}\"\r\n\
             Content-Disposition: attachment; filename=\"{attachment_name}\"\r\n\
             Content-Transfer-Encoding: 8bit\r\n\
             \r\n\
             {attachment_body}\r\n\
             --b1--\r\n"
        )
        .into_bytes();
        RawMessage {
            id: "msg-1".to_string(),
            bytes,
        }
    }

    #[test]
    fn stages_spreadsheet_attachment_with_message_date() {
        let dir = tempfile::tempdir().unwrap();
        let message = multipart_message("daily.csv", "Date,Energy Usage(kWh)\r\n2024-05-01 00:00,12.5");

        let extraction = extract_attachments(&message, dir.path()).unwrap();
        assert_eq!(
            extraction.message_date,
            Some(NaiveDate::from_ymd_opt(2024, 5, 1).unwrap())
        );
        assert_eq!(extraction.staged, vec![dir.path().join("daily.csv")]);
        let staged = fs::read_to_string(dir.path().join("daily.csv")).unwrap();
        assert!(staged.starts_with("Date,Energy Usage(kWh)"));
    }

    #[test]
    fn ignores_non_spreadsheet_attachments() {
        let dir = tempfile::tempdir().unwrap();
        let message = multipart_message("notes.txt", "remember the meter");

        let extraction = extract_attachments(&message, dir.path()).unwrap();
        assert_eq!(
            extraction.message_date,
            Some(NaiveDate::from_ymd_opt(2024, 5, 1).unwrap())
        );
        assert!(extraction.staged.is_empty());
        assert!(!dir.path().join("notes.txt").exists());
    }

    #[test]
    fn strips_directory_components_from_attachment_names() {
        let dir = tempfile::tempdir().unwrap();
        let message = multipart_message("../escape.csv", "Date,Power(W)\r\n2024-05-01 00:00,240");

        let extraction = extract_attachments(&message, dir.path()).unwrap();
        assert_eq!(extraction.staged, vec![dir.path().join("escape.csv")]);
        assert!(dir.path().join("escape.csv").is_file());
    }

    #[test]
    fn garbage_message_stages_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let message = RawMessage {
            id: "garbage".to_string(),
            bytes: vec![0, 159, 146, 150],
        };

        let extraction = extract_attachments(&message, dir.path()).unwrap();
        assert_eq!(extraction.message_date, None);
        assert!(extraction.staged.is_empty());
    }

    #[test]
    fn overwrites_previously_staged_attachment() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("daily.csv"), "stale contents").unwrap();
        let message = multipart_message("daily.csv", "Date,Energy Usage(kWh)\r\n2024-05-01 00:00,12.5");

        extract_attachments(&message, dir.path()).unwrap();
        let staged = fs::read_to_string(dir.path().join("daily.csv")).unwrap();
        assert!(staged.starts_with("Date,Energy Usage(kWh)"));
    }
}
