//! The pipeline driver: composes harvest, normalization, generation,
//! execution and archival into one pass over the labeled mailbox.
//!
//! Staged files are the only state between stages, so every per-message and
//! per-attachment failure is logged and isolated; the run keeps going. The
//! store connection is deferred until the sweep phase, and an unreachable
//! store skips the sweep instead of aborting the harvest. Only settings and
//! mail-folder failures abort a full run.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{Duration, Local, NaiveDate};
use log::{debug, info, warn};

use crate::config::Settings;
use crate::execute::{self, StatementExecutor};
use crate::extract;
use crate::mail::MailSource;
use crate::normalize::{self, NormalizeOutcome};
use crate::statement;

/// Messages older than this many days are never harvested again.
pub const HARVEST_WINDOW_DAYS: i64 = 30;

fn harvest_floor(today: NaiveDate) -> NaiveDate {
    today - Duration::days(HARVEST_WINDOW_DAYS)
}

/// Full pass: harvest every recent labeled message, promote its staged
/// attachments, then connect the store and sweep all pending batches.
/// `connect` runs only after the harvest; if it fails, the sweep is
/// skipped and the harvested batches stay pending for a later pass.
pub fn run_pipeline<E, F>(settings: &Settings, source: &dyn MailSource, connect: F) -> Result<()>
where
    E: StatementExecutor,
    F: FnOnce() -> Result<E>,
{
    settings.folders.ensure_exist()?;
    let floor = harvest_floor(Local::now().date_naive());
    let ids = source.list(floor)?;
    info!(
        "Processing {} message(s) under label '{}' since {floor}",
        ids.len(),
        settings.mail.label
    );
    for id in &ids {
        if let Err(err) = process_message(settings, source, id) {
            warn!("Message {id} failed: {err:#}");
        }
    }
    match connect() {
        Ok(mut executor) => sweep(settings, &mut executor)?,
        Err(err) => warn!("Skipping sweep; statement store unavailable: {err:#}"),
    }
    info!("------ DONE -----");
    Ok(())
}

/// Sweep-only pass, for re-driving batches that failed in an earlier run.
pub fn run_sweep(settings: &Settings, executor: &mut dyn StatementExecutor) -> Result<()> {
    settings.folders.ensure_exist()?;
    sweep(settings, executor)?;
    info!("------ DONE -----");
    Ok(())
}

fn sweep(settings: &Settings, executor: &mut dyn StatementExecutor) -> Result<()> {
    let summary = execute::sweep_pending(
        executor,
        &settings.folders.pending,
        &settings.folders.archive,
    )?;
    info!(
        "Applied {} batch(es), {} left pending",
        summary.applied, summary.failed
    );
    Ok(())
}

fn process_message(settings: &Settings, source: &dyn MailSource, id: &str) -> Result<()> {
    let message = source.fetch(id)?;
    let extraction = extract::extract_attachments(&message, &settings.folders.attachments)?;
    let Some(message_date) = extraction.message_date else {
        if !extraction.staged.is_empty() {
            warn!(
                "Message {id} has no usable date; {} staged attachment(s) left unpromoted",
                extraction.staged.len()
            );
        }
        return Ok(());
    };
    for staged in &extraction.staged {
        if let Err(err) = promote_attachment(settings, staged, message_date) {
            warn!("Attachment {staged:?} from message {id} failed: {err:#}");
        }
    }
    Ok(())
}

/// Drives one staged attachment as far as it can go: normalize it, retire
/// the staged copy, and render its statement batch. Work whose batch is
/// already archived is dropped instead of being applied a second time.
fn promote_attachment(settings: &Settings, staged: &Path, message_date: NaiveDate) -> Result<()> {
    let artifact = settings
        .folders
        .normalized
        .join(normalize::artifact_name(staged, message_date));
    let batch_name = statement::batch_name(&artifact);
    if settings.folders.archive.join(&batch_name).exists() {
        info!("Batch {batch_name} already archived; dropping re-delivered {staged:?}");
        fs::remove_file(staged)
            .with_context(|| format!("Removing re-delivered attachment {staged:?}"))?;
        return Ok(());
    }

    match normalize::normalize_attachment(staged, &artifact)? {
        NormalizeOutcome::Unparsable { reason } => {
            warn!("Attachment {staged:?} is unparsable; leaving it staged: {reason}");
            return Ok(());
        }
        NormalizeOutcome::Normalized { rows } => {
            debug!("Normalized {staged:?} ({rows} rows)");
        }
    }
    fs::remove_file(staged).with_context(|| format!("Removing consumed attachment {staged:?}"))?;

    statement::generate_statements(&artifact, &settings.template, &settings.folders.pending)?;
    Ok(())
}
