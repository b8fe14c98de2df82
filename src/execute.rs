//! Batch execution and archival.
//!
//! Every `.sql` file staged in the pending folder is applied through a
//! `StatementExecutor` inside its own transaction, then moved to the
//! archive. A batch that fails stays pending for the next sweep and the
//! sweep keeps going; at-least-once retry happens at file granularity.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use log::{info, warn};
use postgres::NoTls;

use crate::config::DatabaseSettings;

pub trait StatementExecutor {
    /// Applies the whole batch text as a unit: every statement commits or
    /// none do.
    fn apply_batch(&mut self, sql: &str) -> Result<()>;
}

/// Production executor over one synchronous PostgreSQL connection, reused
/// across the whole sweep.
pub struct PgExecutor {
    client: postgres::Client,
}

impl PgExecutor {
    pub fn connect(db: &DatabaseSettings) -> Result<Self> {
        let mut config = postgres::Config::new();
        config
            .host(&db.host)
            .port(db.port)
            .dbname(&db.dbname)
            .user(&db.user)
            .password(&db.password);
        let client = config.connect(NoTls).with_context(|| {
            format!(
                "Connecting to database '{}' at {}:{}",
                db.dbname, db.host, db.port
            )
        })?;
        Ok(Self { client })
    }
}

impl StatementExecutor for PgExecutor {
    fn apply_batch(&mut self, sql: &str) -> Result<()> {
        let mut transaction = self
            .client
            .transaction()
            .context("Opening batch transaction")?;
        transaction
            .batch_execute(sql)
            .context("Applying statement batch")?;
        transaction.commit().context("Committing statement batch")?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepSummary {
    pub applied: usize,
    pub failed: usize,
}

/// Applies every pending batch in file-name order. Apply failures are
/// logged and skipped; a batch that applied but cannot be archived aborts
/// the sweep, since leaving it pending would re-apply it next run.
pub fn sweep_pending(
    executor: &mut dyn StatementExecutor,
    pending_dir: &Path,
    archive_dir: &Path,
) -> Result<SweepSummary> {
    let mut summary = SweepSummary::default();
    for batch in pending_batches(pending_dir)? {
        let sql = match fs::read_to_string(&batch) {
            Ok(sql) => sql,
            Err(err) => {
                warn!("Batch {batch:?} is unreadable; leaving pending: {err}");
                summary.failed += 1;
                continue;
            }
        };
        match executor.apply_batch(&sql) {
            Ok(()) => {
                let archived = move_to_archive(&batch, archive_dir)?;
                info!("Applied {batch:?} and archived as {archived:?}");
                summary.applied += 1;
            }
            Err(err) => {
                warn!("Batch {batch:?} failed; leaving pending: {err:#}");
                summary.failed += 1;
            }
        }
    }
    Ok(summary)
}

fn pending_batches(pending_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut batches = Vec::new();
    for entry in
        fs::read_dir(pending_dir).with_context(|| format!("Reading pending folder {pending_dir:?}"))?
    {
        let entry = entry.with_context(|| format!("Reading pending folder {pending_dir:?}"))?;
        let path = entry.path();
        if path.is_file()
            && path
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("sql"))
        {
            batches.push(path);
        }
    }
    batches.sort();
    Ok(batches)
}

/// Rename into the archive, falling back to copy+delete when the archive
/// sits on a different filesystem.
fn move_to_archive(batch: &Path, archive_dir: &Path) -> Result<PathBuf> {
    let name = batch
        .file_name()
        .ok_or_else(|| anyhow!("Batch path {batch:?} has no file name"))?;
    let target = archive_dir.join(name);
    if fs::rename(batch, &target).is_err() {
        fs::copy(batch, &target)
            .with_context(|| format!("Copying {batch:?} into archive {archive_dir:?}"))?;
        fs::remove_file(batch)
            .with_context(|| format!("Removing archived batch {batch:?} from pending"))?;
    }
    Ok(target)
}
