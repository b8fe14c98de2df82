//! Statement generation: renders one insertion statement per normalized row
//! from an operator-supplied template and stages the batch for execution.
//!
//! The template is a plain text file with five named placeholders:
//! `{table_name}`, `{sourcefile}`, `{ts}`, `{value_column}` and `{value}`.
//! Doubled braces escape to literals. A template that references anything
//! else, omits one of the five, or leaves a brace unbalanced is rejected
//! when loaded. The file is re-read on every generation call so a template
//! edit between batches takes effect without restarting anything.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use itertools::Itertools;
use log::{info, warn};
use thiserror::Error;

use crate::data::{ENERGY_FIELD, POWER_FIELD};

#[derive(Debug, Error, PartialEq)]
pub enum TemplateError {
    #[error("Unknown placeholder '{{{0}}}' in statement template")]
    UnknownPlaceholder(String),
    #[error("Statement template never references '{{{0}}}'")]
    MissingPlaceholder(&'static str),
    #[error("Unterminated '{{' in statement template")]
    UnterminatedBrace,
    #[error("Unmatched '}}' in statement template")]
    UnmatchedBrace,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Placeholder {
    TableName,
    SourceFile,
    Ts,
    ValueColumn,
    Value,
}

const PLACEHOLDERS: &[(&str, Placeholder)] = &[
    ("table_name", Placeholder::TableName),
    ("sourcefile", Placeholder::SourceFile),
    ("ts", Placeholder::Ts),
    ("value_column", Placeholder::ValueColumn),
    ("value", Placeholder::Value),
];

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Literal(String),
    Field(Placeholder),
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatementTemplate {
    segments: Vec<Segment>,
}

/// Everything a single statement interpolates.
#[derive(Debug, Clone, Copy)]
pub struct RowBinding<'a> {
    pub table_name: &'a str,
    pub sourcefile: &'a str,
    pub ts: &'a str,
    pub value_column: &'a str,
    pub value: &'a str,
}

impl StatementTemplate {
    pub fn parse(text: &str) -> Result<Self, TemplateError> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = text.chars().peekable();
        while let Some(ch) = chars.next() {
            match ch {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    literal.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    literal.push('}');
                }
                '{' => {
                    let mut name = String::new();
                    loop {
                        match chars.next() {
                            Some('}') => break,
                            Some(inner) => name.push(inner),
                            None => return Err(TemplateError::UnterminatedBrace),
                        }
                    }
                    let field = PLACEHOLDERS
                        .iter()
                        .find(|(known, _)| *known == name)
                        .map(|(_, field)| *field)
                        .ok_or(TemplateError::UnknownPlaceholder(name))?;
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Field(field));
                }
                '}' => return Err(TemplateError::UnmatchedBrace),
                other => literal.push(other),
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }
        for (name, field) in PLACEHOLDERS {
            if !segments.contains(&Segment::Field(*field)) {
                return Err(TemplateError::MissingPlaceholder(name));
            }
        }
        Ok(Self { segments })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Opening statement template {path:?}"))?;
        let template = Self::parse(text.trim_end())
            .with_context(|| format!("Loading statement template {path:?}"))?;
        Ok(template)
    }

    pub fn render(&self, binding: &RowBinding<'_>) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Field(Placeholder::TableName) => out.push_str(binding.table_name),
                Segment::Field(Placeholder::SourceFile) => out.push_str(binding.sourcefile),
                Segment::Field(Placeholder::Ts) => out.push_str(binding.ts),
                Segment::Field(Placeholder::ValueColumn) => out.push_str(binding.value_column),
                Segment::Field(Placeholder::Value) => out.push_str(binding.value),
            }
        }
        out
    }
}

/// Relation a normalized table loads into, derived from its column shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelationTarget {
    pub table_name: &'static str,
    pub value_column: &'static str,
}

pub const ENERGY_TARGET: RelationTarget = RelationTarget {
    table_name: "extractor.energyday",
    value_column: "kwh",
};

pub const POWER_TARGET: RelationTarget = RelationTarget {
    table_name: "extractor.powerday",
    value_column: "watts",
};

pub fn classify(headers: &[String]) -> Option<RelationTarget> {
    if headers.iter().any(|header| header == ENERGY_FIELD) {
        Some(ENERGY_TARGET)
    } else if headers.iter().any(|header| header == POWER_FIELD) {
        Some(POWER_TARGET)
    } else {
        None
    }
}

/// Name of the statement batch generated from a normalized artifact.
pub fn batch_name(artifact: &Path) -> String {
    let stem = artifact
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("batch");
    format!("{stem}.sql")
}

#[derive(Debug, Clone, PartialEq)]
pub enum GenerateOutcome {
    Generated { batch: PathBuf, statements: usize },
    /// No known measurement column: the artifact is preserved for
    /// inspection and no batch is produced.
    UnknownStructure,
}

/// Renders one statement per row of `artifact` into a batch file under
/// `pending_dir`, deleting the artifact once the batch is complete. A
/// failure partway through leaves the partial batch in place alongside the
/// artifact; the next run overwrites it.
pub fn generate_statements(
    artifact: &Path,
    template_path: &Path,
    pending_dir: &Path,
) -> Result<GenerateOutcome> {
    let template = StatementTemplate::load(template_path)?;

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(false)
        .from_path(artifact)
        .with_context(|| format!("Opening normalized artifact {artifact:?}"))?;
    let mut records = reader.records();
    let headers: Vec<String> = records
        .next()
        .ok_or_else(|| anyhow!("Normalized artifact {artifact:?} is empty"))?
        .with_context(|| format!("Reading header row of {artifact:?}"))?
        .iter()
        .map(str::to_string)
        .collect();

    let Some(target) = classify(&headers) else {
        warn!(
            "Unknown column structure [{}] in {artifact:?}; no statements generated",
            headers.iter().join(", ")
        );
        return Ok(GenerateOutcome::UnknownStructure);
    };
    if headers.len() < 2 {
        return Err(anyhow!(
            "Normalized artifact {artifact:?} has no measurement column to bind"
        ));
    }

    let sourcefile = artifact
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| anyhow!("Normalized artifact {artifact:?} has no usable file name"))?
        .to_string();

    let batch = pending_dir.join(batch_name(artifact));
    let file =
        File::create(&batch).with_context(|| format!("Creating statement batch {batch:?}"))?;
    let mut writer = BufWriter::new(file);
    let mut statements = 0usize;
    for record in records {
        let record = record.with_context(|| format!("Reading data row of {artifact:?}"))?;
        let binding = RowBinding {
            table_name: target.table_name,
            sourcefile: &sourcefile,
            ts: record.get(0).unwrap_or_default(),
            value_column: target.value_column,
            value: record.get(1).unwrap_or_default(),
        };
        writeln!(writer, "{}", template.render(&binding))
            .with_context(|| format!("Writing statement batch {batch:?}"))?;
        statements += 1;
    }
    writer
        .flush()
        .with_context(|| format!("Flushing statement batch {batch:?}"))?;

    fs::remove_file(artifact)
        .with_context(|| format!("Removing consumed artifact {artifact:?}"))?;
    info!("Generated {batch:?} ({statements} statements) for {}", target.table_name);
    Ok(GenerateOutcome::Generated { batch, statements })
}
