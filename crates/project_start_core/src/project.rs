use std::collections::BTreeMap;

use anyhow::{Context, Result, bail};

use crate::config::ProjectColumns;
use crate::tsv::Record;

/// A row from the projects file, with the columns the run cares about pulled out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Project {
    pub number: String,
    pub swedish_name: String,
    pub english_name: String,
    pub area: String,
    pub about_english: String,
    pub super_project: String,
    pub skip: String,
    record: Record,
    columns: ProjectColumns,
}

impl Project {
    pub fn from_record(record: &Record, columns: &ProjectColumns) -> Result<Self> {
        let field = |label: &str| -> Result<String> {
            let header = columns.header(label)?;
            record
                .get(header)
                .map(|value| value.trim().to_string())
                .ok_or_else(|| anyhow::anyhow!("projects file has no column `{header}`"))
        };

        let number = field("project_id")?;
        let swedish_name = field("swedish_name")?;
        let english_name = field("english_name")?;
        if !number.is_empty() && !number.chars().all(|ch| ch.is_ascii_digit()) {
            bail!("project number `{number}` for '{swedish_name}' is not numeric");
        }

        Ok(Self {
            number,
            swedish_name,
            english_name,
            area: field("area")?,
            about_english: field("about_english")?,
            super_project: field("super_project")?,
            skip: field("skip")?,
            record: record.clone(),
            columns: columns.clone(),
        })
    }

    pub fn is_inactive(&self) -> bool {
        !self.skip.is_empty()
    }

    pub fn is_subproject(&self) -> bool {
        !self.super_project.is_empty()
    }

    /// Value for any configured column label, not just the named fields.
    pub fn value(&self, label: &str) -> Result<String> {
        let header = self.columns.header(label)?;
        self.record
            .get(header)
            .map(|value| value.trim().to_string())
            .with_context(|| format!("project '{}' has no column `{header}`", self.swedish_name))
    }
}

pub fn parse_projects(records: &[Record], columns: &ProjectColumns) -> Result<Vec<Project>> {
    records
        .iter()
        .enumerate()
        .map(|(index, record)| {
            // Header is line 1.
            Project::from_record(record, columns)
                .with_context(|| format!("invalid project on line {}", index + 2))
        })
        .collect()
}

/// Swedish and English name for a created project, keyed by number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectName {
    pub number: String,
    pub swedish: String,
    pub english: String,
}

/// Created projects by number; numbers sort in strategy order.
pub type ProjectRegistry = BTreeMap<String, ProjectName>;
