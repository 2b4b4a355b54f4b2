use std::path::Path;

use config::{Config, File, FileFormat};
use serde::Deserialize;
use tracing::info;

use super::kind::{RawReport, ReportTarget};
use crate::error::{PanelError, Result};
use crate::strategy::{RawTable, TableStrategy};

const BUILTIN_CATALOG: &str = include_str!("../../catalog.toml");

#[derive(Debug, Deserialize)]
struct RawCatalog {
    #[serde(default)]
    report: Vec<RawReport>,
    #[serde(default)]
    table: Vec<RawTable>,
}

/// Report targets with their filters plus per-table builder strategies.
///
/// Loaded once at startup and read-only afterwards.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    reports: Vec<ReportTarget>,
    tables: Vec<(String, TableStrategy)>,
}

impl Catalog {
    /// The catalog shipped with the crate.
    pub fn builtin() -> Result<Self> {
        Self::from_toml_str(BUILTIN_CATALOG)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let raw: RawCatalog = Config::builder()
            .add_source(File::from_str(text, FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        Self::from_raw(raw)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw: RawCatalog = Config::builder()
            .add_source(File::from(path.as_ref()).format(FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        let catalog = Self::from_raw(raw)?;
        info!(
            "Loaded catalog from {} ({} reports, {} table strategies)",
            path.as_ref().display(),
            catalog.reports.len(),
            catalog.tables.len()
        );
        Ok(catalog)
    }

    /// `path` when configured, the built-in catalog otherwise.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => Self::builtin(),
        }
    }

    fn from_raw(raw: RawCatalog) -> Result<Self> {
        let mut reports: Vec<ReportTarget> = Vec::with_capacity(raw.report.len());
        for raw_report in &raw.report {
            let report = raw_report.parse()?;
            if reports.iter().any(|r| r.name == report.name) {
                return Err(PanelError::configuration(report.name, "duplicate report target"));
            }
            reports.push(report);
        }

        let mut tables: Vec<(String, TableStrategy)> = Vec::with_capacity(raw.table.len());
        for raw_table in &raw.table {
            if tables.iter().any(|(name, _)| *name == raw_table.name) {
                return Err(PanelError::configuration(
                    raw_table.name.clone(),
                    "duplicate table strategy",
                ));
            }
            tables.push((raw_table.name.clone(), raw_table.parse()?));
        }

        Ok(Self { reports, tables })
    }

    /// The named target, or a configuration error when it is not declared.
    pub fn report(&self, name: &str) -> Result<&ReportTarget> {
        self.reports
            .iter()
            .find(|r| r.name == name)
            .ok_or_else(|| PanelError::configuration(name, "no such report target"))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.reports.iter().any(|r| r.name == name)
    }

    pub fn reports(&self) -> &[ReportTarget] {
        &self.reports
    }

    pub fn table_strategies(&self) -> &[(String, TableStrategy)] {
        &self.tables
    }
}
