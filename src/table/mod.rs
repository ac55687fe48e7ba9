//! Versioned TIPI-equivalent reference table.
//!
//! A [`VersionedTable`] is built once from a [`TableSource`] and never mutated
//! afterwards; [`TableStore`] publishes whole tables atomically.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::core::TableStamp;
use crate::normalize::parse_decimal;

mod store;

pub use store::TableStore;

/// Prefix lengths tried, longest first, after an exact match fails.
pub const PREFIX_LADDER: [usize; 4] = [8, 6, 4, 2];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum OfficialRate {
    Percent(Decimal),
    Exempt,
    NotTaxed,
}

impl OfficialRate {
    pub fn parse(raw: &str) -> Option<Self> {
        let s = raw.trim();
        match s.to_ascii_uppercase().as_str() {
            "NT" => Some(OfficialRate::NotTaxed),
            "EX" | "ISENTO" | "ISENTA" => Some(OfficialRate::Exempt),
            _ => parse_decimal(s).map(OfficialRate::Percent),
        }
    }

    pub fn label(&self) -> String {
        match self {
            OfficialRate::Percent(p) => format!("{}%", p.normalize()),
            OfficialRate::Exempt => "isento".to_string(),
            OfficialRate::NotTaxed => "NT".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceTableEntry {
    pub code: String,
    pub official_rate: OfficialRate,
    pub description: String,
}

#[derive(Debug, Error)]
pub enum TableError {
    #[error("falha ao ler a tabela {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("tabela {origin} inválida: {reason}")]
    Parse { origin: String, reason: String },
    #[error("código de classificação inválido na tabela: '{0}' (esperado 2, 4, 6 ou 8 dígitos)")]
    InvalidCode(String),
    #[error("alíquota inválida para o código {code}: '{rate}'")]
    InvalidRate { code: String, rate: String },
    #[error("código duplicado na tabela: {0}")]
    DuplicateCode(String),
    #[error("a tabela precisa de uma versão")]
    MissingVersion,
    #[error("formato de tabela não reconhecido: {0} (use .json ou .csv)")]
    UnknownSourceFormat(PathBuf),
}

/// Where a table comes from. The refresh job that scrapes the official
/// publication is outside this crate; it only has to hand over one of these.
#[derive(Debug, Clone)]
pub enum TableSource {
    Json(PathBuf),
    Csv {
        path: PathBuf,
        version: String,
    },
    Entries {
        version: String,
        fetched_at: Option<String>,
        entries: Vec<ReferenceTableEntry>,
    },
}

impl TableSource {
    /// Picks the loader by extension. CSV files carry no version of their
    /// own, so one must be given (the file name stem is used otherwise).
    pub fn from_path(path: &Path, version: Option<String>) -> Result<Self, TableError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        match ext.as_deref() {
            Some("json") => Ok(TableSource::Json(path.to_path_buf())),
            Some("csv") => {
                let version = version
                    .or_else(|| {
                        path.file_stem()
                            .and_then(|s| s.to_str())
                            .map(|s| s.to_string())
                    })
                    .ok_or(TableError::MissingVersion)?;
                Ok(TableSource::Csv {
                    path: path.to_path_buf(),
                    version,
                })
            }
            _ => Err(TableError::UnknownSourceFormat(path.to_path_buf())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct VersionedTable {
    version: String,
    fetched_at: Option<String>,
    entries: HashMap<String, ReferenceTableEntry>,
}

impl VersionedTable {
    /// Validates and indexes entries. Codes are stored digits-only.
    pub fn from_entries(
        version: impl Into<String>,
        fetched_at: Option<String>,
        entries: Vec<ReferenceTableEntry>,
    ) -> Result<Self, TableError> {
        let version = version.into().trim().to_string();
        if version.is_empty() {
            return Err(TableError::MissingVersion);
        }

        let mut map = HashMap::with_capacity(entries.len());
        for mut entry in entries {
            let code = crate::normalize::digits_only(&entry.code);
            if !PREFIX_LADDER.contains(&code.len())
                || code.len() != entry.code.chars().filter(|c| *c != '.').count()
            {
                return Err(TableError::InvalidCode(entry.code));
            }
            entry.code = code.clone();
            if map.insert(code.clone(), entry).is_some() {
                return Err(TableError::DuplicateCode(code));
            }
        }

        Ok(Self {
            version,
            fetched_at,
            entries: map,
        })
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn fetched_at(&self) -> Option<&str> {
        self.fetched_at.as_deref()
    }

    pub fn stamp(&self) -> TableStamp {
        TableStamp {
            version: self.version.clone(),
            fetched_at: self.fetched_at.clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, code: &str) -> Option<&ReferenceTableEntry> {
        self.entries.get(code)
    }

    /// Entries ordered by code.
    pub fn sorted_entries(&self) -> Vec<&ReferenceTableEntry> {
        let mut out: Vec<&ReferenceTableEntry> = self.entries.values().collect();
        out.sort_by(|a, b| a.code.cmp(&b.code));
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableMatch<'a> {
    pub entry: &'a ReferenceTableEntry,
    /// False when the entry was reached through a shorter prefix.
    pub exact: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup<'a> {
    Found(TableMatch<'a>),
    NotFound,
}

impl<'a> Lookup<'a> {
    pub fn found(self) -> Option<TableMatch<'a>> {
        match self {
            Lookup::Found(m) => Some(m),
            Lookup::NotFound => None,
        }
    }
}

/// Exact match first, then the longest prefix on [`PREFIX_LADDER`].
/// Depends only on the table contents, so repeated lookups always agree.
pub fn lookup<'a>(table: &'a VersionedTable, code: &str) -> Lookup<'a> {
    let code = crate::normalize::digits_only(code);
    if code.is_empty() {
        return Lookup::NotFound;
    }
    if let Some(entry) = table.get(&code) {
        return Lookup::Found(TableMatch { entry, exact: true });
    }
    for len in PREFIX_LADDER {
        if len >= code.len() {
            continue;
        }
        if let Some(entry) = table.get(&code[..len]) {
            return Lookup::Found(TableMatch {
                entry,
                exact: false,
            });
        }
    }
    Lookup::NotFound
}

#[derive(Debug, Deserialize)]
struct RawTable {
    version: Option<String>,
    fetched_at: Option<String>,
    entries: Vec<RawEntry>,
}

#[derive(Debug, Deserialize)]
struct RawEntry {
    code: String,
    #[serde(default)]
    description: String,
    rate: serde_json::Value,
}

pub fn load(source: &TableSource) -> Result<VersionedTable, TableError> {
    match source {
        TableSource::Json(path) => {
            let s = read_to_string(path)?;
            parse_json(&s, &path.display().to_string())
        }
        TableSource::Csv { path, version } => {
            let s = read_to_string(path)?;
            let fetched_at = modified_at(path);
            parse_csv(&s, version, fetched_at, &path.display().to_string())
        }
        TableSource::Entries {
            version,
            fetched_at,
            entries,
        } => VersionedTable::from_entries(version.clone(), fetched_at.clone(), entries.clone()),
    }
}

fn read_to_string(path: &Path) -> Result<String, TableError> {
    std::fs::read_to_string(path).map_err(|source| TableError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn modified_at(path: &Path) -> Option<String> {
    let modified = std::fs::metadata(path).ok()?.modified().ok()?;
    OffsetDateTime::from(modified).format(&Rfc3339).ok()
}

pub fn parse_json(s: &str, origin: &str) -> Result<VersionedTable, TableError> {
    let raw: RawTable = serde_json::from_str(s).map_err(|e| TableError::Parse {
        origin: origin.to_string(),
        reason: e.to_string(),
    })?;
    let version = raw.version.ok_or(TableError::MissingVersion)?;

    let mut entries = Vec::with_capacity(raw.entries.len());
    for e in raw.entries {
        let rate_text = match &e.rate {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Number(n) => n.to_string(),
            other => other.to_string(),
        };
        let official_rate = OfficialRate::parse(&rate_text).ok_or_else(|| TableError::InvalidRate {
            code: e.code.clone(),
            rate: rate_text.clone(),
        })?;
        entries.push(ReferenceTableEntry {
            code: e.code,
            official_rate,
            description: e.description,
        });
    }
    VersionedTable::from_entries(version, raw.fetched_at, entries)
}

#[derive(Debug, Deserialize)]
struct CsvRow {
    #[serde(alias = "ncm")]
    code: String,
    #[serde(default)]
    description: String,
    rate: String,
}

/// `code;description;rate` with a header line. Fields follow RFC 4180 quoting,
/// so a description containing `;` must be quoted.
pub fn parse_csv(
    s: &str,
    version: &str,
    fetched_at: Option<String>,
    origin: &str,
) -> Result<VersionedTable, TableError> {
    let parse_err = |reason: String| TableError::Parse {
        origin: origin.to_string(),
        reason,
    };

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b';')
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(s.as_bytes());

    let headers = reader
        .headers()
        .map_err(|e| parse_err(e.to_string()))?
        .clone();
    if headers.is_empty() {
        return Err(parse_err("arquivo vazio".to_string()));
    }
    let has = |name: &str| headers.iter().any(|h| h == name);
    if !(has("code") || has("ncm")) || !has("rate") {
        return Err(parse_err(format!(
            "cabeçalho inesperado: {}",
            headers.iter().collect::<Vec<_>>().join(";")
        )));
    }

    let mut entries = Vec::new();
    for row in reader.deserialize::<CsvRow>() {
        let row = row.map_err(|e| parse_err(e.to_string()))?;
        let official_rate = OfficialRate::parse(&row.rate).ok_or_else(|| TableError::InvalidRate {
            code: row.code.clone(),
            rate: row.rate.clone(),
        })?;
        entries.push(ReferenceTableEntry {
            code: row.code,
            official_rate,
            description: row.description,
        });
    }
    VersionedTable::from_entries(version, fetched_at, entries)
}
