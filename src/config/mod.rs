use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::rules::AuditSettings;

#[derive(Debug, Clone, Serialize)]
pub struct EffectiveConfig {
    pub ui: UiConfig,
    pub table: TableConfig,
    pub audit: AuditConfig,
    pub batch: BatchConfig,
    pub output: OutputConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_path: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UiConfig {
    pub color: bool,
    pub max_table_rows: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct TableConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditConfig {
    pub total_tolerance: Decimal,
    pub rate_tolerance: Decimal,
    pub extra_cfop: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchConfig {
    pub workers: usize,
    pub exclude: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OutputConfig {
    pub include_context: bool,
    pub results_dir: String,
}

impl Default for EffectiveConfig {
    fn default() -> Self {
        let defaults = AuditSettings::default();
        Self {
            ui: UiConfig {
                color: true,
                max_table_rows: 20,
            },
            table: TableConfig {
                path: None,
                version: None,
            },
            audit: AuditConfig {
                total_tolerance: defaults.total_tolerance,
                rate_tolerance: defaults.rate_tolerance,
                extra_cfop: Vec::new(),
            },
            batch: BatchConfig {
                workers: 4,
                exclude: Vec::new(),
            },
            output: OutputConfig {
                include_context: true,
                results_dir: "~/.local/share/fiscaudit/results".to_string(),
            },
            config_path: None,
        }
    }
}

impl EffectiveConfig {
    pub fn audit_settings(&self) -> AuditSettings {
        AuditSettings {
            total_tolerance: self.audit.total_tolerance,
            rate_tolerance: self.audit.rate_tolerance,
            ..AuditSettings::default()
        }
        .with_extra_cfop(&self.audit.extra_cfop)
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    ui: Option<RawUiConfig>,
    table: Option<RawTableConfig>,
    audit: Option<RawAuditConfig>,
    batch: Option<RawBatchConfig>,
    output: Option<RawOutputConfig>,
}

#[derive(Debug, Deserialize)]
struct RawUiConfig {
    color: Option<bool>,
    max_table_rows: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct RawTableConfig {
    path: Option<String>,
    version: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawAuditConfig {
    total_tolerance: Option<String>,
    rate_tolerance: Option<String>,
    extra_cfop: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct RawBatchConfig {
    workers: Option<usize>,
    exclude: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct RawOutputConfig {
    include_context: Option<bool>,
    results_dir: Option<String>,
}

pub fn default_config_path(home_dir: &Path) -> PathBuf {
    home_dir.join(".config/fiscaudit/config.toml")
}

pub fn load(config_path: Option<&Path>, home_dir: &Path) -> Result<EffectiveConfig> {
    let mut cfg = EffectiveConfig::default();

    let path = config_path
        .map(ToOwned::to_owned)
        .or_else(|| {
            std::env::var_os("FISCAUDIT_CONFIG")
                .filter(|v| !v.is_empty())
                .map(PathBuf::from)
        })
        .unwrap_or_else(|| default_config_path(home_dir));

    if path.exists() {
        let s = std::fs::read_to_string(&path).with_context(|| {
            format!(
                "falha ao ler o arquivo de configuração: {}",
                path.display()
            )
        })?;
        let raw: RawConfig =
            toml::from_str(&s).context("falha ao interpretar o arquivo de configuração (TOML)")?;
        apply_raw_config(&mut cfg, raw)?;
        cfg.config_path = Some(path.display().to_string());
    }

    apply_env_overrides(&mut cfg)?;

    if cfg.batch.workers == 0 {
        anyhow::bail!("batch.workers deve ser maior que zero");
    }

    Ok(cfg)
}

fn apply_raw_config(cfg: &mut EffectiveConfig, raw: RawConfig) -> Result<()> {
    if let Some(ui) = raw.ui {
        if let Some(color) = ui.color {
            cfg.ui.color = color;
        }
        if let Some(max_table_rows) = ui.max_table_rows {
            cfg.ui.max_table_rows = max_table_rows;
        }
    }

    if let Some(table) = raw.table {
        if let Some(path) = non_empty(table.path) {
            cfg.table.path = Some(path);
        }
        if let Some(version) = non_empty(table.version) {
            cfg.table.version = Some(version);
        }
    }

    if let Some(audit) = raw.audit {
        if let Some(v) = audit.total_tolerance {
            cfg.audit.total_tolerance =
                parse_tolerance(&v).context("audit.total_tolerance")?;
        }
        if let Some(v) = audit.rate_tolerance {
            cfg.audit.rate_tolerance = parse_tolerance(&v).context("audit.rate_tolerance")?;
        }
        if let Some(extra_cfop) = audit.extra_cfop {
            cfg.audit.extra_cfop = extra_cfop;
        }
    }

    if let Some(batch) = raw.batch {
        if let Some(workers) = batch.workers {
            cfg.batch.workers = workers;
        }
        if let Some(exclude) = batch.exclude {
            cfg.batch.exclude = exclude;
        }
    }

    if let Some(output) = raw.output {
        if let Some(include_context) = output.include_context {
            cfg.output.include_context = include_context;
        }
        if let Some(results_dir) = non_empty(output.results_dir) {
            cfg.output.results_dir = results_dir;
        }
    }

    Ok(())
}

fn apply_env_overrides(cfg: &mut EffectiveConfig) -> Result<()> {
    if let Ok(v) = std::env::var("FISCAUDIT_UI_COLOR") {
        cfg.ui.color = parse_bool(&v).with_context(|| "FISCAUDIT_UI_COLOR")?;
    }
    if let Ok(v) = std::env::var("FISCAUDIT_UI_MAX_TABLE_ROWS") {
        cfg.ui.max_table_rows = v
            .trim()
            .parse::<usize>()
            .with_context(|| "FISCAUDIT_UI_MAX_TABLE_ROWS")?;
    }
    if let Ok(v) = std::env::var("FISCAUDIT_TABLE_PATH") {
        if let Some(v) = non_empty(Some(v)) {
            cfg.table.path = Some(v);
        }
    }
    if let Ok(v) = std::env::var("FISCAUDIT_TABLE_VERSION") {
        if let Some(v) = non_empty(Some(v)) {
            cfg.table.version = Some(v);
        }
    }
    if let Ok(v) = std::env::var("FISCAUDIT_AUDIT_TOTAL_TOLERANCE") {
        cfg.audit.total_tolerance =
            parse_tolerance(&v).with_context(|| "FISCAUDIT_AUDIT_TOTAL_TOLERANCE")?;
    }
    if let Ok(v) = std::env::var("FISCAUDIT_AUDIT_RATE_TOLERANCE") {
        cfg.audit.rate_tolerance =
            parse_tolerance(&v).with_context(|| "FISCAUDIT_AUDIT_RATE_TOLERANCE")?;
    }
    if let Ok(v) = std::env::var("FISCAUDIT_AUDIT_EXTRA_CFOP") {
        let parts = split_list(&v);
        if !parts.is_empty() {
            cfg.audit.extra_cfop = parts;
        }
    }
    if let Ok(v) = std::env::var("FISCAUDIT_BATCH_WORKERS") {
        cfg.batch.workers = v
            .trim()
            .parse::<usize>()
            .with_context(|| "FISCAUDIT_BATCH_WORKERS")?;
    }
    if let Ok(v) = std::env::var("FISCAUDIT_OUTPUT_INCLUDE_CONTEXT") {
        cfg.output.include_context =
            parse_bool(&v).with_context(|| "FISCAUDIT_OUTPUT_INCLUDE_CONTEXT")?;
    }
    if let Ok(v) = std::env::var("FISCAUDIT_OUTPUT_RESULTS_DIR") {
        if let Some(v) = non_empty(Some(v)) {
            cfg.output.results_dir = v;
        }
    }

    Ok(())
}

fn non_empty(v: Option<String>) -> Option<String> {
    v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

fn split_list(v: &str) -> Vec<String> {
    v.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

fn parse_bool(s: &str) -> Result<bool> {
    let s = s.trim().to_ascii_lowercase();
    match s.as_str() {
        "1" | "true" | "yes" | "on" | "sim" => Ok(true),
        "0" | "false" | "no" | "off" | "nao" | "não" => Ok(false),
        _ => Err(anyhow::anyhow!(
            "valor booleano inválido: {s} (use true|false|1|0|yes|no|on|off)"
        )),
    }
}

/// Tolerances are kept as strings in TOML so they never pass through `f64`.
fn parse_tolerance(s: &str) -> Result<Decimal> {
    let v = crate::normalize::parse_decimal(s)
        .ok_or_else(|| anyhow::anyhow!("tolerância inválida: '{}'", s.trim()))?;
    if v.is_sign_negative() {
        anyhow::bail!("tolerância não pode ser negativa: '{}'", s.trim());
    }
    Ok(v)
}
