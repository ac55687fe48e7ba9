//! Aggregates findings into the [`AuditResult`] handed to every downstream
//! consumer, and renders it for people.

use std::collections::BTreeMap;

use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::core::{AuditResult, AuditSummary, DocumentType, Finding, Severity, TableStamp};

pub const SCHEMA_VERSION: &str = "1.0";

pub fn build(
    document_id: &str,
    document_type: DocumentType,
    findings: Vec<Finding>,
    table: TableStamp,
) -> AuditResult {
    let generated_at = OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "unknown".to_string());
    build_at(document_id, document_type, findings, table, generated_at)
}

/// Same as [`build`] with a caller-supplied timestamp, for reproducible output.
pub fn build_at(
    document_id: &str,
    document_type: DocumentType,
    findings: Vec<Finding>,
    table: TableStamp,
    generated_at: String,
) -> AuditResult {
    AuditResult {
        schema_version: SCHEMA_VERSION.to_string(),
        tool_version: env!("CARGO_PKG_VERSION").to_string(),
        document_id: document_id.to_string(),
        document_type,
        generated_at,
        table,
        overall_severity: overall_severity(&findings),
        summary: summarize(&findings),
        findings,
    }
}

pub fn overall_severity(findings: &[Finding]) -> Option<Severity> {
    findings.iter().map(|f| f.severity).max()
}

pub fn summarize(findings: &[Finding]) -> AuditSummary {
    let count = |s: Severity| findings.iter().filter(|f| f.severity == s).count();
    let errors = count(Severity::Error);
    let warnings = count(Severity::Warning);
    let infos = count(Severity::Info);

    let mut codes: BTreeMap<String, usize> = BTreeMap::new();
    for f in findings {
        *codes.entry(f.code.as_str().to_string()).or_insert(0) += 1;
    }

    let status = if errors > 0 {
        "error"
    } else if warnings > 0 {
        "warning"
    } else {
        "success"
    };

    AuditSummary {
        status: status.to_string(),
        total: findings.len(),
        errors,
        warnings,
        infos,
        codes,
    }
}

pub fn severity_label(severity: Option<Severity>) -> &'static str {
    match severity {
        Some(Severity::Error) => "ERRO",
        Some(Severity::Warning) => "AVISO",
        Some(Severity::Info) => "INFO",
        None => "OK",
    }
}

/// Markdown rendering used by `--markdown` and as the input block for the
/// external summariser's prompt.
pub fn format_markdown(result: &AuditResult, include_context: bool) -> String {
    use std::fmt::Write as _;

    let mut out = String::new();

    let _ = writeln!(out, "# Auditoria fiscal: {}", result.document_id);
    let _ = writeln!(out);
    let _ = writeln!(out, "- Tipo: {}", result.document_type.label());
    let _ = writeln!(out, "- Gerado em: {}", result.generated_at);
    match &result.table.fetched_at {
        Some(fetched_at) => {
            let _ = writeln!(
                out,
                "- Tabela: {} (obtida em {fetched_at})",
                result.table.version
            );
        }
        None => {
            let _ = writeln!(out, "- Tabela: {}", result.table.version);
        }
    }
    let _ = writeln!(
        out,
        "- Resultado: {} (erros={} avisos={} info={})",
        severity_label(result.overall_severity),
        result.summary.errors,
        result.summary.warnings,
        result.summary.infos
    );

    let _ = writeln!(out);
    let _ = writeln!(out, "## Achados ({})", result.findings.len());
    if result.findings.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "_Nenhuma inconsistência fiscal encontrada._");
    }
    for f in &result.findings {
        let _ = writeln!(out);
        let _ = writeln!(
            out,
            "- **{}** `{}` {}",
            severity_label(Some(f.severity)),
            f.code,
            f.message
        );
        if include_context && !is_empty_context(&f.context) {
            let _ = writeln!(out, "  - regra: `{}`", f.rule);
            let _ = writeln!(out, "  - contexto: `{}`", f.context);
        }
    }
    out
}

fn is_empty_context(v: &serde_json::Value) -> bool {
    match v {
        serde_json::Value::Null => true,
        serde_json::Value::Object(m) => m.is_empty(),
        _ => false,
    }
}
