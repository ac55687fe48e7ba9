use anyhow::Error;
use std::io::{self, Write};
use unicode_width::UnicodeWidthChar;

use crate::core::{AuditResult, Finding, Severity, TableStamp};
use crate::engine::BatchOutcome;
use crate::report::severity_label;
use crate::table::{Lookup, ReferenceTableEntry};

#[derive(Debug, Clone)]
pub struct UiConfig {
    pub color: bool,
    pub stderr_is_tty: bool,
    pub max_table_rows: usize,
    pub quiet: bool,
    pub verbose: bool,
}

pub fn eprintln_error(err: &Error) {
    let mut stderr = io::stderr().lock();
    let _ = writeln!(stderr, "erro:");
    let _ = writeln!(stderr, "  {err}");

    let mut causes = err.chain().skip(1).peekable();
    if causes.peek().is_some() {
        let _ = writeln!(stderr, "causa:");
        for cause in causes {
            let _ = writeln!(stderr, "  - {cause}");
        }
    }

    let _ = writeln!(stderr, "próximos passos:");
    let _ = writeln!(
        stderr,
        "  - execute novamente com `--verbose` para ver mais detalhes"
    );
    let _ = writeln!(
        stderr,
        "  - consulte `fiscaudit --help` para comandos e opções"
    );
}

pub fn print_audit(result: &AuditResult, cfg: &UiConfig) {
    if cfg.quiet {
        return;
    }
    let mut out = io::stdout().lock();
    let _ = writeln!(
        out,
        "Documento: {} ({})",
        result.document_id,
        result.document_type.label()
    );
    let _ = writeln!(out, "Tabela: {}", format_stamp(&result.table));
    let _ = writeln!(
        out,
        "Resultado: {}  erros={} avisos={} info={}",
        format_severity(result.overall_severity, cfg.color),
        result.summary.errors,
        result.summary.warnings,
        result.summary.infos
    );

    if result.findings.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "Nenhuma inconsistência encontrada.");
        return;
    }

    let total = result.findings.len();
    let rows = cfg.max_table_rows.max(1).min(total);
    let _ = writeln!(out);
    if total > rows {
        let _ = writeln!(out, "Achados ({rows} exibidos / {total} no total):");
    } else {
        let _ = writeln!(out, "Achados ({total}):");
    }
    print_findings_table(&mut out, &result.findings, rows, cfg.color);
    if cfg.verbose {
        let _ = writeln!(out);
        for f in result.findings.iter().take(rows) {
            let _ = writeln!(out, "- [{}] {} {}", f.rule, f.code, f.context);
        }
    }
}

pub fn print_batch(outcomes: &[BatchOutcome], cfg: &UiConfig) {
    if cfg.quiet {
        return;
    }
    let mut out = io::stdout().lock();

    let label_status = "STATUS";
    let label_doc = "DOCUMENTO";
    let status_w = ["ERRO", "AVISO", "INFO", "OK", "REJEITADO"]
        .iter()
        .map(|s| visible_width_ansi(s))
        .max()
        .unwrap_or(0)
        .max(visible_width_ansi(label_status));
    let doc_w = outcomes
        .iter()
        .map(|o| visible_width_ansi(&truncate_middle(&o.label, 60)))
        .max()
        .unwrap_or(0)
        .max(visible_width_ansi(label_doc));

    let _ = writeln!(
        out,
        "{}  {}  DETALHE",
        pad_end_display(label_status, status_w),
        pad_end_display(label_doc, doc_w)
    );
    let _ = writeln!(
        out,
        "{}  {}  {}",
        "-".repeat(status_w),
        "-".repeat(doc_w),
        "-".repeat(7)
    );

    let mut rejected = 0usize;
    let mut by_severity = [0usize; 4];
    for o in outcomes {
        let label = pad_end_display(&truncate_middle(&o.label, 60), doc_w);
        match &o.result {
            Ok(result) => {
                let slot = match result.overall_severity {
                    None => 0,
                    Some(Severity::Info) => 1,
                    Some(Severity::Warning) => 2,
                    Some(Severity::Error) => 3,
                };
                by_severity[slot] += 1;
                let status = pad_end_ansi(
                    &format_severity(result.overall_severity, cfg.color),
                    status_w,
                );
                let detail = result
                    .summary
                    .codes
                    .iter()
                    .map(|(code, n)| format!("{code}×{n}"))
                    .collect::<Vec<_>>()
                    .join(", ");
                let _ = writeln!(out, "{status}  {label}  {detail}");
            }
            Err(err) => {
                rejected += 1;
                let status = pad_end_ansi(&paint("REJEITADO", "35", cfg.color), status_w);
                let _ = writeln!(out, "{status}  {label}  {err}");
            }
        }
    }

    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "Total: {}  ok={} info={} avisos={} erros={} rejeitados={rejected}",
        outcomes.len(),
        by_severity[0],
        by_severity[1],
        by_severity[2],
        by_severity[3]
    );
}

pub fn print_table_info(
    stamp: &TableStamp,
    entries: &[&ReferenceTableEntry],
    source: &str,
    cfg: &UiConfig,
) {
    if cfg.quiet {
        return;
    }
    let mut out = io::stdout().lock();
    let _ = writeln!(out, "Tabela: {}", format_stamp(stamp));
    let _ = writeln!(out, "Origem: {source}");
    let _ = writeln!(out, "Entradas: {}", entries.len());

    let rows = cfg.max_table_rows.min(entries.len());
    if rows == 0 {
        return;
    }
    let _ = writeln!(out);
    let code_w = entries
        .iter()
        .take(rows)
        .map(|e| visible_width_ansi(&e.code))
        .max()
        .unwrap_or(0)
        .max(visible_width_ansi("NCM"));
    let rate_w = entries
        .iter()
        .take(rows)
        .map(|e| visible_width_ansi(&e.official_rate.label()))
        .max()
        .unwrap_or(0)
        .max(visible_width_ansi("IPI"));
    let _ = writeln!(
        out,
        "{}  {}  DESCRIÇÃO",
        pad_end_display("NCM", code_w),
        pad_start_display("IPI", rate_w)
    );
    for e in entries.iter().take(rows) {
        let _ = writeln!(
            out,
            "{}  {}  {}",
            pad_end_display(&e.code, code_w),
            pad_start_display(&e.official_rate.label(), rate_w),
            truncate_middle(&e.description, 70)
        );
    }
    if entries.len() > rows {
        let _ = writeln!(out, "... (mais {} entradas)", entries.len() - rows);
    }
}

pub fn print_table_lookup(code: &str, found: Lookup<'_>, stamp: &TableStamp, cfg: &UiConfig) {
    if cfg.quiet {
        return;
    }
    let mut out = io::stdout().lock();
    match found {
        Lookup::Found(m) => {
            let how = if m.exact {
                "correspondência exata".to_string()
            } else {
                format!("via prefixo {}", m.entry.code)
            };
            let _ = writeln!(out, "NCM {code}: {how}");
            let _ = writeln!(out, "  alíquota IPI: {}", m.entry.official_rate.label());
            if !m.entry.description.is_empty() {
                let _ = writeln!(out, "  descrição: {}", m.entry.description);
            }
        }
        Lookup::NotFound => {
            let _ = writeln!(out, "NCM {code}: não encontrado");
        }
    }
    let _ = writeln!(out, "  tabela: {}", format_stamp(stamp));
}

fn format_stamp(stamp: &TableStamp) -> String {
    match &stamp.fetched_at {
        Some(at) => format!("{} (obtida em {at})", stamp.version),
        None => stamp.version.clone(),
    }
}

fn print_findings_table(out: &mut dyn Write, findings: &[Finding], rows: usize, color: bool) {
    let label_sev = "NÍVEL";
    let label_code = "CÓDIGO";
    let label_msg = "MENSAGEM";

    let sev_w = findings
        .iter()
        .take(rows)
        .map(|f| visible_width_ansi(severity_label(Some(f.severity))))
        .max()
        .unwrap_or(0)
        .max(visible_width_ansi(label_sev));
    let code_w = findings
        .iter()
        .take(rows)
        .map(|f| visible_width_ansi(f.code.as_str()))
        .max()
        .unwrap_or(0)
        .max(visible_width_ansi(label_code));

    let _ = writeln!(
        out,
        "{}  {}  {}",
        pad_end_display(label_sev, sev_w),
        pad_end_display(label_code, code_w),
        label_msg
    );
    let _ = writeln!(
        out,
        "{}  {}  {}",
        "-".repeat(sev_w),
        "-".repeat(code_w),
        "-".repeat(visible_width_ansi(label_msg))
    );

    for f in findings.iter().take(rows) {
        let sev = pad_end_ansi(&format_severity(Some(f.severity), color), sev_w);
        let code = pad_end_display(f.code.as_str(), code_w);
        let _ = writeln!(out, "{sev}  {code}  {}", f.message);
    }
}

fn format_severity(severity: Option<Severity>, color: bool) -> String {
    let code = match severity {
        None => "32",
        Some(Severity::Info) => "90",
        Some(Severity::Warning) => "33",
        Some(Severity::Error) => "31",
    };
    paint(severity_label(severity), code, color)
}

fn paint(s: &str, code: &str, color: bool) -> String {
    if !color {
        return s.to_string();
    }
    format!("\x1b[{code}m{s}\x1b[0m")
}

fn truncate_middle(s: &str, max_chars: usize) -> String {
    let len = s.chars().count();
    if len <= max_chars {
        return s.to_string();
    }

    let keep = max_chars.saturating_sub(3);
    let left = keep / 2;
    let right = keep.saturating_sub(left);

    let prefix: String = s.chars().take(left).collect();
    let suffix: String = s.chars().skip(len - right).collect();

    format!("{prefix}...{suffix}")
}

fn pad_end_ansi(s: &str, width: usize) -> String {
    let w = visible_width_ansi(s);
    if w >= width {
        return s.to_string();
    }
    format!("{s}{}", " ".repeat(width - w))
}

fn pad_end_display(s: &str, width: usize) -> String {
    pad_end_ansi(s, width)
}

fn pad_start_display(s: &str, width: usize) -> String {
    let w = visible_width_ansi(s);
    if w >= width {
        return s.to_string();
    }
    format!("{}{}", " ".repeat(width - w), s)
}

fn visible_width_ansi(s: &str) -> usize {
    let mut width: usize = 0;
    let mut chars = s.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch == '\x1b' && chars.peek() == Some(&'[') {
            let _ = chars.next();
            for ch2 in chars.by_ref() {
                if ch2 == 'm' {
                    break;
                }
            }
            continue;
        }
        width = width.saturating_add(UnicodeWidthChar::width(ch).unwrap_or(0));
    }
    width
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn width_ignores_ansi_sequences() {
        let painted = format_severity(Some(Severity::Error), true);
        assert_ne!(painted, "ERRO");
        assert_eq!(visible_width_ansi(&painted), 4);
        assert_eq!(visible_width_ansi("DESCRIÇÃO"), 9);
        assert_eq!(pad_end_ansi(&painted, 6).len(), painted.len() + 2);
    }

    #[test]
    fn truncate_middle_keeps_both_ends() {
        assert_eq!(truncate_middle("abc", 10), "abc");
        assert_eq!(truncate_middle("notas/2024/janeiro.xml", 12), "nota...o.xml");
    }
}
