use std::io;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, CommandFactory, Parser, Subcommand};
use serde::Serialize;
use tracing::{info, warn};

use crate::config::EffectiveConfig;
use crate::core::{AuditResult, Severity, TableStamp};
use crate::engine::{AuditError, BatchInput, BatchOutcome, Engine, EngineOptions};
use crate::normalize::DocumentFormat;
use crate::table::{Lookup, TableSource, TableStore, lookup};
use crate::ui::UiConfig;

#[derive(Debug, Parser)]
#[command(
    name = "fiscaudit",
    version,
    about = "Audita documentos fiscais (NF-e, CT-e, NFS-e) contra a tabela TIPI vigente"
)]
pub struct Cli {
    #[arg(long, global = true)]
    pub json: bool,
    #[arg(long, global = true)]
    pub markdown: bool,
    #[arg(long = "no-color", global = true)]
    pub no_color: bool,
    #[arg(long, global = true)]
    pub verbose: bool,
    #[arg(long, global = true)]
    pub quiet: bool,
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    /// Reference table file (.json or .csv).
    #[arg(long, global = true)]
    pub table: Option<PathBuf>,
    /// Version label for CSV tables.
    #[arg(long = "table-version", global = true)]
    pub table_version: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    Audit(AuditArgs),
    Batch(BatchArgs),
    Table(TableArgs),
    Config(ConfigArgs),
    Completion(CompletionArgs),
}

#[derive(Debug, Args)]
pub struct AuditArgs {
    pub file: PathBuf,
    /// Inferred from the file extension when absent.
    #[arg(long)]
    pub format: Option<DocumentFormat>,
    #[arg(long)]
    pub id: Option<String>,
    /// Exit with code 3 when the overall severity reaches this level.
    #[arg(long = "fail-on")]
    pub fail_on: Option<Severity>,
    #[arg(long)]
    pub save: bool,
}

#[derive(Debug, Args)]
pub struct BatchArgs {
    pub dir: PathBuf,
    #[arg(long)]
    pub exclude: Vec<String>,
    #[arg(long)]
    pub workers: Option<usize>,
    #[arg(long = "fail-on")]
    pub fail_on: Option<Severity>,
    #[arg(long)]
    pub save: bool,
}

#[derive(Debug, Args)]
pub struct TableArgs {
    #[command(subcommand)]
    pub command: TableCommand,
}

#[derive(Debug, Subcommand)]
pub enum TableCommand {
    Info,
    Lookup { code: String },
}

#[derive(Debug, Args)]
pub struct CompletionArgs {
    pub shell: String,
}

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[arg(long)]
    pub show: bool,
}

#[derive(Debug, Serialize)]
struct BatchReport {
    schema_version: &'static str,
    tool_version: String,
    root: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    table: Option<TableStamp>,
    documents: Vec<BatchEntry>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    unreadable: Vec<UnreadableEntry>,
}

#[derive(Debug, Serialize)]
struct BatchEntry {
    path: String,
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<AuditResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct UnreadableEntry {
    path: String,
    error: String,
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.verbose, cli.quiet).map_err(crate::exit::failure_err)?;

    let stdout_is_tty = io::stdout().is_terminal();
    let stderr_is_tty = io::stderr().is_terminal();

    if cli.json && cli.markdown {
        return Err(crate::exit::invalid_args(
            "--json e --markdown não podem ser usados juntos",
        ));
    }

    let home_dir = home_dir().map_err(crate::exit::failure_err)?;
    let cfg = crate::config::load(cli.config.as_deref(), &home_dir)
        .map_err(crate::exit::invalid_args_err)?;

    let ui_cfg = UiConfig {
        color: stdout_is_tty && cfg.ui.color && !cli.no_color,
        stderr_is_tty,
        max_table_rows: cfg.ui.max_table_rows,
        quiet: cli.quiet,
        verbose: cli.verbose,
    };

    match cli.command {
        Commands::Audit(ref args) => {
            let engine = build_engine(&cli, &cfg, &home_dir, &ui_cfg, None)?;
            run_audit(&cli, &cfg, &home_dir, &ui_cfg, &engine, args)?;
        }
        Commands::Batch(ref args) => {
            let engine = build_engine(&cli, &cfg, &home_dir, &ui_cfg, args.workers)?;
            run_batch(&cli, &cfg, &home_dir, &ui_cfg, &engine, args)?;
        }
        Commands::Table(ref args) => {
            let (store, source) = load_table(&cli, &cfg, &home_dir)?;
            let table = store.snapshot().ok_or_else(|| {
                crate::exit::audit_err(AuditError::TableUnavailable)
            })?;
            match &args.command {
                TableCommand::Info => {
                    if cli.json {
                        write_json(&serde_json::json!({
                            "version": table.version(),
                            "fetched_at": table.fetched_at(),
                            "entries": table.len(),
                            "source": source,
                        }))?;
                    } else {
                        crate::ui::print_table_info(
                            &table.stamp(),
                            &table.sorted_entries(),
                            source.as_deref().unwrap_or("-"),
                            &ui_cfg,
                        );
                    }
                }
                TableCommand::Lookup { code } => {
                    let digits = crate::normalize::digits_only(code);
                    if digits.is_empty() || digits.len() > 8 {
                        return Err(crate::exit::invalid_args(format!(
                            "código NCM inválido: '{code}' (use até 8 dígitos)"
                        )));
                    }
                    let found = lookup(&table, &digits);
                    if cli.json {
                        let (entry, exact) = match found {
                            Lookup::Found(m) => (Some(m.entry), Some(m.exact)),
                            Lookup::NotFound => (None, None),
                        };
                        write_json(&serde_json::json!({
                            "code": digits,
                            "found": entry.is_some(),
                            "exact": exact,
                            "entry": entry,
                            "table": table.stamp(),
                        }))?;
                    } else {
                        crate::ui::print_table_lookup(&digits, found, &table.stamp(), &ui_cfg);
                    }
                }
            }
        }
        Commands::Completion(ref args) => {
            let shell = parse_shell(&args.shell)?;
            let mut cmd = Cli::command();
            let mut out = std::io::stdout().lock();
            clap_complete::generate(shell, &mut cmd, "fiscaudit", &mut out);
        }
        Commands::Config(ref args) => {
            if args.show {
                if cli.json {
                    write_json(&cfg)?;
                } else {
                    println!("{}", toml::to_string_pretty(&cfg)?);
                }
            } else if !ui_cfg.quiet {
                eprintln!("config: use `fiscaudit config --show`");
            }
        }
    }

    Ok(())
}

/// Installs the global subscriber. Logs go to stderr so stdout stays
/// machine-readable; `RUST_LOG` wins over the flags.
pub fn init_tracing(verbose: bool, quiet: bool) -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt};

    let default_level = if verbose {
        "debug"
    } else if quiet {
        "error"
    } else {
        "warn"
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    fmt()
        .compact()
        .with_env_filter(env_filter)
        .with_writer(io::stderr)
        .with_target(true)
        .try_init()
        .map_err(|e| anyhow::anyhow!("falha ao inicializar o log: {e}"))
}

fn home_dir() -> Result<PathBuf> {
    std::env::var_os("HOME")
        .filter(|h| !h.is_empty())
        .map(PathBuf::from)
        .ok_or_else(|| anyhow::anyhow!("a variável de ambiente HOME não está definida"))
}

/// Resolves the table path (flag, then config) and loads it. A missing path
/// leaves the store empty; a path that fails to load is fatal.
fn load_table(
    cli: &Cli,
    cfg: &EffectiveConfig,
    home_dir: &Path,
) -> Result<(TableStore, Option<String>)> {
    let store = TableStore::empty();
    let path = cli.table.clone().or_else(|| {
        cfg.table
            .path
            .as_deref()
            .map(|p| crate::results::resolve_dir(p, home_dir))
    });
    let Some(path) = path else {
        return Ok((store, None));
    };
    let version = cli.table_version.clone().or_else(|| cfg.table.version.clone());

    let source = TableSource::from_path(&path, version)
        .map_err(|e| crate::exit::table_unavailable_err(e.into()))?;
    store
        .refresh(&source)
        .map_err(|e| crate::exit::table_unavailable_err(e.into()))?;
    Ok((store, Some(crate::results::mask_home(&path, home_dir))))
}

fn build_engine(
    cli: &Cli,
    cfg: &EffectiveConfig,
    home_dir: &Path,
    ui_cfg: &UiConfig,
    workers: Option<usize>,
) -> Result<Engine> {
    let workers = workers.unwrap_or(cfg.batch.workers);
    if workers == 0 {
        return Err(crate::exit::invalid_args("--workers deve ser maior que zero"));
    }
    let (store, _) = load_table(cli, cfg, home_dir)?;
    Ok(Engine::new(
        EngineOptions {
            settings: cfg.audit_settings(),
            workers,
            show_progress: ui_cfg.stderr_is_tty && !cli.quiet && !cli.json,
        },
        Arc::new(store),
    ))
}

fn run_audit(
    cli: &Cli,
    cfg: &EffectiveConfig,
    home_dir: &Path,
    ui_cfg: &UiConfig,
    engine: &Engine,
    args: &AuditArgs,
) -> Result<()> {
    let format = match args.format {
        Some(f) => f,
        None => DocumentFormat::from_path(&args.file).ok_or_else(|| {
            crate::exit::invalid_args(format!(
                "não foi possível inferir o formato de {} (use --format markup|service-text)",
                args.file.display()
            ))
        })?,
    };
    let raw = std::fs::read(&args.file)
        .with_context(|| format!("falha ao ler o documento: {}", args.file.display()))
        .map_err(crate::exit::invalid_args_err)?;

    let result = engine
        .audit_bytes(args.id.as_deref(), &raw, format)
        .map_err(crate::exit::audit_err)?;

    if cli.json {
        write_json(&result)?;
    } else if cli.markdown {
        write_stdout(&crate::report::format_markdown(
            &result,
            cfg.output.include_context,
        ))?;
    } else {
        crate::ui::print_audit(&result, ui_cfg);
    }

    if args.save {
        save_result(cfg, home_dir, ui_cfg, &result)?;
    }

    check_gate(args.fail_on, result.overall_severity, 1)
}

fn run_batch(
    cli: &Cli,
    cfg: &EffectiveConfig,
    home_dir: &Path,
    ui_cfg: &UiConfig,
    engine: &Engine,
    args: &BatchArgs,
) -> Result<()> {
    if !args.dir.is_dir() {
        return Err(crate::exit::invalid_args(format!(
            "diretório não encontrado: {}",
            args.dir.display()
        )));
    }
    if engine.tables().snapshot().is_none() {
        return Err(crate::exit::audit_err(AuditError::TableUnavailable));
    }

    let mut exclude = cfg.batch.exclude.clone();
    exclude.extend(args.exclude.iter().cloned());
    exclude.sort();
    exclude.dedup();
    crate::scan::validate_excludes(&exclude).map_err(crate::exit::invalid_args_err)?;

    let discovery = crate::scan::discover_documents(&args.dir, &exclude)
        .map_err(crate::exit::failure_err)?;
    info!(
        root = %discovery.root.display(),
        documents = discovery.documents.len(),
        skipped = discovery.skipped,
        failures = discovery.failures.len(),
        "documents discovered"
    );

    let mut inputs = Vec::with_capacity(discovery.documents.len());
    let mut unreadable = Vec::new();
    for failure in &discovery.failures {
        let label = match &failure.path {
            Some(path) => relative_label(&args.dir, path),
            None => args.dir.display().to_string(),
        };
        warn!(path = %label, error = %failure.error, "directory entry unreadable");
        unreadable.push(UnreadableEntry {
            path: label,
            error: failure.error.clone(),
        });
    }
    for doc in &discovery.documents {
        let label = relative_label(&args.dir, &doc.path);
        match std::fs::read(&doc.path) {
            Ok(raw) => inputs.push(BatchInput {
                label,
                document_id: None,
                format: doc.format,
                raw,
            }),
            Err(err) => {
                warn!(document = %label, error = %err, "document unreadable");
                unreadable.push(UnreadableEntry {
                    path: label,
                    error: err.to_string(),
                });
            }
        }
    }

    let outcomes = engine.audit_batch(&inputs);

    if cli.json {
        write_json(&batch_report(&args.dir, engine, &outcomes, unreadable.as_slice()))?;
    } else if cli.markdown {
        write_stdout(&batch_markdown(
            &outcomes,
            &unreadable,
            cfg.output.include_context,
        ))?;
    } else {
        crate::ui::print_batch(&outcomes, ui_cfg);
        if !ui_cfg.quiet {
            for u in &unreadable {
                eprintln!("não foi possível ler {}: {}", u.path, u.error);
            }
        }
    }

    if args.save {
        for o in &outcomes {
            if let Ok(result) = &o.result {
                save_result(cfg, home_dir, ui_cfg, result)?;
            }
        }
    }

    let rejected = outcomes.iter().filter(|o| o.result.is_err()).count() + unreadable.len();
    if rejected > 0 {
        return Err(crate::exit::rejected_err(anyhow::anyhow!(
            "{rejected} documento(s) rejeitado(s) no lote"
        )));
    }

    let worst = outcomes
        .iter()
        .filter_map(|o| o.result.as_ref().ok())
        .filter_map(|r| r.overall_severity)
        .max();
    let reached = match args.fail_on {
        Some(threshold) => outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().ok())
            .filter(|r| r.overall_severity.is_some_and(|s| s >= threshold))
            .count(),
        None => 0,
    };
    check_gate(args.fail_on, worst, reached)
}

fn batch_report(
    root: &Path,
    engine: &Engine,
    outcomes: &[BatchOutcome],
    unreadable: &[UnreadableEntry],
) -> BatchReport {
    BatchReport {
        schema_version: crate::report::SCHEMA_VERSION,
        tool_version: env!("CARGO_PKG_VERSION").to_string(),
        root: root.display().to_string(),
        table: engine.tables().stamp(),
        documents: outcomes
            .iter()
            .map(|o| match &o.result {
                Ok(result) => BatchEntry {
                    path: o.label.clone(),
                    status: "audited",
                    result: Some(result.clone()),
                    error: None,
                },
                Err(err) => BatchEntry {
                    path: o.label.clone(),
                    status: "rejected",
                    result: None,
                    error: Some(err.to_string()),
                },
            })
            .collect(),
        unreadable: unreadable
            .iter()
            .map(|u| UnreadableEntry {
                path: u.path.clone(),
                error: u.error.clone(),
            })
            .collect(),
    }
}

fn relative_label(root: &Path, path: &Path) -> String {
    match path.strip_prefix(root) {
        Ok(rel) if !rel.as_os_str().is_empty() => rel.display().to_string(),
        _ => path.display().to_string(),
    }
}

fn batch_markdown(
    outcomes: &[BatchOutcome],
    unreadable: &[UnreadableEntry],
    include_context: bool,
) -> String {
    let mut out = String::new();
    for o in outcomes {
        match &o.result {
            Ok(result) => out.push_str(&crate::report::format_markdown(result, include_context)),
            Err(err) => {
                out.push_str(&format!("# Documento rejeitado: {}\n\n- {err}\n", o.label));
            }
        }
        out.push('\n');
    }
    if !unreadable.is_empty() {
        out.push_str("# Entradas ilegíveis\n\n");
        for u in unreadable {
            out.push_str(&format!("- {}: {}\n", u.path, u.error));
        }
    }
    out
}

fn save_result(
    cfg: &EffectiveConfig,
    home_dir: &Path,
    ui_cfg: &UiConfig,
    result: &AuditResult,
) -> Result<()> {
    let dir = crate::results::resolve_dir(&cfg.output.results_dir, home_dir);
    let path = crate::results::write_result(&dir, result).map_err(crate::exit::failure_err)?;
    info!(path = %path.display(), document_id = %result.document_id, "result saved");
    if !ui_cfg.quiet {
        eprintln!(
            "resultado salvo em: {}",
            crate::results::mask_home(&path, home_dir)
        );
    }
    Ok(())
}

fn check_gate(threshold: Option<Severity>, worst: Option<Severity>, reached: usize) -> Result<()> {
    let Some(threshold) = threshold else {
        return Ok(());
    };
    match worst {
        Some(s) if s >= threshold => Err(crate::exit::gate_failed(format!(
            "severidade {s} atingiu o limite --fail-on {threshold} ({reached} documento(s))"
        ))),
        _ => Ok(()),
    }
}

fn write_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let mut buf =
        serde_json::to_vec_pretty(value).map_err(|e| crate::exit::failure_err(e.into()))?;
    buf.push(b'\n');
    write_bytes(&buf)
}

fn write_stdout(s: &str) -> Result<()> {
    write_bytes(s.as_bytes())
}

fn write_bytes(buf: &[u8]) -> Result<()> {
    use std::io::Write;

    let mut stdout = std::io::stdout().lock();
    match stdout.write_all(buf) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::BrokenPipe => Ok(()),
        Err(err) => Err(crate::exit::failure_err(err.into())),
    }
}

fn parse_shell(s: &str) -> Result<clap_complete::Shell> {
    let s = s.trim().to_ascii_lowercase();
    match s.as_str() {
        "bash" => Ok(clap_complete::Shell::Bash),
        "zsh" => Ok(clap_complete::Shell::Zsh),
        "fish" => Ok(clap_complete::Shell::Fish),
        other => Err(crate::exit::invalid_args(format!(
            "shell não suportado: {other} (use bash|zsh|fish)"
        ))),
    }
}
