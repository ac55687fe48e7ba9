use std::any::Any;
use std::panic;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::core::{AuditResult, Document, TableStamp};
use crate::normalize::{DocumentFormat, NormalizeError, normalize};
use crate::rules::{AuditSettings, RuleContext, run_rules};
use crate::table::{TableError, TableSource, TableStore, VersionedTable};

#[derive(Debug, Error)]
pub enum AuditError {
    #[error(transparent)]
    Normalize(#[from] NormalizeError),
    #[error("tabela de referência indisponível: nenhuma tabela foi carregada")]
    TableUnavailable,
    #[error("falha interna ao auditar o documento: {0}")]
    Internal(String),
}

#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub settings: AuditSettings,
    pub workers: usize,
    pub show_progress: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            settings: AuditSettings::default(),
            workers: 4,
            show_progress: false,
        }
    }
}

#[derive(Clone)]
pub struct Engine {
    opts: EngineOptions,
    tables: Arc<TableStore>,
}

/// One document of a batch. `label` identifies it in batch output (usually
/// its path) and is the fallback document id.
#[derive(Debug, Clone)]
pub struct BatchInput {
    pub label: String,
    pub document_id: Option<String>,
    pub format: DocumentFormat,
    pub raw: Vec<u8>,
}

#[derive(Debug)]
pub struct BatchOutcome {
    pub label: String,
    pub result: Result<AuditResult, AuditError>,
}

impl Engine {
    pub fn new(opts: EngineOptions, tables: Arc<TableStore>) -> Self {
        Self { opts, tables }
    }

    pub fn tables(&self) -> &TableStore {
        &self.tables
    }

    pub fn settings(&self) -> &AuditSettings {
        &self.opts.settings
    }

    pub fn refresh_table(&self, source: &TableSource) -> Result<TableStamp, TableError> {
        self.tables.refresh(source)
    }

    fn table(&self) -> Result<Arc<VersionedTable>, AuditError> {
        self.tables.snapshot().ok_or(AuditError::TableUnavailable)
    }

    /// Normalize → validate → build, for one raw document.
    pub fn audit_bytes(
        &self,
        document_id: Option<&str>,
        raw: &[u8],
        format: DocumentFormat,
    ) -> Result<AuditResult, AuditError> {
        let table = self.table()?;
        let doc = normalize(raw, format)?;
        Ok(self.audit_with_table(document_id, &doc, &table))
    }

    pub fn audit_document(
        &self,
        document_id: Option<&str>,
        doc: &Document,
    ) -> Result<AuditResult, AuditError> {
        let table = self.table()?;
        Ok(self.audit_with_table(document_id, doc, &table))
    }

    fn audit_with_table(
        &self,
        document_id: Option<&str>,
        doc: &Document,
        table: &VersionedTable,
    ) -> AuditResult {
        let ctx = RuleContext {
            document: doc,
            table,
            settings: &self.opts.settings,
        };
        let findings = run_rules(&ctx);

        let document_id = document_id
            .map(|s| s.to_string())
            .or_else(|| doc.natural_id())
            .unwrap_or_else(|| "sem-identificador".to_string());
        debug!(
            document_id = %document_id,
            document_type = %doc.document_type,
            findings = findings.len(),
            table_version = table.version(),
            "document audited"
        );
        crate::report::build(&document_id, doc.document_type, findings, table.stamp())
    }

    /// Audits independent documents on a fixed pool of worker threads.
    /// Outcomes come back in input order; a failing document never stops the
    /// others.
    pub fn audit_batch(&self, inputs: &[BatchInput]) -> Vec<BatchOutcome> {
        if inputs.is_empty() {
            return Vec::new();
        }
        let workers = self.opts.workers.clamp(1, inputs.len());

        use std::io::IsTerminal;
        let pb = if self.opts.show_progress && std::io::stderr().is_terminal() {
            let pb = indicatif::ProgressBar::new(inputs.len() as u64);
            pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
            pb.set_message("auditando documentos...");
            pb.enable_steady_tick(Duration::from_millis(120));
            Some(pb)
        } else {
            None
        };

        let next = AtomicUsize::new(0);
        let mut slots: Vec<Option<Result<AuditResult, AuditError>>> =
            inputs.iter().map(|_| None).collect();

        thread::scope(|s| {
            let (tx, rx) = mpsc::channel();
            for _ in 0..workers {
                let tx = tx.clone();
                let next = &next;
                s.spawn(move || {
                    loop {
                        let idx = next.fetch_add(1, Ordering::Relaxed);
                        let Some(input) = inputs.get(idx) else {
                            break;
                        };
                        let fallback = input.label.as_str();
                        let id = input.document_id.as_deref().or(Some(fallback));
                        let res = panic::catch_unwind(panic::AssertUnwindSafe(|| {
                            self.audit_bytes(id, &input.raw, input.format)
                        }))
                        .unwrap_or_else(|payload| {
                            Err(AuditError::Internal(panic_message(&*payload)))
                        });
                        if tx.send((idx, res)).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(tx);

            for (idx, res) in rx {
                if let Some(pb) = &pb {
                    pb.inc(1);
                }
                slots[idx] = Some(res);
            }
        });

        if let Some(pb) = pb {
            pb.finish_and_clear();
        }

        let outcomes: Vec<BatchOutcome> = slots
            .into_iter()
            .zip(inputs)
            .filter_map(|(res, input)| {
                res.map(|result| BatchOutcome {
                    label: input.label.clone(),
                    result,
                })
            })
            .collect();

        let failed = outcomes.iter().filter(|o| o.result.is_err()).count();
        for o in &outcomes {
            if let Err(err) = &o.result {
                warn!(document = %o.label, error = %err, "document rejected");
            }
        }
        info!(
            documents = outcomes.len(),
            failed,
            workers,
            "batch audit finished"
        );
        outcomes
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "pânico sem mensagem".to_string()
    }
}
