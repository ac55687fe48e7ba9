use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::{DocumentType, Finding, Severity};

/// Version stamp of the reference table a result was computed against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableStamp {
    pub version: String,
    pub fetched_at: Option<String>,
}

/// Structured roll-up handed to the summariser and the results store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditSummary {
    pub status: String,
    pub total: usize,
    pub errors: usize,
    pub warnings: usize,
    pub infos: usize,
    pub codes: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditResult {
    pub schema_version: String,
    pub tool_version: String,
    pub document_id: String,
    pub document_type: DocumentType,
    pub generated_at: String,
    pub table: TableStamp,
    pub overall_severity: Option<Severity>,
    pub summary: AuditSummary,
    pub findings: Vec<Finding>,
}
