mod document;
mod finding;
mod report;
mod severity;

pub use document::{Document, DocumentType, Item, Party, TaxIdKind};
pub use finding::{Finding, FindingCode};
pub use report::{AuditResult, AuditSummary, TableStamp};
pub use severity::Severity;
