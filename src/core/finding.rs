use serde::{Deserialize, Serialize};
use std::fmt;

use crate::core::Severity;

/// Stable identifiers matched on by downstream consumers. Renaming a variant's
/// wire form is a breaking change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FindingCode {
    InvalidCnpj,
    InvalidCpf,
    NcmMissing,
    NcmNotFound,
    NcmPrefixMatch,
    TaxRateMismatch,
    TaxRateOnUntaxed,
    TaxRateNotDeclared,
    TotalMismatch,
    InvalidCfop,
    MissingDocumentNumber,
    MissingIssueDate,
    MissingRecipient,
    MissingServiceDescription,
}

impl FindingCode {
    pub const fn as_str(self) -> &'static str {
        match self {
            FindingCode::InvalidCnpj => "INVALID_CNPJ",
            FindingCode::InvalidCpf => "INVALID_CPF",
            FindingCode::NcmMissing => "NCM_MISSING",
            FindingCode::NcmNotFound => "NCM_NOT_FOUND",
            FindingCode::NcmPrefixMatch => "NCM_PREFIX_MATCH",
            FindingCode::TaxRateMismatch => "TAX_RATE_MISMATCH",
            FindingCode::TaxRateOnUntaxed => "TAX_RATE_ON_UNTAXED",
            FindingCode::TaxRateNotDeclared => "TAX_RATE_NOT_DECLARED",
            FindingCode::TotalMismatch => "TOTAL_MISMATCH",
            FindingCode::InvalidCfop => "INVALID_CFOP",
            FindingCode::MissingDocumentNumber => "MISSING_DOCUMENT_NUMBER",
            FindingCode::MissingIssueDate => "MISSING_ISSUE_DATE",
            FindingCode::MissingRecipient => "MISSING_RECIPIENT",
            FindingCode::MissingServiceDescription => "MISSING_SERVICE_DESCRIPTION",
        }
    }
}

impl fmt::Display for FindingCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub rule: String,
    pub severity: Severity,
    pub code: FindingCode,
    pub message: String,
    pub context: serde_json::Value,
}

impl Finding {
    pub fn new(
        rule: &str,
        severity: Severity,
        code: FindingCode,
        message: impl Into<String>,
        context: serde_json::Value,
    ) -> Self {
        Self {
            rule: rule.to_string(),
            severity,
            code,
            message: message.into(),
            context,
        }
    }

    pub fn error(
        rule: &str,
        code: FindingCode,
        message: impl Into<String>,
        context: serde_json::Value,
    ) -> Self {
        Self::new(rule, Severity::Error, code, message, context)
    }

    pub fn warning(
        rule: &str,
        code: FindingCode,
        message: impl Into<String>,
        context: serde_json::Value,
    ) -> Self {
        Self::new(rule, Severity::Warning, code, message, context)
    }

    pub fn info(
        rule: &str,
        code: FindingCode,
        message: impl Into<String>,
        context: serde_json::Value,
    ) -> Self {
        Self::new(rule, Severity::Info, code, message, context)
    }
}
