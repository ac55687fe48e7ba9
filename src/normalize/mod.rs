//! Turns raw fiscal documents into the canonical [`Document`] model.
//!
//! Each accepted input layout has its own [`DocumentParser`]; the caller picks
//! one with an explicit [`DocumentFormat`] tag and never relies on sniffing.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::Document;

mod amount;
mod markup;
mod service_text;

pub use amount::parse_decimal;
pub use markup::MarkupParser;
pub use service_text::ServiceTextParser;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DocumentFormat {
    /// NF-e / CT-e XML.
    Markup,
    /// NFS-e text as extracted from the municipal PDF.
    ServiceText,
}

impl DocumentFormat {
    pub const fn as_str(self) -> &'static str {
        match self {
            DocumentFormat::Markup => "markup",
            DocumentFormat::ServiceText => "service-text",
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "xml" => Some(DocumentFormat::Markup),
            "txt" => Some(DocumentFormat::ServiceText),
            _ => None,
        }
    }
}

impl fmt::Display for DocumentFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "markup" | "xml" | "nfe" | "cte" => Ok(DocumentFormat::Markup),
            "service-text" | "text" | "txt" | "nfse" => Ok(DocumentFormat::ServiceText),
            other => Err(format!(
                "formato desconhecido: {other} (use markup|service-text)"
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NormalizeError {
    #[error("formato não suportado ({format}): {reason}")]
    UnsupportedFormat {
        format: DocumentFormat,
        reason: String,
    },
    #[error("documento malformado: {reason}")]
    MalformedDocument { reason: String },
}

impl NormalizeError {
    pub(crate) fn unsupported(format: DocumentFormat, reason: impl Into<String>) -> Self {
        NormalizeError::UnsupportedFormat {
            format,
            reason: reason.into(),
        }
    }

    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        NormalizeError::MalformedDocument {
            reason: reason.into(),
        }
    }
}

pub trait DocumentParser: Send + Sync {
    fn format(&self) -> DocumentFormat;

    fn parse(&self, raw: &[u8]) -> Result<Document, NormalizeError>;
}

pub fn parser_for(format: DocumentFormat) -> &'static dyn DocumentParser {
    match format {
        DocumentFormat::Markup => &MarkupParser,
        DocumentFormat::ServiceText => &ServiceTextParser,
    }
}

/// Pure transform; on error no partial document is produced.
pub fn normalize(raw: &[u8], format: DocumentFormat) -> Result<Document, NormalizeError> {
    let doc = parser_for(format).parse(raw)?;
    if doc.document_type.requires_items() && doc.items.is_empty() {
        return Err(NormalizeError::malformed(format!(
            "{} sem itens",
            doc.document_type.label()
        )));
    }
    Ok(doc)
}

pub(crate) fn digits_only(s: &str) -> String {
    s.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// NCM codes are accepted with or without the `0000.00.00` punctuation but
/// must come out as exactly eight digits.
pub(crate) fn normalize_ncm(raw: &str, item_no: usize) -> Result<String, NormalizeError> {
    let trimmed = raw.trim();
    if trimmed
        .chars()
        .any(|c| !(c.is_ascii_digit() || c == '.' || c == ' '))
    {
        return Err(NormalizeError::malformed(format!(
            "item {item_no}: NCM '{trimmed}' contém caracteres inválidos"
        )));
    }
    let digits = digits_only(trimmed);
    if digits.len() != 8 {
        return Err(NormalizeError::malformed(format!(
            "item {item_no}: NCM '{trimmed}' deve ter 8 dígitos"
        )));
    }
    Ok(digits)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_from_path_uses_extension() {
        assert_eq!(
            DocumentFormat::from_path(Path::new("a/nota.XML")),
            Some(DocumentFormat::Markup)
        );
        assert_eq!(
            DocumentFormat::from_path(Path::new("nfse.txt")),
            Some(DocumentFormat::ServiceText)
        );
        assert_eq!(DocumentFormat::from_path(Path::new("nota.pdf")), None);
    }

    #[test]
    fn ncm_accepts_dotted_form_and_rejects_short_codes() {
        assert_eq!(normalize_ncm("8471.30.12", 1).as_deref(), Ok("84713012"));
        assert!(matches!(
            normalize_ncm("847130", 2),
            Err(NormalizeError::MalformedDocument { .. })
        ));
        assert!(normalize_ncm("8471-30-12", 3).is_err());
    }

    #[test]
    fn goods_documents_without_items_are_malformed() {
        let nfe = r#"<NFe><infNFe Id="NFe0001"><ide><nNF>1</nNF></ide>
            <emit><CNPJ>11222333000181</CNPJ></emit>
            <total><ICMSTot><vNF>10.00</vNF></ICMSTot></total></infNFe></NFe>"#;
        let err = normalize(nfe.as_bytes(), DocumentFormat::Markup).unwrap_err();
        assert_eq!(
            err,
            NormalizeError::MalformedDocument {
                reason: "NF-e sem itens".to_string()
            }
        );

        let cte = r#"<CTe><infCTe Id="CTe0001"><ide><nCT>1</nCT></ide>
            <emit><CNPJ>11222333000181</CNPJ></emit>
            <vPrest><vTPrest>10.00</vTPrest></vPrest></infCTe></CTe>"#;
        let err = normalize(cte.as_bytes(), DocumentFormat::Markup).unwrap_err();
        assert!(matches!(err, NormalizeError::MalformedDocument { .. }));
    }

    #[test]
    fn service_text_hint_on_markup_bytes_is_unsupported() {
        let err = normalize(b"<NFe></NFe>", DocumentFormat::ServiceText).unwrap_err();
        assert!(matches!(
            err,
            NormalizeError::UnsupportedFormat {
                format: DocumentFormat::ServiceText,
                ..
            }
        ));
    }
}
