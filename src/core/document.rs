use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DocumentType {
    GoodsInvoice,
    TransportManifest,
    ServiceInvoice,
}

impl DocumentType {
    pub const fn as_str(self) -> &'static str {
        match self {
            DocumentType::GoodsInvoice => "GoodsInvoice",
            DocumentType::TransportManifest => "TransportManifest",
            DocumentType::ServiceInvoice => "ServiceInvoice",
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            DocumentType::GoodsInvoice => "NF-e",
            DocumentType::TransportManifest => "CT-e",
            DocumentType::ServiceInvoice => "NFS-e",
        }
    }

    /// Goods documents must carry at least one item.
    pub const fn requires_items(self) -> bool {
        matches!(
            self,
            DocumentType::GoodsInvoice | DocumentType::TransportManifest
        )
    }
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaxIdKind {
    Cnpj,
    Cpf,
}

impl TaxIdKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            TaxIdKind::Cnpj => "CNPJ",
            TaxIdKind::Cpf => "CPF",
        }
    }

    /// Used when the source gives no explicit tag: more than 11 digits is
    /// read as a CNPJ.
    pub fn infer(digits: &str) -> Self {
        if digits.len() > 11 {
            TaxIdKind::Cnpj
        } else {
            TaxIdKind::Cpf
        }
    }
}

impl fmt::Display for TaxIdKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Party {
    /// Digits only; punctuation is stripped by the normalizer.
    pub tax_id: String,
    pub tax_id_kind: TaxIdKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product_code: Option<String>,
    pub description: String,
    /// Always 8 digits when present.
    pub classification_code: Option<String>,
    pub cfop_code: Option<String>,
    pub quantity: Option<Decimal>,
    pub unit_value: Option<Decimal>,
    pub total_value: Decimal,
    pub declared_tax_rate: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub document_type: DocumentType,
    pub number: Option<String>,
    pub issued_at: Option<String>,
    pub access_key: Option<String>,
    pub issuer: Party,
    pub recipient: Option<Party>,
    pub items: Vec<Item>,
    pub declared_total_value: Decimal,
    pub service_description: Option<String>,
}

impl Document {
    /// Identifier used for results: the access key when the markup carries
    /// one, otherwise the document number.
    pub fn natural_id(&self) -> Option<String> {
        self.access_key
            .clone()
            .or_else(|| {
                self.number
                    .as_ref()
                    .map(|n| format!("{}-{}-{n}", self.document_type.label(), self.issuer.tax_id))
            })
    }
}
