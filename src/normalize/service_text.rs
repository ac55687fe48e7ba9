use crate::core::{Document, DocumentType, Party, TaxIdKind};
use crate::normalize::{DocumentFormat, DocumentParser, NormalizeError, digits_only, parse_decimal};

/// Municipal service invoices (NFS-e) in the layout produced by extracting the
/// text of the printed document:
///
/// ```text
/// Número da Nota: 00001234
/// Data e Hora de Emissão: 15/01/2024 10:32:00
/// PRESTADOR DE SERVIÇOS
/// CPF/CNPJ: 11.222.333/0001-81
/// Nome/Razão Social: Consultoria Exemplo Ltda
/// TOMADOR DE SERVIÇOS
/// CPF/CNPJ: 529.982.247-25
/// Nome/Razão Social: Fulano de Tal
/// DISCRIMINAÇÃO DOS SERVIÇOS
/// Consultoria em sistemas - janeiro/2024
/// VALOR TOTAL DO SERVIÇO = R$ 1.500,00
/// ```
///
/// Labels are matched case- and accent-insensitively.
pub struct ServiceTextParser;

impl DocumentParser for ServiceTextParser {
    fn format(&self) -> DocumentFormat {
        DocumentFormat::ServiceText
    }

    fn parse(&self, raw: &[u8]) -> Result<Document, NormalizeError> {
        let text = std::str::from_utf8(raw).map_err(|e| {
            NormalizeError::unsupported(self.format(), format!("conteúdo não é UTF-8: {e}"))
        })?;
        let fields = collect(text)?;
        build_document(fields)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Header,
    Provider,
    Taker,
    Services,
    Trailer,
}

#[derive(Debug, Default)]
struct PartyFields {
    tax_id: Option<String>,
    name: Option<String>,
}

#[derive(Debug, Default)]
struct ServiceFields {
    number: Option<String>,
    issued_at: Option<String>,
    provider: PartyFields,
    taker: PartyFields,
    description: Vec<String>,
    total: Option<String>,
}

/// Lowercases and strips the Portuguese diacritics so labels compare equal
/// regardless of how the PDF extractor rendered them.
fn fold(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            'á' | 'à' | 'â' | 'ã' | 'ä' | 'Á' | 'À' | 'Â' | 'Ã' | 'Ä' => 'a',
            'é' | 'ê' | 'è' | 'É' | 'Ê' | 'È' => 'e',
            'í' | 'ì' | 'Í' | 'Ì' => 'i',
            'ó' | 'ô' | 'õ' | 'ò' | 'Ó' | 'Ô' | 'Õ' | 'Ò' => 'o',
            'ú' | 'ù' | 'ü' | 'Ú' | 'Ù' | 'Ü' => 'u',
            'ç' | 'Ç' => 'c',
            other => other.to_ascii_lowercase(),
        })
        .collect()
}

fn section_header(folded: &str) -> Option<Section> {
    if folded.contains("prestador de servicos") {
        Some(Section::Provider)
    } else if folded.contains("tomador de servicos") {
        Some(Section::Taker)
    } else if folded.contains("discriminacao dos servicos") {
        Some(Section::Services)
    } else {
        None
    }
}

fn split_value(line: &str) -> Option<(&str, &str)> {
    let idx = line.find([':', '='])?;
    let (label, rest) = line.split_at(idx);
    Some((label.trim(), rest[1..].trim()))
}

/// Only the service total counts; other `Valor Total ...` lines (deductions,
/// credits) share the prefix.
fn is_service_total_label(folded_label: &str) -> bool {
    folded_label == "valor total"
        || folded_label.starts_with("valor total do servico")
        || folded_label.starts_with("valor total dos servicos")
}

fn non_empty(s: &str) -> Option<String> {
    let s = s.trim();
    (!s.is_empty()).then(|| s.to_string())
}

fn collect(text: &str) -> Result<ServiceFields, NormalizeError> {
    let mut fields = ServiceFields::default();
    let mut section = Section::Header;
    let mut saw_provider = false;

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let folded = fold(line);

        if let Some(next) = section_header(&folded) {
            saw_provider |= next == Section::Provider;
            section = next;
            continue;
        }

        if folded.starts_with("valor total") {
            if let Some((label, value)) = split_value(line) {
                if fields.total.is_none() && is_service_total_label(&fold(label)) {
                    fields.total = non_empty(value);
                }
            }
            section = Section::Trailer;
            continue;
        }

        if section == Section::Services {
            fields.description.push(line.to_string());
            continue;
        }

        let Some((label, value)) = split_value(line) else {
            continue;
        };
        let label = fold(label);
        let party = match section {
            Section::Provider => Some(&mut fields.provider),
            Section::Taker => Some(&mut fields.taker),
            _ => None,
        };

        if label.contains("numero da nota") {
            fields.number = non_empty(value);
        } else if label.contains("data") && label.contains("emissao") {
            fields.issued_at = non_empty(value);
        } else if let Some(party) = party {
            if label.contains("cpf") || label.contains("cnpj") {
                party.tax_id = non_empty(value);
            } else if label.contains("razao social") || label == "nome" {
                party.name = non_empty(value);
            }
        }
    }

    if !saw_provider {
        return Err(NormalizeError::unsupported(
            DocumentFormat::ServiceText,
            "seção PRESTADOR DE SERVIÇOS não encontrada",
        ));
    }
    Ok(fields)
}

fn build_party(fields: PartyFields) -> Option<Party> {
    let tax_id = digits_only(fields.tax_id.as_deref()?);
    if tax_id.is_empty() {
        return None;
    }
    Some(Party {
        tax_id_kind: TaxIdKind::infer(&tax_id),
        tax_id,
        name: fields.name,
    })
}

fn build_document(fields: ServiceFields) -> Result<Document, NormalizeError> {
    let issuer = build_party(fields.provider)
        .ok_or_else(|| NormalizeError::malformed("CPF/CNPJ do prestador ausente"))?;
    let recipient = build_party(fields.taker);

    let total_raw = fields
        .total
        .ok_or_else(|| NormalizeError::malformed("valor total do serviço ausente"))?;
    let declared_total_value = parse_decimal(&total_raw).ok_or_else(|| {
        NormalizeError::malformed(format!("valor total do serviço inválido: '{total_raw}'"))
    })?;

    let description = fields.description.join("\n");

    Ok(Document {
        document_type: DocumentType::ServiceInvoice,
        number: fields.number,
        issued_at: fields.issued_at,
        access_key: None,
        issuer,
        recipient,
        items: Vec::new(),
        declared_total_value,
        service_description: non_empty(&description),
    })
}
