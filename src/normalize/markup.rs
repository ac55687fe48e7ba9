use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use rust_decimal::Decimal;

use crate::core::{Document, DocumentType, Item, Party, TaxIdKind};
use crate::normalize::{
    DocumentFormat, DocumentParser, NormalizeError, digits_only, normalize_ncm, parse_decimal,
};

/// NF-e and CT-e documents, with or without the `*Proc` envelope. Element
/// names are matched on their local part so namespace prefixes do not matter.
pub struct MarkupParser;

impl DocumentParser for MarkupParser {
    fn format(&self) -> DocumentFormat {
        DocumentFormat::Markup
    }

    fn parse(&self, raw: &[u8]) -> Result<Document, NormalizeError> {
        let text = std::str::from_utf8(raw).map_err(|e| {
            NormalizeError::unsupported(self.format(), format!("conteúdo não é UTF-8: {e}"))
        })?;
        let fields = collect(text)?;
        build_document(fields)
    }
}

#[derive(Debug, Default)]
struct PartyFields {
    tax_id: Option<(String, TaxIdKind)>,
    name: Option<String>,
}

#[derive(Debug, Default)]
struct ItemFields {
    product_code: Option<String>,
    description: Option<String>,
    ncm: Option<String>,
    cfop: Option<String>,
    quantity: Option<String>,
    unit_value: Option<String>,
    total_value: Option<String>,
    ipi_rate: Option<String>,
}

#[derive(Debug, Default)]
struct MarkupFields {
    document_type: Option<DocumentType>,
    access_key: Option<String>,
    number: Option<String>,
    issued_at: Option<String>,
    issuer: PartyFields,
    recipient: PartyFields,
    items: Vec<ItemFields>,
    invoice_total: Option<String>,
    service_total: Option<String>,
}

fn root_document_type(name: &str) -> Option<DocumentType> {
    match name {
        "nfeProc" | "NFe" => Some(DocumentType::GoodsInvoice),
        "cteProc" | "CTe" => Some(DocumentType::TransportManifest),
        _ => None,
    }
}

fn local_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).into_owned()
}

fn id_attribute(e: &BytesStart<'_>) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.local_name().as_ref() == b"Id")
        .and_then(|a| a.unescape_value().ok())
        .map(|v| v.into_owned())
}

fn collect(text: &str) -> Result<MarkupFields, NormalizeError> {
    let unsupported = |reason: String| NormalizeError::unsupported(DocumentFormat::Markup, reason);

    let mut reader = Reader::from_str(text);
    reader.config_mut().trim_text(true);

    let mut fields = MarkupFields::default();
    let mut stack: Vec<String> = Vec::new();
    let mut current_item: Option<ItemFields> = None;
    let mut saw_root = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => {
                let name = local_name(e);
                if !saw_root {
                    saw_root = true;
                    fields.document_type = root_document_type(&name);
                    if fields.document_type.is_none() {
                        return Err(unsupported(format!(
                            "elemento raiz <{name}> não é NF-e nem CT-e"
                        )));
                    }
                }
                match name.as_str() {
                    "infNFe" | "infCTe" => {
                        fields.access_key = id_attribute(e).map(|id| {
                            id.trim_start_matches("NFe")
                                .trim_start_matches("CTe")
                                .to_string()
                        });
                    }
                    "det" => current_item = Some(ItemFields::default()),
                    _ => {}
                }
                stack.push(name);
            }
            Ok(Event::Empty(ref e)) => {
                if !saw_root {
                    let name = local_name(e);
                    return Err(unsupported(format!("elemento raiz <{name}/> vazio")));
                }
            }
            Ok(Event::End(_)) => {
                if let Some(name) = stack.pop() {
                    if name == "det" {
                        if let Some(item) = current_item.take() {
                            fields.items.push(item);
                        }
                    }
                }
            }
            Ok(Event::Text(ref e)) => {
                let value = e
                    .unescape()
                    .map_err(|err| unsupported(format!("texto XML inválido: {err}")))?;
                let value = value.trim();
                if value.is_empty() {
                    continue;
                }
                assign(&mut fields, current_item.as_mut(), &stack, value);
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(err) => {
                return Err(unsupported(format!(
                    "XML mal formado na posição {}: {err}",
                    reader.error_position()
                )));
            }
        }
    }

    if !saw_root {
        return Err(unsupported("nenhum elemento XML encontrado".to_string()));
    }
    if !stack.is_empty() {
        return Err(unsupported(format!(
            "XML truncado: <{}> não foi fechado",
            stack.join("/")
        )));
    }
    Ok(fields)
}

fn assign(fields: &mut MarkupFields, item: Option<&mut ItemFields>, stack: &[String], value: &str) {
    let [.., parent, leaf] = stack else {
        return;
    };
    let value = value.to_string();
    match (parent.as_str(), leaf.as_str()) {
        ("ide", "nNF" | "nCT") => fields.number = Some(value),
        ("ide", "dhEmi") => fields.issued_at = Some(value),
        ("emit", "CNPJ") => fields.issuer.tax_id = Some((value, TaxIdKind::Cnpj)),
        ("emit", "CPF") => fields.issuer.tax_id = Some((value, TaxIdKind::Cpf)),
        ("emit", "xNome") => fields.issuer.name = Some(value),
        ("dest", "CNPJ") => fields.recipient.tax_id = Some((value, TaxIdKind::Cnpj)),
        ("dest", "CPF") => fields.recipient.tax_id = Some((value, TaxIdKind::Cpf)),
        ("dest", "xNome") => fields.recipient.name = Some(value),
        ("ICMSTot", "vNF") => fields.invoice_total = Some(value),
        ("vPrest", "vTPrest") => fields.service_total = Some(value),
        ("prod", _) | ("IPITrib", "pIPI") => {
            let Some(item) = item else {
                return;
            };
            match leaf.as_str() {
                "cProd" => item.product_code = Some(value),
                "xProd" => item.description = Some(value),
                "NCM" => item.ncm = Some(value),
                "CFOP" => item.cfop = Some(value),
                "qCom" => item.quantity = Some(value),
                "vUnCom" => item.unit_value = Some(value),
                "vProd" => item.total_value = Some(value),
                "pIPI" => item.ipi_rate = Some(value),
                _ => {}
            }
        }
        _ => {}
    }
}

fn build_document(fields: MarkupFields) -> Result<Document, NormalizeError> {
    let document_type = fields.document_type.ok_or_else(|| {
        NormalizeError::unsupported(DocumentFormat::Markup, "tipo de documento desconhecido")
    })?;

    let issuer = build_party(fields.issuer)
        .ok_or_else(|| NormalizeError::malformed("CNPJ/CPF do emitente ausente"))?;
    let recipient = build_party(fields.recipient);

    let items = fields
        .items
        .into_iter()
        .enumerate()
        .map(|(idx, item)| build_item(idx + 1, item))
        .collect::<Result<Vec<_>, _>>()?;

    let total_raw = fields
        .invoice_total
        .or(fields.service_total)
        .ok_or_else(|| NormalizeError::malformed("valor total do documento ausente"))?;
    let declared_total_value = parse_decimal(&total_raw).ok_or_else(|| {
        NormalizeError::malformed(format!("valor total do documento inválido: '{total_raw}'"))
    })?;

    Ok(Document {
        document_type,
        number: fields.number,
        issued_at: fields.issued_at,
        access_key: fields.access_key.filter(|k| !k.is_empty()),
        issuer,
        recipient,
        items,
        declared_total_value,
        service_description: None,
    })
}

fn build_party(fields: PartyFields) -> Option<Party> {
    let (raw, kind) = fields.tax_id?;
    let tax_id = digits_only(&raw);
    if tax_id.is_empty() {
        return None;
    }
    Some(Party {
        tax_id,
        tax_id_kind: kind,
        name: fields.name,
    })
}

fn build_item(item_no: usize, fields: ItemFields) -> Result<Item, NormalizeError> {
    let parse_opt = |label: &str, raw: Option<String>| -> Result<Option<Decimal>, NormalizeError> {
        match raw {
            None => Ok(None),
            Some(raw) => parse_decimal(&raw).map(Some).ok_or_else(|| {
                NormalizeError::malformed(format!("item {item_no}: {label} inválido: '{raw}'"))
            }),
        }
    };

    let quantity = parse_opt("qCom", fields.quantity)?;
    let unit_value = parse_opt("vUnCom", fields.unit_value)?;
    let declared_tax_rate = parse_opt("pIPI", fields.ipi_rate)?;
    let total_value = match parse_opt("vProd", fields.total_value)? {
        Some(v) => v,
        None => match (quantity, unit_value) {
            (Some(q), Some(u)) => q.checked_mul(u).ok_or_else(|| {
                NormalizeError::malformed(format!(
                    "item {item_no}: qCom x vUnCom excede o intervalo numérico"
                ))
            })?,
            _ => {
                return Err(NormalizeError::malformed(format!(
                    "item {item_no}: valor total ausente"
                )));
            }
        },
    };
    let classification_code = fields
        .ncm
        .map(|ncm| normalize_ncm(&ncm, item_no))
        .transpose()?;

    Ok(Item {
        product_code: fields.product_code,
        description: fields.description.unwrap_or_default(),
        classification_code,
        cfop_code: fields.cfop.map(|c| c.trim().to_string()),
        quantity,
        unit_value,
        total_value,
        declared_tax_rate,
    })
}
