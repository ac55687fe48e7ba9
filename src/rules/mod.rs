use std::collections::BTreeSet;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::json;
use tracing::debug;

use crate::core::{Document, Finding, FindingCode, Party, TaxIdKind};
use crate::table::{Lookup, OfficialRate, VersionedTable, lookup};

pub mod tax_id;

/// CFOP codes accepted out of the box. Deployments extend the list through
/// `audit.extra_cfop`.
pub const DEFAULT_CFOP_CODES: [&str; 42] = [
    "1101", "1102", "1201", "1202", "1401", "1403", "1904", "1916", "2101", "2102", "2201", "2202",
    "2401", "2403", "2904", "2916", "3101", "3102", "3201", "3202", "5101", "5102", "5116", "5117",
    "5401", "5403", "5405", "5656", "5904", "5929", "6101", "6102", "6108", "6401", "6403", "6404",
    "6656", "6904", "6929", "7101", "7102", "7127",
];

#[derive(Debug, Clone)]
pub struct AuditSettings {
    /// Allowed absolute difference between the item sum and the document total.
    pub total_tolerance: Decimal,
    /// Allowed absolute difference, in percentage points, between the declared
    /// and the official IPI rate.
    pub rate_tolerance: Decimal,
    pub cfop_allow_list: BTreeSet<String>,
}

impl Default for AuditSettings {
    fn default() -> Self {
        Self {
            total_tolerance: dec!(0.01),
            rate_tolerance: Decimal::ZERO,
            cfop_allow_list: DEFAULT_CFOP_CODES.iter().map(|c| c.to_string()).collect(),
        }
    }
}

impl AuditSettings {
    pub fn with_extra_cfop<I, S>(mut self, extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for code in extra {
            let code = code.as_ref().trim();
            if !code.is_empty() {
                self.cfop_allow_list.insert(code.to_string());
            }
        }
        self
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RuleContext<'a> {
    pub document: &'a Document,
    pub table: &'a VersionedTable,
    pub settings: &'a AuditSettings,
}

pub type Validator = fn(&RuleContext<'_>) -> Vec<Finding>;

/// Execution order is part of the output contract: findings come out grouped
/// by validator in exactly this sequence.
pub const VALIDATORS: [(&str, Validator); 6] = [
    ("tax-id", tax_id_validity),
    ("classification-code", classification_code),
    ("tax-rate", tax_rate),
    ("value-consistency", value_consistency),
    ("cfop", cfop_validity),
    ("completeness", completeness),
];

/// Runs every validator; none of them can stop the others.
pub fn run_rules(ctx: &RuleContext<'_>) -> Vec<Finding> {
    let mut out = Vec::new();
    for (name, validator) in VALIDATORS {
        let findings = validator(ctx);
        debug!(rule = name, findings = findings.len(), "rule evaluated");
        out.extend(findings);
    }
    out
}

fn tax_id_validity(ctx: &RuleContext<'_>) -> Vec<Finding> {
    let mut out = Vec::new();
    out.extend(check_party("issuer", "emitente", &ctx.document.issuer));
    if let Some(recipient) = &ctx.document.recipient {
        out.extend(check_party("recipient", "destinatário", recipient));
    }
    out
}

fn check_party(role: &str, role_label: &str, party: &Party) -> Option<Finding> {
    let problem = tax_id::check(party.tax_id_kind, &party.tax_id).err()?;
    let code = match party.tax_id_kind {
        TaxIdKind::Cnpj => FindingCode::InvalidCnpj,
        TaxIdKind::Cpf => FindingCode::InvalidCpf,
    };
    Some(Finding::error(
        "tax-id",
        code,
        format!(
            "{} do {role_label} '{}' é inválido: {}",
            party.tax_id_kind,
            party.tax_id,
            problem.describe()
        ),
        json!({
            "party": role,
            "tax_id": party.tax_id,
            "tax_id_kind": party.tax_id_kind,
            "reason": problem.as_str(),
        }),
    ))
}

fn item_label(idx: usize, product_code: Option<&str>) -> String {
    format!("Item {} ({})", idx + 1, product_code.unwrap_or("S/C"))
}

fn classification_code(ctx: &RuleContext<'_>) -> Vec<Finding> {
    let mut out = Vec::new();
    for (idx, item) in ctx.document.items.iter().enumerate() {
        let label = item_label(idx, item.product_code.as_deref());
        let Some(ncm) = item.classification_code.as_deref() else {
            out.push(Finding::error(
                "classification-code",
                FindingCode::NcmMissing,
                format!("{label}: NCM não informado"),
                json!({ "item": idx + 1 }),
            ));
            continue;
        };
        match lookup(ctx.table, ncm) {
            Lookup::NotFound => out.push(Finding::error(
                "classification-code",
                FindingCode::NcmNotFound,
                format!(
                    "{label}: NCM '{ncm}' não encontrado na tabela {}",
                    ctx.table.version()
                ),
                json!({ "item": idx + 1, "ncm": ncm, "table_version": ctx.table.version() }),
            )),
            Lookup::Found(m) if !m.exact => out.push(Finding::info(
                "classification-code",
                FindingCode::NcmPrefixMatch,
                format!(
                    "{label}: NCM '{ncm}' resolvido pelo prefixo '{}' ({})",
                    m.entry.code, m.entry.description
                ),
                json!({ "item": idx + 1, "ncm": ncm, "matched_code": m.entry.code }),
            )),
            Lookup::Found(_) => {}
        }
    }
    out
}

fn tax_rate(ctx: &RuleContext<'_>) -> Vec<Finding> {
    let mut out = Vec::new();
    for (idx, item) in ctx.document.items.iter().enumerate() {
        let Some(ncm) = item.classification_code.as_deref() else {
            continue;
        };
        let Some(m) = lookup(ctx.table, ncm).found() else {
            continue;
        };
        let label = item_label(idx, item.product_code.as_deref());
        let official = m.entry.official_rate;

        match (official, item.declared_tax_rate) {
            (OfficialRate::Percent(expected), Some(declared)) => {
                let beyond_tolerance = declared
                    .checked_sub(expected)
                    .is_none_or(|d| d.abs() > ctx.settings.rate_tolerance);
                if beyond_tolerance {
                    out.push(Finding::warning(
                        "tax-rate",
                        FindingCode::TaxRateMismatch,
                        format!(
                            "{label}: alíquota de IPI ({}%) diverge da tabela ({}%)",
                            declared.normalize(),
                            expected.normalize()
                        ),
                        json!({
                            "item": idx + 1,
                            "ncm": ncm,
                            "matched_code": m.entry.code,
                            "declared": declared,
                            "official": expected,
                        }),
                    ));
                }
            }
            (OfficialRate::Percent(expected), None) => {
                if !expected.is_zero() {
                    out.push(Finding::info(
                        "tax-rate",
                        FindingCode::TaxRateNotDeclared,
                        format!(
                            "{label}: alíquota de IPI não informada (tabela: {}%)",
                            expected.normalize()
                        ),
                        json!({
                            "item": idx + 1,
                            "ncm": ncm,
                            "matched_code": m.entry.code,
                            "official": expected,
                        }),
                    ));
                }
            }
            (OfficialRate::Exempt | OfficialRate::NotTaxed, Some(declared))
                if !declared.is_zero() =>
            {
                out.push(Finding::error(
                    "tax-rate",
                    FindingCode::TaxRateOnUntaxed,
                    format!(
                        "{label}: alíquota de IPI {}% declarada, mas a tabela indica {}",
                        declared.normalize(),
                        official.label()
                    ),
                    json!({
                        "item": idx + 1,
                        "ncm": ncm,
                        "matched_code": m.entry.code,
                        "declared": declared,
                        "official": official,
                    }),
                ));
            }
            _ => {}
        }
    }
    out
}

fn value_consistency(ctx: &RuleContext<'_>) -> Vec<Finding> {
    let doc = ctx.document;
    if doc.items.is_empty() {
        return Vec::new();
    }
    let computed = doc
        .items
        .iter()
        .try_fold(Decimal::ZERO, |acc, i| acc.checked_add(i.total_value));
    let Some(computed) = computed else {
        return vec![total_out_of_range(ctx, None)];
    };
    let Some(difference) = computed
        .checked_sub(doc.declared_total_value)
        .map(|d| d.abs())
    else {
        return vec![total_out_of_range(ctx, Some(computed))];
    };
    if difference <= ctx.settings.total_tolerance {
        return Vec::new();
    }
    vec![Finding::error(
        "value-consistency",
        FindingCode::TotalMismatch,
        format!(
            "A soma dos itens ({}) difere do valor total da nota ({})",
            computed.round_dp(2),
            doc.declared_total_value.round_dp(2)
        ),
        json!({
            "computed_sum": computed,
            "declared_total": doc.declared_total_value,
            "difference": difference,
            "tolerance": ctx.settings.total_tolerance,
        }),
    )]
}

/// Sums past the `Decimal` range cannot be compared; they are reported as a
/// mismatch instead of aborting the audit.
fn total_out_of_range(ctx: &RuleContext<'_>, computed: Option<Decimal>) -> Finding {
    let doc = ctx.document;
    Finding::error(
        "value-consistency",
        FindingCode::TotalMismatch,
        format!(
            "A soma dos itens não pôde ser comparada ao valor total da nota ({}): valores fora do intervalo numérico",
            doc.declared_total_value.round_dp(2)
        ),
        json!({
            "computed_sum": computed,
            "declared_total": doc.declared_total_value,
            "difference": null,
            "tolerance": ctx.settings.total_tolerance,
            "overflow": true,
        }),
    )
}

fn cfop_validity(ctx: &RuleContext<'_>) -> Vec<Finding> {
    let mut out = Vec::new();
    for (idx, item) in ctx.document.items.iter().enumerate() {
        let label = item_label(idx, item.product_code.as_deref());
        match item.cfop_code.as_deref() {
            Some(cfop) if ctx.settings.cfop_allow_list.contains(cfop) => {}
            Some(cfop) => out.push(Finding::error(
                "cfop",
                FindingCode::InvalidCfop,
                format!("{label}: CFOP '{cfop}' não consta na lista de códigos válidos"),
                json!({ "item": idx + 1, "cfop": cfop }),
            )),
            None => out.push(Finding::error(
                "cfop",
                FindingCode::InvalidCfop,
                format!("{label}: CFOP não informado"),
                json!({ "item": idx + 1, "cfop": null }),
            )),
        }
    }
    out
}

fn completeness(ctx: &RuleContext<'_>) -> Vec<Finding> {
    let doc = ctx.document;
    let mut out = Vec::new();
    if doc.number.is_none() {
        out.push(Finding::error(
            "completeness",
            FindingCode::MissingDocumentNumber,
            "Número do documento não informado",
            json!({ "field": "number" }),
        ));
    }
    if doc.issued_at.is_none() {
        out.push(Finding::warning(
            "completeness",
            FindingCode::MissingIssueDate,
            "Data de emissão não informada",
            json!({ "field": "issued_at" }),
        ));
    }
    if doc.recipient.is_none() {
        out.push(Finding::warning(
            "completeness",
            FindingCode::MissingRecipient,
            "CPF/CNPJ do destinatário (tomador) não informado",
            json!({ "field": "recipient" }),
        ));
    }
    if doc.document_type == crate::core::DocumentType::ServiceInvoice
        && doc.service_description.is_none()
    {
        out.push(Finding::warning(
            "completeness",
            FindingCode::MissingServiceDescription,
            "Discriminação dos serviços não informada ou vazia",
            json!({ "field": "service_description" }),
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{DocumentType, Item, Severity};
    use crate::table::ReferenceTableEntry;

    fn party(tax_id: &str, kind: TaxIdKind) -> Party {
        Party {
            tax_id: tax_id.to_string(),
            tax_id_kind: kind,
            name: None,
        }
    }

    fn item(ncm: Option<&str>, cfop: Option<&str>, total: Decimal, rate: Option<Decimal>) -> Item {
        Item {
            product_code: None,
            description: "x".to_string(),
            classification_code: ncm.map(|s| s.to_string()),
            cfop_code: cfop.map(|s| s.to_string()),
            quantity: None,
            unit_value: None,
            total_value: total,
            declared_tax_rate: rate,
        }
    }

    fn goods(items: Vec<Item>, total: Decimal) -> Document {
        Document {
            document_type: DocumentType::GoodsInvoice,
            number: Some("1".to_string()),
            issued_at: Some("2024-01-01T00:00:00-03:00".to_string()),
            access_key: None,
            issuer: party("11222333000181", TaxIdKind::Cnpj),
            recipient: Some(party("52998224725", TaxIdKind::Cpf)),
            items,
            declared_total_value: total,
            service_description: None,
        }
    }

    fn table() -> VersionedTable {
        let e = |code: &str, rate: OfficialRate| ReferenceTableEntry {
            code: code.to_string(),
            official_rate: rate,
            description: format!("desc {code}"),
        };
        VersionedTable::from_entries(
            "test",
            None,
            vec![
                e("12345678", OfficialRate::Percent(dec!(10))),
                e("2203", OfficialRate::NotTaxed),
                e("300490", OfficialRate::Exempt),
            ],
        )
        .expect("table")
    }

    fn run(doc: &Document) -> Vec<Finding> {
        let table = table();
        let settings = AuditSettings::default();
        run_rules(&RuleContext {
            document: doc,
            table: &table,
            settings: &settings,
        })
    }

    fn codes(findings: &[Finding]) -> Vec<FindingCode> {
        findings.iter().map(|f| f.code).collect()
    }

    #[test]
    fn clean_document_has_no_findings() {
        let doc = goods(
            vec![item(Some("12345678"), Some("5102"), dec!(100.00), Some(dec!(10.00)))],
            dec!(100.00),
        );
        assert!(run(&doc).is_empty());
    }

    #[test]
    fn invalid_ids_name_the_party() {
        let mut doc = goods(
            vec![item(Some("12345678"), Some("5102"), dec!(1), Some(dec!(10)))],
            dec!(1),
        );
        doc.issuer.tax_id = "11222333000182".to_string();
        doc.recipient = Some(party("123", TaxIdKind::Cpf));
        let findings = run(&doc);
        assert_eq!(codes(&findings), vec![FindingCode::InvalidCnpj, FindingCode::InvalidCpf]);
        assert_eq!(findings[0].context["party"], "issuer");
        assert_eq!(findings[0].context["reason"], "checksum");
        assert_eq!(findings[1].context["party"], "recipient");
        assert_eq!(findings[1].context["reason"], "length");
    }

    #[test]
    fn not_found_skips_rate_check_and_other_rules_still_run() {
        let doc = goods(
            vec![item(Some("99999999"), Some("9999"), dec!(5), Some(dec!(3)))],
            dec!(7),
        );
        let findings = run(&doc);
        assert_eq!(
            codes(&findings),
            vec![
                FindingCode::NcmNotFound,
                FindingCode::TotalMismatch,
                FindingCode::InvalidCfop
            ]
        );
        assert_eq!(findings[0].context["item"], 1);
    }

    #[test]
    fn prefix_match_is_reported_as_info_and_rate_still_compared() {
        let doc = goods(
            vec![item(Some("22030000"), Some("5102"), dec!(10), Some(dec!(5)))],
            dec!(10),
        );
        let findings = run(&doc);
        assert_eq!(
            codes(&findings),
            vec![FindingCode::NcmPrefixMatch, FindingCode::TaxRateOnUntaxed]
        );
        assert_eq!(findings[0].severity, Severity::Info);
        assert_eq!(findings[1].severity, Severity::Error);
        assert_eq!(findings[1].context["official"]["kind"], "not_taxed");
    }

    #[test]
    fn exempt_with_zero_rate_is_fine() {
        let doc = goods(
            vec![item(Some("30049099"), Some("5102"), dec!(10), Some(dec!(0.00)))],
            dec!(10),
        );
        assert_eq!(codes(&run(&doc)), vec![FindingCode::NcmPrefixMatch]);
    }

    #[test]
    fn rate_mismatch_carries_both_values() {
        let doc = goods(
            vec![item(Some("12345678"), Some("5102"), dec!(10), Some(dec!(12)))],
            dec!(10),
        );
        let findings = run(&doc);
        assert_eq!(codes(&findings), vec![FindingCode::TaxRateMismatch]);
        assert_eq!(findings[0].severity, Severity::Warning);
        assert_eq!(findings[0].context["declared"], "12");
        assert_eq!(findings[0].context["official"], "10");
    }

    #[test]
    fn rate_difference_out_of_range_is_a_mismatch() {
        let doc = goods(
            vec![item(Some("12345678"), Some("5102"), dec!(10), Some(Decimal::MIN))],
            dec!(10),
        );
        assert_eq!(codes(&run(&doc)), vec![FindingCode::TaxRateMismatch]);
    }

    #[test]
    fn item_sum_out_of_range_is_a_total_mismatch() {
        let items = vec![
            item(Some("12345678"), Some("5102"), Decimal::MAX, Some(dec!(10))),
            item(Some("12345678"), Some("5102"), Decimal::MAX, Some(dec!(10))),
        ];
        let findings = run(&goods(items, dec!(1)));
        assert_eq!(codes(&findings), vec![FindingCode::TotalMismatch]);
        assert_eq!(findings[0].context["overflow"], true);
        assert!(findings[0].context["computed_sum"].is_null());
    }

    #[test]
    fn total_difference_out_of_range_is_a_total_mismatch() {
        let doc = goods(
            vec![item(Some("12345678"), Some("5102"), Decimal::MAX, Some(dec!(10)))],
            Decimal::MIN,
        );
        let findings = run(&doc);
        assert_eq!(codes(&findings), vec![FindingCode::TotalMismatch]);
        assert_eq!(findings[0].context["overflow"], true);
        assert!(!findings[0].context["computed_sum"].is_null());
    }

    #[test]
    fn missing_rate_on_taxed_item_is_info() {
        let doc = goods(
            vec![item(Some("12345678"), Some("5102"), dec!(10), None)],
            dec!(10),
        );
        assert_eq!(codes(&run(&doc)), vec![FindingCode::TaxRateNotDeclared]);
    }

    #[test]
    fn total_within_tolerance_passes_and_outside_fails_once() {
        let items = vec![
            item(Some("12345678"), Some("5102"), dec!(10.005), Some(dec!(10))),
            item(Some("12345678"), Some("5102"), dec!(20.00), Some(dec!(10))),
        ];
        assert!(run(&goods(items.clone(), dec!(30.01))).is_empty());

        let findings = run(&goods(items, dec!(30.50)));
        assert_eq!(codes(&findings), vec![FindingCode::TotalMismatch]);
        assert_eq!(findings[0].context["computed_sum"], "30.005");
        assert_eq!(findings[0].context["declared_total"], "30.50");
    }

    #[test]
    fn missing_ncm_and_cfop_are_errors() {
        let doc = goods(vec![item(None, None, dec!(1), None)], dec!(1));
        assert_eq!(
            codes(&run(&doc)),
            vec![FindingCode::NcmMissing, FindingCode::InvalidCfop]
        );
    }

    #[test]
    fn extra_cfop_extends_allow_list() {
        let settings = AuditSettings::default().with_extra_cfop(["6353", " "]);
        assert!(settings.cfop_allow_list.contains("6353"));
        assert!(!settings.cfop_allow_list.contains(""));
        assert!(settings.cfop_allow_list.contains("5102"));
    }

    #[test]
    fn service_invoice_completeness() {
        let doc = Document {
            document_type: DocumentType::ServiceInvoice,
            number: None,
            issued_at: None,
            access_key: None,
            issuer: party("11222333000181", TaxIdKind::Cnpj),
            recipient: None,
            items: vec![],
            declared_total_value: dec!(1500),
            service_description: None,
        };
        assert_eq!(
            codes(&run(&doc)),
            vec![
                FindingCode::MissingDocumentNumber,
                FindingCode::MissingIssueDate,
                FindingCode::MissingRecipient,
                FindingCode::MissingServiceDescription
            ]
        );
    }
}
