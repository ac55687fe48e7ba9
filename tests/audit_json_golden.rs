use fiscaudit::core::{DocumentType, Finding, FindingCode, TableStamp};
use serde_json::json;

#[test]
fn audit_result_json_matches_golden() {
    let findings = vec![
        Finding::warning(
            "tax-rate",
            FindingCode::TaxRateMismatch,
            "Item 1 (P-001): alíquota de IPI (12%) diverge da tabela (10%)",
            json!({
                "item": 1,
                "ncm": "12345678",
                "matched_code": "12345678",
                "declared": "12.00",
                "official": "10",
            }),
        ),
        Finding::info(
            "classification-code",
            FindingCode::NcmPrefixMatch,
            "Item 2 (S/C): NCM '84713012' resolvido pelo prefixo '8471' (Máquinas)",
            json!({ "item": 2, "ncm": "84713012", "matched_code": "8471" }),
        ),
    ];

    let result = fiscaudit::report::build_at(
        "35240111222333000181550010000000421000000420",
        DocumentType::GoodsInvoice,
        findings,
        TableStamp {
            version: "tipi-2024-01".to_string(),
            fetched_at: Some("2024-01-15T12:00:00Z".to_string()),
        },
        "2026-01-01T00:00:00Z".to_string(),
    );

    let actual = serde_json::to_value(&result).expect("serialize result");
    let expected: serde_json::Value =
        serde_json::from_str(include_str!("golden/audit_result.json")).expect("parse golden json");

    assert_eq!(actual, expected);
}
