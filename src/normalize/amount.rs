use std::str::FromStr;

use rust_decimal::Decimal;

/// Parses currency and percentage text in either pt-BR (`1.234,56`) or plain
/// (`1234.56`) notation. When both separators appear, `.` groups thousands.
pub fn parse_decimal(raw: &str) -> Option<Decimal> {
    let mut s: String = raw
        .trim()
        .trim_start_matches("R$")
        .trim_end_matches('%')
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    if s.is_empty() {
        return None;
    }
    if s.contains(',') {
        if s.contains('.') {
            s = s.replace('.', "");
        }
        s = s.replace(',', ".");
    }
    Decimal::from_str(&s).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn parses_pt_br_and_plain_notation() {
        assert_eq!(parse_decimal("1.234,56"), Some(dec!(1234.56)));
        assert_eq!(parse_decimal("R$ 1.500,00"), Some(dec!(1500.00)));
        assert_eq!(parse_decimal("10,5%"), Some(dec!(10.5)));
        assert_eq!(parse_decimal("1234.56"), Some(dec!(1234.56)));
        assert_eq!(parse_decimal(" 0.10 "), Some(dec!(0.10)));
    }

    #[test]
    fn keeps_exact_scale() {
        let v = parse_decimal("100.1000").expect("parse");
        assert_eq!(v.scale(), 4);
        assert_eq!(v, dec!(100.1));
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(parse_decimal(""), None);
        assert_eq!(parse_decimal("R$"), None);
        assert_eq!(parse_decimal("abc"), None);
        assert_eq!(parse_decimal("1,2,3"), None);
    }
}
