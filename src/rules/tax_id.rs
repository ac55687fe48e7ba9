//! CNPJ / CPF check digits (mod-11, two verifier digits each).

use crate::core::TaxIdKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaxIdProblem {
    Length { expected: usize, actual: usize },
    RepeatedDigits,
    Checksum,
}

impl TaxIdProblem {
    pub const fn as_str(self) -> &'static str {
        match self {
            TaxIdProblem::Length { .. } => "length",
            TaxIdProblem::RepeatedDigits => "repeated_digits",
            TaxIdProblem::Checksum => "checksum",
        }
    }

    pub fn describe(self) -> String {
        match self {
            TaxIdProblem::Length { expected, actual } => {
                format!("{actual} dígitos (esperado {expected})")
            }
            TaxIdProblem::RepeatedDigits => "todos os dígitos iguais".to_string(),
            TaxIdProblem::Checksum => "dígito verificador não confere".to_string(),
        }
    }
}

pub fn check(kind: TaxIdKind, digits: &str) -> Result<(), TaxIdProblem> {
    match kind {
        TaxIdKind::Cnpj => check_cnpj(digits),
        TaxIdKind::Cpf => check_cpf(digits),
    }
}

pub fn check_cnpj(digits: &str) -> Result<(), TaxIdProblem> {
    let d = to_digits(digits, 14)?;
    const W1: [u32; 12] = [5, 4, 3, 2, 9, 8, 7, 6, 5, 4, 3, 2];
    const W2: [u32; 13] = [6, 5, 4, 3, 2, 9, 8, 7, 6, 5, 4, 3, 2];
    if cnpj_digit(&d[..12], &W1) != d[12] || cnpj_digit(&d[..13], &W2) != d[13] {
        return Err(TaxIdProblem::Checksum);
    }
    Ok(())
}

pub fn check_cpf(digits: &str) -> Result<(), TaxIdProblem> {
    let d = to_digits(digits, 11)?;
    if cpf_digit(&d[..9]) != d[9] || cpf_digit(&d[..10]) != d[10] {
        return Err(TaxIdProblem::Checksum);
    }
    Ok(())
}

pub fn is_valid_cnpj(digits: &str) -> bool {
    check_cnpj(digits).is_ok()
}

pub fn is_valid_cpf(digits: &str) -> bool {
    check_cpf(digits).is_ok()
}

fn to_digits(s: &str, expected: usize) -> Result<Vec<u32>, TaxIdProblem> {
    let d: Vec<u32> = s.chars().filter_map(|c| c.to_digit(10)).collect();
    if d.len() != expected || d.len() != s.chars().count() {
        return Err(TaxIdProblem::Length {
            expected,
            actual: d.len(),
        });
    }
    if d.iter().all(|x| *x == d[0]) {
        return Err(TaxIdProblem::RepeatedDigits);
    }
    Ok(d)
}

fn cnpj_digit(d: &[u32], weights: &[u32]) -> u32 {
    let sum: u32 = d.iter().zip(weights).map(|(a, b)| a * b).sum();
    let rest = sum % 11;
    if rest < 2 { 0 } else { 11 - rest }
}

fn cpf_digit(d: &[u32]) -> u32 {
    let n = d.len() as u32 + 1;
    let sum: u32 = d.iter().enumerate().map(|(i, x)| x * (n - i as u32)).sum();
    let rest = (sum * 10) % 11;
    if rest == 10 { 0 } else { rest }
}
