use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    Success,
    Failure,
    InvalidArgs,
    GateFailed,
    DocumentRejected,
    TableUnavailable,
}

impl ExitCode {
    pub const fn as_i32(self) -> i32 {
        match self {
            ExitCode::Success => 0,
            ExitCode::Failure => 1,
            ExitCode::InvalidArgs => 2,
            ExitCode::GateFailed => 3,
            ExitCode::DocumentRejected => 10,
            ExitCode::TableUnavailable => 20,
        }
    }
}

#[derive(Debug)]
pub struct ExitError {
    pub code: ExitCode,
    pub err: anyhow::Error,
}

impl ExitError {
    pub fn new(code: ExitCode, err: anyhow::Error) -> Self {
        Self { code, err }
    }
}

impl fmt::Display for ExitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.err.fmt(f)
    }
}

impl std::error::Error for ExitError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.err.as_ref())
    }
}

pub fn exit_code(err: &anyhow::Error) -> i32 {
    if let Some(exit) = err.downcast_ref::<ExitError>() {
        return exit.code.as_i32();
    }
    ExitCode::Failure.as_i32()
}

pub fn invalid_args(message: impl Into<String>) -> anyhow::Error {
    ExitError::new(ExitCode::InvalidArgs, anyhow::anyhow!(message.into())).into()
}

pub fn invalid_args_err(err: anyhow::Error) -> anyhow::Error {
    ExitError::new(ExitCode::InvalidArgs, err).into()
}

pub fn gate_failed(message: impl Into<String>) -> anyhow::Error {
    ExitError::new(ExitCode::GateFailed, anyhow::anyhow!(message.into())).into()
}

/// I/O, serialization and environment failures unrelated to any document.
pub fn failure_err(err: anyhow::Error) -> anyhow::Error {
    ExitError::new(ExitCode::Failure, err).into()
}

pub fn rejected_err(err: anyhow::Error) -> anyhow::Error {
    ExitError::new(ExitCode::DocumentRejected, err).into()
}

pub fn table_unavailable_err(err: anyhow::Error) -> anyhow::Error {
    ExitError::new(ExitCode::TableUnavailable, err).into()
}

/// Maps an engine failure onto the process exit code it stands for.
pub fn audit_err(err: crate::engine::AuditError) -> anyhow::Error {
    match err {
        crate::engine::AuditError::TableUnavailable => table_unavailable_err(err.into()),
        crate::engine::AuditError::Normalize(_) => rejected_err(err.into()),
        crate::engine::AuditError::Internal(_) => failure_err(err.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::AuditError;
    use crate::normalize::NormalizeError;

    #[test]
    fn codes_follow_the_documented_table() {
        assert_eq!(exit_code(&invalid_args("x")), 2);
        assert_eq!(exit_code(&gate_failed("x")), 3);
        assert_eq!(
            exit_code(&audit_err(AuditError::Normalize(NormalizeError::MalformedDocument {
                reason: "x".to_string()
            }))),
            10
        );
        assert_eq!(exit_code(&audit_err(AuditError::TableUnavailable)), 20);
        assert_eq!(exit_code(&audit_err(AuditError::Internal("x".to_string()))), 1);
    }

    #[test]
    fn untyped_errors_are_not_reported_as_rejections() {
        assert_eq!(exit_code(&anyhow::anyhow!("disco cheio")), 1);
        assert_eq!(exit_code(&failure_err(anyhow::anyhow!("x"))), 1);
        assert_eq!(exit_code(&rejected_err(anyhow::anyhow!("x"))), 10);
    }
}
