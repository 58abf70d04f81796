//! Errors - エラー型と分類
//!
//! substrate 呼び出し・リーダーシップ・payload の問題をひとつの enum にまとめ、
//! 呼び出し側が「想定内か / 一時的か / 致命的か」を判断できるよう分類を持たせます。

use thiserror::Error;

/// ErrorKind はエラーの運用分類
///
/// - Expected: 想定内（ログだけ出して先へ進む）
/// - Transient: 一時的なエラー（substrate 側のリトライに任せる）
/// - Fatal: 起動時などに発生したら続行しない
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Expected,
    Transient,
    Fatal,
}

/// WeftError はドメインエラー
#[derive(Debug, Error)]
pub enum WeftError {
    /// Session / connection failure against the coordination substrate.
    #[error("coordination substrate unavailable: {0}")]
    SubstrateUnavailable(String),

    /// A liveness marker already exists for this instance id.
    #[error("worker {0} is already registered")]
    DuplicateRegistration(String),

    #[error("node not found: {0}")]
    NotFound(String),

    /// A write was attempted after leadership had been lost.
    #[error("write to {path} fenced: leadership lost")]
    LeadershipFenced { path: String },

    #[error("malformed payload at {path}: {reason}")]
    MalformedPayload { path: String, reason: String },

    #[error("node {0} still has children")]
    NodeNotEmpty(String),

    #[error("invalid {kind} name {value:?}")]
    InvalidName { kind: &'static str, value: String },

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl WeftError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            WeftError::DuplicateRegistration(_)
            | WeftError::NotFound(_)
            | WeftError::LeadershipFenced { .. }
            | WeftError::MalformedPayload { .. } => ErrorKind::Expected,
            WeftError::SubstrateUnavailable(_) | WeftError::NodeNotEmpty(_) => {
                ErrorKind::Transient
            }
            WeftError::InvalidName { .. } | WeftError::Config(_) => ErrorKind::Fatal,
        }
    }

    pub fn is_fenced(&self) -> bool {
        matches!(self, WeftError::LeadershipFenced { .. })
    }
}

pub type Result<T> = std::result::Result<T, WeftError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fenced_writes_are_expected_outcomes() {
        let err = WeftError::LeadershipFenced {
            path: "/assignments/W1/T1".to_string(),
        };
        assert!(err.is_fenced());
        assert_eq!(err.kind(), ErrorKind::Expected);
        assert!(err.to_string().contains("/assignments/W1/T1"));
    }

    #[test]
    fn substrate_failures_are_transient() {
        let err = WeftError::SubstrateUnavailable("session expired".into());
        assert_eq!(err.kind(), ErrorKind::Transient);
        assert!(!err.is_fenced());
    }
}
