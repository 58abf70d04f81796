//! Domain identifiers (strongly-typed names).
//!
//! # パスセグメントとしての ID
//! worker id も task uuid も、substrate 上ではツリーの 1 セグメントになります
//! (`/assignments/{worker}/{task}`)。なので中身は単なる文字列ですが、
//! `/` を含む値や空文字列はパスを壊すので、生成時に弾きます。
//!
//! ## Phantom Type パターン
//! `Name<T>` というジェネリック型で共通実装を提供しつつ、
//! `T` はマーカー型（PhantomData）としてコンパイル時の型安全性だけを提供します。
//! WorkerId と TaskUuid は同じ String でも混同できません。

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;

use super::errors::WeftError;

/// NameMarker は各 ID 型のマーカー trait
///
/// エラーメッセージやログで使う種別名（"worker", "task"）を提供します。
pub trait NameMarker: Send + Sync + 'static {
    fn kind() -> &'static str;
}

/// ジェネリック ID 型（パスセグメント 1 つ分）
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Name<T: NameMarker> {
    value: String,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T: NameMarker> Name<T> {
    /// 文字列を検証して Name を作成
    ///
    /// 空文字列、`/` を含む値、`.` / `..` は InvalidName になります。
    pub fn parse(value: impl Into<String>) -> Result<Self, WeftError> {
        let value = value.into();
        if value.is_empty() || value == "." || value == ".." || value.contains('/') {
            return Err(WeftError::InvalidName {
                kind: T::kind(),
                value,
            });
        }
        Ok(Self {
            value,
            _marker: PhantomData,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }
}

impl<T: NameMarker> fmt::Display for Name<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.value.fmt(f)
    }
}

impl<T: NameMarker> AsRef<str> for Name<T> {
    fn as_ref(&self) -> &str {
        &self.value
    }
}

// ========================================
// マーカー型の定義
// ========================================

/// Worker のマーカー型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Worker {}

impl NameMarker for Worker {
    fn kind() -> &'static str {
        "worker"
    }
}

/// Task のマーカー型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Task {}

impl NameMarker for Task {
    fn kind() -> &'static str {
        "task"
    }
}

/// Identifier of a worker instance (also its liveness marker name).
pub type WorkerId = Name<Worker>;

/// Identifier of a task in the global registry.
pub type TaskUuid = Name<Task>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_reject_path_breaking_values() {
        assert!(WorkerId::parse("").is_err());
        assert!(WorkerId::parse("a/b").is_err());
        assert!(TaskUuid::parse("..").is_err());

        let err = TaskUuid::parse("x/y").unwrap_err();
        assert!(err.to_string().contains("task"));
    }

    #[test]
    fn names_sort_lexicographically() {
        let mut ids = vec![
            WorkerId::parse("W2").unwrap(),
            WorkerId::parse("W10").unwrap(),
            WorkerId::parse("W1").unwrap(),
        ];
        ids.sort();
        let sorted: Vec<&str> = ids.iter().map(|id| id.as_str()).collect();
        assert_eq!(sorted, vec!["W1", "W10", "W2"]);
    }

    #[test]
    fn names_serialize_as_plain_strings() {
        let id = WorkerId::parse("sub-service-8082").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"sub-service-8082\"");

        let back: WorkerId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
