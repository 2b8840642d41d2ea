//! 规则引擎错误类型
//!
//! 只有编译条件树时会产生错误，求值本身总是返回布尔值。

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuleError {
    #[error("条件树解析失败: {0}")]
    ParseError(String),

    #[error("规则 '{rule}' 的条件无效: {reason}")]
    InvalidCriteria { rule: String, reason: String },

    #[error("规则 '{rule}' 的正则表达式无效 '{pattern}': {source}")]
    InvalidPattern {
        rule: String,
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("JSON 序列化错误: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl RuleError {
    pub(crate) fn invalid(rule: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidCriteria {
            rule: rule.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, RuleError>;
