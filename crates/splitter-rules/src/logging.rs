//! 求值警告输出
//!
//! 未知规则和返回非布尔值的自定义规则按"通过"处理，同时通过 [`WarningSink`] 报告。

use crate::compiler::type_name;
use parking_lot::Mutex;
use serde_json::Value;
use std::fmt;
use tracing::warn;

/// 放行规则时产生的警告
#[derive(Debug, Clone, PartialEq)]
pub enum RuleWarning {
    /// 自定义规则返回了非布尔值
    InvalidReturn { rule: String, value: Value },
    /// 既不是用户规则也不是内置规则
    MissingEvaluator { rule: String },
    /// 内置规则的条件在求值时才编译，且编译失败
    InvalidCriteria { rule: String, error: String },
}

impl RuleWarning {
    pub fn rule(&self) -> &str {
        match self {
            Self::InvalidReturn { rule, .. }
            | Self::MissingEvaluator { rule }
            | Self::InvalidCriteria { rule, .. } => rule,
        }
    }
}

impl fmt::Display for RuleWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidReturn { rule, value } => write!(
                f,
                "Custom rule '{}' ignored! It returned {} (type: {}) when it should've returned a boolean.",
                rule,
                value,
                type_name(value)
            ),
            Self::MissingEvaluator { rule } => {
                write!(f, "Callback to evaluate rule '{}' not found. Rule ignored.", rule)
            }
            Self::InvalidCriteria { rule, error } => {
                write!(
                    f,
                    "Criteria for rule '{}' are invalid ({}). Rule ignored.",
                    rule, error
                )
            }
        }
    }
}

/// 警告接收方
pub trait WarningSink: Send + Sync {
    fn warn(&self, warning: &RuleWarning);
}

/// 输出到 tracing 的默认实现
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl WarningSink for TracingSink {
    fn warn(&self, warning: &RuleWarning) {
        match warning {
            RuleWarning::InvalidReturn { rule, value } => warn!(
                rule = %rule,
                value = %value,
                value_type = type_name(value),
                "{}",
                warning
            ),
            RuleWarning::MissingEvaluator { rule } => warn!(rule = %rule, "{}", warning),
            RuleWarning::InvalidCriteria { rule, error } => {
                warn!(rule = %rule, error = %error, "{}", warning)
            }
        }
    }
}

/// 记录所有警告，供嵌入方检查
#[derive(Debug, Default)]
pub struct RecordingSink {
    warnings: Mutex<Vec<RuleWarning>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn warnings(&self) -> Vec<RuleWarning> {
        self.warnings.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.warnings.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.warnings.lock().is_empty()
    }

    pub fn clear(&self) {
        self.warnings.lock().clear();
    }
}

impl WarningSink for RecordingSink {
    fn warn(&self, warning: &RuleWarning) {
        self.warnings.lock().push(warning.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_warning_messages() {
        let invalid = RuleWarning::InvalidReturn {
            rule: "tenant".into(),
            value: json!("yes"),
        };
        assert_eq!(
            invalid.to_string(),
            "Custom rule 'tenant' ignored! It returned \"yes\" (type: string) when it should've returned a boolean."
        );

        let missing = RuleWarning::MissingEvaluator {
            rule: "unknownKey".into(),
        };
        assert_eq!(
            missing.to_string(),
            "Callback to evaluate rule 'unknownKey' not found. Rule ignored."
        );
        assert_eq!(missing.rule(), "unknownKey");

        let invalid_criteria = RuleWarning::InvalidCriteria {
            rule: "host".into(),
            error: "期望数组".into(),
        };
        assert_eq!(
            invalid_criteria.to_string(),
            "Criteria for rule 'host' are invalid (期望数组). Rule ignored."
        );
    }

    #[test]
    fn test_recording_sink() {
        let sink = RecordingSink::new();
        assert!(sink.is_empty());

        sink.warn(&RuleWarning::MissingEvaluator { rule: "a".into() });
        sink.warn(&RuleWarning::MissingEvaluator { rule: "b".into() });
        assert_eq!(sink.len(), 2);
        assert_eq!(sink.warnings()[1].rule(), "b");

        sink.clear();
        assert!(sink.is_empty());
    }
}
