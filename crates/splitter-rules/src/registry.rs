//! 规则注册表
//!
//! 用户自定义规则覆盖同名内置规则；解析顺序为 用户规则 -> 内置规则 -> 未知。

use crate::builtins::Builtin;
use crate::request::SplitRequest;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// 用户自定义规则
///
/// 返回值应为布尔值；其他类型会被记录警告并按通过处理。
pub trait UserRule: Send + Sync {
    fn evaluate(&self, criteria: &Value, request: &SplitRequest) -> Value;
}

/// 闭包形式的用户规则
struct FnRule<F>(F);

impl<F> UserRule for FnRule<F>
where
    F: Fn(&Value, &SplitRequest) -> Value + Send + Sync,
{
    fn evaluate(&self, criteria: &Value, request: &SplitRequest) -> Value {
        (self.0)(criteria, request)
    }
}

/// 规则解析结果
pub enum Resolved<'a> {
    User(&'a dyn UserRule),
    Builtin(Builtin),
    Unknown,
}

/// 规则注册表
#[derive(Clone, Default)]
pub struct RuleRegistry {
    user_rules: HashMap<String, Arc<dyn UserRule>>,
}

impl RuleRegistry {
    /// 只包含内置规则的注册表
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册用户规则，同名时覆盖已有规则
    pub fn register(&mut self, name: impl Into<String>, rule: Arc<dyn UserRule>) {
        self.user_rules.insert(name.into(), rule);
    }

    /// 以闭包注册用户规则
    pub fn register_fn<F>(&mut self, name: impl Into<String>, rule: F)
    where
        F: Fn(&Value, &SplitRequest) -> Value + Send + Sync + 'static,
    {
        self.register(name, Arc::new(FnRule(rule)));
    }

    /// 用户规则名称
    pub fn user_rule_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.user_rules.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// 解析规则键
    pub fn resolve(&self, key: &str) -> Resolved<'_> {
        if let Some(rule) = self.user_rules.get(key) {
            return Resolved::User(rule.as_ref());
        }

        match key.parse::<Builtin>() {
            Ok(builtin) => Resolved::Builtin(builtin),
            Err(()) => Resolved::Unknown,
        }
    }
}

impl fmt::Debug for RuleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuleRegistry")
            .field("user_rules", &self.user_rule_names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_resolve_builtin_and_unknown() {
        let registry = RuleRegistry::new();
        assert!(matches!(
            registry.resolve("geoip"),
            Resolved::Builtin(Builtin::Geoip)
        ));
        assert!(matches!(registry.resolve("tenant"), Resolved::Unknown));
    }

    #[test]
    fn test_user_rule_overrides_builtin() {
        let mut registry = RuleRegistry::new();
        registry.register_fn("host", |_, _| json!(false));
        registry.register_fn("tenant", |criteria, _| json!(criteria == "acme"));

        let request = SplitRequest::builder().host("a.com").build();

        match registry.resolve("host") {
            Resolved::User(rule) => assert_eq!(rule.evaluate(&json!(["a.com"]), &request), json!(false)),
            _ => panic!("host should resolve to the user rule"),
        }
        match registry.resolve("tenant") {
            Resolved::User(rule) => assert_eq!(rule.evaluate(&json!("acme"), &request), json!(true)),
            _ => panic!("tenant should resolve to the user rule"),
        }
        assert_eq!(registry.user_rule_names(), vec!["host", "tenant"]);
    }
}
