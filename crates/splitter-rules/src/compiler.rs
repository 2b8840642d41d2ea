//! 条件树编译器
//!
//! 将 JSON 条件树解析为 [`Criteria`]，校验内置规则的条件形态并预编译正则。

use crate::builtins::Builtin;
use crate::error::{Result, RuleError};
use crate::models::{
    BucketRange, BuiltinCriteria, CookieCriterion, Criteria, DeviceCriterion, RawDeviceCriterion,
    RuleEntry,
};
use crate::registry::RuleRegistry;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashSet;

/// 条件树编译器
#[derive(Debug, Default)]
pub struct CriteriaCompiler {
    /// 由用户规则接管的键，编译时只保留原值
    user_rules: HashSet<String>,
}

impl CriteriaCompiler {
    /// 只认识内置规则的编译器
    pub fn new() -> Self {
        Self::default()
    }

    /// 使用注册表中的用户规则名称
    pub fn for_registry(registry: &RuleRegistry) -> Self {
        Self {
            user_rules: registry
                .user_rule_names()
                .into_iter()
                .map(str::to_string)
                .collect(),
        }
    }

    /// 从 JSON 字符串编译
    pub fn compile_from_json(&self, json: &str) -> Result<Criteria> {
        let value: Value = serde_json::from_str(json)?;
        self.compile(&value)
    }

    /// 编译条件树，`null` 编译为空树
    pub fn compile(&self, value: &Value) -> Result<Criteria> {
        let map = match value {
            Value::Null => return Ok(Criteria::default()),
            Value::Object(map) => map,
            other => {
                return Err(RuleError::ParseError(format!(
                    "条件树必须是对象，实际为 {}",
                    type_name(other)
                )));
            }
        };

        let mut criteria = Criteria::default();
        for (key, raw) in map {
            match key.as_str() {
                "and" => criteria.and = self.compile_subtrees(key, raw)?,
                "or" => criteria.or = self.compile_subtrees(key, raw)?,
                "ruleset" => criteria.ruleset = Some(raw.clone()),
                _ => criteria.entries.push(self.compile_entry(key, raw)?),
            }
        }

        Ok(criteria)
    }

    fn compile_subtrees(&self, key: &str, raw: &Value) -> Result<Vec<Criteria>> {
        match raw {
            Value::Null => Ok(Vec::new()),
            Value::Array(items) => items.iter().map(|item| self.compile(item)).collect(),
            other => Err(RuleError::invalid(
                key,
                format!("期望子树数组，实际为 {}", type_name(other)),
            )),
        }
    }

    fn compile_entry(&self, key: &str, raw: &Value) -> Result<RuleEntry> {
        let builtin = if self.user_rules.contains(key) {
            None
        } else {
            match key.parse::<Builtin>() {
                Ok(builtin) => Some(compile_builtin(builtin, raw)?),
                Err(()) => None,
            }
        };

        Ok(RuleEntry {
            key: key.to_string(),
            raw: raw.clone(),
            builtin,
        })
    }
}

/// 编译内置规则的条件
pub fn compile_builtin(builtin: Builtin, raw: &Value) -> Result<BuiltinCriteria> {
    let criteria = match builtin {
        Builtin::Host => BuiltinCriteria::Host(strings(builtin, raw)?),
        Builtin::Path => BuiltinCriteria::Path(patterns(builtin, raw)?),
        Builtin::Agent => BuiltinCriteria::Agent(patterns(builtin, raw)?),
        Builtin::Geoip => BuiltinCriteria::Geoip(strings(builtin, raw)?),
        Builtin::Bucket => BuiltinCriteria::Bucket(objects::<BucketRange>(builtin, raw)?),
        Builtin::Cookie => BuiltinCriteria::Cookie(objects::<CookieCriterion>(builtin, raw)?),
        Builtin::Device => BuiltinCriteria::Device(
            objects::<RawDeviceCriterion>(builtin, raw)?
                .into_iter()
                .map(DeviceCriterion::from)
                .collect(),
        ),
        Builtin::Visitor => BuiltinCriteria::Visitor(truthy(raw)),
    };

    Ok(criteria)
}

fn list(builtin: Builtin, raw: &Value) -> Result<&Vec<Value>> {
    raw.as_array().ok_or_else(|| {
        RuleError::invalid(
            builtin.as_str(),
            format!("期望数组，实际为 {}", type_name(raw)),
        )
    })
}

fn strings(builtin: Builtin, raw: &Value) -> Result<Vec<String>> {
    list(builtin, raw)?
        .iter()
        .map(|item| {
            item.as_str().map(str::to_string).ok_or_else(|| {
                RuleError::invalid(
                    builtin.as_str(),
                    format!("期望字符串元素，实际为 {}", type_name(item)),
                )
            })
        })
        .collect()
}

fn patterns(builtin: Builtin, raw: &Value) -> Result<Vec<Regex>> {
    strings(builtin, raw)?
        .into_iter()
        .map(|pattern| {
            Regex::new(&pattern).map_err(|source| RuleError::InvalidPattern {
                rule: builtin.as_str().to_string(),
                pattern,
                source,
            })
        })
        .collect()
}

fn objects<'de, T>(builtin: Builtin, raw: &'de Value) -> Result<Vec<T>>
where
    T: Deserialize<'de>,
{
    list(builtin, raw)?
        .iter()
        .map(|item| {
            T::deserialize(item).map_err(|e| RuleError::invalid(builtin.as_str(), e.to_string()))
        })
        .collect()
}

/// JSON 值的真假判断：null、false、0、空串为假
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// 获取值的类型名称
pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
