//! 条件树领域模型

use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::str::FromStr;

/// 编译后的条件树
///
/// 顶层规则按配置中的键顺序保存；`and` / `or` 子树在所有顶层规则通过后才求值。
#[derive(Debug, Clone, Default)]
pub struct Criteria {
    pub entries: Vec<RuleEntry>,
    pub and: Vec<Criteria>,
    pub or: Vec<Criteria>,
    /// 命名规则集引用，由外部展开，这里只保留原值
    pub ruleset: Option<Value>,
}

impl Criteria {
    /// 是否没有任何条件（恒为真）
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.and.is_empty() && self.or.is_empty()
    }

    /// 按键名查找顶层规则
    pub fn entry(&self, key: &str) -> Option<&RuleEntry> {
        self.entries.iter().find(|e| e.key == key)
    }
}

/// 单条顶层规则
#[derive(Debug, Clone)]
pub struct RuleEntry {
    pub key: String,
    /// 配置中的原始值，交给用户自定义规则
    pub raw: Value,
    /// 内置规则的解析结果；被用户规则接管或未知的键为 None
    pub builtin: Option<BuiltinCriteria>,
}

/// 内置规则的条件
#[derive(Debug, Clone)]
pub enum BuiltinCriteria {
    Host(Vec<String>),
    Path(Vec<Regex>),
    Bucket(Vec<BucketRange>),
    Cookie(Vec<CookieCriterion>),
    Agent(Vec<Regex>),
    Geoip(Vec<String>),
    Device(Vec<DeviceCriterion>),
    Visitor(bool),
}

/// 分桶区间，闭区间 [min, max]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct BucketRange {
    pub min: i64,
    pub max: i64,
}

impl BucketRange {
    pub fn new(min: i64, max: i64) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, bucket: u8) -> bool {
        let bucket = i64::from(bucket);
        bucket >= self.min && bucket <= self.max
    }
}

/// Cookie 精确匹配条件
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CookieCriterion {
    pub name: String,
    pub value: String,
}

impl CookieCriterion {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// 设备类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceClass {
    Desktop,
    Phone,
    Tablet,
    Mobile,
}

impl FromStr for DeviceClass {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "desktop" => Ok(Self::Desktop),
            "phone" => Ok(Self::Phone),
            "tablet" => Ok(Self::Tablet),
            "mobile" => Ok(Self::Mobile),
            _ => Err(()),
        }
    }
}

/// 浏览器版本区间
///
/// `from` 缺省或为 0 时从 0 开始；`to` 缺省或为 0 时不设上限。
#[derive(Debug, Clone, Copy, PartialEq, Default, Deserialize)]
pub struct VersionRange {
    #[serde(default)]
    pub from: Option<f64>,
    #[serde(default)]
    pub to: Option<f64>,
}

impl VersionRange {
    pub fn contains(&self, version: f64) -> bool {
        let from = self.from.filter(|v| *v != 0.0).unwrap_or(0.0);
        let to = self.to.filter(|v| *v != 0.0).unwrap_or(f64::INFINITY);
        version >= from && version <= to
    }
}

/// 设备条件：设备类别检查和浏览器版本检查必须同时满足
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DeviceCriterion {
    /// None 表示不限设备（包括未识别的类别名）
    pub device: Option<DeviceClass>,
    pub device_type: Option<String>,
    pub browser: Option<String>,
    pub version: Option<VersionRange>,
}

impl DeviceCriterion {
    pub fn device(class: DeviceClass) -> Self {
        Self {
            device: Some(class),
            ..Default::default()
        }
    }

    pub fn browser(name: impl Into<String>, version: Option<VersionRange>) -> Self {
        Self {
            browser: Some(name.into()),
            version,
            ..Default::default()
        }
    }
}

/// 设备条件在配置中的原始形态
#[derive(Debug, Deserialize)]
pub(crate) struct RawDeviceCriterion {
    #[serde(default)]
    pub device: Option<String>,
    #[serde(default, rename = "type")]
    pub device_type: Option<String>,
    #[serde(default)]
    pub browser: Option<String>,
    #[serde(default)]
    pub version: Option<VersionRange>,
}

impl From<RawDeviceCriterion> for DeviceCriterion {
    fn from(raw: RawDeviceCriterion) -> Self {
        Self {
            device: raw.device.as_deref().and_then(|d| d.parse().ok()),
            device_type: raw.device_type.filter(|t| !t.is_empty()),
            browser: raw.browser.filter(|b| !b.is_empty()),
            version: raw.version,
        }
    }
}
