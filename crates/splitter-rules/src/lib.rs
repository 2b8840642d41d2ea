//! 分流规则引擎
//!
//! 判定单个请求是否满足声明式配置的条件树，用于流量拆分、灰度路由和功能开关：
//! - JSON 条件树解析与编译
//! - AND / OR 子树短路求值
//! - 用户自定义规则覆盖内置规则
//! - 内置匹配器：host、path、bucket、cookie、agent、geoip、device、visitor

pub mod builtins;
pub mod compiler;
pub mod config;
pub mod error;
pub mod executor;
pub mod logging;
pub mod matchers;
pub mod models;
pub mod observability;
pub mod options;
pub mod registry;
pub mod request;
pub mod services;

pub use builtins::Builtin;
pub use compiler::CriteriaCompiler;
pub use config::EngineConfig;
pub use error::{Result, RuleError};
pub use executor::{RuleEngine, RuleEngineBuilder};
pub use logging::{RecordingSink, RuleWarning, TracingSink, WarningSink};
pub use matchers::{BuiltinMatcher, calculate_bucket, geo_matches};
pub use models::{
    BucketRange, BuiltinCriteria, CookieCriterion, Criteria, DeviceClass, DeviceCriterion,
    RuleEntry, VersionRange,
};
pub use options::{EvaluationOptions, GeoResolution};
pub use registry::{RuleRegistry, UserRule};
pub use request::{RequestAnnotations, SplitRequest};
pub use services::{
    DeviceDetector, DeviceProfile, GeoIpLookup, GeoLocation, NoDeviceDetection, NoGeoIp,
    StaticGeoIp,
};
