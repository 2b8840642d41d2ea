//! 配置管理模块
//!
//! 支持配置文件加载与 `SPLITTER_` 前缀环境变量覆盖。

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;

/// 日志配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub log_level: String,
    /// 是否输出 JSON 格式日志
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

/// 引擎配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// 标识老访客的 cookie 名称
    pub visitor_cookie: String,
    /// 覆盖来源 IP 的路由参数名
    pub override_ip_param: String,
    pub forwarded_for_header: String,
    pub observability: ObservabilityConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            visitor_cookie: "bid".to_string(),
            override_ip_param: "splitterIP".to_string(),
            forwarded_for_header: "x-forwarded-for".to_string(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl EngineConfig {
    /// 从配置目录和环境变量加载配置
    ///
    /// 加载顺序（后加载的覆盖先加载的）：
    /// 1. 内置默认值
    /// 2. {config_dir}/default.toml
    /// 3. {config_dir}/{environment}.toml（SPLITTER_ENV，默认 development）
    /// 4. 环境变量（SPLITTER_ 前缀，嵌套键用 `__` 分隔，如 SPLITTER_OBSERVABILITY__LOG_LEVEL）
    pub fn load(config_dir: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();
        let env = std::env::var("SPLITTER_ENV").unwrap_or_else(|_| "development".to_string());

        Config::builder()
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            .add_source(File::from(config_dir.join(format!("{}.toml", env))).required(false))
            .add_source(
                Environment::with_prefix("SPLITTER")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.visitor_cookie, "bid");
        assert_eq!(config.override_ip_param, "splitterIP");
        assert_eq!(config.forwarded_for_header, "x-forwarded-for");
        assert_eq!(config.observability.log_level, "info");
    }

    #[test]
    fn test_load_missing_dir_uses_defaults() {
        let config = EngineConfig::load("does/not/exist").unwrap();
        assert_eq!(config.visitor_cookie, "bid");
    }

    #[test]
    fn test_load_from_file() {
        let dir = std::env::temp_dir().join(format!("splitter-config-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join("default.toml"),
            "visitor_cookie = \"visit_id\"\n\n[observability]\njson_logs = true\n",
        )
        .unwrap();

        let config = EngineConfig::load(&dir).unwrap();
        assert_eq!(config.visitor_cookie, "visit_id");
        assert!(config.observability.json_logs);
        assert_eq!(config.observability.log_level, "info");
        assert_eq!(config.override_ip_param, "splitterIP");

        fs::remove_dir_all(&dir).unwrap();
    }
}
