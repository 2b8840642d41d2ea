//! 内置规则名称定义

use std::fmt;
use std::str::FromStr;

/// 内置匹配器
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Builtin {
    // 请求基本信息
    Host,
    Path,
    Agent,
    Cookie,

    // 分桶
    Bucket,

    // 需要外部服务
    Geoip,
    Device,

    // 访客识别
    Visitor,
}

impl Builtin {
    pub const ALL: [Builtin; 8] = [
        Self::Host,
        Self::Path,
        Self::Bucket,
        Self::Cookie,
        Self::Agent,
        Self::Geoip,
        Self::Device,
        Self::Visitor,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Host => "host",
            Self::Path => "path",
            Self::Bucket => "bucket",
            Self::Cookie => "cookie",
            Self::Agent => "agent",
            Self::Geoip => "geoip",
            Self::Device => "device",
            Self::Visitor => "visitor",
        }
    }
}

impl fmt::Display for Builtin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Builtin {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|builtin| builtin.as_str() == s)
            .ok_or(())
    }
}
