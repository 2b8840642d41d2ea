//! 外部协作服务接口
//!
//! GeoIP 查询与 User-Agent 设备识别都不在本 crate 内实现，由嵌入方注入。

use serde::Deserialize;
use std::collections::HashMap;

/// GeoIP 查询结果
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct GeoLocation {
    #[serde(default)]
    pub country: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub city: String,
}

impl GeoLocation {
    pub fn new(
        country: impl Into<String>,
        region: impl Into<String>,
        city: impl Into<String>,
    ) -> Self {
        Self {
            country: country.into(),
            region: region.into(),
            city: city.into(),
        }
    }

    /// `country.region.city` 形式的地理串
    pub fn geo_string(&self) -> String {
        format!("{}.{}.{}", self.country, self.region, self.city)
    }
}

/// GeoIP 查询服务
#[cfg_attr(test, mockall::automock)]
pub trait GeoIpLookup: Send + Sync {
    fn lookup(&self, addr: &str) -> Option<GeoLocation>;
}

/// 由 User-Agent 构建出的设备识别结果
///
/// 各方法返回识别到的设备名（如 "iPhone"），未识别时返回 None。
#[cfg_attr(test, mockall::automock)]
pub trait DeviceProfile: Send {
    fn mobile(&self) -> Option<String>;
    fn phone(&self) -> Option<String>;
    fn tablet(&self) -> Option<String>;
    /// 指定浏览器的版本号，未使用该浏览器时返回 None
    fn version(&self, browser: &str) -> Option<f64>;
}

/// 设备识别服务
#[cfg_attr(test, mockall::automock)]
pub trait DeviceDetector: Send + Sync {
    fn detect(&self, user_agent: &str) -> Box<dyn DeviceProfile>;
}

/// 不做任何查询的 GeoIP 服务，所有地址都解析失败
#[derive(Debug, Clone, Copy, Default)]
pub struct NoGeoIp;

impl GeoIpLookup for NoGeoIp {
    fn lookup(&self, _addr: &str) -> Option<GeoLocation> {
        None
    }
}

/// 静态地址表 GeoIP 服务
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct StaticGeoIp {
    table: HashMap<String, GeoLocation>,
}

impl StaticGeoIp {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, addr: impl Into<String>, location: GeoLocation) -> Self {
        self.table.insert(addr.into(), location);
        self
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

impl GeoIpLookup for StaticGeoIp {
    fn lookup(&self, addr: &str) -> Option<GeoLocation> {
        self.table.get(addr).cloned()
    }
}

/// 不识别任何设备的检测服务：所有请求都视为桌面端，且没有浏览器版本
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDeviceDetection;

impl DeviceDetector for NoDeviceDetection {
    fn detect(&self, _user_agent: &str) -> Box<dyn DeviceProfile> {
        Box::new(UndetectedDevice)
    }
}

#[derive(Debug, Clone, Copy)]
struct UndetectedDevice;

impl DeviceProfile for UndetectedDevice {
    fn mobile(&self) -> Option<String> {
        None
    }

    fn phone(&self) -> Option<String> {
        None
    }

    fn tablet(&self) -> Option<String> {
        None
    }

    fn version(&self, _browser: &str) -> Option<f64> {
        None
    }
}
