//! 内置匹配器
//!
//! 八个内置规则的判定逻辑。条件列表为空时一律视为满足；
//! 请求缺少所需数据（请求头、cookie 表、URL）或 GeoIP 解析失败时判定为不满足。

use crate::config::EngineConfig;
use crate::models::{BucketRange, BuiltinCriteria, CookieCriterion, DeviceClass, DeviceCriterion};
use crate::options::{EvaluationOptions, GeoResolution};
use crate::request::SplitRequest;
use crate::services::{DeviceDetector, DeviceProfile, GeoIpLookup, NoDeviceDetection, NoGeoIp};
use regex::Regex;
use std::sync::Arc;
use tracing::debug;

/// 由 browser id 计算分桶值（0-100）
///
/// 取 id 的最后两个字符按十六进制解析（只读取开头的合法十六进制位），
/// 再按 `round(value / 255 * 100)` 缩放。同一个 id 总是得到同一个桶。
pub fn calculate_bucket(bid: &str) -> Option<u8> {
    let chars: Vec<char> = bid.chars().collect();
    let digits: String = chars[chars.len().saturating_sub(2)..]
        .iter()
        .take_while(|c| c.is_ascii_hexdigit())
        .collect();

    let value = u8::from_str_radix(&digits, 16).ok()?;
    Some((f64::from(value) / 255.0 * 100.0).round() as u8)
}

/// 地理条件匹配：完全相等，或以 `.` 结尾时只比较国家段
pub fn geo_matches(criterion: &str, geo: &str) -> bool {
    if criterion == geo {
        return true;
    }
    if !criterion.ends_with('.') {
        return false;
    }

    criterion.split('.').next() == geo.split('.').next()
}

/// 内置匹配器集合
#[derive(Clone)]
pub struct BuiltinMatcher {
    geoip: Arc<dyn GeoIpLookup>,
    devices: Arc<dyn DeviceDetector>,
    visitor_cookie: String,
    override_ip_param: String,
    forwarded_for_header: String,
}

impl BuiltinMatcher {
    pub fn new(geoip: Arc<dyn GeoIpLookup>, devices: Arc<dyn DeviceDetector>) -> Self {
        let defaults = EngineConfig::default();
        Self {
            geoip,
            devices,
            visitor_cookie: defaults.visitor_cookie,
            override_ip_param: defaults.override_ip_param,
            forwarded_for_header: defaults.forwarded_for_header,
        }
    }

    /// 应用配置中的 cookie / 参数 / 请求头名称
    pub fn with_config(mut self, config: &EngineConfig) -> Self {
        self.visitor_cookie = config.visitor_cookie.clone();
        self.override_ip_param = config.override_ip_param.clone();
        self.forwarded_for_header = config.forwarded_for_header.clone();
        self
    }

    /// 评估内置规则
    pub fn evaluate(
        &self,
        criteria: &BuiltinCriteria,
        request: &mut SplitRequest,
        options: &mut EvaluationOptions,
    ) -> bool {
        match criteria {
            BuiltinCriteria::Host(hosts) => Self::host(hosts, request),
            BuiltinCriteria::Path(patterns) => Self::path(patterns, request),
            BuiltinCriteria::Bucket(ranges) => Self::bucket(ranges, request, options),
            BuiltinCriteria::Cookie(cookies) => Self::cookie(cookies, request),
            BuiltinCriteria::Agent(patterns) => Self::agent(patterns, request),
            BuiltinCriteria::Geoip(geos) => self.geoip(geos, request, options),
            BuiltinCriteria::Device(devices) => self.device(devices, request, options),
            BuiltinCriteria::Visitor(new_only) => self.visitor(*new_only, request),
        }
    }

    pub fn host(hosts: &[String], request: &SplitRequest) -> bool {
        if hosts.is_empty() {
            return true;
        }
        let Some(host) = request.host() else {
            return false;
        };

        hosts.iter().any(|h| h == host)
    }

    pub fn path(patterns: &[Regex], request: &SplitRequest) -> bool {
        if patterns.is_empty() {
            return true;
        }
        let Some(url) = request.url() else {
            return false;
        };

        patterns.iter().any(|p| p.is_match(url))
    }

    /// 分桶判定，同时标记请求需要下发 browser id
    pub fn bucket(
        ranges: &[BucketRange],
        request: &mut SplitRequest,
        options: &mut EvaluationOptions,
    ) -> bool {
        if ranges.is_empty() {
            return true;
        }

        let bucket = options.bucket_or_insert_with(|| {
            let bucket = request.bid.as_deref().and_then(calculate_bucket);
            debug!(bid = ?request.bid, ?bucket, "bucket computed");
            bucket
        });

        request.annotations.emit_bid = true;

        bucket.is_some_and(|b| ranges.iter().any(|r| r.contains(b)))
    }

    pub fn cookie(cookies: &[CookieCriterion], request: &SplitRequest) -> bool {
        if cookies.is_empty() {
            return true;
        }
        if !request.has_cookie_map() {
            return false;
        }

        cookies
            .iter()
            .any(|c| request.cookie(&c.name) == Some(c.value.as_str()))
    }

    pub fn agent(patterns: &[Regex], request: &SplitRequest) -> bool {
        if patterns.is_empty() {
            return true;
        }
        let Some(agent) = request.user_agent() else {
            return false;
        };

        patterns.iter().any(|p| p.is_match(agent))
    }

    pub fn geoip(
        &self,
        geos: &[String],
        request: &SplitRequest,
        options: &mut EvaluationOptions,
    ) -> bool {
        if geos.is_empty() {
            return true;
        }

        match options.geo_or_insert_with(|| self.resolve_geo(request)) {
            GeoResolution::NotFound => false,
            GeoResolution::Resolved(geo) => geos.iter().any(|g| geo_matches(g, geo)),
        }
    }

    /// 解析请求来源地址对应的地理串
    ///
    /// 地址优先级：覆盖参数 > X-Forwarded-For 第一项 > 连接远端地址
    pub fn resolve_geo(&self, request: &SplitRequest) -> GeoResolution {
        let forwarded = request
            .header(&self.forwarded_for_header)
            .and_then(|value| value.split(',').next())
            .map(str::trim)
            .filter(|addr| !addr.is_empty());

        let Some(addr) = request
            .param(&self.override_ip_param)
            .or(forwarded)
            .or_else(|| request.remote_addr())
        else {
            debug!("no address available for geoip lookup");
            return GeoResolution::NotFound;
        };

        match self.geoip.lookup(addr) {
            Some(location) => {
                let geo = location.geo_string();
                debug!(addr, geo = %geo, "geoip resolved");
                GeoResolution::Resolved(geo)
            }
            None => {
                debug!(addr, "geoip lookup found nothing");
                GeoResolution::NotFound
            }
        }
    }

    pub fn device(
        &self,
        devices: &[DeviceCriterion],
        request: &SplitRequest,
        options: &mut EvaluationOptions,
    ) -> bool {
        if devices.is_empty() {
            return true;
        }
        let Some(agent) = request.user_agent() else {
            return false;
        };

        let profile = options.device_or_insert_with(|| self.devices.detect(agent));
        devices
            .iter()
            .any(|d| device_class_matches(profile, d) && browser_version_matches(profile, d))
    }

    /// 没有访问 cookie 的请求视为新访客；配置值为 true 表示只要新访客
    pub fn visitor(&self, new_only: bool, request: &SplitRequest) -> bool {
        if !request.has_cookie_map() {
            return new_only;
        }

        if request.cookie(&self.visitor_cookie).is_some() {
            !new_only
        } else {
            new_only
        }
    }
}

impl Default for BuiltinMatcher {
    fn default() -> Self {
        Self::new(Arc::new(NoGeoIp), Arc::new(NoDeviceDetection))
    }
}

fn device_class_matches(profile: &dyn DeviceProfile, criterion: &DeviceCriterion) -> bool {
    let Some(class) = criterion.device else {
        return true;
    };

    let detected = match class {
        DeviceClass::Desktop => {
            return profile.mobile().filter(|name| !name.is_empty()).is_none();
        }
        DeviceClass::Phone => profile.phone(),
        DeviceClass::Tablet => profile.tablet(),
        DeviceClass::Mobile => profile.mobile(),
    }
    .filter(|name| !name.is_empty());

    match &criterion.device_type {
        Some(expected) => detected.as_deref() == Some(expected.as_str()),
        None => detected.is_some(),
    }
}

fn browser_version_matches(profile: &dyn DeviceProfile, criterion: &DeviceCriterion) -> bool {
    let Some(browser) = &criterion.browser else {
        return true;
    };

    // 版本号为 0 等同于未识别
    match profile.version(browser) {
        Some(version) if version != 0.0 && !version.is_nan() => {
            criterion.version.unwrap_or_default().contains(version)
        }
        _ => false,
    }
}
