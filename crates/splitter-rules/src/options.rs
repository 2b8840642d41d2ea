//! 单次求值的派生值缓存
//!
//! 每个请求的每次顶层求值都使用一个新的 [`EvaluationOptions`]，不可跨请求复用。

use crate::services::DeviceProfile;
use std::fmt;

/// 地理位置解析结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GeoResolution {
    /// `country.region.city`
    Resolved(String),
    NotFound,
}

impl GeoResolution {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Resolved(geo) => Some(geo),
            Self::NotFound => None,
        }
    }
}

/// 单次求值缓存：bucket、geo、设备识别结果都在首次使用时计算，之后复用
#[derive(Default)]
pub struct EvaluationOptions {
    pub(crate) bucket: Option<Option<u8>>,
    pub(crate) geo: Option<GeoResolution>,
    pub(crate) device: Option<Box<dyn DeviceProfile>>,
}

impl EvaluationOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// 已计算的 bucket；未计算或 browser id 无法分桶时为 None
    pub fn bucket(&self) -> Option<u8> {
        self.bucket.flatten()
    }

    pub fn geo(&self) -> Option<&GeoResolution> {
        self.geo.as_ref()
    }

    pub fn device(&self) -> Option<&dyn DeviceProfile> {
        self.device.as_deref()
    }

    pub(crate) fn bucket_or_insert_with(&mut self, f: impl FnOnce() -> Option<u8>) -> Option<u8> {
        *self.bucket.get_or_insert_with(f)
    }

    pub(crate) fn geo_or_insert_with(
        &mut self,
        f: impl FnOnce() -> GeoResolution,
    ) -> &GeoResolution {
        self.geo.get_or_insert_with(f)
    }

    pub(crate) fn device_or_insert_with(
        &mut self,
        f: impl FnOnce() -> Box<dyn DeviceProfile>,
    ) -> &dyn DeviceProfile {
        &**self.device.get_or_insert_with(f)
    }
}

impl fmt::Debug for EvaluationOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvaluationOptions")
            .field("bucket", &self.bucket)
            .field("geo", &self.geo)
            .field("device", &self.device.as_ref().map(|_| "<profile>"))
            .finish()
    }
}
