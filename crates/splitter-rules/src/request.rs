//! 请求视图
//!
//! 求值器只读取请求数据，唯一的写入是 [`RequestAnnotations`] 上的标记位。

use serde::Deserialize;
use std::collections::HashMap;

/// 求值过程中写回请求的标记
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestAnnotations {
    /// 下游需要下发/持久化 browser id（求值过 bucket 规则时置位）
    pub emit_bid: bool,
}

/// 一次待判定的请求
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SplitRequest {
    /// 请求头，名称大小写不敏感
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub url: Option<String>,
    /// None 表示请求上根本没有 cookie 表，与空表不同
    #[serde(default)]
    pub cookies: Option<HashMap<String, String>>,
    /// 路由参数（覆盖 IP 从这里读取）
    #[serde(default)]
    pub params: HashMap<String, String>,
    #[serde(default)]
    pub connection_addr: Option<String>,
    #[serde(default)]
    pub socket_addr: Option<String>,
    /// TLS 隧道下的底层连接地址
    #[serde(default)]
    pub tunnel_addr: Option<String>,
    /// 分桶使用的 browser id
    #[serde(default)]
    pub bid: Option<String>,
    #[serde(skip)]
    pub annotations: RequestAnnotations,
}

impl SplitRequest {
    pub fn builder() -> SplitRequestBuilder {
        SplitRequestBuilder::default()
    }

    /// 从 JSON 字符串创建
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// 获取请求头（大小写不敏感），空值视为不存在
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
            .filter(|value| !value.is_empty())
    }

    pub fn host(&self) -> Option<&str> {
        self.header("host")
    }

    pub fn user_agent(&self) -> Option<&str> {
        self.header("user-agent")
    }

    pub fn url(&self) -> Option<&str> {
        self.url.as_deref().filter(|url| !url.is_empty())
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .get(name)
            .map(String::as_str)
            .filter(|value| !value.is_empty())
    }

    /// 获取 cookie 值，空值视为不存在
    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies
            .as_ref()?
            .get(name)
            .map(String::as_str)
            .filter(|value| !value.is_empty())
    }

    pub fn has_cookie_map(&self) -> bool {
        self.cookies.is_some()
    }

    /// 按连接、socket、隧道的顺序返回第一个可用的远端地址
    pub fn remote_addr(&self) -> Option<&str> {
        [&self.connection_addr, &self.socket_addr, &self.tunnel_addr]
            .into_iter()
            .filter_map(|addr| addr.as_deref())
            .find(|addr| !addr.is_empty())
    }

    pub fn annotations(&self) -> RequestAnnotations {
        self.annotations
    }
}

/// 请求构建器
#[derive(Debug, Default)]
pub struct SplitRequestBuilder {
    request: SplitRequest,
}

impl SplitRequestBuilder {
    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.request
            .headers
            .insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn host(self, host: impl Into<String>) -> Self {
        self.header("host", host)
    }

    pub fn user_agent(self, agent: impl Into<String>) -> Self {
        self.header("user-agent", agent)
    }

    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.request.url = Some(url.into());
        self
    }

    /// 添加一个 cookie（会创建 cookie 表）
    pub fn cookie(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.request
            .cookies
            .get_or_insert_with(HashMap::new)
            .insert(name.into(), value.into());
        self
    }

    /// 创建一个空的 cookie 表
    pub fn empty_cookies(mut self) -> Self {
        self.request.cookies.get_or_insert_with(HashMap::new);
        self
    }

    pub fn param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.request.params.insert(name.into(), value.into());
        self
    }

    pub fn connection_addr(mut self, addr: impl Into<String>) -> Self {
        self.request.connection_addr = Some(addr.into());
        self
    }

    pub fn socket_addr(mut self, addr: impl Into<String>) -> Self {
        self.request.socket_addr = Some(addr.into());
        self
    }

    pub fn tunnel_addr(mut self, addr: impl Into<String>) -> Self {
        self.request.tunnel_addr = Some(addr.into());
        self
    }

    pub fn bid(mut self, bid: impl Into<String>) -> Self {
        self.request.bid = Some(bid.into());
        self
    }

    pub fn build(self) -> SplitRequest {
        self.request
    }
}
