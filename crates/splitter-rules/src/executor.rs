//! 条件树执行器
//!
//! 深度优先遍历条件树：先按键顺序评估顶层规则，全部通过后再评估 `and`、`or` 子树，
//! 均为短路求值。

use crate::compiler::{CriteriaCompiler, compile_builtin};
use crate::config::EngineConfig;
use crate::error::Result;
use crate::logging::{RuleWarning, TracingSink, WarningSink};
use crate::matchers::BuiltinMatcher;
use crate::models::{Criteria, RuleEntry};
use crate::options::EvaluationOptions;
use crate::registry::{Resolved, RuleRegistry, UserRule};
use crate::request::SplitRequest;
use crate::services::{DeviceDetector, GeoIpLookup, NoDeviceDetection, NoGeoIp};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, instrument};

/// 规则引擎
///
/// 注册表、外部服务与警告输出在进程内共享且只读；每次求值的可变状态都在
/// [`EvaluationOptions`] 与 [`SplitRequest`] 中。
#[derive(Clone)]
pub struct RuleEngine {
    registry: RuleRegistry,
    matcher: BuiltinMatcher,
    sink: Arc<dyn WarningSink>,
}

impl RuleEngine {
    /// 只有内置规则、不接入外部服务的引擎
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> RuleEngineBuilder {
        RuleEngineBuilder::default()
    }

    pub fn registry(&self) -> &RuleRegistry {
        &self.registry
    }

    /// 按本引擎的用户规则编译条件树
    pub fn compile(&self, value: &Value) -> Result<Criteria> {
        CriteriaCompiler::for_registry(&self.registry).compile(value)
    }

    pub fn compile_from_json(&self, json: &str) -> Result<Criteria> {
        CriteriaCompiler::for_registry(&self.registry).compile_from_json(json)
    }

    /// 评估条件树
    ///
    /// 条件树为 None 时恒为 true。`options` 只能用于同一请求的这一次求值。
    #[instrument(skip_all)]
    pub fn evaluate(
        &self,
        criteria: Option<&Criteria>,
        request: &mut SplitRequest,
        options: &mut EvaluationOptions,
    ) -> bool {
        let Some(criteria) = criteria else {
            return true;
        };

        let matched = self.evaluate_node(criteria, request, options);
        debug!(
            matched,
            emit_bid = request.annotations.emit_bid,
            "条件树评估完成"
        );
        matched
    }

    /// 使用新建的缓存评估一个请求
    pub fn evaluate_request(
        &self,
        criteria: Option<&Criteria>,
        request: &mut SplitRequest,
    ) -> bool {
        let mut options = EvaluationOptions::new();
        self.evaluate(criteria, request, &mut options)
    }

    /// 递归评估条件树节点
    fn evaluate_node(
        &self,
        criteria: &Criteria,
        request: &mut SplitRequest,
        options: &mut EvaluationOptions,
    ) -> bool {
        // 顶层规则：全部满足，遇到 false 立即返回
        for entry in &criteria.entries {
            if !self.evaluate_entry(entry, request, options) {
                debug!(rule = %entry.key, "规则短路 - 不匹配");
                return false;
            }
        }

        // AND: 所有子树都必须满足
        for (i, child) in criteria.and.iter().enumerate() {
            if !self.evaluate_node(child, request, options) {
                debug!(index = i, "AND 短路 - 子树不匹配");
                return false;
            }
        }

        // OR: 任一子树满足即可，空列表不参与判断
        if !criteria.or.is_empty() {
            let mut any = false;
            for (i, child) in criteria.or.iter().enumerate() {
                if self.evaluate_node(child, request, options) {
                    debug!(index = i, "OR 短路 - 子树匹配");
                    any = true;
                    break;
                }
            }
            if !any {
                debug!("OR 组无匹配");
                return false;
            }
        }

        true
    }

    /// 评估单条顶层规则
    fn evaluate_entry(
        &self,
        entry: &RuleEntry,
        request: &mut SplitRequest,
        options: &mut EvaluationOptions,
    ) -> bool {
        match self.registry.resolve(&entry.key) {
            Resolved::User(rule) => match rule.evaluate(&entry.raw, request) {
                Value::Bool(matched) => matched,
                value => {
                    self.sink.warn(&RuleWarning::InvalidReturn {
                        rule: entry.key.clone(),
                        value,
                    });
                    true
                }
            },
            Resolved::Builtin(builtin) => match &entry.builtin {
                Some(compiled) => self.matcher.evaluate(compiled, request, options),
                // 条件树按另一份注册表编译，此处按需编译
                None => match compile_builtin(builtin, &entry.raw) {
                    Ok(compiled) => self.matcher.evaluate(&compiled, request, options),
                    Err(e) => {
                        self.sink.warn(&RuleWarning::InvalidCriteria {
                            rule: entry.key.clone(),
                            error: e.to_string(),
                        });
                        true
                    }
                },
            },
            Resolved::Unknown => {
                self.sink.warn(&RuleWarning::MissingEvaluator {
                    rule: entry.key.clone(),
                });
                true
            }
        }
    }
}

impl Default for RuleEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// 规则引擎构建器
#[derive(Default)]
pub struct RuleEngineBuilder {
    registry: RuleRegistry,
    geoip: Option<Arc<dyn GeoIpLookup>>,
    devices: Option<Arc<dyn DeviceDetector>>,
    sink: Option<Arc<dyn WarningSink>>,
    config: Option<EngineConfig>,
}

impl RuleEngineBuilder {
    pub fn geoip(mut self, geoip: Arc<dyn GeoIpLookup>) -> Self {
        self.geoip = Some(geoip);
        self
    }

    pub fn device_detector(mut self, devices: Arc<dyn DeviceDetector>) -> Self {
        self.devices = Some(devices);
        self
    }

    pub fn warning_sink(mut self, sink: Arc<dyn WarningSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn config(mut self, config: &EngineConfig) -> Self {
        self.config = Some(config.clone());
        self
    }

    /// 替换整个用户规则注册表
    pub fn registry(mut self, registry: RuleRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn user_rule(mut self, name: impl Into<String>, rule: Arc<dyn UserRule>) -> Self {
        self.registry.register(name, rule);
        self
    }

    pub fn user_fn<F>(mut self, name: impl Into<String>, rule: F) -> Self
    where
        F: Fn(&Value, &SplitRequest) -> Value + Send + Sync + 'static,
    {
        self.registry.register_fn(name, rule);
        self
    }

    pub fn build(self) -> RuleEngine {
        let mut matcher = BuiltinMatcher::new(
            self.geoip.unwrap_or_else(|| Arc::new(NoGeoIp)),
            self.devices.unwrap_or_else(|| Arc::new(NoDeviceDetection)),
        );
        if let Some(config) = &self.config {
            matcher = matcher.with_config(config);
        }

        RuleEngine {
            registry: self.registry,
            matcher,
            sink: self.sink.unwrap_or_else(|| Arc::new(TracingSink)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::RecordingSink;
    use crate::services::{
        DeviceProfile, GeoLocation, MockDeviceDetector, MockDeviceProfile, MockGeoIpLookup,
    };
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_rule(
        counter: Arc<AtomicUsize>,
        result: bool,
    ) -> impl Fn(&Value, &SplitRequest) -> Value + Send + Sync + 'static {
        move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            json!(result)
        }
    }

    #[test]
    fn test_none_criteria_matches() {
        let engine = RuleEngine::new();
        let mut request = SplitRequest::default();
        assert!(engine.evaluate(None, &mut request, &mut EvaluationOptions::new()));
    }

    #[test]
    fn test_top_level_short_circuit() {
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        let engine = RuleEngine::builder()
            .user_fn("first", counting_rule(Arc::clone(&first), false))
            .user_fn("second", counting_rule(Arc::clone(&second), true))
            .build();

        let criteria = engine
            .compile(&json!({"first": 1, "second": 1, "and": [{"second": 1}]}))
            .unwrap();

        let mut request = SplitRequest::default();
        assert!(!engine.evaluate_request(Some(&criteria), &mut request));
        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_or_short_circuit_on_first_success() {
        let hit = Arc::new(AtomicUsize::new(0));
        let skipped = Arc::new(AtomicUsize::new(0));
        let engine = RuleEngine::builder()
            .user_fn("hit", counting_rule(Arc::clone(&hit), true))
            .user_fn("skipped", counting_rule(Arc::clone(&skipped), true))
            .build();

        let criteria = engine
            .compile(&json!({"or": [{"host": ["nope.com"]}, {"hit": 1}, {"skipped": 1}]}))
            .unwrap();

        let mut request = SplitRequest::builder().host("a.com").build();
        assert!(engine.evaluate_request(Some(&criteria), &mut request));
        assert_eq!(hit.load(Ordering::SeqCst), 1);
        assert_eq!(skipped.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_and_evaluated_before_or() {
        let or_rule = Arc::new(AtomicUsize::new(0));
        let engine = RuleEngine::builder()
            .user_fn("probe", counting_rule(Arc::clone(&or_rule), true))
            .build();

        let criteria = engine
            .compile(&json!({"or": [{"probe": 1}], "and": [{"host": ["b.com"]}]}))
            .unwrap();

        let mut request = SplitRequest::builder().host("a.com").build();
        assert!(!engine.evaluate_request(Some(&criteria), &mut request));
        assert_eq!(or_rule.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_empty_groups_are_vacuous() {
        let engine = RuleEngine::new();
        let criteria = engine.compile(&json!({"and": [], "or": []})).unwrap();
        let mut request = SplitRequest::default();
        assert!(engine.evaluate_request(Some(&criteria), &mut request));
    }

    #[test]
    fn test_ruleset_key_ignored() {
        let sink = Arc::new(RecordingSink::new());
        let engine = RuleEngine::builder().warning_sink(sink.clone()).build();
        let criteria = engine.compile(&json!({"ruleset": "checkout"})).unwrap();

        let mut request = SplitRequest::default();
        assert!(engine.evaluate_request(Some(&criteria), &mut request));
        assert!(sink.is_empty());
    }

    #[test]
    fn test_user_rule_receives_raw_criteria() {
        let engine = RuleEngine::builder()
            .user_fn("tenant", |criteria, request| {
                json!(criteria["name"] == "acme" && request.host() == Some("acme.com"))
            })
            .build();
        let criteria = engine.compile(&json!({"tenant": {"name": "acme"}})).unwrap();

        let mut request = SplitRequest::builder().host("acme.com").build();
        assert!(engine.evaluate_request(Some(&criteria), &mut request));

        let mut request = SplitRequest::builder().host("other.com").build();
        assert!(!engine.evaluate_request(Some(&criteria), &mut request));
    }

    #[test]
    fn test_builtin_compiled_on_demand() {
        // 以带 host 覆盖的注册表编译，再交给只有内置规则的引擎
        let overriding = RuleEngine::builder()
            .user_fn("host", |_, _| json!(true))
            .build();
        let criteria = overriding.compile(&json!({"host": ["a.com"]})).unwrap();
        assert!(criteria.entries[0].builtin.is_none());

        let engine = RuleEngine::new();
        let mut request = SplitRequest::builder().host("b.com").build();
        assert!(!engine.evaluate_request(Some(&criteria), &mut request));

        let mut request = SplitRequest::builder().host("a.com").build();
        assert!(engine.evaluate_request(Some(&criteria), &mut request));
    }

    #[test]
    fn test_invalid_builtin_compiled_on_demand_reports_to_sink() {
        let overriding = RuleEngine::builder()
            .user_fn("host", |_, _| json!(true))
            .build();
        let criteria = overriding.compile(&json!({"host": "not-a-list"})).unwrap();

        let sink = Arc::new(RecordingSink::new());
        let engine = RuleEngine::builder().warning_sink(sink.clone()).build();
        let mut request = SplitRequest::builder().host("a.com").build();

        assert!(engine.evaluate_request(Some(&criteria), &mut request));
        let warnings = sink.warnings();
        assert_eq!(warnings.len(), 1);
        assert!(matches!(
            &warnings[0],
            RuleWarning::InvalidCriteria { rule, .. } if rule == "host"
        ));
    }

    #[test]
    fn test_geoip_looked_up_once_per_evaluation() {
        let mut geoip = MockGeoIpLookup::new();
        geoip
            .expect_lookup()
            .times(1)
            .returning(|_| Some(GeoLocation::new("US", "CA", "SanFrancisco")));

        let engine = RuleEngine::builder().geoip(Arc::new(geoip)).build();
        let criteria = engine
            .compile(&json!({
                "geoip": ["US."],
                "and": [{"geoip": ["US.CA.SanFrancisco"]}],
                "or": [{"geoip": ["CA."]}, {"geoip": ["US."]}]
            }))
            .unwrap();

        let mut request = SplitRequest::builder().connection_addr("1.2.3.4").build();
        let mut options = EvaluationOptions::new();
        assert!(engine.evaluate(Some(&criteria), &mut request, &mut options));
        assert_eq!(
            options.geo().and_then(|g| g.as_str()),
            Some("US.CA.SanFrancisco")
        );
    }

    #[test]
    fn test_device_detected_once_per_evaluation() {
        let mut detector = MockDeviceDetector::new();
        detector.expect_detect().times(1).returning(|_| {
            let mut profile = MockDeviceProfile::new();
            profile.expect_mobile().return_const(Some("iPad".to_string()));
            profile.expect_tablet().return_const(Some("iPad".to_string()));
            profile.expect_phone().return_const(None::<String>);
            profile.expect_version().return_const(Some(17.0));
            Box::new(profile) as Box<dyn DeviceProfile>
        });

        let engine = RuleEngine::builder()
            .device_detector(Arc::new(detector))
            .build();
        let criteria = engine
            .compile(&json!({
                "device": [{"device": "tablet"}],
                "and": [
                    {"device": [{"device": "mobile", "type": "iPad"}]},
                    {"device": [{"browser": "Safari", "version": {"from": 16}}]}
                ]
            }))
            .unwrap();

        let mut request = SplitRequest::builder().user_agent("iPad Safari").build();
        assert!(engine.evaluate_request(Some(&criteria), &mut request));
    }

    #[test]
    fn test_fresh_options_recompute() {
        let mut geoip = MockGeoIpLookup::new();
        geoip
            .expect_lookup()
            .times(2)
            .returning(|_| Some(GeoLocation::new("US", "CA", "SanFrancisco")));

        let engine = RuleEngine::builder().geoip(Arc::new(geoip)).build();
        let criteria = engine.compile(&json!({"geoip": ["US."]})).unwrap();

        for _ in 0..2 {
            let mut request = SplitRequest::builder().connection_addr("1.2.3.4").build();
            assert!(engine.evaluate_request(Some(&criteria), &mut request));
        }
    }
}
