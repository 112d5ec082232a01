use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Variable context of a query template: variable name -> value.
///
/// A `BTreeMap` keeps keys sorted so that serializing a context for hashing
/// is canonical.
pub type Context = BTreeMap<String, Value>;

/// `root_id` / `parent_id` value of a template that was not cloned from another one.
pub const ROOT_TEMPLATE_ID: i64 = 0;

/// Detect connector that is implied when none is set.
pub const DEFAULT_DETECT_CONNECTOR: &str = "and";

/// The business + application pair every dispatch operation is scoped to.
///
/// # Examples
///
/// ```
/// use oxapm_common::types::Scope;
///
/// let scope = Scope::new(2, "orders");
/// assert_eq!(scope.to_string(), "2/orders");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Scope {
    pub bk_biz_id: i64,
    pub app_name: String,
}

impl Scope {
    pub fn new(bk_biz_id: i64, app_name: impl Into<String>) -> Self {
        Self {
            bk_biz_id,
            app_name: app_name.into(),
        }
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.bk_biz_id, self.app_name)
    }
}

/// Observability integration a strategy template is written against.
///
/// # Examples
///
/// ```
/// use oxapm_common::types::System;
///
/// let system: System = "rpc".parse().unwrap();
/// assert_eq!(system, System::Rpc);
/// assert_eq!(System::K8s.to_string(), "k8s");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum System {
    Rpc,
    K8s,
    Log,
    Trace,
    Metric,
}

impl System {
    pub const ALL: [System; 5] = [
        System::Rpc,
        System::K8s,
        System::Log,
        System::Trace,
        System::Metric,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            System::Rpc => "rpc",
            System::K8s => "k8s",
            System::Log => "log",
            System::Trace => "trace",
            System::Metric => "metric",
        }
    }
}

impl std::fmt::Display for System {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for System {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "rpc" => Ok(System::Rpc),
            "k8s" => Ok(System::K8s),
            "log" => Ok(System::Log),
            "trace" => Ok(System::Trace),
            "metric" => Ok(System::Metric),
            _ => Err(format!("unknown system: {s}")),
        }
    }
}

/// 模板类型：内置模板 / 应用模板（克隆或自建）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemplateType {
    Builtin,
    App,
}

impl TemplateType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TemplateType::Builtin => "builtin",
            TemplateType::App => "app",
        }
    }
}

impl std::fmt::Display for TemplateType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TemplateType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "builtin" => Ok(TemplateType::Builtin),
            "app" => Ok(TemplateType::App),
            _ => Err(format!("unknown template type: {s}")),
        }
    }
}

/// Alert levels, highest severity first.
pub mod level {
    pub const FATAL: u8 = 1;
    pub const WARNING: u8 = 2;
    pub const REMIND: u8 = 3;

    pub fn name(level: u8) -> &'static str {
        match level {
            FATAL => "fatal",
            WARNING => "warning",
            REMIND => "remind",
            _ => "unknown",
        }
    }
}

/// 检测窗口配置。模板只声明一份，下发时按告警级别复制。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Detect {
    /// 触发周期数
    pub trigger_check_window: u32,
    /// 触发周期内满足条件的次数
    pub trigger_count: u32,
    /// 恢复周期数
    pub recovery_check_window: u32,
    /// 多算法间的连接方式，缺省为 and
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connector: Option<String>,
}

impl Default for Detect {
    fn default() -> Self {
        Self {
            trigger_check_window: 5,
            trigger_count: 1,
            recovery_check_window: 5,
            connector: None,
        }
    }
}

impl Detect {
    /// Returns a copy where an explicit default connector is dropped, so that
    /// `connector: "AND"` and an absent connector compare and hash the same.
    ///
    /// # Examples
    ///
    /// ```
    /// use oxapm_common::types::Detect;
    ///
    /// let explicit = Detect { connector: Some("AND".into()), ..Detect::default() };
    /// assert_eq!(explicit.normalized(), Detect::default());
    /// ```
    pub fn normalized(&self) -> Detect {
        let mut detect = self.clone();
        if detect
            .connector
            .as_deref()
            .is_some_and(|c| c.trim().eq_ignore_ascii_case(DEFAULT_DETECT_CONNECTOR))
        {
            detect.connector = None;
        }
        detect
    }

    pub fn connector_or_default(&self) -> &str {
        self.connector.as_deref().unwrap_or(DEFAULT_DETECT_CONNECTOR)
    }
}

/// Detection algorithm families a template can use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AlgorithmType {
    Threshold,
    YearRound,
    RingRatio,
}

impl std::fmt::Display for AlgorithmType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlgorithmType::Threshold => write!(f, "Threshold"),
            AlgorithmType::YearRound => write!(f, "YearRound"),
            AlgorithmType::RingRatio => write!(f, "RingRatio"),
        }
    }
}

/// One detection algorithm at one alert level. `config` is opaque to the
/// engine apart from the per-type normalization done when building payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Algorithm {
    #[serde(rename = "type")]
    pub kind: AlgorithmType,
    pub level: u8,
    #[serde(default)]
    pub unit_prefix: String,
    #[serde(default)]
    pub config: Value,
}

/// Identity of a named query template.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QueryTemplateRef {
    pub bk_biz_id: i64,
    pub name: String,
}

impl std::fmt::Display for QueryTemplateRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.bk_biz_id, self.name)
    }
}

/// Resolves the family root of a template given its own id and stored `root_id`.
///
/// # Examples
///
/// ```
/// use oxapm_common::types::{resolve_root_id, ROOT_TEMPLATE_ID};
///
/// assert_eq!(resolve_root_id(7, ROOT_TEMPLATE_ID), 7);
/// assert_eq!(resolve_root_id(9, 7), 7);
/// ```
pub fn resolve_root_id(id: i64, root_id: i64) -> i64 {
    if root_id == ROOT_TEMPLATE_ID {
        id
    } else {
        root_id
    }
}
