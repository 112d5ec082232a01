//! Turns one service's enriched [`DispatchConfig`] into a remote rule payload.
//!
//! The builder is a pure transformation; the query is rendered by the caller
//! beforehand and handed in as a JSON value.

use oxapm_common::types::{Algorithm, AlgorithmType, Detect};
use oxapm_storage::StrategyTemplateRow;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeSet;

use crate::config::DispatchConfig;
use crate::error::{DispatchError, Result};

/// Days compared by year-over-year and ring-ratio algorithms.
pub const COMPARE_WINDOW_DAYS: u32 = 7;

// ---- Per-algorithm-type config JSON schemas ----

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdConfig {
    pub method: String,
    pub threshold: f64,
}

/// 同比 / 环比配置，ceil 与 floor 至少设置一项
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompareConfig {
    #[serde(default)]
    pub ceil: Option<f64>,
    #[serde(default)]
    pub floor: Option<f64>,
}

// ---- Payload ----

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerConfig {
    pub count: u32,
    pub check_window: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryConfig {
    pub check_window: u32,
}

/// Detect window of one alert level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectRule {
    pub level: u8,
    pub connector: String,
    pub trigger_config: TriggerConfig,
    pub recovery_config: RecoveryConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlgorithmPayload {
    #[serde(rename = "type")]
    pub kind: AlgorithmType,
    pub level: u8,
    pub unit_prefix: String,
    pub config: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemPayload {
    pub name: String,
    pub query: Value,
    pub algorithms: Vec<AlgorithmPayload>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoticeTemplate {
    pub signal: String,
    pub title_tmpl: String,
    pub message_tmpl: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoticeConfig {
    pub interval_notify_mode: String,
    /// 通知间隔（分钟）
    pub notify_interval: u32,
    pub template: Vec<NoticeTemplate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoticeBlock {
    pub user_groups: Vec<i64>,
    pub signal: Vec<String>,
    pub config: NoticeConfig,
}

impl NoticeBlock {
    /// Notice block every rule starts from: alert and recovery signals,
    /// standard repeat interval, no groups and empty message templates.
    pub fn base() -> Self {
        let template = ["abnormal", "recovered", "closed"]
            .iter()
            .map(|signal| NoticeTemplate {
                signal: signal.to_string(),
                title_tmpl: "{{business.bk_biz_name}} - {{alarm.name}}{{alarm.display_type}}"
                    .to_string(),
                message_tmpl: String::new(),
            })
            .collect();
        Self {
            user_groups: Vec::new(),
            signal: vec!["abnormal".to_string(), "no_data".to_string()],
            config: NoticeConfig {
                interval_notify_mode: "standard".to_string(),
                notify_interval: 120,
                template,
            },
        }
    }
}

/// Remote alert rule payload. `id` is set when updating an existing rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub bk_biz_id: i64,
    pub name: String,
    pub source: String,
    pub is_enabled: bool,
    pub labels: Vec<String>,
    pub detects: Vec<DetectRule>,
    pub items: Vec<ItemPayload>,
    pub notice: NoticeBlock,
}

pub struct StrategyBuilder<'a> {
    template: &'a StrategyTemplateRow,
    config: &'a DispatchConfig,
    query: Value,
}

impl<'a> StrategyBuilder<'a> {
    pub fn new(template: &'a StrategyTemplateRow, config: &'a DispatchConfig, query: Value) -> Self {
        Self {
            template,
            config,
            query,
        }
    }

    pub fn build(self) -> Result<StrategyPayload> {
        let algorithms = self
            .config
            .algorithms
            .iter()
            .map(normalize_algorithm)
            .collect::<Result<Vec<_>>>()?;

        let mut notice = NoticeBlock::base();
        notice.user_groups = self.config.user_group_ids.clone();
        for t in &mut notice.config.template {
            t.message_tmpl = self.config.message_template.clone();
        }

        Ok(StrategyPayload {
            id: None,
            bk_biz_id: self.template.bk_biz_id,
            name: rule_name(self.template, &self.config.service_name),
            source: "apm".to_string(),
            is_enabled: self.template.is_enabled,
            labels: self.labels(),
            detects: build_detects(&self.config.detect, &self.config.algorithms),
            items: vec![ItemPayload {
                name: self.template.name.clone(),
                query: self.query,
                algorithms,
            }],
            notice,
        })
    }

    fn labels(&self) -> Vec<String> {
        vec![
            format!("APM-APP({})", self.template.app_name),
            format!("APM-SERVICE({})", self.config.service_name),
            format!("APM-SYSTEM({})", self.template.system),
            format!("APM-ALERT({})", self.template.category),
            format!("APM-STRATEGY-TEMPLATE({})", self.template.id),
        ]
    }
}

/// Remote rule name of a template dispatched to a service.
pub fn rule_name(template: &StrategyTemplateRow, service_name: &str) -> String {
    format!("[{}] {} - {}", template.app_name, service_name, template.name)
}

/// One detect rule per distinct alert level among `algorithms`, all sharing
/// the template's single detect config. Levels are emitted in ascending order.
pub fn build_detects(detect: &Detect, algorithms: &[Algorithm]) -> Vec<DetectRule> {
    let levels: BTreeSet<u8> = algorithms.iter().map(|a| a.level).collect();
    levels
        .into_iter()
        .map(|level| DetectRule {
            level,
            connector: detect.connector_or_default().to_lowercase(),
            trigger_config: TriggerConfig {
                count: detect.trigger_count,
                check_window: detect.trigger_check_window,
            },
            recovery_config: RecoveryConfig {
                check_window: detect.recovery_check_window,
            },
        })
        .collect()
}

/// Normalizes one algorithm config by type.
pub fn normalize_algorithm(algorithm: &Algorithm) -> Result<AlgorithmPayload> {
    let config = match algorithm.kind {
        AlgorithmType::Threshold => {
            let cfg: ThresholdConfig =
                serde_json::from_value(algorithm.config.clone()).map_err(|e| {
                    DispatchError::InvariantViolation(format!("invalid threshold config: {e}"))
                })?;
            json!({"method": cfg.method, "threshold": cfg.threshold})
        }
        AlgorithmType::YearRound | AlgorithmType::RingRatio => {
            let cfg: CompareConfig = if algorithm.config.is_null() {
                CompareConfig::default()
            } else {
                serde_json::from_value(algorithm.config.clone()).map_err(|e| {
                    DispatchError::InvariantViolation(format!(
                        "invalid {} config: {e}",
                        algorithm.kind
                    ))
                })?
            };
            if cfg.ceil.is_none() && cfg.floor.is_none() {
                return Err(DispatchError::InvariantViolation(format!(
                    "{} config needs ceil or floor",
                    algorithm.kind
                )));
            }
            json!({
                "ceil": cfg.ceil,
                "floor": cfg.floor,
                "ceil_interval": COMPARE_WINDOW_DAYS,
                "floor_interval": COMPARE_WINDOW_DAYS,
                "fetch_type": "avg",
            })
        }
    };
    Ok(AlgorithmPayload {
        kind: algorithm.kind,
        level: algorithm.level,
        unit_prefix: algorithm.unit_prefix.clone(),
        config,
    })
}
