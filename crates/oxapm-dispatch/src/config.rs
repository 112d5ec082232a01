//! Per-service dispatch configuration and its three-layer merge.
//!
//! Precedence, lowest first: query-template default context < strategy
//! template < per-service extra override < global override. Non-context
//! fields take the value of the highest layer that sets them. The context is
//! merged key by key, so an override of one variable keeps the others.

use oxapm_common::types::{Algorithm, Context, Detect};
use oxapm_storage::StrategyTemplateRow;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Query-template variable names the engine reads or writes.
pub mod variables {
    pub const GROUP_BY: &str = "GROUP_BY";
    pub const CONDITIONS: &str = "CONDITIONS";
    pub const FUNCTIONS: &str = "FUNCTIONS";
    pub const INDEX_SET_ID: &str = "INDEX_SET_ID";
    pub const SERVICE_NAME: &str = "SERVICE_NAME";
}

/// One source of dispatch settings.
pub trait ConfigLayer {
    fn service_name(&self) -> Option<&str> {
        None
    }
    fn context(&self) -> Option<&Context>;
    fn detect(&self) -> Option<&Detect>;
    fn algorithms(&self) -> Option<&[Algorithm]>;
    fn user_group_ids(&self) -> Option<&[i64]>;
}

/// 全局覆盖配置，作用于本次下发的所有服务，优先级最高
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DispatchGlobalConfig {
    #[serde(default)]
    pub context: Option<Context>,
    #[serde(default)]
    pub detect: Option<Detect>,
    #[serde(default)]
    pub algorithms: Option<Vec<Algorithm>>,
    #[serde(default)]
    pub user_group_ids: Option<Vec<i64>>,
}

/// 单个服务的覆盖配置
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DispatchExtraConfig {
    /// 目标模板，`None` 时对本次下发的所有模板生效
    #[serde(default)]
    pub strategy_template_id: Option<i64>,
    pub service_name: String,
    #[serde(default)]
    pub context: Option<Context>,
    #[serde(default)]
    pub detect: Option<Detect>,
    #[serde(default)]
    pub algorithms: Option<Vec<Algorithm>>,
    #[serde(default)]
    pub user_group_ids: Option<Vec<i64>>,
}

impl ConfigLayer for DispatchGlobalConfig {
    fn context(&self) -> Option<&Context> {
        self.context.as_ref()
    }
    fn detect(&self) -> Option<&Detect> {
        self.detect.as_ref()
    }
    fn algorithms(&self) -> Option<&[Algorithm]> {
        self.algorithms.as_deref()
    }
    fn user_group_ids(&self) -> Option<&[i64]> {
        self.user_group_ids.as_deref()
    }
}

impl ConfigLayer for DispatchExtraConfig {
    fn service_name(&self) -> Option<&str> {
        Some(self.service_name.as_str()).filter(|s| !s.is_empty())
    }
    fn context(&self) -> Option<&Context> {
        self.context.as_ref()
    }
    fn detect(&self) -> Option<&Detect> {
        self.detect.as_ref()
    }
    fn algorithms(&self) -> Option<&[Algorithm]> {
        self.algorithms.as_deref()
    }
    fn user_group_ids(&self) -> Option<&[i64]> {
        self.user_group_ids.as_deref()
    }
}

impl ConfigLayer for StrategyTemplateRow {
    fn context(&self) -> Option<&Context> {
        Some(&self.context)
    }
    fn detect(&self) -> Option<&Detect> {
        Some(&self.detect)
    }
    fn algorithms(&self) -> Option<&[Algorithm]> {
        Some(&self.algorithms)
    }
    fn user_group_ids(&self) -> Option<&[i64]> {
        Some(&self.user_group_ids)
    }
}

/// Effective configuration of one service after merging and enrichment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DispatchConfig {
    pub service_name: String,
    pub context: Context,
    pub detect: Detect,
    pub algorithms: Vec<Algorithm>,
    pub user_group_ids: Vec<i64>,
    /// 通知内容模板，由 enricher 生成
    #[serde(default)]
    pub message_template: String,
}

impl DispatchConfig {
    /// Merges the layers into a fresh config. Nothing is shared with the
    /// inputs: every value is cloned.
    pub fn from_configs(
        global: &dyn ConfigLayer,
        extra: &dyn ConfigLayer,
        template: &dyn ConfigLayer,
        default_context: &Context,
    ) -> Self {
        let layers = [template, extra, global];

        let mut config = DispatchConfig::default();
        for layer in layers {
            if let Some(name) = layer.service_name() {
                config.service_name = name.to_string();
            }
            if let Some(detect) = layer.detect() {
                config.detect = detect.clone();
            }
            if let Some(algorithms) = layer.algorithms() {
                config.algorithms = algorithms.to_vec();
            }
            if let Some(ids) = layer.user_group_ids() {
                config.user_group_ids = ids.to_vec();
            }
            if let Some(context) = layer.context() {
                for (k, v) in context {
                    config.context.insert(k.clone(), v.clone());
                }
            }
        }
        for (k, v) in default_context {
            config
                .context
                .entry(k.clone())
                .or_insert_with(|| v.clone());
        }
        config
    }

    /// List-valued variable, empty when unset or not a list.
    pub fn list_var(&self, name: &str) -> Vec<Value> {
        match self.context.get(name) {
            Some(Value::Array(items)) => items.clone(),
            _ => Vec::new(),
        }
    }

    pub fn set_var(&mut self, name: &str, value: impl Into<Value>) {
        self.context.insert(name.to_string(), value.into());
    }

    /// Ensures each of `dims` is present in `GROUP_BY`, keeping existing order
    /// and appending missing ones.
    pub fn ensure_group_by(&mut self, dims: &[&str]) {
        let mut group_by = self.list_var(variables::GROUP_BY);
        for dim in dims {
            if !group_by.iter().any(|v| v.as_str() == Some(dim)) {
                group_by.push(Value::String((*dim).to_string()));
            }
        }
        self.set_var(variables::GROUP_BY, group_by);
    }
}
