//! Per-system enrichment of dispatch configs.
//!
//! Each [`Enricher`] decides which services of an [`EntitySet`] are eligible
//! for templates of its system and decorates their configs with the filter
//! conditions, dimensions and variables that system needs. Enrichers never add
//! services; they only drop and decorate.

pub mod k8s;
pub mod log;
pub mod metric;
pub mod rpc;
pub mod trace;

use async_trait::async_trait;
use oxapm_common::types::{Scope, System};
use oxapm_storage::StrategyTemplateRow;
use std::collections::{BTreeMap, HashMap};

use crate::config::{variables, DispatchConfig};
use crate::entity_set::EntitySet;
use crate::error::{DispatchError, Result};
use crate::provider::QueryTemplateInfo;
use crate::settings::DispatchSettings;

/// Everything an enricher may read while decorating one template's configs.
pub struct EnrichContext<'a> {
    pub entity_set: &'a EntitySet,
    pub template: &'a StrategyTemplateRow,
    pub query_info: &'a QueryTemplateInfo,
    pub settings: &'a DispatchSettings,
}

#[async_trait]
pub trait Enricher: Send + Sync {
    fn system(&self) -> System;

    /// Dashboard of the service scene that notifications link to.
    fn scene_dashboard(&self) -> &'static str;

    async fn is_valid(&self, ctx: &EnrichContext<'_>, service_name: &str) -> Result<bool>;

    /// Applies the system specific changes to one eligible service's config.
    async fn decorate(
        &self,
        ctx: &EnrichContext<'_>,
        service_name: &str,
        config: &mut DispatchConfig,
    ) -> Result<()>;

    /// Returns the services of the entity set that are eligible for this
    /// system. With `raise_on_invalid`, any ineligible service is an error;
    /// otherwise ineligible services are dropped.
    async fn validate(&self, ctx: &EnrichContext<'_>, raise_on_invalid: bool) -> Result<Vec<String>> {
        let mut valid = Vec::new();
        let mut invalid = Vec::new();
        for service in ctx.entity_set.service_names() {
            if self.is_valid(ctx, service).await? {
                valid.push(service.clone());
            } else {
                invalid.push(service.clone());
            }
        }

        if !invalid.is_empty() {
            if raise_on_invalid {
                return Err(DispatchError::IneligibleService {
                    system: self.system(),
                    category: ctx.template.category.clone(),
                    services: invalid,
                });
            }
            tracing::warn!(
                template_id = ctx.template.id,
                system = %self.system(),
                services = ?invalid,
                "Dropped ineligible services"
            );
        }
        Ok(valid)
    }

    /// Validates, drops configs of ineligible services and decorates the
    /// rest, finishing each with its notification message template.
    async fn enrich(
        &self,
        ctx: &EnrichContext<'_>,
        configs: &mut BTreeMap<String, DispatchConfig>,
        raise_on_invalid: bool,
    ) -> Result<Vec<String>> {
        let valid = self.validate(ctx, raise_on_invalid).await?;
        configs.retain(|name, _| valid.contains(name));

        for (service, config) in configs.iter_mut() {
            self.decorate(ctx, service, config).await?;
            let link = scene_link(
                ctx.settings,
                ctx.entity_set.scope(),
                service,
                self.scene_dashboard(),
            );
            config.message_template = build_message_template(ctx, service, config, &link);
        }
        Ok(configs.keys().cloned().collect())
    }
}

/// Link to the service scene of the monitor UI.
///
/// # Examples
///
/// ```
/// use oxapm_common::types::Scope;
/// use oxapm_dispatch::enricher::scene_link;
/// use oxapm_dispatch::settings::DispatchSettings;
///
/// let link = scene_link(&DispatchSettings::default(), &Scope::new(2, "orders"), "a b", "overview");
/// assert!(link.ends_with("filter-service_name=a%20b&dashboardId=overview"));
/// ```
pub fn scene_link(
    settings: &DispatchSettings,
    scope: &Scope,
    service_name: &str,
    dashboard: &str,
) -> String {
    format!(
        "{}/?bizId={}#/apm/service?filter-app_name={}&filter-service_name={}&dashboardId={}",
        settings.monitor_host.trim_end_matches('/'),
        scope.bk_biz_id,
        urlencoding::encode(&scope.app_name),
        urlencoding::encode(service_name),
        dashboard,
    )
}

/// Assembles the notification body of one service's rule.
pub fn build_message_template(
    ctx: &EnrichContext<'_>,
    service_name: &str,
    config: &DispatchConfig,
    scene_link: &str,
) -> String {
    let mut lines: Vec<String> = [
        "{{content.level}}",
        "{{content.begin_time}}",
        "{{content.time}}",
        "{{content.duration}}",
        "{{content.target_type}}",
        "{{content.data_source}}",
        "{{content.content}}",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();

    lines.push(format!(
        "#告警目标# 应用({}) 服务({})",
        ctx.entity_set.scope().app_name,
        service_name
    ));
    lines.push(format!(
        "#当前值# {{{{alarm.current_value}}}}{}",
        ctx.query_info.unit
    ));

    let dims: Vec<String> = config
        .list_var(variables::GROUP_BY)
        .iter()
        .filter_map(|v| v.as_str())
        .map(|d| format!("{d}={{{{alarm.dimensions['{d}'].display_value}}}}"))
        .collect();
    if !dims.is_empty() {
        lines.push(format!("#维度# {}", dims.join(", ")));
    }

    lines.push("{{content.detail}}".to_string());
    lines.push(format!("#相关链接# [{}]({scene_link})", ctx.query_info.alias));
    lines.join("\n")
}

/// Maps each [`System`] to its enricher. Built once at startup.
///
/// # Examples
///
/// ```
/// use oxapm_common::types::System;
/// use oxapm_dispatch::enricher::EnricherRegistry;
///
/// let registry = EnricherRegistry::default();
/// for system in System::ALL {
///     assert!(registry.has(system));
/// }
/// ```
pub struct EnricherRegistry {
    enrichers: HashMap<System, Box<dyn Enricher>>,
}

impl EnricherRegistry {
    pub fn new() -> Self {
        Self {
            enrichers: HashMap::new(),
        }
    }

    pub fn register(&mut self, enricher: Box<dyn Enricher>) {
        self.enrichers.insert(enricher.system(), enricher);
    }

    pub fn get(&self, system: System) -> Result<&dyn Enricher> {
        self.enrichers
            .get(&system)
            .map(|e| e.as_ref())
            .ok_or_else(|| DispatchError::not_found("enricher", system))
    }

    pub fn has(&self, system: System) -> bool {
        self.enrichers.contains_key(&system)
    }
}

impl Default for EnricherRegistry {
    fn default() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(rpc::RpcEnricher));
        registry.register(Box::new(k8s::K8sEnricher));
        registry.register(Box::new(log::LogEnricher));
        registry.register(Box::new(trace::TraceEnricher));
        registry.register(Box::new(metric::MetricEnricher));
        registry
    }
}

/// Shared filter of app + service used by several systems.
pub(crate) fn pin_app_and_service(
    ctx: &EnrichContext<'_>,
    service_name: &str,
    config: &mut DispatchConfig,
) -> Result<()> {
    use crate::filter::{Condition, Where};

    let conditions = Where::from_value(config.context.get(variables::CONDITIONS))?.and(vec![
        Condition::eq("app_name", ctx.entity_set.scope().app_name.as_str()),
        Condition::eq("service_name", service_name),
    ]);
    config.set_var(variables::CONDITIONS, conditions.to_value());
    Ok(())
}
