//! Dispatch orchestration.
//!
//! One dispatch call runs `Resolve -> Enrich -> Build -> LoadExisting -> Diff
//! -> Write -> Persist`. Remote writes fan out onto a bounded set of tasks;
//! a failed service is reported and left out of the persist step, which
//! applies all instance changes of the call in one transaction.

use chrono::{DateTime, Utc};
use futures::future::{join_all, try_join_all};
use oxapm_common::types::{Algorithm, Context, Detect, QueryTemplateRef, Scope, System};
use oxapm_storage::{
    InstanceChangeSet, StrategyInstanceFilter, StrategyInstanceRow, StrategyStore,
    StrategyTemplateRow,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

use crate::builder::{StrategyBuilder, StrategyPayload};
use crate::config::{DispatchConfig, DispatchExtraConfig, DispatchGlobalConfig};
use crate::enricher::{EnrichContext, EnricherRegistry};
use crate::entity_set::EntitySet;
use crate::error::{DispatchError, Result};
use crate::hash::content_md5;
use crate::provider::{Providers, QueryTemplateInfo, RemoteRuleStore, UserGroup};
use crate::settings::DispatchSettings;

/// 下发参数
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchOptions {
    /// 全局覆盖配置
    #[serde(default)]
    pub global: DispatchGlobalConfig,
    /// 服务级覆盖配置，按 (模板 ID, 服务名) 匹配
    #[serde(default)]
    pub extras: Vec<DispatchExtraConfig>,
    /// 为 true 时不满足条件的服务直接报错，否则静默跳过
    #[serde(default = "default_raise_on_invalid")]
    pub raise_on_invalid: bool,
}

fn default_raise_on_invalid() -> bool {
    true
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            global: DispatchGlobalConfig::default(),
            extras: Vec::new(),
            raise_on_invalid: default_raise_on_invalid(),
        }
    }
}

impl DispatchOptions {
    /// Options of an auto-apply sweep: no overrides, ineligible services
    /// are dropped.
    pub fn lenient() -> Self {
        Self {
            raise_on_invalid: false,
            ..Self::default()
        }
    }

    /// Override of `service` for one template. An entry naming the template
    /// wins over one that leaves it open.
    pub fn extra_for(&self, template_id: i64, service: &str) -> Option<&DispatchExtraConfig> {
        let mut open = None;
        for extra in self.extras.iter().filter(|e| e.service_name == service) {
            match extra.strategy_template_id {
                Some(id) if id == template_id => return Some(extra),
                None if open.is_none() => open = Some(extra),
                _ => {}
            }
        }
        open
    }
}

/// One service of a template that survived enrichment, ready to be written.
#[derive(Debug, Clone)]
pub struct PreparedService {
    pub service_name: String,
    pub config: DispatchConfig,
    pub payload: StrategyPayload,
    pub md5: String,
}

/// Output of the Resolve, Enrich and Build stages for one template.
#[derive(Debug, Clone)]
pub struct PreparedTemplate {
    pub template: StrategyTemplateRow,
    pub query_info: QueryTemplateInfo,
    pub services: Vec<PreparedService>,
    /// Services dropped as ineligible.
    pub dropped: Vec<String>,
}

/// Result of dispatching one template.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DispatchOutcome {
    pub strategy_template_id: i64,
    /// service name -> remote rule id
    pub rule_ids: BTreeMap<String, i64>,
    /// service name -> failure reason
    pub failed: BTreeMap<String, String>,
    pub dropped: Vec<String>,
}

/// Reference to the instance of a sibling template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SameOriginRef {
    pub strategy_template_id: i64,
    pub strategy_id: i64,
}

/// Dispatch state of one (service, template) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckItem {
    pub service_name: String,
    pub strategy_template_id: i64,
    /// The template itself has a live rule on the service.
    pub applied: bool,
    /// Another template of the same family is the current source.
    pub same_origin: Option<SameOriginRef>,
    /// Live remote rule id of the family's instance.
    pub rule_ref: Option<i64>,
    /// Whether the applied rule differs from a fresh build. Only computed on
    /// request and for applied, eligible services.
    pub has_diff: Option<bool>,
}

/// Rendered template detail of one service, as it would be dispatched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplatePreview {
    pub id: i64,
    pub name: String,
    pub system: System,
    pub category: String,
    pub detect: Detect,
    pub algorithms: Vec<Algorithm>,
    pub user_group_list: Vec<UserGroup>,
    pub query_template: QueryTemplateRef,
    pub query_template_alias: String,
    pub context: Context,
    pub message_template: String,
    pub query: Value,
}

struct WritePlan {
    service: PreparedService,
    prior: Option<StrategyInstanceRow>,
}

pub struct StrategyDispatcher {
    store: Arc<StrategyStore>,
    providers: Providers,
    registry: Arc<EnricherRegistry>,
    settings: DispatchSettings,
}

impl StrategyDispatcher {
    pub fn new(
        store: Arc<StrategyStore>,
        providers: Providers,
        registry: Arc<EnricherRegistry>,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            store,
            providers,
            registry,
            settings,
        }
    }

    pub fn store(&self) -> &StrategyStore {
        &self.store
    }

    pub fn providers(&self) -> &Providers {
        &self.providers
    }

    pub fn settings(&self) -> &DispatchSettings {
        &self.settings
    }

    /// Resolve stage.
    pub async fn entity_set(&self, scope: &Scope, service_names: &[String]) -> Result<EntitySet> {
        EntitySet::new(
            scope,
            self.providers.topology.as_ref(),
            self.providers.relations.clone(),
            service_names,
        )
        .await
    }

    /// Enrich and Build stages of one template over a resolved entity set.
    pub async fn prepare(
        &self,
        entity_set: &EntitySet,
        template: &StrategyTemplateRow,
        options: &DispatchOptions,
    ) -> Result<PreparedTemplate> {
        let enricher = self.registry.get(template.system)?;
        let engine = &self.providers.query_templates;
        let query_info = engine.describe(&template.query_template).await?;
        let default_context = engine.default_context(&template.query_template).await?;
        entity_set.prefetch(template.system).await?;

        let no_extra = DispatchExtraConfig::default();
        let mut configs: BTreeMap<String, DispatchConfig> = BTreeMap::new();
        for service in entity_set.service_names() {
            let extra = options.extra_for(template.id, service).unwrap_or(&no_extra);
            let mut config =
                DispatchConfig::from_configs(&options.global, extra, template, &default_context);
            config.service_name = service.clone();
            if config.user_group_ids.is_empty() {
                config.user_group_ids = self.settings.default_user_group_ids.clone();
            }
            configs.insert(service.clone(), config);
        }

        let ctx = EnrichContext {
            entity_set,
            template,
            query_info: &query_info,
            settings: &self.settings,
        };
        enricher
            .enrich(&ctx, &mut configs, options.raise_on_invalid)
            .await?;
        let dropped: Vec<String> = entity_set
            .service_names()
            .iter()
            .filter(|s| !configs.contains_key(s.as_str()))
            .cloned()
            .collect();

        let queries = try_join_all(
            configs
                .values()
                .map(|c| engine.render(&template.query_template, &c.context)),
        )
        .await?;

        let mut services = Vec::with_capacity(configs.len());
        for (config, query) in configs.into_values().zip(queries) {
            let payload = StrategyBuilder::new(template, &config, query).build()?;
            let md5 = content_md5(
                &config.detect,
                &config.algorithms,
                &config.user_group_ids,
                &config.context,
                &template.query_template,
            );
            services.push(PreparedService {
                service_name: config.service_name.clone(),
                config,
                payload,
                md5,
            });
        }

        tracing::debug!(
            template_id = template.id,
            system = %template.system,
            prepared = services.len(),
            dropped = dropped.len(),
            "Prepared template"
        );

        Ok(PreparedTemplate {
            template: template.clone(),
            query_info,
            services,
            dropped,
        })
    }

    /// Dispatches one template to `service_names` (all services when empty).
    pub async fn dispatch(
        &self,
        scope: &Scope,
        service_names: &[String],
        template: &StrategyTemplateRow,
        options: &DispatchOptions,
    ) -> Result<DispatchOutcome> {
        let entity_set = self.entity_set(scope, service_names).await?;
        let prepared = self.prepare(&entity_set, template, options).await?;
        self.execute(scope, prepared, options.raise_on_invalid).await
    }

    /// LoadExisting, Diff, Write and Persist stages of a prepared template.
    pub async fn execute(
        &self,
        scope: &Scope,
        prepared: PreparedTemplate,
        raise_on_failure: bool,
    ) -> Result<DispatchOutcome> {
        let template = prepared.template;
        let mut outcome = DispatchOutcome {
            strategy_template_id: template.id,
            dropped: prepared.dropped,
            ..DispatchOutcome::default()
        };
        if prepared.services.is_empty() {
            return Ok(outcome);
        }

        // LoadExisting: instances of the whole family on these services
        let names: Vec<String> = prepared
            .services
            .iter()
            .map(|s| s.service_name.clone())
            .collect();
        let existing = self
            .store
            .list_strategy_instances(
                scope,
                &StrategyInstanceFilter {
                    service_names: Some(names),
                    root_strategy_template_ids: Some(vec![template.resolved_root_id()]),
                    ..Default::default()
                },
            )
            .await?;
        let live = self.live_rule_ids(scope, &existing).await?;
        let mut prior_by_service: HashMap<String, StrategyInstanceRow> = existing
            .into_iter()
            .map(|row| (row.service_name.clone(), row))
            .collect();

        // Diff: reuse the family's live rule, otherwise create one
        let plans: Vec<WritePlan> = prepared
            .services
            .into_iter()
            .map(|mut service| {
                let prior = prior_by_service.remove(&service.service_name);
                service.payload.id = prior
                    .as_ref()
                    .map(|p| p.strategy_id)
                    .filter(|id| live.contains(id));
                WritePlan { service, prior }
            })
            .collect();

        let results = self.write_rules(scope, plans).await?;

        // Persist
        let now = Utc::now();
        let mut changes = InstanceChangeSet::default();
        for (plan, result) in results {
            let service_name = plan.service.service_name.clone();
            let rule_id = match result {
                Ok(id) => id,
                Err(e) => {
                    tracing::error!(
                        template_id = template.id,
                        service = %service_name,
                        error = %e,
                        "Remote rule write failed"
                    );
                    let reason = match e {
                        DispatchError::RemoteWrite { message, .. } => message,
                        other => other.to_string(),
                    };
                    outcome.failed.insert(service_name, reason);
                    continue;
                }
            };
            outcome.rule_ids.insert(service_name, rule_id);

            match plan.prior {
                Some(prior) if prior.strategy_template_id == template.id => {
                    if prior.md5 != plan.service.md5 || prior.strategy_id != rule_id {
                        changes.updates.push(instance_row(
                            &template,
                            &plan.service,
                            rule_id,
                            prior.id,
                            prior.created_at,
                        ));
                    }
                }
                Some(prior) => {
                    tracing::debug!(
                        service = %plan.service.service_name,
                        superseded_template_id = prior.strategy_template_id,
                        template_id = template.id,
                        "Superseding same-origin instance"
                    );
                    changes.delete_ids.push(prior.id);
                    changes.creates.push(instance_row(
                        &template,
                        &plan.service,
                        rule_id,
                        oxapm_common::id::next_id(),
                        now,
                    ));
                }
                None => {
                    changes.creates.push(instance_row(
                        &template,
                        &plan.service,
                        rule_id,
                        oxapm_common::id::next_id(),
                        now,
                    ));
                }
            }
        }

        self.store.apply_instance_changes(&changes).await?;

        tracing::info!(
            scope = %scope,
            template_id = template.id,
            dispatched = outcome.rule_ids.len(),
            failed = outcome.failed.len(),
            dropped = outcome.dropped.len(),
            created = changes.creates.len(),
            updated = changes.updates.len(),
            superseded = changes.delete_ids.len(),
            "Dispatched strategy template"
        );

        if raise_on_failure && outcome.rule_ids.is_empty() && !outcome.failed.is_empty() {
            return Err(DispatchError::AllFailed {
                failed: outcome.failed,
            });
        }
        Ok(outcome)
    }

    /// Remote rule ids referenced by `instances` that still exist.
    async fn live_rule_ids(
        &self,
        scope: &Scope,
        instances: &[StrategyInstanceRow],
    ) -> Result<HashSet<i64>> {
        let ids: Vec<i64> = instances
            .iter()
            .map(|i| i.strategy_id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if ids.is_empty() {
            return Ok(HashSet::new());
        }
        Ok(self
            .providers
            .rules
            .list_by_ids(scope, &ids)
            .await?
            .into_iter()
            .map(|r| r.id)
            .collect())
    }

    /// Writes every plan's payload concurrently, at most `max_concurrent` at
    /// a time. Results are returned in plan order.
    async fn write_rules(
        &self,
        scope: &Scope,
        plans: Vec<WritePlan>,
    ) -> Result<Vec<(WritePlan, Result<i64>)>> {
        let semaphore = Arc::new(Semaphore::new(self.settings.max_concurrent.max(1)));
        let timeout = Duration::from_secs(self.settings.remote_timeout_secs);
        let mut handles = Vec::with_capacity(plans.len());

        for plan in &plans {
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(anyhow::Error::from)?;
            let rules = self.providers.rules.clone();
            let scope = scope.clone();
            let service_name = plan.service.service_name.clone();
            let payload = plan.service.payload.clone();

            handles.push(tokio::spawn(async move {
                let result =
                    save_rule(rules.as_ref(), &scope, &service_name, &payload, timeout).await;
                drop(permit);
                result
            }));
        }

        let joined = join_all(handles).await;
        Ok(plans
            .into_iter()
            .zip(joined)
            .map(|(plan, joined)| {
                let result = joined.unwrap_or_else(|e| {
                    Err(DispatchError::RemoteWrite {
                        service: plan.service.service_name.clone(),
                        message: format!("write task aborted: {e}"),
                    })
                });
                (plan, result)
            })
            .collect())
    }

    /// Dispatch state of every service of the entity set for each template.
    pub async fn check(
        &self,
        scope: &Scope,
        service_names: &[String],
        templates: &[StrategyTemplateRow],
        with_diff: bool,
    ) -> Result<Vec<CheckItem>> {
        let entity_set = self.entity_set(scope, service_names).await?;
        let services: Vec<String> = entity_set.service_names().iter().cloned().collect();
        let mut items = Vec::new();

        for template in templates {
            let instances = self
                .store
                .list_strategy_instances(
                    scope,
                    &StrategyInstanceFilter {
                        service_names: Some(services.clone()),
                        root_strategy_template_ids: Some(vec![template.resolved_root_id()]),
                        ..Default::default()
                    },
                )
                .await?;
            let live = self.live_rule_ids(scope, &instances).await?;
            let by_service: HashMap<&str, &StrategyInstanceRow> = instances
                .iter()
                .map(|i| (i.service_name.as_str(), i))
                .collect();

            let fresh_md5: HashMap<String, String> = if with_diff {
                self.prepare(&entity_set, template, &DispatchOptions::lenient())
                    .await?
                    .services
                    .into_iter()
                    .map(|s| (s.service_name, s.md5))
                    .collect()
            } else {
                HashMap::new()
            };

            for service in &services {
                let instance = by_service
                    .get(service.as_str())
                    .copied()
                    .filter(|i| live.contains(&i.strategy_id));
                let applied = instance.is_some_and(|i| i.strategy_template_id == template.id);
                let same_origin = instance
                    .filter(|i| i.strategy_template_id != template.id)
                    .map(|i| SameOriginRef {
                        strategy_template_id: i.strategy_template_id,
                        strategy_id: i.strategy_id,
                    });
                let has_diff = match instance {
                    Some(i) if with_diff && applied => {
                        fresh_md5.get(service).map(|md5| *md5 != i.md5)
                    }
                    _ => None,
                };
                items.push(CheckItem {
                    service_name: service.clone(),
                    strategy_template_id: template.id,
                    applied,
                    same_origin,
                    rule_ref: instance.map(|i| i.strategy_id),
                    has_diff,
                });
            }
        }
        Ok(items)
    }

    /// Rendered template detail per service, without writing anything.
    pub async fn preview(
        &self,
        scope: &Scope,
        service_names: &[String],
        template: &StrategyTemplateRow,
        options: &DispatchOptions,
    ) -> Result<BTreeMap<String, TemplatePreview>> {
        let entity_set = self.entity_set(scope, service_names).await?;
        let prepared = self.prepare(&entity_set, template, options).await?;

        let group_ids: Vec<i64> = prepared
            .services
            .iter()
            .flat_map(|s| s.config.user_group_ids.iter().copied())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let groups: HashMap<i64, UserGroup> = if group_ids.is_empty() {
            HashMap::new()
        } else {
            self.providers
                .user_groups
                .list_by_ids(scope.bk_biz_id, &group_ids)
                .await?
                .into_iter()
                .map(|g| (g.id, g))
                .collect()
        };

        let alias = prepared.query_info.alias.clone();
        Ok(prepared
            .services
            .into_iter()
            .map(|s| {
                let user_group_list = s
                    .config
                    .user_group_ids
                    .iter()
                    .filter_map(|id| groups.get(id).cloned())
                    .collect();
                let query = s
                    .payload
                    .items
                    .into_iter()
                    .next()
                    .map(|item| item.query)
                    .unwrap_or(Value::Null);
                let preview = TemplatePreview {
                    id: template.id,
                    name: template.name.clone(),
                    system: template.system,
                    category: template.category.clone(),
                    detect: s.config.detect,
                    algorithms: s.config.algorithms,
                    user_group_list,
                    query_template: template.query_template.clone(),
                    query_template_alias: alias.clone(),
                    context: s.config.context,
                    message_template: s.config.message_template,
                    query,
                };
                (s.service_name, preview)
            })
            .collect())
    }
}

async fn save_rule(
    rules: &dyn RemoteRuleStore,
    scope: &Scope,
    service_name: &str,
    payload: &StrategyPayload,
    timeout: Duration,
) -> Result<i64> {
    match tokio::time::timeout(timeout, rules.save_rule(scope, payload)).await {
        Ok(Ok(id)) => Ok(id),
        Ok(Err(e)) => Err(DispatchError::RemoteWrite {
            service: service_name.to_string(),
            message: format!("{e:#}"),
        }),
        Err(_) => Err(DispatchError::RemoteWrite {
            service: service_name.to_string(),
            message: format!("timed out after {}s", timeout.as_secs()),
        }),
    }
}

fn instance_row(
    template: &StrategyTemplateRow,
    service: &PreparedService,
    rule_id: i64,
    id: i64,
    created_at: DateTime<Utc>,
) -> StrategyInstanceRow {
    StrategyInstanceRow {
        id,
        bk_biz_id: template.bk_biz_id,
        app_name: template.app_name.clone(),
        service_name: service.service_name.clone(),
        strategy_template_id: template.id,
        root_strategy_template_id: template.resolved_root_id(),
        strategy_id: rule_id,
        detect: service.config.detect.clone(),
        algorithms: service.config.algorithms.clone(),
        user_group_ids: service.config.user_group_ids.clone(),
        context: service.config.context.clone(),
        md5: service.md5.clone(),
        created_at,
        updated_at: Utc::now(),
    }
}
