//! Template-level operations built on the dispatcher.
//!
//! Every mutating operation validates its invariants (template existence,
//! unique names, one auto-applied template per family) before touching the
//! store or the remote rule store.

use chrono::Utc;
use oxapm_common::types::{Algorithm, Context, Detect, Scope, TemplateType};
use oxapm_storage::{
    Page, StrategyInstanceFilter, StrategyStore, StrategyTemplateFilter, StrategyTemplateRow,
    TemplatePage,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use crate::dispatcher::{
    CheckItem, DispatchOptions, DispatchOutcome, StrategyDispatcher, TemplatePreview,
};
use crate::error::{DispatchError, Result};
use crate::hash::value_md5;
use crate::lineage;
use crate::provider::UserGroup;

/// 模板编辑内容，`None` 表示保持不变
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TemplateEdit {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub detect: Option<Detect>,
    #[serde(default)]
    pub algorithms: Option<Vec<Algorithm>>,
    #[serde(default)]
    pub user_group_ids: Option<Vec<i64>>,
    /// Merged key by key over the source's context when cloning; replaces
    /// the context on update.
    #[serde(default)]
    pub context: Option<Context>,
    #[serde(default)]
    pub is_enabled: Option<bool>,
    #[serde(default)]
    pub is_auto_apply: Option<bool>,
}

/// 批量编辑内容，不支持改名和修改变量
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchTemplateEdit {
    #[serde(default)]
    pub detect: Option<Detect>,
    #[serde(default)]
    pub algorithms: Option<Vec<Algorithm>>,
    #[serde(default)]
    pub user_group_ids: Option<Vec<i64>>,
    #[serde(default)]
    pub is_enabled: Option<bool>,
    #[serde(default)]
    pub is_auto_apply: Option<bool>,
}

/// One differing field between an applied instance and a fresh build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDiff {
    pub field: String,
    /// Variable name, set for `variables` diffs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub current: Value,
    pub applied: Value,
}

/// 无已下发实例时 `applied_strategy_template_id` 与 `strategy_id` 为空，`diff` 为空
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompareResult {
    pub service_name: String,
    pub strategy_template_id: i64,
    /// Template of the family that produced the applied instance.
    pub applied_strategy_template_id: Option<i64>,
    pub strategy_id: Option<i64>,
    pub diff: Vec<FieldDiff>,
    /// Applied variables the query template no longer declares.
    pub invalid_variables: Vec<String>,
}

/// Fields `option_values` can list the distinct values of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptionField {
    System,
    TemplateType,
    Category,
    UpdateUser,
    UserGroupId,
    AppliedServiceName,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionValue {
    pub id: Value,
    pub name: String,
}

impl OptionValue {
    fn named(id: impl Into<Value>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedService {
    pub service_name: String,
    pub strategy_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateAlertSummary {
    pub strategy_template_id: i64,
    pub name: String,
    pub services: Vec<AppliedService>,
}

pub struct StrategyTemplateHandler {
    dispatcher: Arc<StrategyDispatcher>,
}

impl StrategyTemplateHandler {
    pub fn new(dispatcher: Arc<StrategyDispatcher>) -> Self {
        Self { dispatcher }
    }

    pub fn dispatcher(&self) -> &StrategyDispatcher {
        &self.dispatcher
    }

    fn store(&self) -> &StrategyStore {
        self.dispatcher.store()
    }

    pub async fn get_template(&self, scope: &Scope, id: i64) -> Result<StrategyTemplateRow> {
        self.store()
            .get_strategy_template(scope, id)
            .await?
            .ok_or_else(|| DispatchError::not_found("strategy template", id))
    }

    /// Loads templates in request order; any missing id fails the call.
    async fn load_templates(&self, scope: &Scope, ids: &[i64]) -> Result<Vec<StrategyTemplateRow>> {
        let rows = self
            .store()
            .list_strategy_templates(
                scope,
                &StrategyTemplateFilter {
                    ids: Some(ids.to_vec()),
                    ..Default::default()
                },
            )
            .await?;
        let mut by_id: HashMap<i64, StrategyTemplateRow> =
            rows.into_iter().map(|r| (r.id, r)).collect();
        ids.iter()
            .map(|id| {
                by_id
                    .remove(id)
                    .ok_or_else(|| DispatchError::not_found("strategy template", id))
            })
            .collect()
    }

    async fn ensure_unique_name(&self, scope: &Scope, name: &str) -> Result<()> {
        let existing = self
            .store()
            .list_strategy_templates(
                scope,
                &StrategyTemplateFilter {
                    name_eq: Some(name.to_string()),
                    ..Default::default()
                },
            )
            .await?;
        if !existing.is_empty() {
            return Err(DispatchError::InvariantViolation(format!(
                "template name '{name}' already exists in {scope}"
            )));
        }
        Ok(())
    }

    /// Current members of the families of `templates`, with `templates`
    /// taking the place of their stored versions.
    async fn families_with(
        &self,
        scope: &Scope,
        templates: &[StrategyTemplateRow],
    ) -> Result<Vec<StrategyTemplateRow>> {
        let roots: Vec<i64> = templates.iter().map(|t| t.resolved_root_id()).collect();
        let mut members = self
            .store()
            .list_strategy_templates(
                scope,
                &StrategyTemplateFilter {
                    family_root_ids: Some(roots),
                    ..Default::default()
                },
            )
            .await?;
        members.retain(|m| templates.iter().all(|t| t.id != m.id));
        members.extend(templates.iter().cloned());
        Ok(members)
    }

    pub async fn create_template(&self, row: StrategyTemplateRow) -> Result<StrategyTemplateRow> {
        let scope = row.scope();
        self.ensure_unique_name(&scope, &row.name).await?;
        if row.is_auto_apply {
            lineage::ensure_single_auto_apply(&self.families_with(&scope, &[row.clone()]).await?)?;
        }
        let created = self.store().insert_strategy_template(&row).await?;
        tracing::info!(
            scope = %scope,
            template_id = created.id,
            name = %created.name,
            "Created strategy template"
        );
        Ok(created)
    }

    pub async fn search(
        &self,
        scope: &Scope,
        filter: &StrategyTemplateFilter,
    ) -> Result<Vec<StrategyTemplateRow>> {
        Ok(self.store().list_strategy_templates(scope, filter).await?)
    }

    pub async fn search_page(
        &self,
        scope: &Scope,
        filter: &StrategyTemplateFilter,
        page: Page,
    ) -> Result<TemplatePage> {
        Ok(self
            .store()
            .list_strategy_templates_page(scope, filter, page)
            .await?)
    }

    /// Distinct values of `fields` over the live templates of the app, for
    /// building search filters. Service names come from the instances of
    /// those templates.
    pub async fn option_values(
        &self,
        scope: &Scope,
        fields: &[OptionField],
    ) -> Result<BTreeMap<OptionField, Vec<OptionValue>>> {
        let templates = self.search(scope, &StrategyTemplateFilter::default()).await?;
        let mut values = BTreeMap::new();
        for &field in fields {
            let options = match field {
                OptionField::System => distinct(templates.iter().map(|t| t.system.to_string())),
                OptionField::TemplateType => {
                    distinct(templates.iter().map(|t| t.template_type.to_string()))
                }
                OptionField::Category => distinct(templates.iter().map(|t| t.category.clone())),
                OptionField::UpdateUser => {
                    distinct(templates.iter().map(|t| t.update_user.clone()))
                }
                OptionField::UserGroupId => {
                    let ids: Vec<i64> = templates
                        .iter()
                        .flat_map(|t| t.user_group_ids.iter().copied())
                        .collect::<BTreeSet<_>>()
                        .into_iter()
                        .collect();
                    let names: HashMap<i64, String> = if ids.is_empty() {
                        HashMap::new()
                    } else {
                        self.dispatcher
                            .providers()
                            .user_groups
                            .list_by_ids(scope.bk_biz_id, &ids)
                            .await?
                            .into_iter()
                            .map(|g| (g.id, g.name))
                            .collect()
                    };
                    ids.into_iter()
                        .map(|id| {
                            let name = names.get(&id).cloned().unwrap_or_else(|| id.to_string());
                            OptionValue::named(id, name)
                        })
                        .collect()
                }
                OptionField::AppliedServiceName => {
                    let instances = self
                        .store()
                        .list_strategy_instances(
                            scope,
                            &StrategyInstanceFilter {
                                strategy_template_ids: Some(
                                    templates.iter().map(|t| t.id).collect(),
                                ),
                                ..Default::default()
                            },
                        )
                        .await?;
                    distinct(instances.into_iter().map(|i| i.service_name))
                }
            };
            values.insert(field, options);
        }
        Ok(values)
    }

    /// Edits one template in place. Renames keep names unique within the
    /// app, and turning auto-apply on is checked against the family.
    pub async fn update(
        &self,
        scope: &Scope,
        id: i64,
        edit: TemplateEdit,
        update_user: &str,
    ) -> Result<StrategyTemplateRow> {
        let mut row = self.get_template(scope, id).await?;
        if let Some(name) = &edit.name {
            if name.trim().is_empty() {
                return Err(DispatchError::InvariantViolation(
                    "template name cannot be empty".into(),
                ));
            }
            if name != &row.name {
                self.ensure_unique_name(scope, name).await?;
                row.name = name.clone();
            }
        }

        let was_auto_apply = row.is_auto_apply;
        if edit.context.is_some() {
            row.context = Context::new();
        }
        apply_edit(&mut row, &edit);
        if row.is_auto_apply && !was_auto_apply {
            row.auto_applied_at = Some(Utc::now());
        } else if !row.is_auto_apply {
            row.auto_applied_at = None;
        }
        row.update_user = update_user.to_string();

        if row.is_auto_apply {
            lineage::ensure_single_auto_apply(&self.families_with(scope, &[row.clone()]).await?)?;
        }
        self.store()
            .update_strategy_templates(std::slice::from_ref(&row))
            .await?;
        tracing::info!(scope = %scope, template_id = id, "Updated strategy template");
        Ok(row)
    }

    /// Dispatches each template to the services. Every template is enriched
    /// and built before the first remote write, so validation errors abort
    /// the call without side effects.
    pub async fn apply(
        &self,
        scope: &Scope,
        service_names: &[String],
        template_ids: &[i64],
        options: &DispatchOptions,
    ) -> Result<BTreeMap<i64, DispatchOutcome>> {
        let templates = self.load_templates(scope, template_ids).await?;
        lineage::ensure_distinct_families(&templates)?;

        let entity_set = self.dispatcher.entity_set(scope, service_names).await?;
        let mut prepared = Vec::with_capacity(templates.len());
        for template in &templates {
            prepared.push(self.dispatcher.prepare(&entity_set, template, options).await?);
        }

        let mut outcomes = BTreeMap::new();
        for p in prepared {
            let outcome = self.dispatcher.execute(scope, p, false).await?;
            outcomes.insert(outcome.strategy_template_id, outcome);
        }

        let dispatched = outcomes.values().any(|o| !o.rule_ids.is_empty());
        if options.raise_on_invalid && !dispatched {
            let failed: BTreeMap<String, String> = outcomes
                .values()
                .flat_map(|o| {
                    o.failed.iter().map(move |(service, reason)| {
                        (format!("{}:{service}", o.strategy_template_id), reason.clone())
                    })
                })
                .collect();
            if !failed.is_empty() {
                return Err(DispatchError::AllFailed { failed });
            }
        }
        Ok(outcomes)
    }

    /// Removes the remote rules and instance rows of the given
    /// (service, template) pairs. Returns the number of removed instances.
    pub async fn unapply(
        &self,
        scope: &Scope,
        service_names: &[String],
        template_ids: &[i64],
    ) -> Result<u64> {
        let instances = self
            .store()
            .list_strategy_instances(
                scope,
                &StrategyInstanceFilter {
                    service_names: Some(service_names.to_vec()),
                    strategy_template_ids: Some(template_ids.to_vec()),
                    ..Default::default()
                },
            )
            .await?;
        if instances.is_empty() {
            return Ok(0);
        }

        let rule_ids: Vec<i64> = instances.iter().map(|i| i.strategy_id).collect();
        self.dispatcher
            .providers()
            .rules
            .delete_rules(scope, &rule_ids)
            .await?;
        let ids: Vec<i64> = instances.iter().map(|i| i.id).collect();
        let removed = self.store().delete_strategy_instances(&ids).await?;

        tracing::info!(scope = %scope, removed, "Unapplied strategy instances");
        Ok(removed)
    }

    pub async fn check(
        &self,
        scope: &Scope,
        service_names: &[String],
        template_ids: &[i64],
        with_diff: bool,
    ) -> Result<Vec<CheckItem>> {
        let templates = self.load_templates(scope, template_ids).await?;
        self.dispatcher
            .check(scope, service_names, &templates, with_diff)
            .await
    }

    pub async fn preview(
        &self,
        scope: &Scope,
        service_names: &[String],
        template_id: i64,
        options: &DispatchOptions,
    ) -> Result<BTreeMap<String, TemplatePreview>> {
        let template = self.get_template(scope, template_id).await?;
        self.dispatcher
            .preview(scope, service_names, &template, options)
            .await
    }

    /// Field-level differences between what the template's family applied to
    /// a service and what the template would dispatch now.
    pub async fn compare(
        &self,
        scope: &Scope,
        service_name: &str,
        template_id: i64,
    ) -> Result<CompareResult> {
        let template = self.get_template(scope, template_id).await?;
        let instance = self
            .store()
            .list_strategy_instances(
                scope,
                &StrategyInstanceFilter {
                    service_names: Some(vec![service_name.to_string()]),
                    root_strategy_template_ids: Some(vec![template.resolved_root_id()]),
                    ..Default::default()
                },
            )
            .await?
            .into_iter()
            .next();
        let Some(instance) = instance else {
            return Ok(CompareResult {
                service_name: service_name.to_string(),
                strategy_template_id: template.id,
                applied_strategy_template_id: None,
                strategy_id: None,
                diff: Vec::new(),
                invalid_variables: Vec::new(),
            });
        };

        let services = [service_name.to_string()];
        let mut previews = self
            .dispatcher
            .preview(scope, &services, &template, &DispatchOptions::default())
            .await?;
        let current = previews
            .remove(service_name)
            .ok_or_else(|| DispatchError::not_found("service", service_name))?;
        let info = self
            .dispatcher
            .providers()
            .query_templates
            .describe(&template.query_template)
            .await?;

        let mut diff = Vec::new();
        if current.detect.normalized() != instance.detect.normalized() {
            diff.push(FieldDiff {
                field: "detect".into(),
                name: None,
                current: serde_json::to_value(current.detect.normalized())?,
                applied: serde_json::to_value(instance.detect.normalized())?,
            });
        }
        if current.algorithms != instance.algorithms {
            diff.push(FieldDiff {
                field: "algorithms".into(),
                name: None,
                current: serde_json::to_value(&current.algorithms)?,
                applied: serde_json::to_value(&instance.algorithms)?,
            });
        }

        let mut current_groups: Vec<i64> = current.user_group_list.iter().map(|g| g.id).collect();
        let mut applied_groups = instance.user_group_ids.clone();
        current_groups.sort_unstable();
        applied_groups.sort_unstable();
        if current_groups != applied_groups {
            let applied_list: Vec<UserGroup> = self
                .dispatcher
                .providers()
                .user_groups
                .list_by_ids(scope.bk_biz_id, &applied_groups)
                .await?;
            diff.push(FieldDiff {
                field: "user_group_list".into(),
                name: None,
                current: serde_json::to_value(&current.user_group_list)?,
                applied: serde_json::to_value(applied_list)?,
            });
        }

        let mut names: Vec<&String> = current
            .context
            .keys()
            .chain(instance.context.keys())
            .collect();
        names.sort();
        names.dedup();
        for name in names {
            let now = current.context.get(name).cloned().unwrap_or(Value::Null);
            let then = instance.context.get(name).cloned().unwrap_or(Value::Null);
            if now != then {
                diff.push(FieldDiff {
                    field: "variables".into(),
                    name: Some(name.clone()),
                    current: now,
                    applied: then,
                });
            }
        }

        let invalid_variables = if info.variables.is_empty() {
            Vec::new()
        } else {
            instance
                .context
                .keys()
                .filter(|k| !info.variables.contains(k))
                .cloned()
                .collect()
        };

        Ok(CompareResult {
            service_name: service_name.to_string(),
            strategy_template_id: template.id,
            applied_strategy_template_id: Some(instance.strategy_template_id),
            strategy_id: Some(instance.strategy_id),
            diff,
            invalid_variables,
        })
    }

    /// Creates an app template cloned from `source_id` with `edit` applied.
    /// A clone whose effective configuration equals the source's is rejected.
    /// Auto-apply stays off unless the edit turns it on.
    pub async fn clone_template(
        &self,
        scope: &Scope,
        source_id: i64,
        edit: TemplateEdit,
        update_user: &str,
    ) -> Result<StrategyTemplateRow> {
        let source = self.get_template(scope, source_id).await?;
        let name = edit
            .name
            .clone()
            .filter(|n| !n.trim().is_empty())
            .ok_or_else(|| DispatchError::InvariantViolation("clone needs a name".into()))?;
        self.ensure_unique_name(scope, &name).await?;

        let now = Utc::now();
        let mut cloned = source.clone();
        cloned.id = oxapm_common::id::next_id();
        cloned.name = name;
        cloned.template_type = TemplateType::App;
        cloned.root_id = source.resolved_root_id();
        cloned.parent_id = source.id;
        cloned.update_user = update_user.to_string();
        cloned.created_at = now;
        cloned.updated_at = now;
        cloned.is_auto_apply = false;
        cloned.auto_applied_at = None;
        apply_edit(&mut cloned, &edit);

        let default_context = self
            .dispatcher
            .providers()
            .query_templates
            .default_context(&source.query_template)
            .await?;
        if effective_md5(&source, &default_context) == effective_md5(&cloned, &default_context) {
            return Err(DispatchError::InvariantViolation(format!(
                "clone of '{}' is identical to its source",
                source.name
            )));
        }
        if cloned.is_auto_apply {
            cloned.auto_applied_at = Some(now);
            lineage::ensure_single_auto_apply(&self.families_with(scope, &[cloned.clone()]).await?)?;
        }

        let created = self.store().insert_strategy_template(&cloned).await?;
        tracing::info!(
            scope = %scope,
            source_id,
            template_id = created.id,
            "Cloned strategy template"
        );
        Ok(created)
    }

    /// Applies `edit` to every template in one transaction, after checking
    /// the one-auto-apply-per-family rule over the whole batch.
    pub async fn batch_edit(
        &self,
        scope: &Scope,
        template_ids: &[i64],
        edit: &BatchTemplateEdit,
        update_user: &str,
    ) -> Result<Vec<StrategyTemplateRow>> {
        let mut rows = self.load_templates(scope, template_ids).await?;
        let now = Utc::now();
        for row in &mut rows {
            if let Some(detect) = &edit.detect {
                row.detect = detect.clone();
            }
            if let Some(algorithms) = &edit.algorithms {
                row.algorithms = algorithms.clone();
            }
            if let Some(ids) = &edit.user_group_ids {
                row.user_group_ids = ids.clone();
            }
            if let Some(enabled) = edit.is_enabled {
                row.is_enabled = enabled;
            }
            if let Some(auto_apply) = edit.is_auto_apply {
                if auto_apply && !row.is_auto_apply {
                    row.auto_applied_at = Some(now);
                } else if !auto_apply {
                    row.auto_applied_at = None;
                }
                row.is_auto_apply = auto_apply;
            }
            row.update_user = update_user.to_string();
        }

        lineage::ensure_single_auto_apply(&self.families_with(scope, &rows).await?)?;
        self.store().update_strategy_templates(&rows).await?;
        tracing::info!(scope = %scope, updated = rows.len(), "Batch edited strategy templates");
        Ok(rows)
    }

    /// Soft-deletes an app template that no service is using.
    pub async fn delete_template(&self, scope: &Scope, id: i64) -> Result<()> {
        let template = self.get_template(scope, id).await?;
        if template.template_type == TemplateType::Builtin {
            return Err(DispatchError::InvariantViolation(format!(
                "builtin template '{}' cannot be deleted",
                template.name
            )));
        }
        let in_use = self.store().count_strategy_instances_by_template(id).await?;
        if in_use > 0 {
            return Err(DispatchError::InvariantViolation(format!(
                "template '{}' is applied to {in_use} service(s)",
                template.name
            )));
        }
        self.store().soft_delete_strategy_template(scope, id).await?;
        tracing::info!(scope = %scope, template_id = id, "Deleted strategy template");
        Ok(())
    }

    /// Dispatches every enabled auto-apply template of the app to all of its
    /// services, skipping ineligible services. A template that fails is
    /// logged and does not stop the sweep.
    pub async fn auto_apply(&self, scope: &Scope) -> Result<BTreeMap<i64, DispatchOutcome>> {
        let templates = self
            .search(
                scope,
                &StrategyTemplateFilter {
                    is_enabled_eq: Some(true),
                    is_auto_apply_eq: Some(true),
                    ..Default::default()
                },
            )
            .await?;

        let options = DispatchOptions::lenient();
        let mut outcomes = BTreeMap::new();
        for template in &templates {
            match self.dispatcher.dispatch(scope, &[], template, &options).await {
                Ok(outcome) => {
                    outcomes.insert(template.id, outcome);
                }
                Err(e) => {
                    tracing::warn!(
                        scope = %scope,
                        template_id = template.id,
                        error = %e,
                        "Auto-apply of template failed"
                    );
                }
            }
        }
        Ok(outcomes)
    }

    /// Services each template of the app is applied to.
    pub async fn alerts_summary(&self, scope: &Scope) -> Result<Vec<TemplateAlertSummary>> {
        let templates = self
            .search(scope, &StrategyTemplateFilter::default())
            .await?;
        let instances = self
            .store()
            .list_strategy_instances(scope, &StrategyInstanceFilter::default())
            .await?;

        let mut by_template: HashMap<i64, Vec<AppliedService>> = HashMap::new();
        for i in instances {
            by_template
                .entry(i.strategy_template_id)
                .or_default()
                .push(AppliedService {
                    service_name: i.service_name,
                    strategy_id: i.strategy_id,
                });
        }

        Ok(templates
            .into_iter()
            .map(|t| TemplateAlertSummary {
                services: by_template.remove(&t.id).unwrap_or_default(),
                strategy_template_id: t.id,
                name: t.name,
            })
            .collect())
    }
}

fn distinct(values: impl Iterator<Item = String>) -> Vec<OptionValue> {
    values
        .filter(|v| !v.is_empty())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .map(|v| OptionValue::named(v.clone(), v))
        .collect()
}

fn apply_edit(row: &mut StrategyTemplateRow, edit: &TemplateEdit) {
    if let Some(detect) = &edit.detect {
        row.detect = detect.clone();
    }
    if let Some(algorithms) = &edit.algorithms {
        row.algorithms = algorithms.clone();
    }
    if let Some(ids) = &edit.user_group_ids {
        row.user_group_ids = ids.clone();
    }
    if let Some(context) = &edit.context {
        for (k, v) in context {
            row.context.insert(k.clone(), v.clone());
        }
    }
    if let Some(enabled) = edit.is_enabled {
        row.is_enabled = enabled;
    }
    if let Some(auto_apply) = edit.is_auto_apply {
        row.is_auto_apply = auto_apply;
    }
}

#[derive(Serialize)]
struct EffectiveTemplate<'a> {
    detect: Detect,
    algorithms: &'a [Algorithm],
    user_group_ids: Vec<i64>,
    context: Context,
    is_enabled: bool,
    is_auto_apply: bool,
}

/// Hash of what a template would dispatch with, the default context filled
/// in under its own variables.
fn effective_md5(row: &StrategyTemplateRow, default_context: &Context) -> String {
    let mut context = default_context.clone();
    for (k, v) in &row.context {
        context.insert(k.clone(), v.clone());
    }
    let mut user_group_ids = row.user_group_ids.clone();
    user_group_ids.sort_unstable();
    user_group_ids.dedup();
    value_md5(&EffectiveTemplate {
        detect: row.detect.normalized(),
        algorithms: &row.algorithms,
        user_group_ids,
        context,
        is_enabled: row.is_enabled,
        is_auto_apply: row.is_auto_apply,
    })
}
