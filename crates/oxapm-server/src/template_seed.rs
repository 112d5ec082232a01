use chrono::Utc;
use oxapm_common::types::{Scope, TemplateType, ROOT_TEMPLATE_ID};
use oxapm_storage::{StrategyStore, StrategyTemplateFilter, StrategyTemplateRow};

use crate::config::{SeedTemplate, TemplatesSeedFile};

/// Counts of one `init-templates` run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SeedReport {
    pub created: u32,
    pub skipped: u32,
    pub failed: u32,
}

pub fn parse_seed_file(path: &str) -> anyhow::Result<TemplatesSeedFile> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Failed to read seed file '{}': {}", path, e))?;
    serde_json::from_str(&content)
        .map_err(|e| anyhow::anyhow!("Failed to parse seed file '{}': {}", path, e))
}

fn builtin_row(seed: &SeedTemplate) -> StrategyTemplateRow {
    let now = Utc::now();
    StrategyTemplateRow {
        id: oxapm_common::id::next_id(),
        bk_biz_id: seed.bk_biz_id,
        app_name: seed.app_name.clone(),
        name: seed.name.clone(),
        code: seed.code.clone(),
        template_type: TemplateType::Builtin,
        system: seed.system,
        category: seed.category.clone(),
        monitor_type: seed.monitor_type.clone(),
        root_id: ROOT_TEMPLATE_ID,
        parent_id: ROOT_TEMPLATE_ID,
        detect: seed.detect.clone(),
        algorithms: seed.algorithms.clone(),
        user_group_ids: seed.user_group_ids.clone(),
        query_template: seed.query_template.clone(),
        context: seed.context.clone(),
        is_enabled: seed.is_enabled,
        is_auto_apply: seed.is_auto_apply,
        auto_applied_at: seed.is_auto_apply.then_some(now),
        is_deleted: false,
        update_user: "system".to_string(),
        created_at: now,
        updated_at: now,
    }
}

/// Creates the builtin templates of `seed`. A template whose name already
/// exists in its app is skipped; a failed insert is logged and counted.
pub async fn init_templates(store: &StrategyStore, seed: &TemplatesSeedFile) -> anyhow::Result<SeedReport> {
    let mut report = SeedReport::default();

    for t in &seed.templates {
        let scope = Scope::new(t.bk_biz_id, t.app_name.clone());
        let existing = store
            .list_strategy_templates(
                &scope,
                &StrategyTemplateFilter {
                    name_eq: Some(t.name.clone()),
                    ..Default::default()
                },
            )
            .await?;
        if !existing.is_empty() {
            tracing::warn!(scope = %scope, name = %t.name, "Strategy template already exists, skipping");
            report.skipped += 1;
            continue;
        }

        match store.insert_strategy_template(&builtin_row(t)).await {
            Ok(inserted) => {
                tracing::info!(
                    scope = %scope,
                    name = %t.name,
                    id = inserted.id,
                    system = %t.system,
                    "Strategy template created"
                );
                report.created += 1;
            }
            Err(e) => {
                tracing::error!(scope = %scope, name = %t.name, error = %e, "Failed to create strategy template");
                report.failed += 1;
            }
        }
    }

    tracing::info!(
        created = report.created,
        skipped = report.skipped,
        failed = report.failed,
        "init-templates completed"
    );
    Ok(report)
}

pub async fn init_from_seed_file(store: &StrategyStore, path: &str) -> anyhow::Result<SeedReport> {
    let seed = parse_seed_file(path)?;
    init_templates(store, &seed).await
}
