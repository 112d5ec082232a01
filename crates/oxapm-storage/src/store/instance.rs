use chrono::{DateTime, Utc};
use oxapm_common::types::{Algorithm, Context, Detect, Scope};
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, EntityTrait, Order, PaginatorTrait,
    QueryFilter, QueryOrder, TransactionTrait,
};
use serde::{Deserialize, Serialize};

use super::{from_json, to_json, StrategyStore};
use crate::entities::strategy_instance::{self, Column, Entity};
use crate::error::Result;

/// 下发实例数据行（来自 strategy_instances 表）
///
/// 记录某个模板下发到某个服务后产生的远端策略，以及下发时的配置快照和 md5。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyInstanceRow {
    pub id: i64,
    pub bk_biz_id: i64,
    pub app_name: String,
    pub service_name: String,
    pub strategy_template_id: i64,
    pub root_strategy_template_id: i64,
    /// 远端告警策略 ID
    pub strategy_id: i64,
    pub detect: Detect,
    pub algorithms: Vec<Algorithm>,
    pub user_group_ids: Vec<i64>,
    pub context: Context,
    pub md5: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 下发实例过滤器，`None` 表示不限制
#[derive(Debug, Clone, Default)]
pub struct StrategyInstanceFilter {
    pub service_names: Option<Vec<String>>,
    pub strategy_template_ids: Option<Vec<i64>>,
    pub root_strategy_template_ids: Option<Vec<i64>>,
}

/// Instance writes produced by one dispatch, applied atomically.
#[derive(Debug, Clone, Default)]
pub struct InstanceChangeSet {
    pub delete_ids: Vec<i64>,
    pub creates: Vec<StrategyInstanceRow>,
    pub updates: Vec<StrategyInstanceRow>,
}

impl InstanceChangeSet {
    pub fn is_empty(&self) -> bool {
        self.delete_ids.is_empty() && self.creates.is_empty() && self.updates.is_empty()
    }
}

fn to_row(m: strategy_instance::Model) -> Result<StrategyInstanceRow> {
    Ok(StrategyInstanceRow {
        detect: from_json("detect_json", &m.detect_json)?,
        algorithms: from_json("algorithms_json", &m.algorithms_json)?,
        user_group_ids: from_json("user_group_ids_json", &m.user_group_ids_json)?,
        context: from_json("context_json", &m.context_json)?,
        id: m.id,
        bk_biz_id: m.bk_biz_id,
        app_name: m.app_name,
        service_name: m.service_name,
        strategy_template_id: m.strategy_template_id,
        root_strategy_template_id: m.root_strategy_template_id,
        strategy_id: m.strategy_id,
        md5: m.md5,
        created_at: m.created_at.with_timezone(&Utc),
        updated_at: m.updated_at.with_timezone(&Utc),
    })
}

fn to_active_model(row: &StrategyInstanceRow) -> Result<strategy_instance::ActiveModel> {
    Ok(strategy_instance::ActiveModel {
        id: Set(row.id),
        bk_biz_id: Set(row.bk_biz_id),
        app_name: Set(row.app_name.clone()),
        service_name: Set(row.service_name.clone()),
        strategy_template_id: Set(row.strategy_template_id),
        root_strategy_template_id: Set(row.root_strategy_template_id),
        strategy_id: Set(row.strategy_id),
        detect_json: Set(to_json("detect_json", &row.detect)?),
        algorithms_json: Set(to_json("algorithms_json", &row.algorithms)?),
        user_group_ids_json: Set(to_json("user_group_ids_json", &row.user_group_ids)?),
        context_json: Set(to_json("context_json", &row.context)?),
        md5: Set(row.md5.clone()),
        created_at: Set(row.created_at.fixed_offset()),
        updated_at: Set(row.updated_at.fixed_offset()),
    })
}

impl StrategyStore {
    pub async fn list_strategy_instances(
        &self,
        scope: &Scope,
        filter: &StrategyInstanceFilter,
    ) -> Result<Vec<StrategyInstanceRow>> {
        let mut q = Entity::find()
            .filter(Column::BkBizId.eq(scope.bk_biz_id))
            .filter(Column::AppName.eq(scope.app_name.as_str()));
        if let Some(services) = &filter.service_names {
            q = q.filter(Column::ServiceName.is_in(services.clone()));
        }
        if let Some(ids) = &filter.strategy_template_ids {
            q = q.filter(Column::StrategyTemplateId.is_in(ids.clone()));
        }
        if let Some(root_ids) = &filter.root_strategy_template_ids {
            q = q.filter(Column::RootStrategyTemplateId.is_in(root_ids.clone()));
        }
        let models = q.order_by(Column::Id, Order::Asc).all(self.db()).await?;
        models.into_iter().map(to_row).collect()
    }

    /// Counts instances produced by a template across every scope.
    pub async fn count_strategy_instances_by_template(&self, template_id: i64) -> Result<u64> {
        Ok(Entity::find()
            .filter(Column::StrategyTemplateId.eq(template_id))
            .count(self.db())
            .await?)
    }

    /// Applies deletes, inserts and updates of one dispatch inside a single
    /// transaction. Deletes run first so that a superseded row of the same
    /// lineage never collides with its replacement.
    pub async fn apply_instance_changes(&self, changes: &InstanceChangeSet) -> Result<()> {
        if changes.is_empty() {
            return Ok(());
        }

        let txn = self.db().begin().await?;
        if !changes.delete_ids.is_empty() {
            Entity::delete_many()
                .filter(Column::Id.is_in(changes.delete_ids.clone()))
                .exec(&txn)
                .await?;
        }
        if !changes.creates.is_empty() {
            let ams = changes
                .creates
                .iter()
                .map(to_active_model)
                .collect::<Result<Vec<_>>>()?;
            Entity::insert_many(ams).exec(&txn).await?;
        }
        let now = Utc::now().fixed_offset();
        for row in &changes.updates {
            let mut am = to_active_model(row)?;
            am.updated_at = Set(now);
            am.update(&txn).await?;
        }
        txn.commit().await?;

        tracing::debug!(
            deleted = changes.delete_ids.len(),
            created = changes.creates.len(),
            updated = changes.updates.len(),
            "Applied strategy instance changes"
        );
        Ok(())
    }

    pub async fn delete_strategy_instances(&self, ids: &[i64]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let res = Entity::delete_many()
            .filter(Column::Id.is_in(ids.to_vec()))
            .exec(self.db())
            .await?;
        Ok(res.rows_affected)
    }
}
