use chrono::{DateTime, Utc};
use oxapm_common::types::{
    resolve_root_id, Algorithm, Context, Detect, QueryTemplateRef, Scope, System, TemplateType,
};
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, Condition, EntityTrait, Order,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Select, TransactionTrait,
};
use serde::{Deserialize, Serialize};

use super::{from_json, parse_enum, to_json, StrategyStore};
use crate::entities::strategy_instance;
use crate::entities::strategy_template::{self, Column, Entity};
use crate::error::Result;

/// 策略模板数据行（来自 strategy_templates 表）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyTemplateRow {
    pub id: i64,
    pub bk_biz_id: i64,
    pub app_name: String,
    pub name: String,
    /// 内置模板编码，克隆时沿用
    pub code: String,
    pub template_type: TemplateType,
    pub system: System,
    pub category: String,
    pub monitor_type: String,
    /// 同源族的根模板 ID，原始模板为 0
    pub root_id: i64,
    /// 直接克隆来源，原始模板为 0
    pub parent_id: i64,
    pub detect: Detect,
    pub algorithms: Vec<Algorithm>,
    pub user_group_ids: Vec<i64>,
    pub query_template: QueryTemplateRef,
    pub context: Context,
    pub is_enabled: bool,
    pub is_auto_apply: bool,
    pub auto_applied_at: Option<DateTime<Utc>>,
    pub is_deleted: bool,
    pub update_user: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StrategyTemplateRow {
    /// Root id of the family this template belongs to.
    pub fn resolved_root_id(&self) -> i64 {
        resolve_root_id(self.id, self.root_id)
    }

    pub fn scope(&self) -> Scope {
        Scope::new(self.bk_biz_id, self.app_name.clone())
    }
}

/// 策略模板列表过滤器
#[derive(Debug, Clone, Default)]
pub struct StrategyTemplateFilter {
    pub ids: Option<Vec<i64>>,
    /// 匹配这些根模板所在的整个同源族（根模板本身及其全部克隆）
    pub family_root_ids: Option<Vec<i64>>,
    /// 模糊搜索：名称包含，或 ID 完全相等
    pub query: Option<String>,
    pub name_contains: Option<String>,
    pub name_eq: Option<String>,
    pub template_type_eq: Option<TemplateType>,
    pub system_eq: Option<System>,
    pub update_user_eq: Option<String>,
    pub is_enabled_eq: Option<bool>,
    pub is_auto_apply_eq: Option<bool>,
    pub user_group_id: Option<i64>,
    /// 仅保留已下发到这些服务的模板
    pub applied_service_names: Option<Vec<String>>,
    /// 排序字段，空时按创建时间升序
    pub order_by: Vec<TemplateOrder>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateOrderField {
    Id,
    Name,
    CreatedAt,
    UpdatedAt,
}

impl TemplateOrderField {
    fn column(self) -> Column {
        match self {
            Self::Id => Column::Id,
            Self::Name => Column::Name,
            Self::CreatedAt => Column::CreatedAt,
            Self::UpdatedAt => Column::UpdatedAt,
        }
    }
}

/// One sort key. Parses from `updated_at` (ascending) or `-updated_at`
/// (descending).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TemplateOrder {
    pub field: TemplateOrderField,
    pub descending: bool,
}

impl TemplateOrder {
    pub fn asc(field: TemplateOrderField) -> Self {
        Self {
            field,
            descending: false,
        }
    }

    pub fn desc(field: TemplateOrderField) -> Self {
        Self {
            field,
            descending: true,
        }
    }
}

impl std::str::FromStr for TemplateOrder {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (descending, name) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s),
        };
        let field = match name {
            "id" => TemplateOrderField::Id,
            "name" => TemplateOrderField::Name,
            "created_at" => TemplateOrderField::CreatedAt,
            "updated_at" => TemplateOrderField::UpdatedAt,
            other => return Err(format!("unknown order field: {other}")),
        };
        Ok(Self { field, descending })
    }
}

/// 1-based page of a template listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub page: u64,
    pub page_size: u64,
}

impl Page {
    fn offset(&self) -> u64 {
        (self.page.max(1) - 1).saturating_mul(self.page_size)
    }
}

/// 分页查询结果，`total` 为分页前的匹配总数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplatePage {
    pub total: u64,
    pub templates: Vec<StrategyTemplateRow>,
}

fn to_row(m: strategy_template::Model) -> Result<StrategyTemplateRow> {
    Ok(StrategyTemplateRow {
        template_type: parse_enum("template_type", &m.template_type)?,
        system: parse_enum("system", &m.system)?,
        detect: from_json("detect_json", &m.detect_json)?,
        algorithms: from_json("algorithms_json", &m.algorithms_json)?,
        user_group_ids: from_json("user_group_ids_json", &m.user_group_ids_json)?,
        query_template: from_json("query_template_json", &m.query_template_json)?,
        context: from_json("context_json", &m.context_json)?,
        id: m.id,
        bk_biz_id: m.bk_biz_id,
        app_name: m.app_name,
        name: m.name,
        code: m.code,
        category: m.category,
        monitor_type: m.monitor_type,
        root_id: m.root_id,
        parent_id: m.parent_id,
        is_enabled: m.is_enabled,
        is_auto_apply: m.is_auto_apply,
        auto_applied_at: m.auto_applied_at.map(|t| t.with_timezone(&Utc)),
        is_deleted: m.is_deleted,
        update_user: m.update_user,
        created_at: m.created_at.with_timezone(&Utc),
        updated_at: m.updated_at.with_timezone(&Utc),
    })
}

fn to_active_model(row: &StrategyTemplateRow) -> Result<strategy_template::ActiveModel> {
    Ok(strategy_template::ActiveModel {
        id: Set(row.id),
        bk_biz_id: Set(row.bk_biz_id),
        app_name: Set(row.app_name.clone()),
        name: Set(row.name.clone()),
        code: Set(row.code.clone()),
        template_type: Set(row.template_type.to_string()),
        system: Set(row.system.to_string()),
        category: Set(row.category.clone()),
        monitor_type: Set(row.monitor_type.clone()),
        root_id: Set(row.root_id),
        parent_id: Set(row.parent_id),
        detect_json: Set(to_json("detect_json", &row.detect)?),
        algorithms_json: Set(to_json("algorithms_json", &row.algorithms)?),
        user_group_ids_json: Set(to_json("user_group_ids_json", &row.user_group_ids)?),
        query_template_json: Set(to_json("query_template_json", &row.query_template)?),
        context_json: Set(to_json("context_json", &row.context)?),
        is_enabled: Set(row.is_enabled),
        is_auto_apply: Set(row.is_auto_apply),
        auto_applied_at: Set(row.auto_applied_at.map(|t| t.fixed_offset())),
        is_deleted: Set(row.is_deleted),
        update_user: Set(row.update_user.clone()),
        created_at: Set(row.created_at.fixed_offset()),
        updated_at: Set(row.updated_at.fixed_offset()),
    })
}

impl StrategyStore {
    pub async fn insert_strategy_template(
        &self,
        row: &StrategyTemplateRow,
    ) -> Result<StrategyTemplateRow> {
        let now = Utc::now();
        let mut am = to_active_model(row)?;
        am.created_at = Set(now.fixed_offset());
        am.updated_at = Set(now.fixed_offset());
        let model = am.insert(self.db()).await?;
        to_row(model)
    }

    /// Gets a live (not soft-deleted) template of the scope.
    pub async fn get_strategy_template(
        &self,
        scope: &Scope,
        id: i64,
    ) -> Result<Option<StrategyTemplateRow>> {
        let model = Entity::find_by_id(id)
            .filter(Column::BkBizId.eq(scope.bk_biz_id))
            .filter(Column::AppName.eq(scope.app_name.as_str()))
            .filter(Column::IsDeleted.eq(false))
            .one(self.db())
            .await?;
        model.map(to_row).transpose()
    }

    /// Builds the filtered, ordered query; `user_group_id` is left to the
    /// caller since the group ids are stored as JSON text.
    async fn select_strategy_templates(
        &self,
        scope: &Scope,
        filter: &StrategyTemplateFilter,
    ) -> Result<Select<Entity>> {
        let mut q = Entity::find()
            .filter(Column::BkBizId.eq(scope.bk_biz_id))
            .filter(Column::AppName.eq(scope.app_name.as_str()))
            .filter(Column::IsDeleted.eq(false));
        if let Some(ids) = &filter.ids {
            q = q.filter(Column::Id.is_in(ids.clone()));
        }
        if let Some(root_ids) = &filter.family_root_ids {
            q = q.filter(
                Condition::any()
                    .add(Column::Id.is_in(root_ids.clone()))
                    .add(Column::RootId.is_in(root_ids.clone())),
            );
        }
        if let Some(query) = filter.query.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            let mut cond = Condition::any().add(Column::Name.contains(query));
            if let Ok(id) = query.parse::<i64>() {
                cond = cond.add(Column::Id.eq(id));
            }
            q = q.filter(cond);
        }
        if let Some(name) = &filter.name_contains {
            q = q.filter(Column::Name.contains(name.as_str()));
        }
        if let Some(name) = &filter.name_eq {
            q = q.filter(Column::Name.eq(name.as_str()));
        }
        if let Some(template_type) = filter.template_type_eq {
            q = q.filter(Column::TemplateType.eq(template_type.as_str()));
        }
        if let Some(system) = filter.system_eq {
            q = q.filter(Column::System.eq(system.as_str()));
        }
        if let Some(user) = &filter.update_user_eq {
            q = q.filter(Column::UpdateUser.eq(user.as_str()));
        }
        if let Some(enabled) = filter.is_enabled_eq {
            q = q.filter(Column::IsEnabled.eq(enabled));
        }
        if let Some(auto_apply) = filter.is_auto_apply_eq {
            q = q.filter(Column::IsAutoApply.eq(auto_apply));
        }
        if let Some(services) = &filter.applied_service_names {
            let applied_ids: Vec<i64> = strategy_instance::Entity::find()
                .filter(strategy_instance::Column::BkBizId.eq(scope.bk_biz_id))
                .filter(strategy_instance::Column::AppName.eq(scope.app_name.as_str()))
                .filter(strategy_instance::Column::ServiceName.is_in(services.clone()))
                .all(self.db())
                .await?
                .into_iter()
                .map(|m| m.strategy_template_id)
                .collect();
            q = q.filter(Column::Id.is_in(applied_ids));
        }

        // 雪花 ID 不保证创建顺序，默认按创建时间排序，ID 只做并列时的兜底
        if filter.order_by.is_empty() {
            q = q.order_by(Column::CreatedAt, Order::Asc);
        }
        for key in &filter.order_by {
            let order = if key.descending { Order::Desc } else { Order::Asc };
            q = q.order_by(key.field.column(), order);
        }
        Ok(q.order_by(Column::Id, Order::Asc))
    }

    pub async fn list_strategy_templates(
        &self,
        scope: &Scope,
        filter: &StrategyTemplateFilter,
    ) -> Result<Vec<StrategyTemplateRow>> {
        let models = self
            .select_strategy_templates(scope, filter)
            .await?
            .all(self.db())
            .await?;
        let mut rows = models
            .into_iter()
            .map(to_row)
            .collect::<Result<Vec<_>>>()?;
        // user_group_ids 存为 JSON 文本，在内存中过滤
        if let Some(group_id) = filter.user_group_id {
            rows.retain(|r| r.user_group_ids.contains(&group_id));
        }
        Ok(rows)
    }

    /// Lists one page of the filtered templates together with the total
    /// match count.
    pub async fn list_strategy_templates_page(
        &self,
        scope: &Scope,
        filter: &StrategyTemplateFilter,
        page: Page,
    ) -> Result<TemplatePage> {
        if filter.user_group_id.is_some() {
            let rows = self.list_strategy_templates(scope, filter).await?;
            let total = rows.len() as u64;
            let templates = rows
                .into_iter()
                .skip(page.offset() as usize)
                .take(page.page_size as usize)
                .collect();
            return Ok(TemplatePage { total, templates });
        }

        let q = self.select_strategy_templates(scope, filter).await?;
        let total = q.clone().count(self.db()).await?;
        let templates = q
            .limit(page.page_size)
            .offset(page.offset())
            .all(self.db())
            .await?
            .into_iter()
            .map(to_row)
            .collect::<Result<Vec<_>>>()?;
        Ok(TemplatePage { total, templates })
    }

    /// Writes every row in one transaction; either all edits land or none.
    pub async fn update_strategy_templates(&self, rows: &[StrategyTemplateRow]) -> Result<()> {
        let txn = self.db().begin().await?;
        let now = Utc::now().fixed_offset();
        for row in rows {
            let mut am = to_active_model(row)?;
            am.updated_at = Set(now);
            am.update(&txn).await?;
        }
        txn.commit().await?;
        Ok(())
    }

    /// Marks a template deleted. Returns false when no live row matched.
    pub async fn soft_delete_strategy_template(&self, scope: &Scope, id: i64) -> Result<bool> {
        let model = Entity::find_by_id(id)
            .filter(Column::BkBizId.eq(scope.bk_biz_id))
            .filter(Column::AppName.eq(scope.app_name.as_str()))
            .filter(Column::IsDeleted.eq(false))
            .one(self.db())
            .await?;
        let Some(m) = model else {
            return Ok(false);
        };
        let mut am: strategy_template::ActiveModel = m.into();
        am.is_deleted = Set(true);
        am.is_auto_apply = Set(false);
        am.updated_at = Set(Utc::now().fixed_offset());
        am.update(self.db()).await?;
        Ok(true)
    }
}
