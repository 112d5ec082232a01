use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "strategy_templates")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: i64,
    pub bk_biz_id: i64,
    pub app_name: String,
    pub name: String,
    pub code: String,
    pub template_type: String,
    pub system: String,
    pub category: String,
    pub monitor_type: String,
    pub root_id: i64,
    pub parent_id: i64,
    pub detect_json: String,
    pub algorithms_json: String,
    pub user_group_ids_json: String,
    pub query_template_json: String,
    pub context_json: String,
    pub is_enabled: bool,
    pub is_auto_apply: bool,
    pub auto_applied_at: Option<DateTimeWithTimeZone>,
    pub is_deleted: bool,
    pub update_user: String,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
