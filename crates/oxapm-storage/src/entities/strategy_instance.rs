use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "strategy_instances")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: i64,
    pub bk_biz_id: i64,
    pub app_name: String,
    pub service_name: String,
    pub strategy_template_id: i64,
    pub root_strategy_template_id: i64,
    pub strategy_id: i64,
    pub detect_json: String,
    pub algorithms_json: String,
    pub user_group_ids_json: String,
    pub context_json: String,
    pub md5: String,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
