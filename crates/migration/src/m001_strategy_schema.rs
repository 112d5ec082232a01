use sea_orm_migration::prelude::*;

pub struct Migration;

impl MigrationName for Migration {
    fn name(&self) -> &str {
        "m001_strategy_schema"
    }
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager.get_connection().execute_unprepared(UP_SQL).await?;
        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .get_connection()
            .execute_unprepared(DOWN_SQL)
            .await?;
        Ok(())
    }
}

const UP_SQL: &str = "
CREATE TABLE IF NOT EXISTS strategy_templates (
    id INTEGER PRIMARY KEY NOT NULL,
    bk_biz_id INTEGER NOT NULL,
    app_name TEXT NOT NULL,
    name TEXT NOT NULL,
    code TEXT NOT NULL DEFAULT '',
    template_type TEXT NOT NULL DEFAULT 'app',
    system TEXT NOT NULL,
    category TEXT NOT NULL DEFAULT '',
    monitor_type TEXT NOT NULL DEFAULT '',
    root_id INTEGER NOT NULL DEFAULT 0,
    parent_id INTEGER NOT NULL DEFAULT 0,
    detect_json TEXT NOT NULL,
    algorithms_json TEXT NOT NULL,
    user_group_ids_json TEXT NOT NULL DEFAULT '[]',
    query_template_json TEXT NOT NULL,
    context_json TEXT NOT NULL DEFAULT '{}',
    is_enabled INTEGER NOT NULL DEFAULT 1,
    is_auto_apply INTEGER NOT NULL DEFAULT 0,
    auto_applied_at TEXT,
    is_deleted INTEGER NOT NULL DEFAULT 0,
    update_user TEXT NOT NULL DEFAULT '',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_strategy_templates_scope ON strategy_templates(bk_biz_id, app_name);
CREATE INDEX IF NOT EXISTS idx_strategy_templates_root ON strategy_templates(root_id);

CREATE TABLE IF NOT EXISTS strategy_instances (
    id INTEGER PRIMARY KEY NOT NULL,
    bk_biz_id INTEGER NOT NULL,
    app_name TEXT NOT NULL,
    service_name TEXT NOT NULL,
    strategy_template_id INTEGER NOT NULL,
    root_strategy_template_id INTEGER NOT NULL,
    strategy_id INTEGER NOT NULL,
    detect_json TEXT NOT NULL,
    algorithms_json TEXT NOT NULL,
    user_group_ids_json TEXT NOT NULL DEFAULT '[]',
    context_json TEXT NOT NULL DEFAULT '{}',
    md5 TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS uk_strategy_instances_lineage
    ON strategy_instances(bk_biz_id, app_name, service_name, root_strategy_template_id);
CREATE INDEX IF NOT EXISTS idx_strategy_instances_template ON strategy_instances(strategy_template_id);
";

const DOWN_SQL: &str = "
DROP TABLE IF EXISTS strategy_instances;
DROP TABLE IF EXISTS strategy_templates;
";
