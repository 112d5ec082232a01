use migration::{Migrator, MigratorTrait};
use sea_orm::{ConnectionTrait, Database, DatabaseConnection};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;

use crate::error::{Result, StorageError};

pub mod instance;
pub mod template;

pub use instance::{InstanceChangeSet, StrategyInstanceFilter, StrategyInstanceRow};
pub use template::{
    Page, StrategyTemplateFilter, StrategyTemplateRow, TemplateOrder, TemplateOrderField,
    TemplatePage,
};

/// 策略模板与下发实例的统一访问层。
///
/// 所有方法均为 `async fn`，底层使用 SeaORM + SQLite。
pub struct StrategyStore {
    pub(crate) db: DatabaseConnection,
}

impl StrategyStore {
    /// 连接并初始化数据库。
    ///
    /// - `db_url`：完整的数据库连接 URL，例如 `sqlite:///data/oxapm.db?mode=rwc`
    /// - `data_dir`：本地数据目录，SQLite 文件所在目录会在连接前创建
    ///
    /// 自动运行 `sea-orm-migration` 迁移，确保 Schema 最新。
    pub async fn new(db_url: &str, data_dir: &Path) -> anyhow::Result<Self> {
        std::fs::create_dir_all(data_dir)?;
        let db = Database::connect(db_url).await?;

        // WAL 模式仅对 SQLite 有效
        if db_url.starts_with("sqlite://") {
            db.execute_unprepared("PRAGMA journal_mode=WAL;").await?;
        }

        Migrator::up(&db, None).await?;

        tracing::info!(db_url = %redact_url(db_url), "Initialized strategy store (SeaORM)");
        Ok(Self { db })
    }

    /// 返回底层数据库连接引用（供子模块使用）。
    pub(crate) fn db(&self) -> &DatabaseConnection {
        &self.db
    }
}

/// Masks the password of a connection URL, for logging.
pub fn redact_url(url: &str) -> String {
    let Some((scheme, rest)) = url.split_once("://") else {
        return url.to_string();
    };
    match rest.rsplit_once('@') {
        Some((credentials, host)) => {
            let user = credentials.split(':').next().unwrap_or_default();
            format!("{scheme}://{user}:***@{host}")
        }
        None => url.to_string(),
    }
}

pub(crate) fn to_json<T: Serialize + ?Sized>(column: &'static str, value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|source| StorageError::Json { column, source })
}

pub(crate) fn from_json<T: DeserializeOwned>(column: &'static str, raw: &str) -> Result<T> {
    serde_json::from_str(raw).map_err(|source| StorageError::Json { column, source })
}

pub(crate) fn parse_enum<T: std::str::FromStr>(column: &'static str, raw: &str) -> Result<T> {
    raw.parse().map_err(|_| StorageError::InvalidValue {
        column,
        value: raw.to_string(),
    })
}
