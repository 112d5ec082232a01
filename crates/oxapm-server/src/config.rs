use anyhow::Context as _;
use oxapm_common::types::{Algorithm, Context, Detect, QueryTemplateRef, System};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// 完整连接 URL，缺省时使用 `data_dir` 下的 SQLite 文件
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            data_dir: default_data_dir(),
        }
    }
}

impl DatabaseConfig {
    pub fn connection_url(&self) -> String {
        match &self.url {
            Some(url) if !url.is_empty() => url.clone(),
            _ => format!(
                "sqlite://{}/oxapm.db?mode=rwc",
                self.data_dir.trim_end_matches('/')
            ),
        }
    }

    /// Connection URL with the password part masked, for logging.
    pub fn redacted_url(&self) -> String {
        oxapm_storage::redact_url(&self.connection_url())
    }
}

fn default_data_dir() -> String {
    "data".to_string()
}

// ---- Template seed file types (used by `init-templates` CLI subcommand) ----

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplatesSeedFile {
    #[serde(default)]
    pub templates: Vec<SeedTemplate>,
}

/// 内置策略模板
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedTemplate {
    pub bk_biz_id: i64,
    pub app_name: String,
    pub name: String,
    pub code: String,
    pub system: System,
    pub category: String,
    #[serde(default = "default_seed_monitor_type")]
    pub monitor_type: String,
    #[serde(default)]
    pub detect: Detect,
    pub algorithms: Vec<Algorithm>,
    #[serde(default)]
    pub user_group_ids: Vec<i64>,
    pub query_template: QueryTemplateRef,
    #[serde(default)]
    pub context: Context,
    #[serde(default = "default_seed_enabled")]
    pub is_enabled: bool,
    #[serde(default)]
    pub is_auto_apply: bool,
}

fn default_seed_monitor_type() -> String {
    "metric".to_string()
}

fn default_seed_enabled() -> bool {
    true
}

impl ServerConfig {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file '{path}'"))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file '{path}'"))?;
        Ok(config)
    }
}
