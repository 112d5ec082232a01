use anyhow::{Context as _, Result};
use oxapm_common::types::Scope;
use oxapm_storage::{StrategyStore, StrategyTemplateFilter};
use std::path::Path;
use tracing_subscriber::EnvFilter;

use oxapm_server::config::ServerConfig;
use oxapm_server::template_seed;

#[allow(clippy::print_stderr)]
fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  oxapm-server init-templates <config.toml> <seed.json>         Create builtin strategy templates from seed file");
    eprintln!("  oxapm-server list-templates <config.toml> <bk_biz_id> <app>   Print the strategy templates of an app as JSON");
}

#[tokio::main]
async fn main() -> Result<()> {
    oxapm_common::id::init(1, 1);

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("oxapm=info".parse()?))
        .init();

    let args: Vec<String> = std::env::args().collect();

    match args.get(1).map(|s| s.as_str()) {
        Some("init-templates") => {
            let config_path = args.get(2).ok_or_else(|| {
                print_usage();
                anyhow::anyhow!("init-templates requires <config.toml> and <seed.json> arguments")
            })?;
            let seed_path = args.get(3).ok_or_else(|| {
                print_usage();
                anyhow::anyhow!("init-templates requires <seed.json> argument")
            })?;
            run_init_templates(config_path, seed_path).await
        }
        Some("list-templates") => {
            let (Some(config_path), Some(biz), Some(app)) = (args.get(2), args.get(3), args.get(4))
            else {
                print_usage();
                anyhow::bail!("list-templates requires <config.toml>, <bk_biz_id> and <app> arguments");
            };
            let bk_biz_id: i64 = biz
                .parse()
                .with_context(|| format!("Invalid bk_biz_id '{biz}'"))?;
            run_list_templates(config_path, &Scope::new(bk_biz_id, app.as_str())).await
        }
        Some("--help" | "-h") => {
            print_usage();
            Ok(())
        }
        _ => {
            print_usage();
            anyhow::bail!("missing or unknown subcommand")
        }
    }
}

async fn open_store(config: &ServerConfig) -> Result<StrategyStore> {
    let db_url = config.database.connection_url();
    tracing::info!(
        data_dir = %config.database.data_dir,
        db = %config.database.redacted_url(),
        "Opening strategy store"
    );
    StrategyStore::new(&db_url, Path::new(&config.database.data_dir)).await
}

/// Initialize builtin strategy templates from a JSON seed file.
async fn run_init_templates(config_path: &str, seed_path: &str) -> Result<()> {
    let config = ServerConfig::load(config_path)?;
    let store = open_store(&config).await?;
    let report = template_seed::init_from_seed_file(&store, seed_path).await?;
    if report.failed > 0 {
        anyhow::bail!("{} strategy template(s) could not be created", report.failed);
    }
    Ok(())
}

#[allow(clippy::print_stdout)]
async fn run_list_templates(config_path: &str, scope: &Scope) -> Result<()> {
    let config = ServerConfig::load(config_path)?;
    let store = open_store(&config).await?;
    let templates = store
        .list_strategy_templates(scope, &StrategyTemplateFilter::default())
        .await?;
    tracing::info!(scope = %scope, count = templates.len(), "Listed strategy templates");
    println!("{}", serde_json::to_string_pretty(&templates)?);
    Ok(())
}
