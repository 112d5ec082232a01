use async_trait::async_trait;
use oxapm_common::types::System;

use super::{EnrichContext, Enricher};
use crate::config::{variables, DispatchConfig};
use crate::error::{DispatchError, Result};

/// 日志关键字告警：应用需配置日志数据源
pub struct LogEnricher;

#[async_trait]
impl Enricher for LogEnricher {
    fn system(&self) -> System {
        System::Log
    }

    fn scene_dashboard(&self) -> &'static str {
        "service-default-log"
    }

    async fn is_valid(&self, ctx: &EnrichContext<'_>, _service_name: &str) -> Result<bool> {
        Ok(ctx.entity_set.get_log_index_id_or_none().await?.is_some())
    }

    async fn decorate(
        &self,
        ctx: &EnrichContext<'_>,
        service_name: &str,
        config: &mut DispatchConfig,
    ) -> Result<()> {
        let index_set_id = ctx
            .entity_set
            .get_log_index_id_or_none()
            .await?
            .ok_or_else(|| DispatchError::not_found("log datasource", ctx.entity_set.scope()))?;
        config.set_var(variables::SERVICE_NAME, service_name);
        config.set_var(variables::INDEX_SET_ID, index_set_id);
        Ok(())
    }
}
