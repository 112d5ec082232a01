use async_trait::async_trait;
use oxapm_common::types::System;
use serde_json::{json, Value};

use super::{pin_app_and_service, EnrichContext, Enricher};
use crate::config::{variables, DispatchConfig};
use crate::error::{DispatchError, Result};
use crate::provider::Temporality;

/// RPC 日志类模板的分类
pub const CATEGORY_LOG: &str = "log";

/// 日志类模板的固定维度，不允许用户修改
const LOG_GROUP_BY: [&str; 3] = ["server", "env", "instance"];

/// 主被调类模板必须包含的维度
const SERVICE_GROUP_BY: [&str; 2] = ["app_name", "service_name"];

/// RPC 指标告警
///
/// 服务必须有 RPC 接入信息。Delta 类型的指标已是增量，下发时清空
/// `FUNCTIONS`，避免再做一次 rate / increase。
pub struct RpcEnricher;

#[async_trait]
impl Enricher for RpcEnricher {
    fn system(&self) -> System {
        System::Rpc
    }

    fn scene_dashboard(&self) -> &'static str {
        "service-default-caller_callee"
    }

    async fn is_valid(&self, ctx: &EnrichContext<'_>, service_name: &str) -> Result<bool> {
        Ok(ctx
            .entity_set
            .get_rpc_config_or_none(service_name)
            .await?
            .is_some())
    }

    async fn decorate(
        &self,
        ctx: &EnrichContext<'_>,
        service_name: &str,
        config: &mut DispatchConfig,
    ) -> Result<()> {
        let rpc = ctx
            .entity_set
            .get_rpc_config_or_none(service_name)
            .await?
            .unwrap_or_default();

        if ctx.template.category == CATEGORY_LOG {
            let index_set_id = ctx
                .entity_set
                .get_log_index_ids(service_name)
                .await?
                .first()
                .copied()
                .ok_or_else(|| DispatchError::not_found("log index set", service_name))?;
            config.context.remove(variables::GROUP_BY);
            config.set_var(variables::GROUP_BY, json!(LOG_GROUP_BY));
            config.set_var(variables::INDEX_SET_ID, index_set_id);
        } else {
            config.ensure_group_by(&SERVICE_GROUP_BY);
            pin_app_and_service(ctx, service_name, config)?;
        }

        if rpc.temporality == Temporality::Delta {
            config.set_var(variables::FUNCTIONS, Value::Array(Vec::new()));
        }

        tracing::debug!(
            service = service_name,
            category = %ctx.template.category,
            temporality = ?rpc.temporality,
            "Enriched rpc config"
        );
        Ok(())
    }
}
