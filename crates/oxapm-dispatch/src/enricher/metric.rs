use async_trait::async_trait;
use oxapm_common::types::System;

use super::{pin_app_and_service, EnrichContext, Enricher};
use crate::config::DispatchConfig;
use crate::error::Result;

/// Custom metric alerts. Every service of the scope is eligible.
pub struct MetricEnricher;

#[async_trait]
impl Enricher for MetricEnricher {
    fn system(&self) -> System {
        System::Metric
    }

    fn scene_dashboard(&self) -> &'static str {
        "service-default-custom_metric"
    }

    async fn is_valid(&self, _ctx: &EnrichContext<'_>, _service_name: &str) -> Result<bool> {
        Ok(true)
    }

    async fn decorate(
        &self,
        ctx: &EnrichContext<'_>,
        service_name: &str,
        config: &mut DispatchConfig,
    ) -> Result<()> {
        pin_app_and_service(ctx, service_name, config)
    }
}
