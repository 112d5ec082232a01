use async_trait::async_trait;
use oxapm_common::types::System;

use super::{EnrichContext, Enricher};
use crate::config::{variables, DispatchConfig};
use crate::error::Result;
use crate::filter::{Condition, Where};
use crate::provider::{Workload, WorkloadKind};

const CONTAINER_GROUP_BY: [&str; 3] = ["bcs_cluster_id", "namespace", "pod_name"];

/// Pod name regex of the pods a workload controller creates.
///
/// Container metrics carry a pod dimension but no workload dimension, so a
/// workload is matched through the names its controller generates.
///
/// # Examples
///
/// ```
/// use oxapm_dispatch::enricher::k8s::pod_name_pattern;
/// use oxapm_dispatch::provider::WorkloadKind;
///
/// assert_eq!(pod_name_pattern(WorkloadKind::StatefulSet, "redis"), "^redis-[0-9]+$");
/// ```
pub fn pod_name_pattern(kind: WorkloadKind, name: &str) -> String {
    let name = regex::escape(name);
    match kind {
        // <name>-<replicaset hash>-<pod suffix>
        WorkloadKind::Deployment => format!("^{name}-[a-z0-9]{{5,10}}-[a-z0-9]{{5}}$"),
        WorkloadKind::StatefulSet => format!("^{name}-[0-9]+$"),
        WorkloadKind::DaemonSet => format!("^{name}-[a-z0-9]{{5}}$"),
        // jobs created by a cronjob carry a schedule timestamp
        WorkloadKind::Job => format!("^{name}(-[0-9]+)?-[a-z0-9]{{5}}$"),
    }
}

fn workload_conditions(workload: &Workload) -> Vec<Condition> {
    let mut conditions = vec![
        Condition::eq("bcs_cluster_id", workload.bcs_cluster_id.as_str()),
        Condition::eq("namespace", workload.namespace.as_str()),
    ];
    if let (Some(kind), Some(name)) = (workload.kind, workload.name.as_deref()) {
        conditions.push(Condition::reg("pod_name", vec![pod_name_pattern(kind, name)]));
    }
    conditions
}

/// 容器指标告警：服务必须关联至少一个容器负载
pub struct K8sEnricher;

#[async_trait]
impl Enricher for K8sEnricher {
    fn system(&self) -> System {
        System::K8s
    }

    fn scene_dashboard(&self) -> &'static str {
        "service-default-container"
    }

    async fn is_valid(&self, ctx: &EnrichContext<'_>, service_name: &str) -> Result<bool> {
        Ok(!ctx.entity_set.get_workloads(service_name).await?.is_empty())
    }

    async fn decorate(
        &self,
        ctx: &EnrichContext<'_>,
        service_name: &str,
        config: &mut DispatchConfig,
    ) -> Result<()> {
        let workloads = ctx.entity_set.get_workloads(service_name).await?;
        let alternatives: Vec<Vec<Condition>> = workloads.iter().map(workload_conditions).collect();

        let conditions =
            Where::from_value(config.context.get(variables::CONDITIONS))?.and_any(alternatives);
        config.set_var(variables::CONDITIONS, conditions.to_value());
        config.ensure_group_by(&CONTAINER_GROUP_BY);

        tracing::debug!(
            service = service_name,
            workloads = workloads.len(),
            "Enriched container config"
        );
        Ok(())
    }
}
