//! Services of one dispatch call and the facts enrichers need about them.
//!
//! Every lookup goes through a populate-once cell created when the set is
//! built, so concurrent readers trigger at most one upstream call per fact.
//! An `EntitySet` lives for exactly one dispatch call and is never shared
//! between calls.

use futures::future::try_join_all;
use oxapm_common::types::{Scope, System};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::OnceCell;

use crate::error::{DispatchError, Result};
use crate::provider::{
    AppDatasource, LogIndexRelation, RelationProvider, RpcConfig, TopoNode, TopologyProvider,
    Workload,
};

pub struct EntitySet {
    scope: Scope,
    relations: Arc<dyn RelationProvider>,
    nodes: HashMap<String, TopoNode>,
    service_names: BTreeSet<String>,
    rpc_configs: HashMap<String, OnceCell<Option<RpcConfig>>>,
    log_relations: HashMap<String, OnceCell<Vec<LogIndexRelation>>>,
    workloads: OnceCell<HashMap<String, Vec<Workload>>>,
    datasource: OnceCell<AppDatasource>,
}

impl EntitySet {
    /// Resolves `requested` against topology discovery. An empty request
    /// selects every real service of the scope; any requested name that is
    /// not a service in the topology fails the whole call.
    pub async fn new(
        scope: &Scope,
        topology: &dyn TopologyProvider,
        relations: Arc<dyn RelationProvider>,
        requested: &[String],
    ) -> Result<Self> {
        let nodes: HashMap<String, TopoNode> = topology
            .list_nodes(scope)
            .await?
            .into_iter()
            .filter(TopoNode::is_service)
            .map(|n| (n.key.clone(), n))
            .collect();

        let service_names: BTreeSet<String> = if requested.is_empty() {
            nodes.keys().cloned().collect()
        } else {
            let missing: Vec<&str> = requested
                .iter()
                .filter(|name| !nodes.contains_key(name.as_str()))
                .map(String::as_str)
                .collect();
            if !missing.is_empty() {
                return Err(DispatchError::not_found("service", missing.join(", ")));
            }
            requested.iter().cloned().collect()
        };

        let rpc_configs = service_names
            .iter()
            .map(|s| (s.clone(), OnceCell::new()))
            .collect();
        let log_relations = service_names
            .iter()
            .map(|s| (s.clone(), OnceCell::new()))
            .collect();

        tracing::debug!(
            scope = %scope,
            services = service_names.len(),
            "Resolved entity set"
        );

        Ok(Self {
            scope: scope.clone(),
            relations,
            nodes,
            service_names,
            rpc_configs,
            log_relations,
            workloads: OnceCell::new(),
            datasource: OnceCell::new(),
        })
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn service_names(&self) -> &BTreeSet<String> {
        &self.service_names
    }

    pub fn get_node(&self, service_name: &str) -> Option<&TopoNode> {
        self.nodes.get(service_name)
    }

    pub async fn get_rpc_config_or_none(&self, service_name: &str) -> Result<Option<RpcConfig>> {
        let Some(cell) = self.rpc_configs.get(service_name) else {
            return Ok(None);
        };
        let config = cell
            .get_or_try_init(|| self.relations.get_rpc_config(&self.scope, service_name))
            .await?;
        Ok(config.clone())
    }

    /// Workload bindings of one service. The first call looks up every
    /// service of the set in one batch.
    pub async fn get_workloads(&self, service_name: &str) -> Result<Vec<Workload>> {
        if !self.service_names.contains(service_name) {
            return Ok(Vec::new());
        }
        let all = self
            .workloads
            .get_or_try_init(|| async {
                let names: Vec<String> = self.service_names.iter().cloned().collect();
                self.relations.list_workloads(&self.scope, &names).await
            })
            .await?;
        Ok(all.get(service_name).cloned().unwrap_or_default())
    }

    async fn datasource(&self) -> Result<&AppDatasource> {
        Ok(self
            .datasource
            .get_or_try_init(|| self.relations.get_app_datasource(&self.scope))
            .await?)
    }

    pub async fn get_log_index_id_or_none(&self) -> Result<Option<i64>> {
        Ok(self.datasource().await?.log_index_set_id)
    }

    pub async fn get_trace_index_id_or_none(&self) -> Result<Option<i64>> {
        Ok(self.datasource().await?.trace_index_set_id)
    }

    /// Log index sets of a service: the application's log datasource first,
    /// then explicit relations. Relations pointing at another business are
    /// skipped since alerts cannot be dispatched across businesses.
    pub async fn get_log_index_ids(&self, service_name: &str) -> Result<Vec<i64>> {
        let mut ids = Vec::new();
        if let Some(id) = self.get_log_index_id_or_none().await? {
            ids.push(id);
        }

        if let Some(cell) = self.log_relations.get(service_name) {
            let relations = cell
                .get_or_try_init(|| self.relations.list_log_relations(&self.scope, service_name))
                .await?;
            for rel in relations {
                if rel.bk_biz_id != self.scope.bk_biz_id {
                    tracing::debug!(
                        service = service_name,
                        index_set_id = rel.index_set_id,
                        bk_biz_id = rel.bk_biz_id,
                        "Skipped cross-business log relation"
                    );
                    continue;
                }
                if !ids.contains(&rel.index_set_id) {
                    ids.push(rel.index_set_id);
                }
            }
        }
        Ok(ids)
    }

    /// Warms the caches the enricher of `system` reads, looking services up
    /// concurrently.
    pub async fn prefetch(&self, system: System) -> Result<()> {
        match system {
            System::Rpc => {
                try_join_all(
                    self.service_names
                        .iter()
                        .map(|s| self.get_rpc_config_or_none(s)),
                )
                .await?;
            }
            System::K8s => {
                if let Some(first) = self.service_names.iter().next() {
                    self.get_workloads(first).await?;
                }
            }
            System::Log | System::Trace => {
                self.datasource().await?;
            }
            System::Metric => {}
        }
        Ok(())
    }
}
