//! Contracts of the collaborators the dispatch engine consumes.
//!
//! Topology discovery, relation lookups, query-template rendering, the remote
//! alert-rule store and the user-group directory all live outside this crate.
//! They are reached through the async traits below and bundled into
//! [`Providers`] so one value can be handed to the dispatcher.

use anyhow::Result;
use async_trait::async_trait;
use oxapm_common::types::{Context, QueryTemplateRef, Scope};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::builder::StrategyPayload;

/// Node kind of a real service in the topology.
pub const NODE_KIND_SERVICE: &str = "service";

/// Key used by topology discovery for the virtual root node.
pub const VIRTUAL_NODE_KEY: &str = ".";

/// 拓扑节点
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopoNode {
    pub key: String,
    pub kind: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub extra: Value,
}

impl TopoNode {
    /// Whether this node is an actual service rather than a component,
    /// remote endpoint or the virtual root.
    pub fn is_service(&self) -> bool {
        self.kind == NODE_KIND_SERVICE && self.key != VIRTUAL_NODE_KEY
    }
}

/// Metric temporality reported by an RPC binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Temporality {
    #[default]
    Cumulative,
    Delta,
}

/// RPC 接入信息
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RpcConfig {
    #[serde(default)]
    pub temporality: Temporality,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkloadKind {
    Deployment,
    StatefulSet,
    DaemonSet,
    Job,
}

/// 服务关联的容器负载。`kind`/`name` 缺省时仅关联到集群 + 命名空间
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workload {
    pub bcs_cluster_id: String,
    pub namespace: String,
    #[serde(default)]
    pub kind: Option<WorkloadKind>,
    #[serde(default)]
    pub name: Option<String>,
}

/// 服务与日志索引集的关联关系
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogIndexRelation {
    /// 索引集所属业务，可能与应用所在业务不同
    pub bk_biz_id: i64,
    pub index_set_id: i64,
}

/// 应用级数据源
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AppDatasource {
    #[serde(default)]
    pub log_index_set_id: Option<i64>,
    #[serde(default)]
    pub trace_index_set_id: Option<i64>,
}

/// Display facts of a query template.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct QueryTemplateInfo {
    pub alias: String,
    #[serde(default)]
    pub unit: String,
    /// Names of the variables the template declares.
    #[serde(default)]
    pub variables: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteRule {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserGroup {
    pub id: i64,
    pub name: String,
}

/// Service discovery for one application.
#[async_trait]
pub trait TopologyProvider: Send + Sync {
    async fn list_nodes(&self, scope: &Scope) -> Result<Vec<TopoNode>>;
}

/// Facts about services held by adjacent subsystems.
#[async_trait]
pub trait RelationProvider: Send + Sync {
    /// RPC binding of a service, `None` when the service reports no RPC metrics.
    async fn get_rpc_config(&self, scope: &Scope, service_name: &str) -> Result<Option<RpcConfig>>;

    /// Workload bindings of every listed service, looked up in one call.
    async fn list_workloads(
        &self,
        scope: &Scope,
        service_names: &[String],
    ) -> Result<HashMap<String, Vec<Workload>>>;

    async fn list_log_relations(
        &self,
        scope: &Scope,
        service_name: &str,
    ) -> Result<Vec<LogIndexRelation>>;

    async fn get_app_datasource(&self, scope: &Scope) -> Result<AppDatasource>;
}

/// Query-template registry and renderer.
#[async_trait]
pub trait QueryTemplateEngine: Send + Sync {
    async fn describe(&self, template: &QueryTemplateRef) -> Result<QueryTemplateInfo>;

    /// Intrinsic variable values of the template.
    async fn default_context(&self, template: &QueryTemplateRef) -> Result<Context>;

    /// Renders the template into a query config with `context` substituted.
    async fn render(&self, template: &QueryTemplateRef, context: &Context) -> Result<Value>;
}

/// Remote alert-rule store.
#[async_trait]
pub trait RemoteRuleStore: Send + Sync {
    /// Creates the rule, or updates it in place when `payload.id` is set.
    /// Returns the id of the saved rule.
    async fn save_rule(&self, scope: &Scope, payload: &StrategyPayload) -> Result<i64>;

    async fn delete_rules(&self, scope: &Scope, ids: &[i64]) -> Result<()>;

    /// Returns the subset of `ids` that still exist.
    async fn list_by_ids(&self, scope: &Scope, ids: &[i64]) -> Result<Vec<RemoteRule>>;
}

#[async_trait]
pub trait UserGroupDirectory: Send + Sync {
    async fn list_by_ids(&self, bk_biz_id: i64, ids: &[i64]) -> Result<Vec<UserGroup>>;
}

/// All collaborators of the dispatch engine.
#[derive(Clone)]
pub struct Providers {
    pub topology: Arc<dyn TopologyProvider>,
    pub relations: Arc<dyn RelationProvider>,
    pub query_templates: Arc<dyn QueryTemplateEngine>,
    pub rules: Arc<dyn RemoteRuleStore>,
    pub user_groups: Arc<dyn UserGroupDirectory>,
}
