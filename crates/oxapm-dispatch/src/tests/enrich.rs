use oxapm_common::types::System;
use serde_json::json;
use std::sync::atomic::Ordering;

use super::fakes::{names, scope, template_row, FakeRelations, Harness};
use crate::config::variables;
use crate::enricher::rpc::CATEGORY_LOG;
use crate::filter::Where;
use crate::provider::{AppDatasource, LogIndexRelation, Temporality, Workload, WorkloadKind};
use crate::{DispatchError, DispatchOptions};

fn workload(kind: Option<WorkloadKind>, name: Option<&str>) -> Workload {
    Workload {
        bcs_cluster_id: "BCS-K8S-00001".into(),
        namespace: "shop".into(),
        kind,
        name: name.map(str::to_string),
    }
}

#[tokio::test]
async fn k8s_conditions_or_workloads_into_user_filter() {
    let relations = FakeRelations::default().with_workloads(
        "checkout",
        vec![
            workload(Some(WorkloadKind::Deployment), Some("checkout")),
            workload(Some(WorkloadKind::StatefulSet), Some("checkout-db")),
        ],
    );
    let h = Harness::new(&["checkout"], relations).await;
    let mut template = template_row(1, 0, "容器 CPU 使用率");
    template.system = System::K8s;
    template.category = "container".into();
    template.context.insert(
        variables::CONDITIONS.to_string(),
        json!([{"key": "env", "method": "eq", "value": ["prod"]}]),
    );

    let previews = h
        .dispatcher
        .preview(&scope(), &names(&["checkout"]), &template, &DispatchOptions::default())
        .await
        .unwrap();
    let context = &previews["checkout"].context;

    let conditions = Where::from_value(context.get(variables::CONDITIONS)).unwrap();
    assert_eq!(conditions.groups().len(), 2);
    for group in conditions.groups() {
        let keys: Vec<&str> = group.iter().map(|c| c.key.as_str()).collect();
        assert_eq!(keys, vec!["env", "bcs_cluster_id", "namespace", "pod_name"]);
    }
    let pattern = conditions.groups()[1][3].value[0].as_str().unwrap();
    let pod_name = regex::Regex::new(pattern).unwrap();
    assert!(pod_name.is_match("checkout-db-0"));
    assert!(!pod_name.is_match("checkout-7d9c8b6f5d-x2k9p"));
    assert_eq!(
        context[variables::GROUP_BY],
        json!(["bcs_cluster_id", "namespace", "pod_name"])
    );
}

#[tokio::test]
async fn k8s_requires_a_workload() {
    let relations = FakeRelations::default()
        .with_workloads("checkout", vec![workload(None, None)]);
    let h = Harness::new(&["checkout", "payment"], relations).await;
    let mut template = template_row(1, 0, "容器内存使用率");
    template.system = System::K8s;

    let err = h
        .dispatcher
        .preview(&scope(), &[], &template, &DispatchOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        DispatchError::IneligibleService { system: System::K8s, ref services, .. }
            if services == &vec!["payment".to_string()]
    ));

    let previews = h
        .dispatcher
        .preview(&scope(), &[], &template, &DispatchOptions::lenient())
        .await
        .unwrap();
    assert_eq!(previews.keys().collect::<Vec<_>>(), vec!["checkout"]);
}

#[tokio::test]
async fn rpc_log_category_uses_fixed_dimensions() {
    let relations = FakeRelations::default()
        .with_rpc("checkout", Temporality::Cumulative)
        .with_log_relations(
            "checkout",
            vec![LogIndexRelation {
                bk_biz_id: 2,
                index_set_id: 77,
            }],
        );
    let h = Harness::new(&["checkout"], relations).await;
    let mut template = template_row(1, 0, "RPC 错误日志");
    template.category = CATEGORY_LOG.into();
    template
        .context
        .insert(variables::GROUP_BY.to_string(), json!(["method"]));

    let previews = h
        .dispatcher
        .preview(&scope(), &names(&["checkout"]), &template, &DispatchOptions::default())
        .await
        .unwrap();
    let context = &previews["checkout"].context;
    assert_eq!(context[variables::GROUP_BY], json!(["server", "env", "instance"]));
    assert_eq!(context[variables::INDEX_SET_ID], json!(77));
}

#[tokio::test]
async fn rpc_log_category_without_index_fails() {
    let relations = FakeRelations::default().with_rpc("checkout", Temporality::Cumulative);
    let h = Harness::new(&["checkout"], relations).await;
    let mut template = template_row(1, 0, "RPC 错误日志");
    template.category = CATEGORY_LOG.into();

    let err = h
        .dispatcher
        .preview(&scope(), &names(&["checkout"]), &template, &DispatchOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::NotFound { entity: "log index set", .. }));
}

#[tokio::test]
async fn rpc_callee_pins_service_filter() {
    let relations = FakeRelations::default().with_rpc("checkout", Temporality::Cumulative);
    let h = Harness::new(&["checkout"], relations).await;
    let template = template_row(1, 0, "RPC 被调成功率");

    let previews = h
        .dispatcher
        .preview(&scope(), &names(&["checkout"]), &template, &DispatchOptions::default())
        .await
        .unwrap();
    let preview = &previews["checkout"];

    assert_eq!(preview.context[variables::GROUP_BY], json!(["app_name", "service_name"]));
    let conditions = Where::from_value(preview.context.get(variables::CONDITIONS)).unwrap();
    let pinned: Vec<(&str, &serde_json::Value)> = conditions.groups()[0]
        .iter()
        .map(|c| (c.key.as_str(), &c.value[0]))
        .collect();
    assert_eq!(
        pinned,
        vec![("app_name", &json!("orders")), ("service_name", &json!("checkout"))]
    );
    assert!(preview.message_template.contains("服务(checkout)"));
    assert!(preview
        .message_template
        .contains("filter-service_name=checkout&dashboardId=service-default-caller_callee"));
    assert_eq!(preview.user_group_list[0].name, "group-1");
}

#[tokio::test]
async fn log_system_uses_app_datasource() {
    let relations = FakeRelations::default().with_datasource(AppDatasource {
        log_index_set_id: Some(12),
        trace_index_set_id: None,
    });
    let h = Harness::new(&["checkout"], relations).await;
    let mut template = template_row(1, 0, "错误日志关键字");
    template.system = System::Log;
    template.category = "error_log".into();

    let previews = h
        .dispatcher
        .preview(&scope(), &names(&["checkout"]), &template, &DispatchOptions::default())
        .await
        .unwrap();
    let context = &previews["checkout"].context;
    assert_eq!(context[variables::SERVICE_NAME], json!("checkout"));
    assert_eq!(context[variables::INDEX_SET_ID], json!(12));

    template.system = System::Trace;
    let err = h
        .dispatcher
        .preview(&scope(), &names(&["checkout"]), &template, &DispatchOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::IneligibleService { system: System::Trace, .. }));
}

#[tokio::test]
async fn entity_set_fetches_each_fact_once() {
    let relations = FakeRelations::default()
        .with_rpc("checkout", Temporality::Cumulative)
        .with_rpc("payment", Temporality::Cumulative)
        .with_workloads("checkout", vec![workload(None, None)])
        .with_datasource(AppDatasource {
            log_index_set_id: Some(5),
            trace_index_set_id: None,
        })
        .with_log_relations(
            "checkout",
            vec![
                LogIndexRelation {
                    bk_biz_id: 2,
                    index_set_id: 5,
                },
                LogIndexRelation {
                    bk_biz_id: 3,
                    index_set_id: 9,
                },
                LogIndexRelation {
                    bk_biz_id: 2,
                    index_set_id: 6,
                },
            ],
        );
    let h = Harness::new(&["checkout", "payment"], relations).await;
    let set = h.dispatcher.entity_set(&scope(), &[]).await.unwrap();

    assert_eq!(
        set.service_names().iter().collect::<Vec<_>>(),
        vec!["checkout", "payment"]
    );
    assert!(set.get_node(".").is_none());
    assert!(set.get_node("mysql").is_none());

    set.prefetch(System::Rpc).await.unwrap();
    set.prefetch(System::K8s).await.unwrap();
    for _ in 0..3 {
        assert!(set.get_rpc_config_or_none("checkout").await.unwrap().is_some());
        assert_eq!(set.get_workloads("checkout").await.unwrap().len(), 1);
        assert!(set.get_workloads("payment").await.unwrap().is_empty());
    }
    assert_eq!(h.relations.rpc_calls.load(Ordering::SeqCst), 2);
    assert_eq!(h.relations.workload_calls.load(Ordering::SeqCst), 1);

    assert_eq!(set.get_log_index_ids("checkout").await.unwrap(), vec![5, 6]);
    assert_eq!(set.get_log_index_ids("payment").await.unwrap(), vec![5]);
}

#[tokio::test]
async fn metric_pins_every_service_without_relations() {
    let h = Harness::new(&["checkout", "payment"], FakeRelations::default()).await;
    let mut template = template_row(1, 0, "自定义指标");
    template.system = System::Metric;
    template.category = "custom_metric".into();
    // a single condition value is written as a bare scalar
    template.context.insert(
        variables::CONDITIONS.to_string(),
        json!([{"key": "env", "method": "eq", "value": "prod"}]),
    );

    let previews = h
        .dispatcher
        .preview(&scope(), &[], &template, &DispatchOptions::default())
        .await
        .unwrap();
    assert_eq!(previews.keys().collect::<Vec<_>>(), vec!["checkout", "payment"]);

    let preview = &previews["payment"];
    let conditions = Where::from_value(preview.context.get(variables::CONDITIONS)).unwrap();
    assert_eq!(conditions.groups().len(), 1);
    let pinned: Vec<(&str, &serde_json::Value)> = conditions.groups()[0]
        .iter()
        .map(|c| (c.key.as_str(), &c.value[0]))
        .collect();
    assert_eq!(
        pinned,
        vec![
            ("env", &json!("prod")),
            ("app_name", &json!("orders")),
            ("service_name", &json!("payment")),
        ]
    );
    assert!(preview.message_template.contains("服务(payment)"));
    assert!(preview
        .message_template
        .contains("dashboardId=service-default-custom_metric"));
    assert_eq!(h.relations.rpc_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn trace_fills_service_and_trace_index_set() {
    let relations = FakeRelations::default().with_datasource(AppDatasource {
        log_index_set_id: Some(12),
        trace_index_set_id: Some(34),
    });
    let h = Harness::new(&["checkout"], relations).await;
    let mut template = template_row(1, 0, "慢调用数");
    template.system = System::Trace;
    template.category = "span".into();
    template.detect.trigger_count = 2;

    let previews = h
        .dispatcher
        .preview(&scope(), &names(&["checkout"]), &template, &DispatchOptions::default())
        .await
        .unwrap();
    let preview = &previews["checkout"];

    assert_eq!(preview.context[variables::SERVICE_NAME], json!("checkout"));
    assert_eq!(preview.context[variables::INDEX_SET_ID], json!(34));
    assert_eq!(preview.query["context"][variables::INDEX_SET_ID], json!(34));
    assert_eq!(preview.detect.trigger_count, 2);
    assert!(preview
        .message_template
        .contains("dashboardId=service-default-overview"));
}
