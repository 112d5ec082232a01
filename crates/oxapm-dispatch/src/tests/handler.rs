use oxapm_common::types::{
    Algorithm, AlgorithmType, Context, Detect, System, TemplateType, ROOT_TEMPLATE_ID,
};
use oxapm_storage::{Page, StrategyInstanceFilter, StrategyTemplateFilter};
use serde_json::json;

use super::fakes::{names, scope, template_row, FakeRelations, Harness};
use crate::config::DispatchExtraConfig;
use crate::handler::{BatchTemplateEdit, OptionField, OptionValue, TemplateEdit};
use crate::provider::Temporality;
use crate::{DispatchError, DispatchOptions};

async fn harness(services: &[&str]) -> Harness {
    let relations = services.iter().fold(FakeRelations::default(), |r, s| {
        r.with_rpc(s, Temporality::Cumulative)
    });
    Harness::new(services, relations).await
}

fn stricter_threshold() -> Vec<Algorithm> {
    vec![Algorithm {
        kind: AlgorithmType::Threshold,
        level: 1,
        unit_prefix: "%".into(),
        config: json!({"method": "lte", "threshold": 95.0}),
    }]
}

fn is_invariant_violation(err: &DispatchError) -> bool {
    matches!(err, DispatchError::InvariantViolation(_))
}

#[tokio::test]
async fn clone_identical_to_source_is_rejected() {
    let h = harness(&["checkout"]).await;
    let source = h.insert_template(ROOT_TEMPLATE_ID, "RPC 被调成功率").await;

    let edit = TemplateEdit {
        name: Some("copy".into()),
        ..Default::default()
    };
    let err = h
        .handler
        .clone_template(&scope(), source.id, edit, "alice")
        .await
        .unwrap_err();
    assert!(is_invariant_violation(&err), "unexpected error: {err}");

    // restating a default variable does not make a clone different
    let edit = TemplateEdit {
        name: Some("copy".into()),
        context: Some([("GROUP_BY".to_string(), json!([]))].into()),
        ..Default::default()
    };
    let err = h
        .handler
        .clone_template(&scope(), source.id, edit, "alice")
        .await
        .unwrap_err();
    assert!(is_invariant_violation(&err));
}

#[tokio::test]
async fn clone_links_to_source_lineage() {
    let h = harness(&["checkout"]).await;
    let root = h.insert_template(ROOT_TEMPLATE_ID, "RPC 被调成功率").await;

    let first = h
        .handler
        .clone_template(
            &scope(),
            root.id,
            TemplateEdit {
                name: Some("strict".into()),
                algorithms: Some(stricter_threshold()),
                ..Default::default()
            },
            "alice",
        )
        .await
        .unwrap();
    assert_eq!(first.root_id, root.id);
    assert_eq!(first.parent_id, root.id);
    assert_eq!(first.template_type, TemplateType::App);
    assert_eq!(first.update_user, "alice");

    let second = h
        .handler
        .clone_template(
            &scope(),
            first.id,
            TemplateEdit {
                name: Some("strict and quiet".into()),
                user_group_ids: Some(vec![7]),
                ..Default::default()
            },
            "bob",
        )
        .await
        .unwrap();
    assert_eq!(second.root_id, root.id);
    assert_eq!(second.parent_id, first.id);

    let err = h
        .handler
        .clone_template(
            &scope(),
            root.id,
            TemplateEdit {
                name: Some("strict".into()),
                user_group_ids: Some(vec![9]),
                ..Default::default()
            },
            "alice",
        )
        .await
        .unwrap_err();
    assert!(is_invariant_violation(&err));
}

#[tokio::test]
async fn batch_edit_keeps_one_auto_apply_per_family() {
    let h = harness(&["checkout"]).await;
    let root = h.insert_template(ROOT_TEMPLATE_ID, "root").await;
    let clone = h.insert_template(root.id, "clone").await;
    let other = h.insert_template(ROOT_TEMPLATE_ID, "other").await;
    let edit = BatchTemplateEdit {
        is_auto_apply: Some(true),
        ..Default::default()
    };

    let err = h
        .handler
        .batch_edit(&scope(), &[root.id, clone.id], &edit, "alice")
        .await
        .unwrap_err();
    assert!(is_invariant_violation(&err));
    let stored = h.handler.get_template(&scope(), root.id).await.unwrap();
    assert!(!stored.is_auto_apply);

    let rows = h
        .handler
        .batch_edit(&scope(), &[clone.id, other.id], &edit, "alice")
        .await
        .unwrap();
    assert!(rows.iter().all(|r| r.is_auto_apply && r.auto_applied_at.is_some()));

    // the family of `clone` already has an auto-applied member
    let err = h
        .handler
        .batch_edit(&scope(), &[root.id], &edit, "alice")
        .await
        .unwrap_err();
    assert!(is_invariant_violation(&err));

    let off = BatchTemplateEdit {
        is_auto_apply: Some(false),
        ..Default::default()
    };
    let rows = h
        .handler
        .batch_edit(&scope(), &[clone.id], &off, "alice")
        .await
        .unwrap();
    assert!(rows[0].auto_applied_at.is_none());
    h.handler
        .batch_edit(&scope(), &[root.id], &edit, "alice")
        .await
        .unwrap();
}

#[tokio::test]
async fn delete_template_rules() {
    let h = harness(&["checkout"]).await;
    let mut builtin = template_row(oxapm_common::id::next_id(), ROOT_TEMPLATE_ID, "builtin");
    builtin.template_type = TemplateType::Builtin;
    let builtin = h.store.insert_strategy_template(&builtin).await.unwrap();
    let used = h.insert_template(ROOT_TEMPLATE_ID, "used").await;
    let unused = h.insert_template(ROOT_TEMPLATE_ID, "unused").await;

    h.dispatcher
        .dispatch(&scope(), &[], &used, &DispatchOptions::default())
        .await
        .unwrap();

    let err = h.handler.delete_template(&scope(), builtin.id).await.unwrap_err();
    assert!(is_invariant_violation(&err));
    let err = h.handler.delete_template(&scope(), used.id).await.unwrap_err();
    assert!(is_invariant_violation(&err));

    h.handler.delete_template(&scope(), unused.id).await.unwrap();
    let err = h.handler.get_template(&scope(), unused.id).await.unwrap_err();
    assert!(matches!(err, DispatchError::NotFound { .. }));
}

#[tokio::test]
async fn unapply_removes_rules_and_instances() {
    let h = harness(&["checkout", "payment"]).await;
    let template = h.insert_template(ROOT_TEMPLATE_ID, "RPC 被调成功率").await;
    h.handler
        .apply(&scope(), &[], &[template.id], &DispatchOptions::default())
        .await
        .unwrap();
    assert_eq!(h.rules.len(), 2);

    let removed = h
        .handler
        .unapply(&scope(), &names(&["payment"]), &[template.id])
        .await
        .unwrap();
    assert_eq!(removed, 1);
    assert_eq!(h.rules.len(), 1);

    let rows = h
        .store
        .list_strategy_instances(&scope(), &StrategyInstanceFilter::default())
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].service_name, "checkout");

    let removed = h
        .handler
        .unapply(&scope(), &names(&["payment"]), &[template.id])
        .await
        .unwrap();
    assert_eq!(removed, 0);
}

#[tokio::test]
async fn apply_rejects_same_family_templates() {
    let h = harness(&["checkout"]).await;
    let root = h.insert_template(ROOT_TEMPLATE_ID, "root").await;
    let clone = h.insert_template(root.id, "clone").await;

    let err = h
        .handler
        .apply(&scope(), &[], &[root.id, clone.id], &DispatchOptions::default())
        .await
        .unwrap_err();
    assert!(is_invariant_violation(&err));
    assert_eq!(h.rules.len(), 0);
}

#[tokio::test]
async fn apply_validates_every_template_before_writing() {
    let relations = FakeRelations::default().with_rpc("checkout", Temporality::Cumulative);
    let h = Harness::new(&["checkout"], relations).await;
    let rpc = h.insert_template(ROOT_TEMPLATE_ID, "rpc").await;
    let mut k8s = template_row(oxapm_common::id::next_id(), ROOT_TEMPLATE_ID, "k8s");
    k8s.system = oxapm_common::types::System::K8s;
    let k8s = h.store.insert_strategy_template(&k8s).await.unwrap();

    let err = h
        .handler
        .apply(&scope(), &[], &[rpc.id, k8s.id], &DispatchOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::IneligibleService { .. }));
    assert_eq!(h.rules.len(), 0);

    let err = h
        .handler
        .apply(&scope(), &[], &[rpc.id, 404], &DispatchOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::NotFound { .. }));
}

#[tokio::test]
async fn auto_apply_sweeps_enabled_templates() {
    let relations = FakeRelations::default().with_rpc("checkout", Temporality::Cumulative);
    let h = Harness::new(&["checkout", "payment"], relations).await;
    let auto = h.insert_template(ROOT_TEMPLATE_ID, "auto").await;
    let manual = h.insert_template(ROOT_TEMPLATE_ID, "manual").await;
    let disabled = h.insert_template(ROOT_TEMPLATE_ID, "disabled").await;

    h.handler
        .batch_edit(
            &scope(),
            &[auto.id, disabled.id],
            &BatchTemplateEdit {
                is_auto_apply: Some(true),
                ..Default::default()
            },
            "system",
        )
        .await
        .unwrap();
    h.handler
        .batch_edit(
            &scope(),
            &[disabled.id],
            &BatchTemplateEdit {
                is_enabled: Some(false),
                ..Default::default()
            },
            "system",
        )
        .await
        .unwrap();

    let outcomes = h.handler.auto_apply(&scope()).await.unwrap();
    assert_eq!(outcomes.keys().copied().collect::<Vec<_>>(), vec![auto.id]);
    assert_eq!(outcomes[&auto.id].dropped, vec!["payment".to_string()]);

    let summary = h.handler.alerts_summary(&scope()).await.unwrap();
    let find = |id: i64| summary.iter().find(|s| s.strategy_template_id == id).unwrap();
    assert_eq!(find(auto.id).services.len(), 1);
    assert_eq!(find(auto.id).services[0].service_name, "checkout");
    assert!(find(manual.id).services.is_empty());
}

#[tokio::test]
async fn compare_reports_field_and_variable_diffs() {
    let h = harness(&["checkout"]).await;
    let mut template = template_row(oxapm_common::id::next_id(), ROOT_TEMPLATE_ID, "RPC 被调成功率");
    template
        .context
        .insert("LEGACY_FILTER".to_string(), json!("x"));
    let template = h.store.insert_strategy_template(&template).await.unwrap();
    h.handler
        .apply(&scope(), &[], &[template.id], &DispatchOptions::default())
        .await
        .unwrap();

    let unchanged = h
        .handler
        .compare(&scope(), "checkout", template.id)
        .await
        .unwrap();
    assert!(unchanged.diff.is_empty());
    assert_eq!(unchanged.invalid_variables, vec!["LEGACY_FILTER".to_string()]);

    let mut edited = template.clone();
    edited.algorithms = stricter_threshold();
    edited.user_group_ids = vec![1, 3];
    edited.context.insert("FUNCTIONS".to_string(), json!([]));
    h.store.update_strategy_templates(&[edited]).await.unwrap();

    let result = h
        .handler
        .compare(&scope(), "checkout", template.id)
        .await
        .unwrap();
    let fields: Vec<(&str, Option<&str>)> = result
        .diff
        .iter()
        .map(|d| (d.field.as_str(), d.name.as_deref()))
        .collect();
    assert_eq!(
        fields,
        vec![
            ("algorithms", None),
            ("user_group_list", None),
            ("variables", Some("FUNCTIONS")),
        ]
    );
    assert_eq!(result.diff[2].current, json!([]));
    assert_eq!(result.applied_strategy_template_id, Some(template.id));
}

#[tokio::test]
async fn compare_without_instance_is_empty() {
    let h = harness(&["checkout"]).await;
    let template = h.insert_template(ROOT_TEMPLATE_ID, "RPC 被调成功率").await;

    let result = h
        .handler
        .compare(&scope(), "checkout", template.id)
        .await
        .unwrap();
    assert_eq!(result.strategy_template_id, template.id);
    assert_eq!(result.applied_strategy_template_id, None);
    assert_eq!(result.strategy_id, None);
    assert!(result.diff.is_empty());
    assert!(result.invalid_variables.is_empty());
}

#[tokio::test]
async fn search_filters_by_applied_service() {
    let h = harness(&["checkout", "payment"]).await;
    let applied = h.insert_template(ROOT_TEMPLATE_ID, "applied").await;
    h.insert_template(ROOT_TEMPLATE_ID, "idle").await;
    h.handler
        .apply(&scope(), &names(&["payment"]), &[applied.id], &DispatchOptions::default())
        .await
        .unwrap();

    let found = h
        .handler
        .search(
            &scope(),
            &StrategyTemplateFilter {
                applied_service_names: Some(names(&["payment"])),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id, applied.id);
}

#[tokio::test]
async fn clone_of_auto_applied_template_starts_manual() {
    let h = harness(&["checkout"]).await;
    let source = h.insert_template(ROOT_TEMPLATE_ID, "RPC 被调成功率").await;
    h.handler
        .batch_edit(
            &scope(),
            &[source.id],
            &BatchTemplateEdit {
                is_auto_apply: Some(true),
                ..Default::default()
            },
            "alice",
        )
        .await
        .unwrap();

    let cloned = h
        .handler
        .clone_template(
            &scope(),
            source.id,
            TemplateEdit {
                name: Some("strict".into()),
                algorithms: Some(stricter_threshold()),
                ..Default::default()
            },
            "alice",
        )
        .await
        .unwrap();
    assert!(!cloned.is_auto_apply);
    assert!(cloned.auto_applied_at.is_none());

    // asking for auto-apply on a clone still hits the family rule
    let err = h
        .handler
        .clone_template(
            &scope(),
            source.id,
            TemplateEdit {
                name: Some("strict too".into()),
                algorithms: Some(stricter_threshold()),
                is_auto_apply: Some(true),
                ..Default::default()
            },
            "alice",
        )
        .await
        .unwrap_err();
    assert!(is_invariant_violation(&err));
}

#[tokio::test]
async fn update_renames_and_replaces_context() {
    let h = harness(&["checkout"]).await;
    let mut row = template_row(oxapm_common::id::next_id(), ROOT_TEMPLATE_ID, "RPC 被调成功率");
    row.context.insert("LEGACY_FILTER".to_string(), json!("x"));
    let template = h.store.insert_strategy_template(&row).await.unwrap();
    h.insert_template(ROOT_TEMPLATE_ID, "taken").await;

    let updated = h
        .handler
        .update(
            &scope(),
            template.id,
            TemplateEdit {
                name: Some("RPC 被调成功率 (strict)".into()),
                context: Some(Context::from([("GROUP_BY".to_string(), json!(["method"]))])),
                detect: Some(Detect {
                    trigger_count: 3,
                    ..Detect::default()
                }),
                ..Default::default()
            },
            "bob",
        )
        .await
        .unwrap();
    assert_eq!(updated.name, "RPC 被调成功率 (strict)");
    assert_eq!(updated.update_user, "bob");

    let stored = h.handler.get_template(&scope(), template.id).await.unwrap();
    assert_eq!(stored.name, "RPC 被调成功率 (strict)");
    assert_eq!(stored.detect.trigger_count, 3);
    assert_eq!(
        stored.context,
        Context::from([("GROUP_BY".to_string(), json!(["method"]))])
    );

    let err = h
        .handler
        .update(
            &scope(),
            template.id,
            TemplateEdit {
                name: Some("taken".into()),
                ..Default::default()
            },
            "bob",
        )
        .await
        .unwrap_err();
    assert!(is_invariant_violation(&err));

    // keeping the current name is not a conflict
    h.handler
        .update(
            &scope(),
            template.id,
            TemplateEdit {
                name: Some("RPC 被调成功率 (strict)".into()),
                is_enabled: Some(false),
                ..Default::default()
            },
            "bob",
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn update_keeps_one_auto_apply_per_family() {
    let h = harness(&["checkout"]).await;
    let root = h.insert_template(ROOT_TEMPLATE_ID, "root").await;
    let clone = h.insert_template(root.id, "clone").await;
    let on = TemplateEdit {
        is_auto_apply: Some(true),
        ..Default::default()
    };

    let updated = h
        .handler
        .update(&scope(), root.id, on.clone(), "alice")
        .await
        .unwrap();
    assert!(updated.is_auto_apply);
    assert!(updated.auto_applied_at.is_some());

    let err = h
        .handler
        .update(&scope(), clone.id, on, "alice")
        .await
        .unwrap_err();
    assert!(is_invariant_violation(&err));
    let stored = h.handler.get_template(&scope(), clone.id).await.unwrap();
    assert!(!stored.is_auto_apply);
}

#[tokio::test]
async fn option_values_lists_distinct_values() {
    let h = harness(&["checkout", "payment"]).await;
    let rpc = h.insert_template(ROOT_TEMPLATE_ID, "rpc").await;
    let mut metric = template_row(oxapm_common::id::next_id(), ROOT_TEMPLATE_ID, "metric");
    metric.system = System::Metric;
    metric.category = "custom_metric".into();
    metric.user_group_ids = vec![1, 4];
    metric.update_user = "bob".into();
    h.store.insert_strategy_template(&metric).await.unwrap();
    h.handler
        .apply(&scope(), &names(&["payment"]), &[rpc.id], &DispatchOptions::default())
        .await
        .unwrap();

    let values = h
        .handler
        .option_values(
            &scope(),
            &[
                OptionField::System,
                OptionField::UpdateUser,
                OptionField::UserGroupId,
                OptionField::AppliedServiceName,
            ],
        )
        .await
        .unwrap();

    let ids = |field: OptionField| -> Vec<serde_json::Value> {
        values[&field].iter().map(|v| v.id.clone()).collect()
    };
    assert_eq!(ids(OptionField::System), vec![json!("metric"), json!("rpc")]);
    assert_eq!(ids(OptionField::UpdateUser), vec![json!("admin"), json!("bob")]);
    assert_eq!(
        values[&OptionField::UserGroupId],
        vec![
            OptionValue {
                id: json!(1),
                name: "group-1".into()
            },
            OptionValue {
                id: json!(4),
                name: "group-4".into()
            },
        ]
    );
    assert_eq!(ids(OptionField::AppliedServiceName), vec![json!("payment")]);
    assert!(!values.contains_key(&OptionField::Category));
}

#[tokio::test]
async fn search_page_reports_total() {
    let h = harness(&["checkout"]).await;
    for name in ["a", "b", "c"] {
        h.insert_template(ROOT_TEMPLATE_ID, name).await;
    }

    let page = h
        .handler
        .search_page(
            &scope(),
            &StrategyTemplateFilter {
                query: Some("b".into()),
                ..Default::default()
            },
            Page {
                page: 1,
                page_size: 10,
            },
        )
        .await
        .unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.templates[0].name, "b");

    let page = h
        .handler
        .search_page(
            &scope(),
            &StrategyTemplateFilter::default(),
            Page {
                page: 2,
                page_size: 2,
            },
        )
        .await
        .unwrap();
    assert_eq!(page.total, 3);
    assert_eq!(page.templates.len(), 1);
    assert_eq!(page.templates[0].name, "c");
}

#[tokio::test]
async fn apply_scopes_extras_to_their_template() {
    let h = harness(&["checkout"]).await;
    let rpc = h.insert_template(ROOT_TEMPLATE_ID, "rpc").await;
    let mut metric = template_row(oxapm_common::id::next_id(), ROOT_TEMPLATE_ID, "metric");
    metric.system = System::Metric;
    let metric = h.store.insert_strategy_template(&metric).await.unwrap();

    let options = DispatchOptions {
        extras: vec![DispatchExtraConfig {
            strategy_template_id: Some(rpc.id),
            service_name: "checkout".into(),
            detect: Some(Detect {
                trigger_check_window: 9,
                ..Detect::default()
            }),
            user_group_ids: Some(vec![7]),
            ..Default::default()
        }],
        ..Default::default()
    };
    h.handler
        .apply(&scope(), &[], &[rpc.id, metric.id], &options)
        .await
        .unwrap();

    let instances = h
        .store
        .list_strategy_instances(&scope(), &StrategyInstanceFilter::default())
        .await
        .unwrap();
    assert_eq!(instances.len(), 2);
    let of = |id: i64| instances.iter().find(|i| i.strategy_template_id == id).unwrap();
    assert_eq!(of(rpc.id).detect.trigger_check_window, 9);
    assert_eq!(of(rpc.id).user_group_ids, vec![7]);
    assert_eq!(of(metric.id).detect.trigger_check_window, 5);
    assert_eq!(of(metric.id).user_group_ids, vec![1]);

    let rules = h.rules.rules.lock().unwrap();
    let window = |id: i64| rules[&of(id).strategy_id].detects[0].trigger_config.check_window;
    assert_eq!(window(rpc.id), 9);
    assert_eq!(window(metric.id), 5);
    assert_eq!(rules[&of(rpc.id).strategy_id].notice.user_groups, vec![7]);
}
