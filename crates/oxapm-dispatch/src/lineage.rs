//! Same-origin family helpers.
//!
//! A family is a root template plus every template cloned from it, directly
//! or transitively. All members share one resolved root id.

use oxapm_storage::StrategyTemplateRow;
use std::collections::BTreeMap;

use crate::error::{DispatchError, Result};

pub fn is_same_origin(a: &StrategyTemplateRow, b: &StrategyTemplateRow) -> bool {
    a.resolved_root_id() == b.resolved_root_id()
}

/// Groups templates by family root id.
pub fn group_by_family(
    templates: &[StrategyTemplateRow],
) -> BTreeMap<i64, Vec<&StrategyTemplateRow>> {
    let mut families: BTreeMap<i64, Vec<&StrategyTemplateRow>> = BTreeMap::new();
    for t in templates {
        families.entry(t.resolved_root_id()).or_default().push(t);
    }
    families
}

/// At most one live template per family may be auto-applied.
pub fn ensure_single_auto_apply(templates: &[StrategyTemplateRow]) -> Result<()> {
    for (root_id, members) in group_by_family(templates) {
        let names: Vec<&str> = members
            .iter()
            .filter(|t| t.is_auto_apply && !t.is_deleted)
            .map(|t| t.name.as_str())
            .collect();
        if names.len() > 1 {
            return Err(DispatchError::InvariantViolation(format!(
                "same-origin templates cannot be auto-applied together (root={root_id}): {}",
                names.join(", ")
            )));
        }
    }
    Ok(())
}

/// Templates of one dispatch batch must come from distinct families, since a
/// service can only carry one rule per family.
pub fn ensure_distinct_families(templates: &[StrategyTemplateRow]) -> Result<()> {
    for (root_id, members) in group_by_family(templates) {
        if members.len() > 1 {
            let names: Vec<&str> = members.iter().map(|t| t.name.as_str()).collect();
            return Err(DispatchError::InvariantViolation(format!(
                "same-origin templates cannot be applied together (root={root_id}): {}",
                names.join(", ")
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::fakes::template_row;
    use oxapm_common::types::ROOT_TEMPLATE_ID;

    #[test]
    fn clone_is_same_origin_as_root() {
        let root = template_row(1, ROOT_TEMPLATE_ID, "root");
        let clone = template_row(2, 1, "clone");
        let other = template_row(3, ROOT_TEMPLATE_ID, "other");
        assert!(is_same_origin(&root, &clone));
        assert!(!is_same_origin(&root, &other));
    }

    #[test]
    fn two_auto_apply_members_are_rejected() {
        let mut root = template_row(1, ROOT_TEMPLATE_ID, "root");
        let mut clone = template_row(2, 1, "clone");
        root.is_auto_apply = true;
        clone.is_auto_apply = true;
        let err = ensure_single_auto_apply(&[root.clone(), clone.clone()]).unwrap_err();
        assert!(matches!(err, DispatchError::InvariantViolation(_)));

        clone.is_auto_apply = false;
        assert!(ensure_single_auto_apply(&[root, clone]).is_ok());
    }

    #[test]
    fn deleted_members_do_not_count() {
        let mut root = template_row(1, ROOT_TEMPLATE_ID, "root");
        let mut clone = template_row(2, 1, "clone");
        root.is_auto_apply = true;
        clone.is_auto_apply = true;
        clone.is_deleted = true;
        assert!(ensure_single_auto_apply(&[root, clone]).is_ok());
    }

    #[test]
    fn batch_with_siblings_is_rejected() {
        let root = template_row(1, ROOT_TEMPLATE_ID, "root");
        let clone = template_row(2, 1, "clone");
        let other = template_row(3, ROOT_TEMPLATE_ID, "other");
        assert!(ensure_distinct_families(&[root.clone(), other]).is_ok());
        assert!(ensure_distinct_families(&[root, clone]).is_err());
    }
}
