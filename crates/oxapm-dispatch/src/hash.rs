use md5::{Digest, Md5};
use oxapm_common::types::{Algorithm, Context, Detect, QueryTemplateRef};
use serde::Serialize;
use serde_json::{Map, Value};

/// Hash input. Object keys are sorted before hashing, list order is kept as
/// given except for notification group ids, which are a set.
#[derive(Serialize)]
struct HashInput<'a> {
    detect: Detect,
    algorithms: &'a [Algorithm],
    user_group_ids: Vec<i64>,
    context: &'a Context,
    query_template: &'a QueryTemplateRef,
}

/// Content hash of a dispatched configuration.
///
/// An explicit default detect connector hashes the same as an absent one.
///
/// # Examples
///
/// ```
/// use oxapm_common::types::{Context, Detect, QueryTemplateRef};
/// use oxapm_dispatch::hash::content_md5;
///
/// let qt = QueryTemplateRef { bk_biz_id: 0, name: "rpc".into() };
/// let implicit = Detect::default();
/// let explicit = Detect { connector: Some("and".into()), ..Detect::default() };
/// assert_eq!(
///     content_md5(&implicit, &[], &[1], &Context::new(), &qt),
///     content_md5(&explicit, &[], &[1], &Context::new(), &qt),
/// );
/// ```
pub fn content_md5(
    detect: &Detect,
    algorithms: &[Algorithm],
    user_group_ids: &[i64],
    context: &Context,
    query_template: &QueryTemplateRef,
) -> String {
    let mut user_group_ids = user_group_ids.to_vec();
    user_group_ids.sort_unstable();
    user_group_ids.dedup();

    let input = HashInput {
        detect: detect.normalized(),
        algorithms,
        user_group_ids,
        context,
        query_template,
    };
    value_md5(&input)
}

/// md5 (hex) of the canonical JSON form of `value`.
pub fn value_md5<T: Serialize + ?Sized>(value: &T) -> String {
    // Serializing plain data cannot fail.
    let value = serde_json::to_value(value).unwrap_or(Value::Null);
    let bytes = serde_json::to_vec(&canonical(value)).unwrap_or_default();
    let digest = Md5::digest(&bytes);
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Rebuilds every object with its keys inserted in sorted order, so the
/// output does not depend on whether `serde_json` preserves insertion order.
fn canonical(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let mut sorted = Map::new();
            for (k, v) in entries {
                sorted.insert(k, canonical(v));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonical).collect()),
        other => other,
    }
}
