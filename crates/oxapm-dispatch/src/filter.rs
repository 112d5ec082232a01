//! Filter conditions in the monitor's where-list form.
//!
//! A where-list is a flat sequence of `{key, method, value, condition}` items
//! where `condition` is `"and"` or `"or"` and binds an item to its
//! predecessor. Since `and` binds tighter, a where-list is a disjunction of
//! conjunctive groups. [`Where`] keeps it in that shape so that conditions can
//! be combined without re-parsing precedence.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

const CONNECTOR_AND: &str = "and";
const CONNECTOR_OR: &str = "or";

/// 单个过滤条件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub key: String,
    pub method: String,
    /// A bare scalar is read as a one-element list.
    #[serde(deserialize_with = "one_or_many")]
    pub value: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Array(items) => items,
        Value::Null => Vec::new(),
        scalar => vec![scalar],
    })
}

impl Condition {
    pub fn eq(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            key: key.into(),
            method: "eq".to_string(),
            value: vec![value.into()],
            condition: None,
        }
    }

    /// Regex match against any of `patterns`.
    pub fn reg(key: impl Into<String>, patterns: Vec<String>) -> Self {
        Self {
            key: key.into(),
            method: "reg".to_string(),
            value: patterns.into_iter().map(Value::String).collect(),
            condition: None,
        }
    }

    fn bare(mut self) -> Self {
        self.condition = None;
        self
    }
}

/// Where-list in disjunctive normal form: OR of AND-groups.
///
/// # Examples
///
/// ```
/// use oxapm_dispatch::filter::{Condition, Where};
///
/// let w = Where::default()
///     .or(vec![Condition::eq("env", "prod")])
///     .or(vec![Condition::eq("env", "gray")])
///     .and(vec![Condition::eq("service_name", "checkout")]);
/// // (env=prod AND service_name=checkout) OR (env=gray AND service_name=checkout)
/// assert_eq!(w.groups().len(), 2);
/// assert_eq!(w.groups()[1].len(), 2);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Where {
    groups: Vec<Vec<Condition>>,
}

impl Where {
    /// Parses a where-list; `None` and `null` give an empty filter.
    pub fn from_value(value: Option<&Value>) -> Result<Self, serde_json::Error> {
        let items: Vec<Condition> = match value {
            None | Some(Value::Null) => Vec::new(),
            Some(v) => serde_json::from_value(v.clone())?,
        };

        let mut groups: Vec<Vec<Condition>> = Vec::new();
        for item in items {
            let starts_group = item
                .condition
                .as_deref()
                .is_some_and(|c| c.eq_ignore_ascii_case(CONNECTOR_OR));
            match groups.last_mut() {
                Some(group) if !starts_group => group.push(item.bare()),
                _ => groups.push(vec![item.bare()]),
            }
        }
        Ok(Self { groups })
    }

    pub fn to_value(&self) -> Value {
        let mut items = Vec::new();
        for (gi, group) in self.groups.iter().enumerate() {
            for (ci, cond) in group.iter().enumerate() {
                let mut cond = cond.clone();
                cond.condition = match (gi, ci) {
                    (0, 0) => None,
                    (_, 0) => Some(CONNECTOR_OR.to_string()),
                    _ => Some(CONNECTOR_AND.to_string()),
                };
                items.push(cond);
            }
        }
        serde_json::to_value(items).unwrap_or(Value::Array(Vec::new()))
    }

    pub fn groups(&self) -> &[Vec<Condition>] {
        &self.groups
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// AND-s `conditions` into every group.
    pub fn and(mut self, conditions: Vec<Condition>) -> Self {
        if conditions.is_empty() {
            return self;
        }
        let conditions: Vec<Condition> = conditions.into_iter().map(Condition::bare).collect();
        if self.groups.is_empty() {
            self.groups.push(conditions);
        } else {
            for group in &mut self.groups {
                group.extend(conditions.iter().cloned());
            }
        }
        self
    }

    /// OR-s one more group onto the filter.
    pub fn or(mut self, group: Vec<Condition>) -> Self {
        if !group.is_empty() {
            self.groups
                .push(group.into_iter().map(Condition::bare).collect());
        }
        self
    }

    /// AND-s a disjunction of `alternatives` onto the filter, distributing it
    /// over the existing groups.
    pub fn and_any(self, alternatives: Vec<Vec<Condition>>) -> Self {
        let alternatives: Vec<Vec<Condition>> =
            alternatives.into_iter().filter(|g| !g.is_empty()).collect();
        if alternatives.is_empty() {
            return self;
        }
        if self.groups.is_empty() {
            return alternatives
                .into_iter()
                .fold(Where::default(), |w, group| w.or(group));
        }

        let mut groups = Vec::with_capacity(self.groups.len() * alternatives.len());
        for existing in &self.groups {
            for alt in &alternatives {
                let mut group = existing.clone();
                group.extend(alt.iter().cloned().map(Condition::bare));
                groups.push(group);
            }
        }
        Self { groups }
    }
}
