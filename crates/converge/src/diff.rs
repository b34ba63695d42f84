//! Field-level diffing between observed and desired task state.
//!
//! Each task lists its comparable fields explicitly through [`Diff`]; there
//! is no reflection. A field is a change when it differs, or, for an object
//! that does not exist yet, when it holds a non-zero value.

use crate::task::TaskKey;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// One differing field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldChange {
    /// Field name
    pub field: String,
    /// Observed value, `None` when the object does not exist
    pub actual: Option<String>,
    /// Desired value
    pub expected: String,
}

impl fmt::Display for FieldChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.actual {
            Some(actual) => write!(f, "{}: {} -> {}", self.field, actual, self.expected),
            None => write!(f, "{}: {}", self.field, self.expected),
        }
    }
}

/// Ordered list of field changes for one task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Changeset(Vec<FieldChange>);

impl Changeset {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the named field changed.
    pub fn contains(&self, field: &str) -> bool {
        self.get(field).is_some()
    }

    pub fn get(&self, field: &str) -> Option<&FieldChange> {
        self.0.iter().find(|c| c.field == field)
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldChange> {
        self.0.iter()
    }

    /// Drop changes the task cannot act on.
    pub fn retain(&mut self, keep: impl FnMut(&FieldChange) -> bool) {
        self.0.retain(keep);
    }

    /// Names of the changed fields, in order.
    pub fn fields(&self) -> Vec<&str> {
        self.0.iter().map(|c| c.field.as_str()).collect()
    }
}

impl From<Vec<FieldChange>> for Changeset {
    fn from(changes: Vec<FieldChange>) -> Self {
        Self(changes)
    }
}

impl<'a> IntoIterator for &'a Changeset {
    type Item = &'a FieldChange;
    type IntoIter = std::slice::Iter<'a, FieldChange>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl fmt::Display for Changeset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(ToString::to_string).collect();
        f.write_str(&parts.join(", "))
    }
}

/// A value that can take part in a field diff.
pub trait DiffValue: PartialEq {
    /// Whether this is the type's zero value; zero fields are not reported
    /// when creating an object.
    fn is_zero(&self) -> bool;

    /// Text rendering for reports.
    fn describe(&self) -> String;
}

impl DiffValue for String {
    fn is_zero(&self) -> bool {
        self.is_empty()
    }

    fn describe(&self) -> String {
        self.clone()
    }
}

impl DiffValue for bool {
    fn is_zero(&self) -> bool {
        !*self
    }

    fn describe(&self) -> String {
        self.to_string()
    }
}

macro_rules! impl_diff_value_for_numbers {
    ($($t:ty),*) => {
        $(
            impl DiffValue for $t {
                fn is_zero(&self) -> bool {
                    *self == 0
                }

                fn describe(&self) -> String {
                    self.to_string()
                }
            }
        )*
    };
}

impl_diff_value_for_numbers!(u16, u32, u64, i32, i64, usize);

impl<T: DiffValue> DiffValue for Option<T> {
    fn is_zero(&self) -> bool {
        self.is_none()
    }

    fn describe(&self) -> String {
        match self {
            Some(v) => v.describe(),
            None => "<none>".to_string(),
        }
    }
}

impl<T: DiffValue> DiffValue for Vec<T> {
    fn is_zero(&self) -> bool {
        self.is_empty()
    }

    fn describe(&self) -> String {
        let items: Vec<String> = self.iter().map(DiffValue::describe).collect();
        format!("[{}]", items.join(", "))
    }
}

impl DiffValue for BTreeSet<String> {
    fn is_zero(&self) -> bool {
        self.is_empty()
    }

    fn describe(&self) -> String {
        let items: Vec<&str> = self.iter().map(String::as_str).collect();
        format!("[{}]", items.join(", "))
    }
}

impl DiffValue for BTreeMap<String, String> {
    fn is_zero(&self) -> bool {
        self.is_empty()
    }

    fn describe(&self) -> String {
        let items: Vec<String> = self.iter().map(|(k, v)| format!("{k}={v}")).collect();
        format!("{{{}}}", items.join(", "))
    }
}

/// Builder for a [`Changeset`].
///
/// ```ignore
/// Diff::new(actual, expected)
///     .field("cidr", |s| &s.cidr)
///     .field("tags", |s| &s.tags)
///     .finish()
/// ```
pub struct Diff<'a, S> {
    actual: Option<&'a S>,
    expected: &'a S,
    changes: Vec<FieldChange>,
}

impl<'a, S> Diff<'a, S> {
    pub fn new(actual: Option<&'a S>, expected: &'a S) -> Self {
        Self {
            actual,
            expected,
            changes: Vec::new(),
        }
    }

    /// Compare one field.
    #[must_use]
    pub fn field<V, F>(mut self, name: &str, accessor: F) -> Self
    where
        V: DiffValue,
        F: Fn(&S) -> &V,
    {
        let expected = accessor(self.expected);
        let change = match self.actual {
            None if expected.is_zero() => None,
            None => Some(FieldChange {
                field: name.to_string(),
                actual: None,
                expected: expected.describe(),
            }),
            Some(actual) => {
                let actual = accessor(actual);
                (actual != expected).then(|| FieldChange {
                    field: name.to_string(),
                    actual: Some(actual.describe()),
                    expected: expected.describe(),
                })
            }
        };
        self.changes.extend(change);
        self
    }

    pub fn finish(self) -> Changeset {
        Changeset(self.changes)
    }
}

/// What a run does, or would do, to one object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    Create,
    Update,
    NoChange,
    Delete,
}

impl Action {
    /// Classify from whether the object exists and what changed.
    pub fn classify(found: bool, changes: &Changeset) -> Self {
        if !found {
            Self::Create
        } else if changes.is_empty() {
            Self::NoChange
        } else {
            Self::Update
        }
    }

    /// Whether the action mutates the backend.
    pub fn is_change(&self) -> bool {
        !matches!(self, Self::NoChange)
    }

    /// One-character marker for plan output.
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Create => "+",
            Self::Update => "~",
            Self::NoChange => " ",
            Self::Delete => "-",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::NoChange => "no change",
            Self::Delete => "delete",
        };
        f.write_str(s)
    }
}

/// A task whose plan contains a change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedChange {
    pub key: TaskKey,
    pub cloud_name: String,
    pub action: Action,
    pub changes: Changeset,
}

/// Diff summary statistics
#[derive(Debug, Clone, Default)]
pub struct DiffSummary {
    /// Number of objects to create
    pub additions: usize,
    /// Number of objects to update
    pub modifications: usize,
    /// Number of objects to delete
    pub removals: usize,
}

impl DiffSummary {
    /// Create a summary from a list of planned changes
    pub fn from_changes(changes: &[PlannedChange]) -> Self {
        let mut summary = Self::default();
        for change in changes {
            match change.action {
                Action::Create => summary.additions += 1,
                Action::Update => summary.modifications += 1,
                Action::Delete => summary.removals += 1,
                Action::NoChange => {}
            }
        }
        summary
    }

    /// Total number of changes
    pub fn total(&self) -> usize {
        self.additions + self.modifications + self.removals
    }

    /// Check if there are any changes
    pub fn has_changes(&self) -> bool {
        self.total() > 0
    }
}

/// Group planned changes by task kind
pub fn group_by_kind(changes: &[PlannedChange]) -> BTreeMap<&str, Vec<&PlannedChange>> {
    let mut groups: BTreeMap<&str, Vec<&PlannedChange>> = BTreeMap::new();
    for change in changes {
        groups.entry(change.key.kind.as_str()).or_default().push(change);
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Default)]
    struct Group {
        name: String,
        port: u16,
        description: Option<String>,
        tags: BTreeMap<String, String>,
    }

    fn diff(actual: Option<&Group>, expected: &Group) -> Changeset {
        Diff::new(actual, expected)
            .field("name", |g| &g.name)
            .field("port", |g| &g.port)
            .field("description", |g| &g.description)
            .field("tags", |g| &g.tags)
            .finish()
    }

    #[test]
    fn test_create_reports_non_zero_fields() {
        let expected = Group {
            name: "web".to_string(),
            port: 443,
            ..Default::default()
        };
        let changes = diff(None, &expected);

        assert_eq!(changes.fields(), vec!["name", "port"]);
        assert_eq!(changes.get("port").unwrap().expected, "443");
        assert!(changes.get("port").unwrap().actual.is_none());
    }

    #[test]
    fn test_identical_is_empty() {
        let mut tags = BTreeMap::new();
        tags.insert("team".to_string(), "infra".to_string());
        let group = Group {
            name: "web".to_string(),
            port: 443,
            description: Some("https".to_string()),
            tags,
        };
        assert!(diff(Some(&group.clone()), &group).is_empty());
    }

    #[test]
    fn test_only_differing_fields_reported() {
        let actual = Group {
            name: "web".to_string(),
            port: 80,
            ..Default::default()
        };
        let expected = Group {
            port: 443,
            ..actual.clone()
        };
        let changes = diff(Some(&actual), &expected);

        assert_eq!(changes.len(), 1);
        assert_eq!(changes.to_string(), "port: 80 -> 443");
    }

    #[test]
    fn test_field_cleared_is_a_change() {
        let actual = Group {
            name: "web".to_string(),
            description: Some("old".to_string()),
            ..Default::default()
        };
        let expected = Group {
            description: None,
            ..actual.clone()
        };
        let changes = diff(Some(&actual), &expected);
        assert_eq!(changes.get("description").unwrap().expected, "<none>");
    }

    #[test]
    fn test_action_classify() {
        let empty = Changeset::default();
        let some = Changeset::from(vec![FieldChange {
            field: "port".to_string(),
            actual: Some("80".to_string()),
            expected: "443".to_string(),
        }]);

        assert_eq!(Action::classify(false, &empty), Action::Create);
        assert_eq!(Action::classify(true, &empty), Action::NoChange);
        assert_eq!(Action::classify(true, &some), Action::Update);
        assert!(!Action::NoChange.is_change());
    }

    #[test]
    fn test_summary_and_grouping() {
        let planned = vec![
            PlannedChange {
                key: TaskKey::new("Vpc", "main"),
                cloud_name: "main".to_string(),
                action: Action::Create,
                changes: Changeset::default(),
            },
            PlannedChange {
                key: TaskKey::new("Subnet", "a"),
                cloud_name: "a".to_string(),
                action: Action::Update,
                changes: Changeset::default(),
            },
            PlannedChange {
                key: TaskKey::new("Subnet", "b"),
                cloud_name: "b".to_string(),
                action: Action::Delete,
                changes: Changeset::default(),
            },
        ];

        let summary = DiffSummary::from_changes(&planned);
        assert_eq!(summary.additions, 1);
        assert_eq!(summary.modifications, 1);
        assert_eq!(summary.removals, 1);
        assert_eq!(summary.total(), 3);

        let groups = group_by_kind(&planned);
        assert_eq!(groups["Subnet"].len(), 2);
        assert_eq!(groups["Vpc"].len(), 1);
    }
}
