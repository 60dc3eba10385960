use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Action half of a `resource:action` permission string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// `view` and `read` are the same action.
    Read,
    Create,
    Update,
    Delete,
    Manage,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Read => "view",
            Action::Create => "create",
            Action::Update => "update",
            Action::Delete => "delete",
            Action::Manage => "manage",
        }
    }
}

impl FromStr for Action {
    type Err = PermissionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "view" | "read" => Ok(Action::Read),
            "create" => Ok(Action::Create),
            "update" => Ok(Action::Update),
            "delete" => Ok(Action::Delete),
            "manage" => Ok(Action::Manage),
            other => Err(PermissionParseError(format!("unknown action '{other}'"))),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid permission: {0}")]
pub struct PermissionParseError(String);

/// A flat `resource:action` permission. Resource is stored lowercased.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Permission {
    resource: String,
    action: Action,
}

impl Permission {
    pub fn new(resource: impl AsRef<str>, action: Action) -> Self {
        Self {
            resource: resource.as_ref().trim().to_ascii_lowercase(),
            action,
        }
    }

    pub fn parse(raw: &str) -> Result<Self, PermissionParseError> {
        raw.parse()
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn action(&self) -> Action {
        self.action
    }

    pub fn manage_of(&self) -> Permission {
        Permission::new(&self.resource, Action::Manage)
    }
}

impl FromStr for Permission {
    type Err = PermissionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (resource, action) = s
            .split_once(':')
            .ok_or_else(|| PermissionParseError(format!("'{s}' is not resource:action")))?;
        if resource.trim().is_empty() {
            return Err(PermissionParseError(format!("'{s}' has an empty resource")));
        }
        Ok(Permission::new(resource, action.parse()?))
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.resource, self.action)
    }
}

impl Serialize for Permission {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Permission {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// The permissions granted to one role.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PermissionSet {
    inner: HashSet<Permission>,
}

impl PermissionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a set from raw strings, skipping (and logging) malformed entries.
    pub fn from_strings<I, S>(raw: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = Self::new();
        for entry in raw {
            match Permission::parse(entry.as_ref()) {
                Ok(perm) => {
                    set.inner.insert(perm);
                }
                Err(err) => tracing::warn!(entry = entry.as_ref(), error = %err, "skipping malformed permission"),
            }
        }
        set
    }

    pub fn insert(&mut self, permission: Permission) {
        self.inner.insert(permission);
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Permission> {
        self.inner.iter()
    }

    /// True if the set grants `permission`, either literally or through
    /// `<resource>:manage`.
    pub fn allows(&self, permission: &Permission) -> bool {
        self.inner.contains(permission) || self.inner.contains(&permission.manage_of())
    }

    /// Sorted permission strings, used for audit metadata.
    pub fn to_strings(&self) -> Vec<String> {
        self.inner
            .iter()
            .map(ToString::to_string)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

impl FromIterator<Permission> for PermissionSet {
    fn from_iter<T: IntoIterator<Item = Permission>>(iter: T) -> Self {
        Self {
            inner: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_is_case_insensitive_and_aliases_view() {
        let a = Permission::parse("Issues:VIEW").unwrap();
        let b = Permission::parse("issues:read").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "issues:view");
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(Permission::parse("issues").is_err());
        assert!(Permission::parse(":view").is_err());
        assert!(Permission::parse("issues:frobnicate").is_err());
    }

    #[test]
    fn manage_implies_every_action_on_that_resource_only() {
        let set = PermissionSet::from_strings(["sprints:manage"]);
        for action in ["view", "create", "update", "delete"] {
            let perm = Permission::parse(&format!("sprints:{action}")).unwrap();
            assert!(set.allows(&perm), "manage should imply {action}");
        }
        assert!(!set.allows(&Permission::parse("issues:view").unwrap()));
    }

    #[test]
    fn malformed_entries_are_skipped() {
        let set = PermissionSet::from_strings(["issues:view", "nonsense", "comments:create"]);
        assert_eq!(set.len(), 2);
        assert_eq!(set.to_strings(), vec!["comments:create", "issues:view"]);
    }
}
