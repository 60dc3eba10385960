//! Per-principal capability objects with instance-level conditions.
//!
//! Candidate instances declare their subject type through [`Subject::subject_type`];
//! nothing here inspects concrete Rust types.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::catalog::PermissionCatalog;
use super::permission::{Action, PermissionSet};
use super::principal::Principal;
use crate::errors::AuthzError;
use crate::models::rbac::RoleDescriptor;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectType {
    /// Universal subject; only granted to super admins.
    All,
    User,
    Project,
    Issue,
    Comment,
    Member,
    Sprint,
    Attachment,
    Backlog,
    Watcher,
    Other(String),
}

impl SubjectType {
    /// Maps a permission resource (`"comments"`) to its subject type.
    pub fn from_resource(resource: &str) -> Self {
        match resource.trim().to_ascii_lowercase().as_str() {
            "all" => SubjectType::All,
            "users" | "user" => SubjectType::User,
            "projects" | "project" => SubjectType::Project,
            "issues" | "issue" => SubjectType::Issue,
            "comments" | "comment" => SubjectType::Comment,
            "members" | "member" => SubjectType::Member,
            "sprints" | "sprint" => SubjectType::Sprint,
            "attachments" | "attachment" => SubjectType::Attachment,
            "backlog" | "backlogs" => SubjectType::Backlog,
            "watchers" | "watcher" => SubjectType::Watcher,
            other => SubjectType::Other(other.to_string()),
        }
    }
}

impl fmt::Display for SubjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubjectType::All => f.write_str("all"),
            SubjectType::User => f.write_str("user"),
            SubjectType::Project => f.write_str("project"),
            SubjectType::Issue => f.write_str("issue"),
            SubjectType::Comment => f.write_str("comment"),
            SubjectType::Member => f.write_str("member"),
            SubjectType::Sprint => f.write_str("sprint"),
            SubjectType::Attachment => f.write_str("attachment"),
            SubjectType::Backlog => f.write_str("backlog"),
            SubjectType::Watcher => f.write_str("watcher"),
            SubjectType::Other(name) => f.write_str(name),
        }
    }
}

/// A candidate instance for a conditional check.
pub trait Subject: Send + Sync {
    /// Declared tag; must be explicit on every instance type.
    fn subject_type(&self) -> SubjectType;

    fn attribute(&self, name: &str) -> Option<Value>;
}

/// Generic tagged instance, for callers that don't want their own `Subject` impl.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub subject_type: SubjectType,
    #[serde(default)]
    pub attributes: HashMap<String, Value>,
}

impl Resource {
    pub fn new(subject_type: SubjectType) -> Self {
        Self {
            subject_type,
            attributes: HashMap::new(),
        }
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    /// A comment written by `author_id`.
    pub fn comment(id: Uuid, author_id: Uuid) -> Self {
        Self::new(SubjectType::Comment)
            .with("id", id.to_string())
            .with(attributes::AUTHOR_ID, author_id.to_string())
    }

    pub fn user(id: Uuid) -> Self {
        Self::new(SubjectType::User).with(attributes::ID, id.to_string())
    }
}

impl Subject for Resource {
    fn subject_type(&self) -> SubjectType {
        self.subject_type.clone()
    }

    fn attribute(&self, name: &str) -> Option<Value> {
        self.attributes.get(name).cloned()
    }
}

/// Attribute names used by built-in conditions.
pub mod attributes {
    pub const ID: &str = "id";
    pub const AUTHOR_ID: &str = "authorId";
}

/// Attribute predicate evaluated against a candidate instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    /// `instance.<attribute> == principal.id`
    OwnedByPrincipal { attribute: &'static str },
}

impl Condition {
    fn holds(&self, principal_id: Uuid, instance: &dyn Subject) -> bool {
        match self {
            Condition::OwnedByPrincipal { attribute } => match instance.attribute(attribute) {
                Some(Value::String(raw)) => Uuid::parse_str(&raw).map(|id| id == principal_id).unwrap_or(false),
                _ => false,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grant {
    pub action: Action,
    pub subject: SubjectType,
    pub condition: Option<Condition>,
}

impl Grant {
    pub fn new(action: Action, subject: SubjectType) -> Self {
        Self {
            action,
            subject,
            condition: None,
        }
    }

    pub fn when(mut self, condition: Condition) -> Self {
        self.condition = Some(condition);
        self
    }
}

/// Materialized grants for one principal in one scope.
#[derive(Debug, Clone)]
pub struct Ability {
    principal_id: Uuid,
    grants: Vec<Grant>,
}

impl Ability {
    /// Ability granting `manage` on everything.
    pub fn unrestricted(principal_id: Uuid) -> Self {
        Self {
            principal_id,
            grants: vec![Grant::new(Action::Manage, SubjectType::All)],
        }
    }

    /// Baseline grants plus one grant per permission. Comment update/delete
    /// are restricted to the principal's own comments.
    pub fn from_permissions(principal: &Principal, permissions: &PermissionSet) -> Self {
        if principal.is_super_admin {
            return Self::unrestricted(principal.id);
        }

        let own_record = Condition::OwnedByPrincipal {
            attribute: attributes::ID,
        };
        let mut grants = vec![
            Grant::new(Action::Read, SubjectType::User).when(own_record.clone()),
            Grant::new(Action::Update, SubjectType::User).when(own_record),
        ];

        for permission in permissions.iter() {
            let subject = SubjectType::from_resource(permission.resource());
            let grant = Grant::new(permission.action(), subject.clone());
            let grant = match (&subject, permission.action()) {
                (SubjectType::Comment, Action::Update | Action::Delete) => grant.when(Condition::OwnedByPrincipal {
                    attribute: attributes::AUTHOR_ID,
                }),
                _ => grant,
            };
            grants.push(grant);
        }

        Self {
            principal_id: principal.id,
            grants,
        }
    }

    pub fn grants(&self) -> &[Grant] {
        &self.grants
    }

    /// Conditional grants never match without an instance.
    pub fn can(&self, action: Action, subject: &SubjectType, instance: Option<&dyn Subject>) -> bool {
        let manages = self.grants.iter().any(|g| {
            g.action == Action::Manage && g.condition.is_none() && (g.subject == *subject || g.subject == SubjectType::All)
        });
        if manages {
            return true;
        }

        let exact = self
            .grants
            .iter()
            .filter(|g| g.action == action && g.subject == *subject);

        for grant in exact {
            match (&grant.condition, instance) {
                (None, _) => return true,
                (Some(condition), Some(instance)) => {
                    if instance.subject_type() == *subject && condition.holds(self.principal_id, instance) {
                        return true;
                    }
                }
                (Some(_), None) => {}
            }
        }

        false
    }

    /// Checks `action` against an instance, using the instance's own tag.
    pub fn can_on(&self, action: Action, instance: &dyn Subject) -> bool {
        self.can(action, &instance.subject_type(), Some(instance))
    }
}

/// Builds abilities from resolved roles.
pub struct AbilityFactory {
    catalog: Arc<PermissionCatalog>,
}

impl AbilityFactory {
    pub fn new(catalog: Arc<PermissionCatalog>) -> Self {
        Self { catalog }
    }

    /// `role` is `None` for principals without a role in the scope; they keep
    /// only the baseline grants.
    pub async fn build_ability(&self, principal: &Principal, role: Option<&RoleDescriptor>) -> Result<Ability, AuthzError> {
        if principal.is_super_admin {
            return Ok(Ability::unrestricted(principal.id));
        }
        let permissions = match role {
            Some(role) => self.catalog.get_permissions(role).await?,
            None => PermissionSet::new(),
        };
        Ok(Ability::from_permissions(principal, &permissions))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member() -> Principal {
        Principal::new(Uuid::new_v4(), "member@example.com")
    }

    fn member_permissions() -> PermissionSet {
        PermissionSet::from_strings(["comments:view", "comments:update", "comments:delete", "issues:view"])
    }

    #[test]
    fn super_admin_can_do_anything() {
        let admin = member().super_admin();
        let ability = Ability::from_permissions(&admin, &PermissionSet::new());
        assert!(ability.can(Action::Delete, &SubjectType::Project, None));
        assert!(ability.can(Action::Update, &SubjectType::Other("invoices".into()), None));
    }

    #[test]
    fn comment_update_limited_to_author() {
        let principal = member();
        let ability = Ability::from_permissions(&principal, &member_permissions());

        let own = Resource::comment(Uuid::new_v4(), principal.id);
        let foreign = Resource::comment(Uuid::new_v4(), Uuid::new_v4());

        assert!(ability.can_on(Action::Update, &own));
        assert!(ability.can_on(Action::Delete, &own));
        assert!(!ability.can_on(Action::Update, &foreign));
        assert!(!ability.can_on(Action::Delete, &foreign));
        assert!(ability.can_on(Action::Read, &foreign));
    }

    #[test]
    fn conditional_grant_needs_an_instance() {
        let ability = Ability::from_permissions(&member(), &member_permissions());
        assert!(!ability.can(Action::Update, &SubjectType::Comment, None));
        assert!(ability.can(Action::Read, &SubjectType::Issue, None));
    }

    #[test]
    fn instance_tag_must_match_requested_subject() {
        let principal = member();
        let ability = Ability::from_permissions(&principal, &member_permissions());
        let mislabelled = Resource::new(SubjectType::Issue).with(attributes::AUTHOR_ID, principal.id.to_string());
        assert!(!ability.can(Action::Update, &SubjectType::Comment, Some(&mislabelled)));
    }

    #[test]
    fn manage_covers_every_action_and_ignores_conditions() {
        let principal = member();
        let ability = Ability::from_permissions(&principal, &PermissionSet::from_strings(["comments:manage"]));
        let foreign = Resource::comment(Uuid::new_v4(), Uuid::new_v4());
        for action in [Action::Read, Action::Create, Action::Update, Action::Delete] {
            assert!(ability.can_on(action, &foreign));
        }
        assert!(!ability.can(Action::Read, &SubjectType::Issue, None));
    }

    #[test]
    fn baseline_lets_users_edit_only_themselves() {
        let principal = member();
        let ability = Ability::from_permissions(&principal, &PermissionSet::new());
        assert!(ability.can_on(Action::Update, &Resource::user(principal.id)));
        assert!(ability.can_on(Action::Read, &Resource::user(principal.id)));
        assert!(!ability.can_on(Action::Update, &Resource::user(Uuid::new_v4())));
        assert!(!ability.can_on(Action::Delete, &Resource::user(principal.id)));
    }
}
