use crate::access::acl::{AclAccess, AclEntry, ExpressionEvaluator, PaclEntry, ResolveInput, resolve_access};
use crate::access::level::AccessLevel;
use crate::access::principal::{OrgRole, Principal};
use crate::access::scope::in_auth_scope;
use crate::effects::{DeferredEffects, HistoryEntry};
use crate::schema::node::NodeId;
use crate::schema::types::reference::ReferenceResolver;
use crate::schema::validate::{BuiltinRules, RuleRegistry};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;

/// The HTTP-style verb driving array write semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Method {
    #[default]
    Get,
    Post,
    Put,
    Delete,
}

/// Per-request state threaded through every read and write: who is calling,
/// what they are touching, what they resolved to, and the effects their
/// writes scheduled.
pub struct AccessContext {
    pub principal: Principal,
    pub org_roles: Arc<Vec<OrgRole>>,
    pub object_name: String,
    pub subject_id: Option<String>,
    pub owner_id: Option<String>,
    pub creator_id: Option<String>,
    pub method: Method,
    /// The caller's resolved access on the subject before node-level acls.
    pub resolved: AccessLevel,
    pub grant: AccessLevel,
    pub override_access: AccessLevel,
    pub instance_roles: Vec<String>,
    /// Best-effort mode: missing or denied nodes are skipped, not raised.
    pub passive: bool,
    /// Property-level entries inherited from a reference expansion.
    pub pacl: Vec<PaclEntry>,
    pub evaluator: Option<Arc<dyn ExpressionEvaluator>>,
    pub rules: Arc<dyn RuleRegistry>,
    pub references: Option<Arc<dyn ReferenceResolver>>,
    pub req_id: String,
    pub effects: DeferredEffects,
    pub(crate) wrote_defaults: HashSet<String>,
    pub(crate) index_updates: BTreeMap<String, BTreeSet<String>>,
    pub(crate) index_rebuilds: BTreeSet<NodeId>,
    pub(crate) history: Vec<HistoryEntry>,
    pub(crate) modified: BTreeSet<String>,
}

impl std::fmt::Debug for AccessContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessContext")
            .field("principal", &self.principal.id)
            .field("object_name", &self.object_name)
            .field("subject_id", &self.subject_id)
            .field("method", &self.method)
            .field("resolved", &self.resolved)
            .field("passive", &self.passive)
            .finish_non_exhaustive()
    }
}

impl AccessContext {
    pub fn new(principal: Principal, object_name: impl Into<String>) -> Self {
        Self {
            principal,
            org_roles: Arc::new(Vec::new()),
            object_name: object_name.into(),
            subject_id: None,
            owner_id: None,
            creator_id: None,
            method: Method::Get,
            resolved: AccessLevel::None,
            grant: AccessLevel::None,
            override_access: AccessLevel::None,
            instance_roles: Vec::new(),
            passive: false,
            pacl: Vec::new(),
            evaluator: None,
            rules: Arc::new(BuiltinRules),
            references: None,
            req_id: crate::value::new_id(),
            effects: DeferredEffects::default(),
            wrote_defaults: HashSet::new(),
            index_updates: BTreeMap::new(),
            index_rebuilds: BTreeSet::new(),
            history: Vec::new(),
            modified: BTreeSet::new(),
        }
    }

    /// A context with full access, used for internal maintenance work.
    pub fn system(object_name: impl Into<String>, org: impl Into<String>) -> Self {
        let mut ac = Self::new(Principal::new("system", org), object_name);
        ac.resolved = AccessLevel::System;
        ac.passive = true;
        ac
    }

    pub fn with_subject(mut self, subject_id: impl Into<String>) -> Self {
        self.subject_id = Some(subject_id.into());
        self
    }

    pub fn with_owner(mut self, owner_id: impl Into<String>) -> Self {
        self.owner_id = Some(owner_id.into());
        self
    }

    pub fn with_creator(mut self, creator_id: impl Into<String>) -> Self {
        self.creator_id = Some(creator_id.into());
        self
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn with_resolved(mut self, resolved: AccessLevel) -> Self {
        self.resolved = resolved;
        self
    }

    pub fn with_grant(mut self, grant: AccessLevel) -> Self {
        self.grant = grant;
        self
    }

    pub fn with_org_roles(mut self, roles: Arc<Vec<OrgRole>>) -> Self {
        self.org_roles = roles;
        self
    }

    pub fn with_rules(mut self, rules: Arc<dyn RuleRegistry>) -> Self {
        self.rules = rules;
        self
    }

    pub fn with_references(mut self, references: Arc<dyn ReferenceResolver>) -> Self {
        self.references = Some(references);
        self
    }

    pub fn with_evaluator(mut self, evaluator: Arc<dyn ExpressionEvaluator>) -> Self {
        self.evaluator = Some(evaluator);
        self
    }

    pub fn passive(mut self, passive: bool) -> Self {
        self.passive = passive;
        self
    }

    /// Resolves an entry list for the calling principal. With grants, the
    /// context grant and override levels are merged in as well.
    pub fn resolve_access(&self, entries: &[AclEntry], with_grants: bool) -> AclAccess {
        let input = ResolveInput {
            principal: &self.principal,
            object_name: &self.object_name,
            subject_id: self.subject_id.as_deref(),
            owner_id: self.owner_id.as_deref(),
            creator_id: self.creator_id.as_deref(),
            org_roles: &self.org_roles,
            instance_roles: &self.instance_roles,
            evaluator: self.evaluator.as_deref(),
        };
        let mut access = resolve_access(entries, &input);
        if with_grants {
            access.merge(self.grant);
            access.merge(self.override_access);
        }
        access
    }

    pub fn in_auth_scope(&self, scope: &str, accept_prefix_match: bool) -> bool {
        in_auth_scope(self.principal.scopes.as_deref(), scope, accept_prefix_match)
    }

    pub(crate) fn defaults_pending(&self, key: &str) -> bool {
        !self.wrote_defaults.contains(key)
    }

    pub(crate) fn mark_defaults_written(&mut self, key: String) {
        self.wrote_defaults.insert(key);
    }

    pub fn mark_modified(&mut self, path: impl Into<String>) {
        self.modified.insert(path.into());
    }

    pub fn modified_paths(&self) -> impl Iterator<Item = &str> {
        self.modified.iter().map(String::as_str)
    }

    pub fn is_modified(&self) -> bool {
        !self.modified.is_empty()
    }

    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }

    /// Drops everything a failed write left behind so the next write on
    /// this context starts clean.
    pub fn reset_commit_state(&mut self) {
        self.effects.clear();
        self.wrote_defaults.clear();
        self.index_updates.clear();
        self.index_rebuilds.clear();
        self.history.clear();
        self.modified.clear();
    }

    pub(crate) fn take_history(&mut self) -> Vec<HistoryEntry> {
        std::mem::take(&mut self.history)
    }

    pub(crate) fn take_index_rebuilds(&mut self) -> BTreeSet<NodeId> {
        std::mem::take(&mut self.index_rebuilds)
    }

    /// Property ids recorded for an index update key.
    pub fn index_updates(&self, update_key: &str) -> Vec<String> {
        self.index_updates
            .get(update_key)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Builds a context for reading another object's instance on behalf of
    /// the same caller.
    pub fn derive(&self, object_name: impl Into<String>, subject_id: impl Into<String>) -> Self {
        let mut ac = Self::new(self.principal.clone(), object_name);
        ac.org_roles = Arc::clone(&self.org_roles);
        ac.subject_id = Some(subject_id.into());
        ac.passive = self.passive;
        ac.evaluator = self.evaluator.clone();
        ac.rules = Arc::clone(&self.rules);
        ac.references = self.references.clone();
        ac.req_id = self.req_id.clone();
        ac
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::acl::AclEntry;

    #[test]
    fn grants_merge_only_when_requested() {
        let ac = AccessContext::new(Principal::new("u1", "org"), "c_widget")
            .with_grant(AccessLevel::Update);
        let entries = vec![AclEntry::account("u1", AccessLevel::Read)];
        assert_eq!(ac.resolve_access(&entries, false).allow, AccessLevel::Read);
        assert_eq!(ac.resolve_access(&entries, true).allow, AccessLevel::Update);
    }

    #[test]
    fn owner_entries_use_subject_owner() {
        let ac = AccessContext::new(Principal::new("u1", "org"), "c_widget").with_owner("u1");
        let entries = vec![AclEntry::owner(AccessLevel::Delete)];
        assert_eq!(ac.resolve_access(&entries, false).allow, AccessLevel::Delete);
    }

    #[test]
    fn scoped_principal_is_checked() {
        let principal = Principal::new("u1", "org").with_scopes(&["object.read.c_widget"]);
        let ac = AccessContext::new(principal, "c_widget");
        assert!(ac.in_auth_scope("object.read.c_widget.s1.c_name", false));
        assert!(!ac.in_auth_scope("object.update.c_widget.s1.c_name", false));
    }
}
