use crate::value::equal_ids;
use serde::{Deserialize, Serialize};

/// Matches every authenticated principal.
pub const PUBLIC_IDENTIFIER: &str = "00000000-0000-4000-8000-000000000001";
/// Matches every principal, authenticated or not.
pub const ANONYMOUS_IDENTIFIER: &str = "00000000-0000-4000-8000-000000000002";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Principal {
    pub id: String,
    pub org: String,
    #[serde(default)]
    pub roles: Vec<String>,
    /// Authorization scopes; `None` means unrestricted.
    #[serde(default)]
    pub scopes: Option<Vec<String>>,
}

impl Principal {
    pub fn new(id: impl Into<String>, org: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            org: org.into(),
            roles: Vec::new(),
            scopes: None,
        }
    }

    pub fn anonymous(org: impl Into<String>) -> Self {
        Self::new(ANONYMOUS_IDENTIFIER, org)
    }

    pub fn with_roles(mut self, roles: &[&str]) -> Self {
        self.roles = roles.iter().map(|r| (*r).to_string()).collect();
        self
    }

    pub fn with_scopes(mut self, scopes: &[&str]) -> Self {
        self.scopes = Some(scopes.iter().map(|s| (*s).to_string()).collect());
        self
    }

    pub fn is_anonymous(&self) -> bool {
        equal_ids(&self.id, ANONYMOUS_IDENTIFIER)
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| equal_ids(r, role))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OrgRole {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    /// Roles implied by holding this one.
    #[serde(default)]
    pub include: Vec<String>,
}

/// Expands held roles through the org's role hierarchy. Each role appears
/// once and include cycles terminate. Roles unknown to the org are dropped.
pub fn expand_roles(org_roles: &[OrgRole], held: &[String]) -> Vec<String> {
    let mut expanded: Vec<String> = Vec::new();
    let mut pending: Vec<&str> = held.iter().map(String::as_str).collect();
    while let Some(role) = pending.pop() {
        let Some(org_role) = org_roles.iter().find(|r| equal_ids(&r.id, role)) else {
            continue;
        };
        if expanded.iter().any(|r| equal_ids(r, &org_role.id)) {
            continue;
        }
        expanded.push(org_role.id.clone());
        pending.extend(org_role.include.iter().map(String::as_str));
    }
    expanded
}

#[cfg(test)]
mod tests {
    use super::*;

    fn role(id: &str, include: &[&str]) -> OrgRole {
        OrgRole {
            id: id.into(),
            name: id.into(),
            include: include.iter().map(|s| (*s).to_string()).collect(),
        }
    }

    #[test]
    fn expansion_follows_includes_and_stops_on_cycles() {
        let roles = vec![
            role("admin", &["dev"]),
            role("dev", &["support", "admin"]),
            role("support", &[]),
        ];
        let mut expanded = expand_roles(&roles, &["admin".to_string()]);
        expanded.sort();
        assert_eq!(expanded, vec!["admin", "dev", "support"]);
    }

    #[test]
    fn unknown_roles_are_dropped() {
        let expanded = expand_roles(&[role("a", &[])], &["b".to_string()]);
        assert!(expanded.is_empty());
    }

    #[test]
    fn anonymous_principal() {
        assert!(Principal::anonymous("org").is_anonymous());
        assert!(!Principal::new("x", "org").is_anonymous());
    }
}
