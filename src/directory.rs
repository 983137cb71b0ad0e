//! Role-to-account resolution, supplied by the identity collaborator.

use std::collections::HashMap;

/// Resolves a role name to the accounts currently holding it.
pub trait ApproverDirectory: Send + Sync {
    fn resolve_approvers(&self, role: &str) -> Vec<String>;
}

/// Fixed role table, typically loaded from `stagegate.toml`.
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    roles: HashMap<String, Vec<String>>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_role<I, S>(mut self, role: impl Into<String>, accounts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.roles
            .insert(role.into(), accounts.into_iter().map(Into::into).collect());
        self
    }

    pub fn from_roles(roles: HashMap<String, Vec<String>>) -> Self {
        Self { roles }
    }

    pub fn roles(&self) -> impl Iterator<Item = &String> {
        self.roles.keys()
    }
}

impl ApproverDirectory for StaticDirectory {
    fn resolve_approvers(&self, role: &str) -> Vec<String> {
        self.roles.get(role).cloned().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_role_resolves_to_nobody() {
        let dir = StaticDirectory::new().with_role("finance", ["carol"]);
        assert_eq!(dir.resolve_approvers("finance"), vec!["carol".to_string()]);
        assert!(dir.resolve_approvers("legal").is_empty());
    }
}
