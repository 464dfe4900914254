//! Role table authorizer.
//!
//! Maps user names to privilege levels from configuration. Unknown users
//! are viewers.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;

use crate::domain::PrivilegeLevel;

use super::Authorizer;

#[derive(Debug, Clone, Default)]
pub struct RoleAuthorizer {
    roles: HashMap<String, PrivilegeLevel>,
}

impl RoleAuthorizer {
    pub fn new(roles: HashMap<String, PrivilegeLevel>) -> Self {
        Self { roles }
    }
}

#[async_trait]
impl Authorizer for RoleAuthorizer {
    async fn reviewer_privilege(&self, user: &str) -> Result<PrivilegeLevel> {
        Ok(self
            .roles
            .get(user)
            .copied()
            .unwrap_or(PrivilegeLevel::Viewer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unknown_user_is_viewer() {
        let auth = RoleAuthorizer::new(
            [("alice".to_string(), PrivilegeLevel::Admin)]
                .into_iter()
                .collect(),
        );

        assert_eq!(auth.reviewer_privilege("alice").await.unwrap(), PrivilegeLevel::Admin);
        assert_eq!(auth.reviewer_privilege("mallory").await.unwrap(), PrivilegeLevel::Viewer);
    }
}
