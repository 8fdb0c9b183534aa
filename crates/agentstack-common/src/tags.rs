//! Resource tag constants for agentstack
//!
//! The stack and every resource created outside it carry these tags, so an
//! operator can tell which deployment a resource belongs to.
//!
//! ## Tag Schema
//!
//! | Tag Key | Description |
//! |---------|-------------|
//! | `agentstack:app` | Application prefix |
//! | `agentstack:version` | Deployment version tag |
//! | `agentstack:managed-by` | Static identifier ("agentstack") |

use crate::DeploymentIdentity;

/// Tag key for the application prefix
pub const TAG_APP: &str = "agentstack:app";

/// Tag key for the deployment version
pub const TAG_VERSION: &str = "agentstack:version";

/// Tag key for tool identification
pub const TAG_MANAGED_BY: &str = "agentstack:managed-by";

/// Tag value for tool identification
pub const TAG_MANAGED_BY_VALUE: &str = "agentstack";

/// The standard tag set for one deployment, as `(key, value)` pairs
pub fn deployment_tags(identity: &DeploymentIdentity) -> Vec<(&'static str, String)> {
    vec![
        (TAG_APP, identity.app().to_string()),
        (TAG_VERSION, identity.version().to_string()),
        (TAG_MANAGED_BY, TAG_MANAGED_BY_VALUE.to_string()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AccountId;

    #[test]
    fn test_deployment_tags() {
        let identity = DeploymentIdentity::new(
            "agentstack",
            "v3",
            "eu-west-1",
            AccountId::parse("210987654321").unwrap(),
        )
        .unwrap();

        let tags = deployment_tags(&identity);
        assert_eq!(tags.len(), 3);
        assert!(tags.contains(&(TAG_VERSION, "v3".to_string())));
        assert!(tags.contains(&(TAG_APP, "agentstack".to_string())));
    }
}
