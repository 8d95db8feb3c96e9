//! Entitlement artifact model and schema validation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Declarative entitlement export produced by the provisioning side. Unknown
/// top-level keys are ignored on parse.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct EntitlementArtifact {
    pub generated_at: DateTime<Utc>,
    /// Producer kill switch; a disabled artifact is refused unless the
    /// caller explicitly overrides.
    pub enabled: bool,
    #[validate(nested)]
    pub plans: Vec<ArtifactPlan>,
}

/// One plan's declared feature set.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ArtifactPlan {
    #[validate(length(min = 1))]
    pub plan_code: String,
    #[validate(nested)]
    pub features: Vec<ArtifactFeature>,
}

/// One feature declaration inside a plan.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ArtifactFeature {
    #[validate(length(min = 1))]
    pub feature_key: String,
    #[validate(length(min = 1))]
    pub display_name: String,
    pub unit: Option<String>,
    #[serde(default = "default_true")]
    pub is_metered: bool,
    pub soft_limit: Option<i64>,
    pub hard_limit: Option<i64>,
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn artifact_parses_with_defaults_applied() {
        let raw = r#"{
            "generated_at": "2024-03-01T00:00:00Z",
            "enabled": true,
            "plans": [
                {
                    "plan_code": "starter",
                    "features": [
                        {"feature_key": "messages", "display_name": "Messages", "soft_limit": 80, "hard_limit": 120}
                    ]
                }
            ]
        }"#;

        let artifact: EntitlementArtifact = serde_json::from_str(raw).unwrap();
        artifact.validate().unwrap();

        let feature = &artifact.plans[0].features[0];
        assert!(feature.is_metered);
        assert_eq!(feature.unit, None);
        assert_eq!(feature.soft_limit, Some(80));
        assert_eq!(feature.hard_limit, Some(120));
    }

    #[test]
    fn artifact_rejects_missing_required_fields() {
        let missing_features = r#"{
            "generated_at": "2024-03-01T00:00:00Z",
            "enabled": true,
            "plans": [{"plan_code": "starter"}]
        }"#;
        assert!(serde_json::from_str::<EntitlementArtifact>(missing_features).is_err());

        let missing_enabled = r#"{
            "generated_at": "2024-03-01T00:00:00Z",
            "plans": []
        }"#;
        assert!(serde_json::from_str::<EntitlementArtifact>(missing_enabled).is_err());
    }

    #[test]
    fn artifact_rejects_empty_identifiers() {
        let raw = r#"{
            "generated_at": "2024-03-01T00:00:00Z",
            "enabled": true,
            "plans": [
                {
                    "plan_code": "",
                    "features": []
                }
            ]
        }"#;
        let artifact: EntitlementArtifact = serde_json::from_str(raw).unwrap();
        assert!(artifact.validate().is_err());
    }

    #[test]
    fn artifact_ignores_unknown_keys() {
        let raw = r#"{
            "generated_at": "2024-03-01T00:00:00Z",
            "enabled": true,
            "schema_version": 3,
            "plans": []
        }"#;
        let artifact: EntitlementArtifact = serde_json::from_str(raw).unwrap();
        assert!(artifact.plans.is_empty());
    }
}
