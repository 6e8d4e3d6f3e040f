//! # Integration Settings
//!
//! Per-deployment configuration for the POS integration engine: provider
//! application credentials, webhook signing secret, environment selection,
//! and the notification-URL template used for signature verification.
//!
//! Values come from the deployment environment; tenants never see or set
//! any of these. Missing values surface as *configuration errors*, kept
//! distinct from tenant errors so operators can diagnose deployment issues.

use std::env;

use crate::error::{PosError, PosResult};

/// Square environment selection (sandbox vs production base URL).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SquareEnvironment {
    Sandbox,
    Production,
}

impl SquareEnvironment {
    /// OAuth + API host for this environment.
    pub const fn base_url(&self) -> &'static str {
        match self {
            SquareEnvironment::Production => "https://connect.squareup.com",
            SquareEnvironment::Sandbox => "https://connect.squareupsandbox.com",
        }
    }
}

/// Per-deployment settings for the integration engine.
#[derive(Debug, Clone)]
pub struct PosSettings {
    /// Square OAuth application id.
    pub square_application_id: String,

    /// Square OAuth application secret.
    pub square_application_secret: String,

    /// Redirect URI registered with the Square application.
    pub square_redirect_uri: String,

    /// Sandbox or production Square endpoints.
    pub square_environment: SquareEnvironment,

    /// Square API version header value.
    pub square_api_version: String,

    /// Shared secret for webhook signature verification.
    pub webhook_signature_key: String,

    /// Template for this deployment's webhook notification URL, e.g.
    /// `https://api.savory.app/pos/webhooks/{tenant_id}`. The `{tenant_id}`
    /// placeholder is optional (the global route has none). Signature
    /// verification is impossible without it.
    pub notification_url_template: Option<String>,

    /// Secret for the signed OAuth state codec.
    pub state_secret: String,

    /// Secret the credential vault derives its encryption key from.
    pub vault_secret: String,

    /// Static shared secret for the trusted internal automation caller.
    /// `None` disables the automation surface entirely.
    pub agent_api_key: Option<String>,

    /// Operator settings page the OAuth callback redirects back to,
    /// e.g. `https://app.savory.app/dashboard/settings?tab=pos`.
    pub settings_redirect_url: String,
}

impl PosSettings {
    /// Loads settings from the deployment environment.
    ///
    /// Every value has a name-spaced `SAVORY_*` variable; absent optional
    /// values stay `None`, absent required values surface later through
    /// [`PosSettings::require_oauth_app`] / webhook verification as
    /// configuration errors rather than failing startup.
    pub fn from_env() -> Self {
        let env_str = env::var("SAVORY_SQUARE_ENV").unwrap_or_default();
        let square_environment = if env_str.eq_ignore_ascii_case("sandbox") {
            SquareEnvironment::Sandbox
        } else {
            SquareEnvironment::Production
        };

        PosSettings {
            square_application_id: env::var("SAVORY_SQUARE_APP_ID").unwrap_or_default(),
            square_application_secret: env::var("SAVORY_SQUARE_APP_SECRET").unwrap_or_default(),
            square_redirect_uri: env::var("SAVORY_SQUARE_REDIRECT_URI").unwrap_or_default(),
            square_environment,
            square_api_version: env::var("SAVORY_SQUARE_API_VERSION")
                .unwrap_or_else(|_| "2024-01-18".to_string()),
            webhook_signature_key: env::var("SAVORY_WEBHOOK_SIGNATURE_KEY").unwrap_or_default(),
            notification_url_template: env::var("SAVORY_NOTIFICATION_URL").ok(),
            state_secret: env::var("SAVORY_STATE_SECRET").unwrap_or_default(),
            vault_secret: env::var("SAVORY_VAULT_SECRET").unwrap_or_default(),
            agent_api_key: env::var("SAVORY_AGENT_API_KEY").ok(),
            settings_redirect_url: env::var("SAVORY_SETTINGS_URL")
                .unwrap_or_else(|_| "http://localhost:8080/dashboard/settings?tab=pos".to_string()),
        }
    }

    /// Square base URL for the configured environment.
    pub fn square_base_url(&self) -> &'static str {
        self.square_environment.base_url()
    }

    /// Ensures the Square OAuth application is configured.
    ///
    /// A missing application id/secret is a deployment problem, surfaced as
    /// a configuration error (never a tenant error).
    pub fn require_oauth_app(&self) -> PosResult<()> {
        if self.square_application_id.is_empty()
            || self.square_application_secret.is_empty()
            || self.square_redirect_uri.is_empty()
        {
            return Err(PosError::Config(
                "Square OAuth application credentials are not configured".to_string(),
            ));
        }
        Ok(())
    }

    /// Resolves the notification URL used for webhook signature
    /// verification, substituting the tenant id into the template when the
    /// tenant-scoped route is in use.
    pub fn notification_url(&self, tenant_id: Option<&str>) -> PosResult<String> {
        let template = self.notification_url_template.as_deref().ok_or_else(|| {
            PosError::Config("webhook notification URL is not configured".to_string())
        })?;

        Ok(match tenant_id {
            Some(id) => template.replace("{tenant_id}", id),
            None => template.replace("/{tenant_id}", "").replace("{tenant_id}", ""),
        })
    }
}

#[cfg(test)]
impl PosSettings {
    /// Fully populated settings for tests; no environment access.
    pub fn for_tests() -> Self {
        PosSettings {
            square_application_id: "sq0idp-test-app".to_string(),
            square_application_secret: "sq0csp-test-secret".to_string(),
            square_redirect_uri: "https://api.savory.test/pos/oauth/callback".to_string(),
            square_environment: SquareEnvironment::Sandbox,
            square_api_version: "2024-01-18".to_string(),
            webhook_signature_key: "whsec-test-key".to_string(),
            notification_url_template: Some(
                "https://api.savory.test/pos/webhooks/{tenant_id}".to_string(),
            ),
            state_secret: "state-secret".to_string(),
            vault_secret: "vault-secret".to_string(),
            agent_api_key: Some("agent-key".to_string()),
            settings_redirect_url: "https://app.savory.test/dashboard/settings?tab=pos"
                .to_string(),
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_base_urls() {
        assert_eq!(
            SquareEnvironment::Production.base_url(),
            "https://connect.squareup.com"
        );
        assert_eq!(
            SquareEnvironment::Sandbox.base_url(),
            "https://connect.squareupsandbox.com"
        );
    }

    #[test]
    fn test_require_oauth_app() {
        let mut settings = PosSettings::for_tests();
        assert!(settings.require_oauth_app().is_ok());

        settings.square_application_id = String::new();
        let err = settings.require_oauth_app().unwrap_err();
        assert!(err.is_config_error());
    }

    #[test]
    fn test_notification_url_template() {
        let settings = PosSettings::for_tests();

        assert_eq!(
            settings.notification_url(Some("t1")).unwrap(),
            "https://api.savory.test/pos/webhooks/t1"
        );
        assert_eq!(
            settings.notification_url(None).unwrap(),
            "https://api.savory.test/pos/webhooks"
        );
    }

    #[test]
    fn test_missing_notification_url_is_config_error() {
        let mut settings = PosSettings::for_tests();
        settings.notification_url_template = None;
        assert!(settings.notification_url(None).unwrap_err().is_config_error());
    }
}
