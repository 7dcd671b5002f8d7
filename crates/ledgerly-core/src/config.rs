//! Application configuration management.
//!
//! The configuration names the backend, the cookie namespace, the
//! full-access roles, the routes of the front-end and the route rules that
//! guard them.
//!
//! Configuration is stored at `~/.config/ledgerly/config.json`.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::permissions::PermissionKey;
use crate::routing::{AuthRuleLayer, NotAllowedRedirect, RouteRuleLayer, RouteRules, RouteTable};

/// Application name used for config/cache directory paths
const APP_NAME: &str = "ledgerly";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Environment variable overriding `api_base_url`
pub const API_URL_ENV: &str = "LEDGERLY_API_URL";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Onboarding is enabled but no onboarding route is configured")]
    MissingOnboardingRoute,

    #[error("Onboarding is enabled but no success route is configured")]
    MissingOnboardingSuccessRoute,

    #[error("Login route must be an absolute path, got '{0}'")]
    InvalidLoginRoute(String),

    #[error("Route '{name}' has invalid pattern '{pattern}'")]
    InvalidRoute { name: String, pattern: String },

    #[error("API base URL is empty")]
    MissingApiUrl,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OnboardingConfig {
    pub enabled: bool,
    pub route: String,
    pub success_route: String,
}

impl Default for OnboardingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            route: "/onboarding".to_string(),
            success_route: "/".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub api_base_url: String,
    pub namespace: Option<String>,
    pub full_access_roles: BTreeSet<String>,
    pub login_route: String,
    pub onboarding: OnboardingConfig,
    pub invitations_route: String,
    pub create_company_route: String,
    /// Paths the company-switch guard never inspects (exact or prefix).
    pub public_paths: Vec<String>,
    /// Route name -> path pattern.
    pub routes: BTreeMap<String, String>,
    /// Glob pattern -> auth rule layer.
    pub route_rules: BTreeMap<String, RouteRuleLayer>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8000".to_string(),
            namespace: None,
            full_access_roles: BTreeSet::from(["owner".to_string()]),
            login_route: "/login".to_string(),
            onboarding: OnboardingConfig::default(),
            invitations_route: "/invitations".to_string(),
            create_company_route: "/company/create".to_string(),
            public_paths: [
                "/login",
                "/signup",
                "/password",
                "/verify-email",
                "/auth/callback",
            ]
            .map(String::from)
            .to_vec(),
            routes: default_routes(),
            route_rules: default_route_rules(),
        }
    }
}

fn default_routes() -> BTreeMap<String, String> {
    [
        ("home", "/"),
        ("login", "/login"),
        ("signup", "/signup"),
        ("password-reset", "/password/reset"),
        ("verify-email", "/verify-email"),
        ("provider-callback", "/auth/callback"),
        ("onboarding", "/onboarding"),
        ("invitations", "/invitations"),
        ("create-company", "/company/create"),
        ("dashboard", "/:company/dashboard"),
        ("sales-invoices", "/:company/sales/invoices"),
        ("sales-vouchers", "/:company/sales/vouchers"),
        ("sales-voucher-detail", "/:company/sales/vouchers/:id"),
        ("purchase-vouchers", "/:company/purchase/vouchers"),
        ("settings-company", "/:company/settings/company"),
        ("settings-users", "/:company/settings/users"),
    ]
    .into_iter()
    .map(|(name, pattern)| (name.to_string(), pattern.to_string()))
    .collect()
}

fn default_route_rules() -> BTreeMap<String, RouteRuleLayer> {
    let layer = |auth: AuthRuleLayer| RouteRuleLayer { auth };
    let guest_only = || AuthRuleLayer {
        protected: Some(false),
        redirect_if_logged_in: Some("/".to_string()),
        ..Default::default()
    };
    let public = || AuthRuleLayer {
        protected: Some(false),
        ..Default::default()
    };

    BTreeMap::from([
        (
            "/**".to_string(),
            layer(AuthRuleLayer {
                protected: Some(true),
                redirect_if_not_allowed: Some(NotAllowedRedirect::Disabled),
                ..Default::default()
            }),
        ),
        ("/login".to_string(), layer(guest_only())),
        ("/signup".to_string(), layer(guest_only())),
        ("/password/**".to_string(), layer(public())),
        ("/verify-email".to_string(), layer(public())),
        ("/auth/callback".to_string(), layer(public())),
        (
            "/*/settings/**".to_string(),
            layer(AuthRuleLayer {
                roles: Some(BTreeSet::from(["owner".to_string(), "admin".to_string()])),
                ..Default::default()
            }),
        ),
        (
            "/*/sales/**".to_string(),
            layer(AuthRuleLayer {
                permissions: Some(vec![
                    PermissionKey::resource("invoice"),
                    PermissionKey::resource("voucher"),
                ]),
                ..Default::default()
            }),
        ),
        (
            "/*/purchase/**".to_string(),
            layer(AuthRuleLayer {
                permissions: Some(vec![PermissionKey::resource("purchase")]),
                ..Default::default()
            }),
        ),
    ])
}

impl AuthConfig {
    /// Load from the user config directory, falling back to defaults when
    /// no file exists yet.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config file {}", path.display()))
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Cache directory for session state, per namespace.
    pub fn cache_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;

        let mut path = cache_dir.join(APP_NAME);
        if let Some(ns) = self.namespace.as_deref().filter(|ns| !ns.is_empty()) {
            path = path.join(ns);
        }
        Ok(path)
    }

    /// Apply the `LEDGERLY_API_URL` override if it is set.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var(API_URL_ENV) {
            if !url.trim().is_empty() {
                self.api_base_url = url.trim().to_string();
            }
        }
        self
    }

    /// Reject configurations that could only fail later, at navigation time.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_base_url.trim().is_empty() {
            return Err(ConfigError::MissingApiUrl);
        }
        if !self.login_route.starts_with('/') {
            return Err(ConfigError::InvalidLoginRoute(self.login_route.clone()));
        }
        if self.onboarding.enabled {
            if self.onboarding.route.trim().is_empty() {
                return Err(ConfigError::MissingOnboardingRoute);
            }
            if self.onboarding.success_route.trim().is_empty() {
                return Err(ConfigError::MissingOnboardingSuccessRoute);
            }
        }
        for (name, pattern) in &self.routes {
            if name.is_empty() || !pattern.starts_with('/') {
                return Err(ConfigError::InvalidRoute {
                    name: name.clone(),
                    pattern: pattern.clone(),
                });
            }
        }
        Ok(())
    }

    pub fn route_table(&self) -> RouteTable {
        RouteTable::new(&self.routes)
    }

    pub fn route_rules(&self) -> RouteRules {
        RouteRules::new(&self.route_rules, &self.login_route)
    }
}
