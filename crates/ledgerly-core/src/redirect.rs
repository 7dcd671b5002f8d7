//! Post-login and post-switch navigation.
//!
//! The server answers a successful authentication with an optional
//! `redirect` hint. The hint is either one of a few pseudo-slugs or the slug
//! of the company the user should land in.

use crate::config::AuthConfig;
use crate::routing::Location;

pub const ONBOARDING: &str = "onboarding";
pub const INVITATIONS: &str = "invitations";
pub const CREATE_COMPANY: &str = "create-company";

/// Hints that name a page rather than a company.
pub const PSEUDO_SLUGS: [&str; 3] = [ONBOARDING, INVITATIONS, CREATE_COMPANY];

pub fn is_pseudo_slug(slug: &str) -> bool {
    PSEUDO_SLUGS.contains(&slug)
}

/// Caller's override of the server hint.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RedirectTarget {
    /// Follow the server hint.
    #[default]
    Hint,
    /// Go here regardless of the hint.
    To(Location),
    /// Do not navigate at all.
    Suppress,
}

/// Where to go next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Navigation {
    Stay,
    /// Client-side navigation.
    Push(Location),
    /// Full page load.
    Reload(String),
}

/// What the resolver decided before any I/O.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedirectPlan {
    Navigate(Navigation),
    /// Load the company's grants and profile, then reload into its dashboard.
    EnterCompany(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Server requested onboarding but onboarding is disabled")]
pub struct OnboardingDisabled;

pub fn dashboard_path(slug: &str) -> String {
    format!("/{}/dashboard", slug)
}

/// Decide the navigation for a hint and caller target.
pub fn plan(
    hint: Option<&str>,
    target: &RedirectTarget,
    config: &AuthConfig,
) -> Result<RedirectPlan, OnboardingDisabled> {
    let hint = match target {
        RedirectTarget::Suppress => return Ok(RedirectPlan::Navigate(Navigation::Stay)),
        RedirectTarget::To(location) => {
            return Ok(RedirectPlan::Navigate(Navigation::Push(location.clone())))
        }
        RedirectTarget::Hint => hint.map(str::trim).unwrap_or_default(),
    };

    let push = |route: &str| Ok(RedirectPlan::Navigate(Navigation::Push(Location::parse(route))));
    match hint {
        "" => Ok(RedirectPlan::Navigate(Navigation::Stay)),
        ONBOARDING if config.onboarding.enabled => push(&config.onboarding.route),
        ONBOARDING => Err(OnboardingDisabled),
        INVITATIONS => push(&config.invitations_route),
        CREATE_COMPANY => push(&config.create_company_route),
        slug => Ok(RedirectPlan::EnterCompany(slug.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push(path: &str) -> Result<RedirectPlan, OnboardingDisabled> {
        Ok(RedirectPlan::Navigate(Navigation::Push(Location::parse(path))))
    }

    #[test]
    fn test_pseudo_slugs() {
        let config = AuthConfig::default();
        assert_eq!(plan(Some("onboarding"), &RedirectTarget::Hint, &config), push("/onboarding"));
        assert_eq!(plan(Some("invitations"), &RedirectTarget::Hint, &config), push("/invitations"));
        assert_eq!(
            plan(Some("create-company"), &RedirectTarget::Hint, &config),
            push("/company/create")
        );
    }

    #[test]
    fn test_empty_hint_stays() {
        let config = AuthConfig::default();
        let stay = Ok(RedirectPlan::Navigate(Navigation::Stay));
        assert_eq!(plan(None, &RedirectTarget::Hint, &config), stay);
        assert_eq!(plan(Some(""), &RedirectTarget::Hint, &config), stay);
    }

    #[test]
    fn test_company_slug_enters_company() {
        let config = AuthConfig::default();
        assert_eq!(
            plan(Some("acme"), &RedirectTarget::Hint, &config),
            Ok(RedirectPlan::EnterCompany("acme".to_string()))
        );
        assert_eq!(dashboard_path("acme"), "/acme/dashboard");
    }

    #[test]
    fn test_onboarding_disabled_is_an_error() {
        let mut config = AuthConfig::default();
        config.onboarding.enabled = false;
        assert_eq!(plan(Some("onboarding"), &RedirectTarget::Hint, &config), Err(OnboardingDisabled));
    }

    #[test]
    fn test_explicit_target_overrides_hint() {
        let config = AuthConfig::default();
        let target = RedirectTarget::To(Location::parse("/acme/sales/invoices"));
        assert_eq!(plan(Some("onboarding"), &target, &config), push("/acme/sales/invoices"));
        assert_eq!(
            plan(Some("acme"), &RedirectTarget::Suppress, &config),
            Ok(RedirectPlan::Navigate(Navigation::Stay))
        );
    }
}
