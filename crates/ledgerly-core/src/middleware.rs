//! Per-navigation authorization.
//!
//! The effective rule for the target path comes from the route-rule
//! layers. Checks run in a fixed order and the first one that decides wins:
//!
//! 1. `redirect_if_logged_in` for authenticated users
//! 2. unprotected routes are allowed
//! 3. anonymous users go to the login route with `next`
//! 4. onboarding is enforced (and left once done)
//! 5. a declared role that the user holds allows
//! 6. a declared permission that the user holds allows
//! 7. routes declaring neither allow any authenticated user
//! 8. everything else is denied

use std::collections::BTreeSet;

use tracing::debug;

use crate::config::{AuthConfig, OnboardingConfig};
use crate::models::PermissionMap;
use crate::permissions::PermissionEvaluator;
use crate::routing::{path_has_prefix, Location, RouteRules};

/// Query parameter carrying the originally requested path to the login page.
pub const NEXT_PARAM: &str = "next";

/// Status used when a navigation is refused outright.
pub const FORBIDDEN: u16 = 403;

/// What the middleware knows about the current user.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthState {
    pub authenticated: bool,
    pub onboarded: bool,
    pub roles: BTreeSet<String>,
    pub permissions: PermissionMap,
    pub full_access_roles: BTreeSet<String>,
}

impl AuthState {
    fn evaluator(&self) -> PermissionEvaluator<'_> {
        PermissionEvaluator::new(&self.roles, &self.permissions, &self.full_access_roles)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Redirect(Location),
    Abort(u16),
}

pub struct AuthorizationMiddleware {
    rules: RouteRules,
    onboarding: OnboardingConfig,
}

impl AuthorizationMiddleware {
    pub fn new(config: &AuthConfig) -> Self {
        Self {
            rules: config.route_rules(),
            onboarding: config.onboarding.clone(),
        }
    }

    pub fn check(&self, state: &AuthState, to: &Location, from: Option<&Location>) -> Decision {
        let rule = self.rules.resolve(&to.path);

        if let Some(target) = rule.redirect_if_logged_in.as_deref() {
            if state.authenticated {
                return Decision::Redirect(Location::parse(target));
            }
        }

        if !rule.protected {
            return Decision::Allow;
        }

        if !state.authenticated {
            debug!(path = %to.path, "Anonymous navigation to protected route");
            return Decision::Redirect(
                Location::parse(&rule.login_route).with_query(NEXT_PARAM, &to.to_string()),
            );
        }

        if self.onboarding.enabled {
            let on_onboarding = path_has_prefix(&to.path, &self.onboarding.route);
            if !state.onboarded && !on_onboarding {
                return Decision::Redirect(Location::parse(&self.onboarding.route));
            }
            if state.onboarded && on_onboarding {
                return Decision::Redirect(Location::parse(&self.onboarding.success_route));
            }
        }

        let evaluator = state.evaluator();
        if !rule.roles.is_empty() && evaluator.has_any_role(&rule.roles) {
            return Decision::Allow;
        }
        if !rule.permissions.is_empty() && evaluator.has_any_permission(&rule.permissions) {
            return Decision::Allow;
        }
        if rule.roles.is_empty() && rule.permissions.is_empty() {
            return Decision::Allow;
        }

        debug!(path = %to.path, "Navigation not allowed");
        match from {
            Some(previous)
                if previous.path != to.path && !path_has_prefix(&previous.path, &rule.login_route) =>
            {
                Decision::Redirect(previous.clone())
            }
            _ => match rule.redirect_if_not_allowed {
                Some(target) => Decision::Redirect(Location::parse(&target)),
                None => Decision::Abort(FORBIDDEN),
            },
        }
    }
}
