//! Company-switch route guard.
//!
//! Runs before every navigation and keeps the active company in step with
//! the company segment of the URL:
//!
//! - unknown paths are retried under the current company, so bookmarked
//!   links without the company segment still resolve
//! - a fresh navigation into another company's URL switches company and
//!   lands on the same named route there
//! - when the target company does not exist (404) the guard switches back
//!   to the previous company once

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::api::{status_of, Transport};
use crate::auth::{AuthService, SessionRepository};
use crate::config::AuthConfig;
use crate::redirect::is_pseudo_slug;
use crate::routing::table::COMPANY_PARAM;
use crate::routing::{path_has_prefix, Location, ResolvedRoute, RouteTable};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardOutcome {
    Continue,
    Redirect(Location),
    NotFound,
}

pub struct CompanySwitchGuard {
    routes: RouteTable,
    public_paths: Vec<String>,
}

impl CompanySwitchGuard {
    pub fn new(config: &AuthConfig) -> Self {
        Self {
            routes: config.route_table(),
            public_paths: config.public_paths.clone(),
        }
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    fn is_public(&self, path: &str) -> bool {
        self.public_paths.iter().any(|p| path_has_prefix(path, p))
    }

    pub async fn before_each<T, R>(
        &self,
        auth: &mut AuthService<T, R>,
        to: &Location,
        from: Option<&Location>,
    ) -> Result<GuardOutcome>
    where
        T: Transport,
        R: SessionRepository,
    {
        if self.is_public(&to.path) {
            return Ok(GuardOutcome::Continue);
        }

        let current = auth.current_company_slug();

        let Some(resolved) = self.routes.resolve(&to.path) else {
            return Ok(self.resolve_missing(to, current.as_deref()));
        };

        let Some(target) = resolved.company() else {
            return Ok(GuardOutcome::Continue);
        };
        if current.as_deref() == Some(target) || !auth.is_authenticated() {
            return Ok(GuardOutcome::Continue);
        }

        // A previous route still showing another company means we are mid
        // transition, not on a fresh navigation.
        let from_company = from
            .and_then(|f| self.routes.resolve(&f.path))
            .and_then(|r| r.company().map(str::to_string));
        if from_company.is_some() && from_company != current {
            debug!(?from_company, ?current, "Skipping switch during in-app transition");
            return Ok(GuardOutcome::Continue);
        }

        let target = target.to_string();
        match auth.switch_company(&target).await {
            Ok(_) => Ok(self.same_route_in(&resolved, &target, to)),
            Err(e) if status_of(&e) == Some(404) && !is_pseudo_slug(&target) => {
                let Some(previous) = current else {
                    return Err(e);
                };
                warn!(company = %target, back_to = %previous, "Company not found, switching back");
                // One corrective attempt only; a failing switch-back is returned.
                auth.switch_company(&previous)
                    .await
                    .with_context(|| format!("Failed to switch back to company {}", previous))?;
                Ok(self.same_route_in(&resolved, &previous, to))
            }
            Err(e) => Err(e),
        }
    }

    /// Retry an unmatched path with the current company prepended.
    fn resolve_missing(&self, to: &Location, current: Option<&str>) -> GuardOutcome {
        let Some(company) = current else {
            return GuardOutcome::NotFound;
        };
        let candidate = format!("/{}{}", company, to.path);
        if self.routes.resolve(&candidate).is_some() {
            info!(from = %to.path, to = %candidate, "Resolved path under current company");
            GuardOutcome::Redirect(Location {
                path: candidate,
                query: to.query.clone(),
            })
        } else {
            GuardOutcome::NotFound
        }
    }

    fn same_route_in(&self, resolved: &ResolvedRoute, company: &str, to: &Location) -> GuardOutcome {
        let mut params = resolved.params.clone();
        params.insert(COMPANY_PARAM.to_string(), company.to_string());
        match self.routes.build(&resolved.name, &params) {
            Some(path) => GuardOutcome::Redirect(Location {
                path,
                query: to.query.clone(),
            }),
            None => GuardOutcome::Continue,
        }
    }
}
