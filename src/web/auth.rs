//! Caller identity and tenant scope.
//!
//! The upstream gateway authenticates callers and forwards their identity
//! in headers. Every monitoring handler takes a [`TenantScope`], which
//! checks organization membership and workspace ownership before dispatch.

use super::AppState;
use crate::error::MonitoringError;

use axum::extract::{FromRequestParts, Path};
use axum::http::request::Parts;
use std::collections::HashMap;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const ORG_ROLES_HEADER: &str = "x-organization-roles";

/// Role of a user within one organization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Admin,
    Member,
}

impl Role {
    fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "admin" => Some(Self::Admin),
            "member" => Some(Self::Member),
            _ => None,
        }
    }
}

/// Parse `org-1:admin,org-2:member`. Malformed entries are skipped.
pub fn parse_memberships(header: &str) -> HashMap<String, Role> {
    header
        .split(',')
        .filter_map(|entry| {
            let (org, role) = entry.trim().rsplit_once(':')?;
            let org = org.trim();
            if org.is_empty() {
                return None;
            }
            Some((org.to_string(), Role::parse(role)?))
        })
        .collect()
}

/// The organization (and optionally workspace) a request acts within.
#[derive(Debug, Clone)]
pub struct TenantScope {
    pub user_id: String,
    pub organization_id: String,
    pub workspace_id: Option<String>,
    pub role: Role,
}

impl TenantScope {
    /// Mutations of definitions, rules and targets need an admin.
    pub fn require_admin(&self) -> Result<(), MonitoringError> {
        match self.role {
            Role::Admin => Ok(()),
            Role::Member => Err(MonitoringError::Forbidden("insufficient role".to_string())),
        }
    }
}

fn header<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

impl FromRequestParts<AppState> for TenantScope {
    type Rejection = MonitoringError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let user_id = header(parts, USER_ID_HEADER)
            .ok_or_else(|| MonitoringError::Unauthorized("user not found in context".to_string()))?
            .to_string();

        let Path(params) = Path::<HashMap<String, String>>::from_request_parts(parts, state)
            .await
            .map_err(|e| MonitoringError::validation(e.body_text()))?;
        let organization_id = params
            .get("org_id")
            .cloned()
            .ok_or_else(|| MonitoringError::Internal("route has no organization".to_string()))?;

        let memberships = parse_memberships(header(parts, ORG_ROLES_HEADER).unwrap_or_default());
        let role = *memberships.get(&organization_id).ok_or_else(|| {
            MonitoringError::Forbidden("not authorized to access this organization".to_string())
        })?;

        let workspace_id = match params.get("ws_id") {
            Some(ws_id) => {
                state.store.get_workspace(&organization_id, ws_id)?;
                Some(ws_id.clone())
            }
            None => None,
        };

        Ok(Self {
            user_id,
            organization_id,
            workspace_id,
            role,
        })
    }
}
