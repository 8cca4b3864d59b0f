use axum::extract::{FromRequestParts, Request, State};
use axum::http::request::Parts;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tl_db::{GroupRepository, MemberRepository};
use tl_types::{Member, TeamLinkError};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

pub const MEMBER_HEADER: &str = "x-member-id";

/// Reject requests without the configured gateway token.
///
/// With no token configured every request passes; the service is then
/// expected to sit behind a trusted proxy.
pub async fn gateway_auth(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let Some(expected) = state.gateway_token.as_deref() else {
        return next.run(request).await;
    };

    let presented = request
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    if presented == Some(expected) {
        next.run(request).await
    } else {
        tracing::debug!(path = %request.uri().path(), "Gateway token missing or wrong");
        ApiError(TeamLinkError::Unauthenticated).into_response()
    }
}

/// The member making the request, named by the `x-member-id` header the
/// session layer in front of this service sets.
#[derive(Debug, Clone)]
pub struct CurrentMember(pub Member);

impl FromRequestParts<AppState> for CurrentMember {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> ApiResult<Self> {
        let member_id = parts
            .headers
            .get(MEMBER_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or(ApiError(TeamLinkError::Unauthenticated))?;

        let member = MemberRepository::new(&state.services.db)
            .get_member(member_id)
            .await?
            .ok_or(ApiError(TeamLinkError::Unauthenticated))?;
        Ok(Self(member))
    }
}

pub fn require_admin(member: &Member) -> ApiResult<()> {
    if member.is_admin {
        Ok(())
    } else {
        Err(TeamLinkError::Permission("admin access required".to_string()).into())
    }
}

/// Admins pass; everyone else must belong to the group.
pub async fn require_group_member(state: &AppState, member: &Member, group_id: &str) -> ApiResult<()> {
    let groups = GroupRepository::new(&state.services.db);
    if groups.get_group(group_id).await?.is_none() {
        return Err(TeamLinkError::NotFound(format!("group {group_id}")).into());
    }
    if member.is_admin || groups.is_member(group_id, &member.id).await? {
        Ok(())
    } else {
        Err(TeamLinkError::Permission("not a member of this group".to_string()).into())
    }
}
