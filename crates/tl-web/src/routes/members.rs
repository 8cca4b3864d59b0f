use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use tl_core::ChannelPreview;
use tl_db::GroupRepository;
use tl_types::{Member, TeamLinkError};

use crate::auth::CurrentMember;
use crate::error::ApiResult;
use crate::state::AppState;

pub async fn me(CurrentMember(member): CurrentMember) -> Json<Member> {
    Json(member)
}

/// Result of the OAuth exchange performed by the session layer.
#[derive(Debug, Deserialize)]
pub struct LinkIdentityRequest {
    pub external_user_id: String,
    pub access_token: String,
}

pub async fn link_identity(
    State(state): State<AppState>,
    CurrentMember(member): CurrentMember,
    Json(req): Json<LinkIdentityRequest>,
) -> ApiResult<Json<Member>> {
    let member = state
        .services
        .identity
        .link(&member.id, &req.external_user_id, &req.access_token)
        .await?;
    Ok(Json(member))
}

pub async fn unlink_identity(
    State(state): State<AppState>,
    CurrentMember(member): CurrentMember,
) -> ApiResult<StatusCode> {
    if state.services.identity.unlink(&member.id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(TeamLinkError::NotFound("no linked account".to_string()).into())
    }
}

/// Previews for every group the caller belongs to.
pub async fn my_previews(
    State(state): State<AppState>,
    CurrentMember(member): CurrentMember,
) -> ApiResult<Json<Vec<ChannelPreview>>> {
    let group_ids: Vec<String> = GroupRepository::new(&state.services.db)
        .groups_for_member(&member.id)
        .await?
        .into_iter()
        .map(|g| g.id)
        .collect();
    let previews = state.services.messages.previews(&group_ids).await?;
    Ok(Json(previews))
}
