use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use tl_types::Invitation;

use crate::auth::CurrentMember;
use crate::error::ApiResult;
use crate::state::AppState;

pub async fn request(
    State(state): State<AppState>,
    CurrentMember(member): CurrentMember,
) -> ApiResult<(StatusCode, Json<Invitation>)> {
    let invitation = state.services.invitations.request(&member.id).await?;
    Ok((StatusCode::CREATED, Json(invitation)))
}

pub async fn my_status(
    State(state): State<AppState>,
    CurrentMember(member): CurrentMember,
) -> ApiResult<Json<Invitation>> {
    Ok(Json(state.services.invitations.status(&member.id).await?))
}

pub async fn list_pending(
    State(state): State<AppState>,
    CurrentMember(member): CurrentMember,
) -> ApiResult<Json<Vec<Invitation>>> {
    Ok(Json(state.services.invitations.list_pending(&member).await?))
}

pub async fn complete(
    State(state): State<AppState>,
    CurrentMember(admin): CurrentMember,
    Path(member_id): Path<String>,
) -> ApiResult<Json<Invitation>> {
    let invitation = state
        .services
        .invitations
        .complete(&admin, &member_id)
        .await?;
    Ok(Json(invitation))
}
