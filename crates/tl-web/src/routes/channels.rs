use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tl_core::{CreateChannelInput, CreatedChannel, SyncReport};
use tl_db::GroupRepository;
use tl_types::TeamLinkError;

use crate::auth::{require_admin, CurrentMember};
use crate::error::ApiResult;
use crate::state::AppState;

/// Body of `POST /api/channels`. Older clients send `name`.
#[derive(Debug, Deserialize)]
pub struct CreateChannelRequest {
    pub group_id: String,
    #[serde(default)]
    pub group_name: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

impl TryFrom<CreateChannelRequest> for CreateChannelInput {
    type Error = TeamLinkError;

    fn try_from(req: CreateChannelRequest) -> Result<Self, Self::Error> {
        let group_id = req.group_id.trim().to_string();
        if group_id.is_empty() {
            return Err(TeamLinkError::Validation("group_id is required".to_string()));
        }
        let group_name = req
            .group_name
            .or(req.name)
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .ok_or_else(|| TeamLinkError::Validation("group_name is required".to_string()))?;
        Ok(Self {
            group_id,
            group_name,
        })
    }
}

pub async fn create_channel(
    State(state): State<AppState>,
    CurrentMember(member): CurrentMember,
    Json(req): Json<CreateChannelRequest>,
) -> ApiResult<(StatusCode, Json<CreatedChannel>)> {
    require_admin(&member)?;
    let input = CreateChannelInput::try_from(req)?;
    let created = state
        .services
        .lifecycle
        .create_for_group(&member.id, &input)
        .await?;
    Ok((StatusCode::CREATED, Json(created)))
}

#[derive(Debug, Deserialize)]
pub struct ArchiveQuery {
    #[serde(default)]
    pub group_id: Option<String>,
}

pub async fn archive_channel(
    State(state): State<AppState>,
    CurrentMember(member): CurrentMember,
    Path(channel_id): Path<String>,
    Query(query): Query<ArchiveQuery>,
) -> ApiResult<Json<Value>> {
    require_admin(&member)?;
    let lifecycle = &state.services.lifecycle;
    match query.group_id.as_deref() {
        Some(group_id) => lifecycle.archive(&member.id, &channel_id, group_id).await?,
        None => lifecycle.archive_linked(&member.id, &channel_id).await?,
    }
    Ok(Json(json!({ "channel_id": channel_id, "archived": true })))
}

/// Re-run membership sync for a group's linked channel.
pub async fn sync_group(
    State(state): State<AppState>,
    CurrentMember(member): CurrentMember,
    Path(group_id): Path<String>,
) -> ApiResult<Json<SyncReport>> {
    require_admin(&member)?;
    let group = GroupRepository::new(&state.services.db)
        .get_group(&group_id)
        .await?
        .ok_or_else(|| TeamLinkError::NotFound(format!("group {group_id}")))?;
    let channel_id = group
        .channel_id
        .ok_or_else(|| TeamLinkError::NotFound("group has no linked channel".to_string()))?;
    let report = state
        .services
        .sync
        .sync_group_to_channel(&member.id, &group_id, &channel_id)
        .await?;
    Ok(Json(report))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(group_name: Option<&str>, name: Option<&str>) -> CreateChannelRequest {
        CreateChannelRequest {
            group_id: "g1".to_string(),
            group_name: group_name.map(str::to_string),
            name: name.map(str::to_string),
        }
    }

    #[test]
    fn group_name_wins_over_legacy_name() {
        let input = CreateChannelInput::try_from(request(Some("Team X"), Some("old"))).unwrap();
        assert_eq!(input.group_name, "Team X");
    }

    #[test]
    fn legacy_name_is_accepted() {
        let input = CreateChannelInput::try_from(request(None, Some(" Team Y "))).unwrap();
        assert_eq!(input.group_name, "Team Y");
    }

    #[test]
    fn missing_name_is_rejected() {
        let err = CreateChannelInput::try_from(request(None, Some("  "))).unwrap_err();
        assert!(matches!(err, TeamLinkError::Validation(_)));
    }
}
