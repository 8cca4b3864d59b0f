use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tl_core::{ChannelPreview, NewUpload};
use tl_types::TeamLinkError;

use crate::auth::{require_group_member, CurrentMember};
use crate::error::ApiResult;
use crate::state::AppState;

pub async fn preview(
    State(state): State<AppState>,
    CurrentMember(member): CurrentMember,
    Path(group_id): Path<String>,
) -> ApiResult<Json<ChannelPreview>> {
    require_group_member(&state, &member, &group_id).await?;
    let preview = state.services.messages.preview(&group_id).await?;
    Ok(Json(preview))
}

#[derive(Debug, Deserialize)]
pub struct PostMessageRequest {
    pub text: String,
}

pub async fn post_message(
    State(state): State<AppState>,
    CurrentMember(member): CurrentMember,
    Path(group_id): Path<String>,
    Json(req): Json<PostMessageRequest>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let posted = state
        .services
        .messages
        .post(&member, &group_id, &req.text)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "channel_id": posted.channel, "ts": posted.ts })),
    ))
}

pub async fn delete_message(
    State(state): State<AppState>,
    CurrentMember(member): CurrentMember,
    Path((group_id, ts)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    state
        .services
        .messages
        .delete(&member, &group_id, &ts)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Multipart upload: a `file` part plus an optional `comment` text part.
pub async fn upload_file(
    State(state): State<AppState>,
    CurrentMember(member): CurrentMember,
    Path(group_id): Path<String>,
    mut multipart: Multipart,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let mut file: Option<(String, Vec<u8>)> = None;
    let mut comment = None;

    while let Some(field) = multipart.next_field().await.map_err(bad_multipart)? {
        match field.name() {
            Some("file") => {
                let filename = field.file_name().unwrap_or("upload").to_string();
                let bytes = field.bytes().await.map_err(bad_multipart)?;
                file = Some((filename, bytes.to_vec()));
            }
            Some("comment") => {
                comment = Some(field.text().await.map_err(bad_multipart)?);
            }
            _ => {}
        }
    }

    let (filename, bytes) =
        file.ok_or_else(|| TeamLinkError::Validation("missing file part".to_string()))?;
    let file_id = state
        .services
        .messages
        .upload(
            &member,
            &group_id,
            NewUpload {
                filename,
                bytes,
                comment,
            },
        )
        .await?;
    Ok((StatusCode::CREATED, Json(json!({ "file_id": file_id }))))
}

/// Refetch the group's channel and return the new preview.
pub async fn refresh_cache(
    State(state): State<AppState>,
    CurrentMember(member): CurrentMember,
    Path(group_id): Path<String>,
) -> ApiResult<Json<ChannelPreview>> {
    require_group_member(&state, &member, &group_id).await?;
    let preview = state.services.messages.refresh(&group_id).await?;
    Ok(Json(preview))
}

fn bad_multipart(e: axum::extract::multipart::MultipartError) -> TeamLinkError {
    TeamLinkError::Validation(format!("invalid multipart body: {e}"))
}
