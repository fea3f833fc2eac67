// src/chat.rs
//
// HTTP surface for chat: room listing, DM creation, room resolution,
// the message feed, and posting. Posting goes through the chat server
// actor so connected sockets get the push on the same code path.

use actix_web::{web, HttpRequest, HttpResponse};
use serde::{Deserialize, Serialize};

use crate::app_state::AppState;
use crate::chat_server::{MessageResponse, SendMessage};
use crate::error::AppError;
use crate::models::{ChatRoom, Project, User, USERS};
use crate::rooms;
use crate::store;
use crate::users::{current_user, ProfileResponse};

#[derive(Debug, Serialize)]
pub struct RoomListEntry {
    #[serde(flatten)]
    pub room: ChatRoom,
    pub title: String,
    pub has_unread: bool,
}

#[derive(Debug, Serialize)]
pub struct RoomResponse {
    pub room: ChatRoom,
    pub project: Option<Project>,
    pub title: String,
    pub members: Vec<ProfileResponse>,
    pub can_view_messages: bool,
}

#[derive(Debug, Deserialize)]
pub struct CreateDmRequest {
    pub other_user_id: String,
}

#[derive(Debug, Deserialize)]
pub struct PostMessageRequest {
    pub text: String,
}

/// GET /chats — every room the caller belongs to, with display title and
/// unread marker.
pub async fn get_user_chats(
    req: HttpRequest,
    data: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let user_id = current_user(&req)?;
    let listed = rooms::list_rooms_for_user(data.store.as_ref(), &user_id).await?;
    let mut entries = Vec::with_capacity(listed.len());
    for room in listed {
        let title = if room.is_dm {
            rooms::dm_title(&room, &user_id).unwrap_or_default()
        } else {
            room.name.clone()
        };
        let has_unread = data.ledger.has_unread(&room.id, &user_id);
        entries.push(RoomListEntry {
            room,
            title,
            has_unread,
        });
    }
    Ok(HttpResponse::Ok().json(entries))
}

/// POST /chats/dm — find or create the DM room with another user.
pub async fn create_dm(
    req: HttpRequest,
    data: web::Data<AppState>,
    payload: web::Json<CreateDmRequest>,
) -> Result<HttpResponse, AppError> {
    let user_id = current_user(&req)?;
    let me: User = store::get_as(data.store.as_ref(), USERS, &user_id)
        .await
        .map_err(|err| match err {
            AppError::NotFound(_) => AppError::denied("unknown user"),
            other => other,
        })?;
    let other: User = store::get_as(data.store.as_ref(), USERS, &payload.other_user_id)
        .await
        .map_err(|err| match err {
            AppError::NotFound(_) => AppError::not_found("user"),
            other => other,
        })?;
    let room = rooms::ensure_dm_room(data.store.as_ref(), &me, &other).await?;
    Ok(HttpResponse::Ok().json(room))
}

/// GET /chats/{room_id} — room header. Resolves for any authenticated
/// user; the feed gate is reported in `can_view_messages`.
pub async fn get_room(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let user_id = current_user(&req)?;
    let view = rooms::resolve_room(data.store.as_ref(), &path.into_inner(), &user_id).await?;
    Ok(HttpResponse::Ok().json(RoomResponse {
        room: view.room,
        project: view.project,
        title: view.title,
        members: view
            .members
            .into_iter()
            .map(ProfileResponse::from)
            .collect(),
        can_view_messages: view.can_view_messages,
    }))
}

/// GET /chats/{room_id}/messages — full feed, oldest first. Fetching the
/// feed counts as reading the room.
pub async fn get_messages(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let user_id = current_user(&req)?;
    let room_id = path.into_inner();
    let feed = rooms::history(data.store.as_ref(), &room_id, &user_id).await?;
    data.ledger.mark_read(&room_id, &user_id, chrono::Utc::now());
    let messages: Vec<MessageResponse> = feed.into_iter().map(MessageResponse::from).collect();
    Ok(HttpResponse::Ok().json(messages))
}

/// POST /chats/{room_id}/messages — persist and fan out to live sockets.
pub async fn post_message(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<PostMessageRequest>,
) -> Result<HttpResponse, AppError> {
    let user_id = current_user(&req)?;
    let response = data
        .chat_server
        .send(SendMessage {
            user_id,
            room_id: path.into_inner(),
            text: payload.into_inner().text,
        })
        .await
        .map_err(|err| AppError::Internal(format!("chat server unavailable: {}", err)))??;
    Ok(HttpResponse::Ok().json(response))
}
