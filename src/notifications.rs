// src/notifications.rs
//
// Read-state endpoints over the ledger: which rooms hold unread
// messages, whether new join requests are pending, and the explicit
// mark-as-read action.

use actix_web::{web, HttpRequest, HttpResponse};
use serde::Serialize;

use crate::app_state::AppState;
use crate::chat_server::mark_read_checked;
use crate::error::AppError;
use crate::rooms;
use crate::users::current_user;

#[derive(Debug, Serialize)]
pub struct NotificationSummary {
    pub unread_rooms: Vec<String>,
    pub has_new_join_requests: bool,
}

/// GET /notifications — unread indicators for the caller's rooms.
pub async fn get_notifications(
    req: HttpRequest,
    data: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let user_id = current_user(&req)?;
    let listed = rooms::list_rooms_for_user(data.store.as_ref(), &user_id).await?;
    let unread_rooms = listed
        .into_iter()
        .filter(|room| data.ledger.has_unread(&room.id, &user_id))
        .map(|room| room.id)
        .collect();
    Ok(HttpResponse::Ok().json(NotificationSummary {
        unread_rooms,
        has_new_join_requests: data.ledger.has_new_join_requests(&user_id),
    }))
}

/// POST /notifications/{room_id}/read — marks the room read for the
/// caller. Membership is checked so a read mark cannot probe for rooms.
pub async fn mark_room_read(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let user_id = current_user(&req)?;
    let room_id = path.into_inner();
    mark_read_checked(data.store.as_ref(), data.ledger.as_ref(), &room_id, &user_id).await?;
    Ok(HttpResponse::Ok().body("Marked read"))
}
