// src/rooms.rs
//
// Chat-room resolution. A chat id names either a direct-message room or
// a project room; DM rooms are probed first. DM ids are deterministic
// (sorted participant pair), which is what makes DM creation idempotent.

use std::collections::HashMap;

use chrono::Utc;
use log::warn;
use mongodb::bson::Bson;

use crate::error::AppError;
use crate::membership::load_project;
use crate::models::{
    ChatRoom, MemberDetail, Message, Project, User, DM_ROOMS, MESSAGES, PROJECT_ROOMS, USERS,
};
use crate::store::{self, DataStore, Order, Predicate};

/// Same id regardless of which participant initiates contact.
pub fn dm_room_id(a: &str, b: &str) -> String {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    format!("{}_{}", lo, hi)
}

/// What a viewer gets back for a chat id: the room, the owning project
/// (absent for DMs), a display title, the member roster, and whether the
/// viewer may read the feed. Non-members of a project room still see the
/// header, just not the messages.
#[derive(Debug)]
pub struct RoomView {
    pub room: ChatRoom,
    pub project: Option<Project>,
    pub title: String,
    pub members: Vec<User>,
    pub can_view_messages: bool,
}

/// Finds or creates the DM room for the pair. Racing creations collapse
/// onto the deterministic id: a conflicting create means the other side
/// won, so the existing room is returned.
pub async fn ensure_dm_room(
    store: &dyn DataStore,
    me: &User,
    other: &User,
) -> Result<ChatRoom, AppError> {
    if me.id == other.id {
        return Err(AppError::Validation("cannot start a chat with yourself".into()));
    }
    let id = dm_room_id(&me.id, &other.id);
    match store.get(DM_ROOMS, &id).await {
        Ok(doc) => return store::from_doc(doc),
        Err(AppError::NotFound(_)) => {}
        Err(err) => return Err(err),
    }

    let mut member_details = HashMap::new();
    for user in [me, other] {
        member_details.insert(
            user.id.clone(),
            MemberDetail {
                display_name: user.display_name.clone(),
                photo_url: user.photo_url.clone(),
            },
        );
    }
    let room = ChatRoom {
        id: id.clone(),
        name: String::new(),
        image_url: None,
        members: vec![me.id.clone(), other.id.clone()],
        member_details: Some(member_details),
        is_private: true,
        is_dm: true,
        created_at: Utc::now(),
    };
    match store.create(DM_ROOMS, &id, store::to_doc(&room)?).await {
        Ok(()) => Ok(room),
        Err(AppError::Conflict(_)) => store::from_doc(store.get(DM_ROOMS, &id).await?),
        Err(err) => Err(err),
    }
}

/// Probes the DM collection first, then project rooms.
pub async fn find_room(store: &dyn DataStore, room_id: &str) -> Result<ChatRoom, AppError> {
    match store.get(DM_ROOMS, room_id).await {
        Ok(doc) => return store::from_doc(doc),
        Err(AppError::NotFound(_)) => {}
        Err(err) => return Err(err),
    }
    match store.get(PROJECT_ROOMS, room_id).await {
        Ok(doc) => store::from_doc(doc),
        Err(AppError::NotFound(_)) => Err(AppError::not_found("room")),
        Err(err) => Err(err),
    }
}

/// The DM header title for a given viewer: the other participant's
/// snapshotted display name.
pub fn dm_title(room: &ChatRoom, viewer: &str) -> Option<String> {
    let other = room.members.iter().find(|m| *m != viewer)?;
    room.member_details
        .as_ref()
        .and_then(|details| details.get(other))
        .map(|detail| detail.display_name.clone())
        .or_else(|| Some(other.clone()))
}

pub async fn resolve_room(
    store: &dyn DataStore,
    room_id: &str,
    viewer: &str,
) -> Result<RoomView, AppError> {
    let room = find_room(store, room_id).await?;

    if room.is_dm {
        let title = dm_title(&room, viewer).unwrap_or_default();
        let members = fetch_users(store, &room.members).await?;
        let can_view = room.members.iter().any(|m| m == viewer);
        return Ok(RoomView {
            room,
            project: None,
            title,
            members,
            can_view_messages: can_view,
        });
    }

    let project = load_project(store, room_id).await?;
    let mut roster = project.members.clone();
    for admin in &project.admins {
        if !roster.contains(admin) {
            roster.push(admin.clone());
        }
    }
    if !roster.contains(&project.owner) {
        roster.push(project.owner.clone());
    }
    let members = fetch_users(store, &roster).await?;
    let can_view = project.is_member(viewer);
    Ok(RoomView {
        room,
        title: project.title.clone(),
        project: Some(project),
        members,
        can_view_messages: can_view,
    })
}

/// Every room the user participates in, DMs first.
pub async fn list_rooms_for_user(
    store: &dyn DataStore,
    user_id: &str,
) -> Result<Vec<ChatRoom>, AppError> {
    let member_of = [Predicate::Eq("members", Bson::String(user_id.to_string()))];
    let mut rooms: Vec<ChatRoom> =
        store::find_as(store, DM_ROOMS, &member_of, Some(Order::Desc("created_at"))).await?;
    let project_rooms: Vec<ChatRoom> =
        store::find_as(store, PROJECT_ROOMS, &member_of, Some(Order::Desc("created_at"))).await?;
    rooms.extend(project_rooms);
    Ok(rooms)
}

/// Full feed for a room, ascending by server timestamp. Membership is
/// checked against the owning project for project rooms and against the
/// participant list for DMs.
pub async fn history(
    store: &dyn DataStore,
    room_id: &str,
    viewer: &str,
) -> Result<Vec<Message>, AppError> {
    require_feed_access(store, room_id, viewer).await?;
    store::find_as(
        store,
        MESSAGES,
        &[Predicate::Eq("room_id", Bson::String(room_id.to_string()))],
        Some(Order::Asc("created_at")),
    )
    .await
}

pub async fn require_feed_access(
    store: &dyn DataStore,
    room_id: &str,
    viewer: &str,
) -> Result<ChatRoom, AppError> {
    let room = find_room(store, room_id).await?;
    let allowed = if room.is_dm {
        room.members.iter().any(|m| m == viewer)
    } else {
        load_project(store, room_id).await?.is_member(viewer)
    };
    if !allowed {
        return Err(AppError::denied("not a member of this room"));
    }
    Ok(room)
}

// Missing user documents are skipped: a deleted account must not break
// room resolution for everyone else.
async fn fetch_users(store: &dyn DataStore, ids: &[String]) -> Result<Vec<User>, AppError> {
    let mut users = Vec::with_capacity(ids.len());
    for id in ids {
        match store.get(USERS, id).await {
            Ok(doc) => users.push(store::from_doc(doc)?),
            Err(AppError::NotFound(_)) => {
                warn!("room member {} has no user record", id);
            }
            Err(err) => return Err(err),
        }
    }
    Ok(users)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::membership::create_project;
    use crate::models::Visibility;
    use crate::store::memory::MemoryStore;
    use crate::testutil::{project_draft, user};
    use mongodb::bson::DateTime as BsonDateTime;

    async fn seed_user(store: &MemoryStore, u: &User) {
        store
            .create(USERS, &u.id, store::to_doc(u).unwrap())
            .await
            .unwrap();
    }

    #[test]
    fn dm_id_ignores_initiator_order() {
        assert_eq!(dm_room_id("alice", "bob"), dm_room_id("bob", "alice"));
        assert_eq!(dm_room_id("alice", "bob"), "alice_bob");
    }

    #[tokio::test]
    async fn dm_creation_is_idempotent() {
        let store = MemoryStore::new();
        let alice = user("alice");
        let bob = user("bob");
        seed_user(&store, &alice).await;
        seed_user(&store, &bob).await;

        let first = ensure_dm_room(&store, &alice, &bob).await.unwrap();
        let second = ensure_dm_room(&store, &bob, &alice).await.unwrap();
        assert_eq!(first.id, second.id);

        let rooms = store.find(DM_ROOMS, &[], None).await.unwrap();
        assert_eq!(rooms.len(), 1);
    }

    #[tokio::test]
    async fn dm_resolves_with_other_participants_name() {
        let store = MemoryStore::new();
        let alice = user("alice");
        let bob = user("bob");
        seed_user(&store, &alice).await;
        seed_user(&store, &bob).await;
        let room = ensure_dm_room(&store, &alice, &bob).await.unwrap();

        let view = resolve_room(&store, &room.id, "alice").await.unwrap();
        assert_eq!(view.title, bob.display_name);
        assert!(view.project.is_none());
        assert!(view.can_view_messages);
        assert_eq!(view.members.len(), 2);

        let view = resolve_room(&store, &room.id, "bob").await.unwrap();
        assert_eq!(view.title, alice.display_name);
    }

    #[tokio::test]
    async fn project_room_header_without_feed_for_non_members() {
        let store = MemoryStore::new();
        let alice = user("alice");
        seed_user(&store, &alice).await;
        seed_user(&store, &user("mallory")).await;
        let project = create_project(&store, &alice, project_draft("X", Visibility::Public))
            .await
            .unwrap();

        let view = resolve_room(&store, &project.id, "mallory").await.unwrap();
        assert_eq!(view.title, "X");
        assert!(!view.can_view_messages);

        let err = history(&store, &project.id, "mallory").await.unwrap_err();
        assert!(matches!(err, AppError::PermissionDenied(_)));
    }

    #[tokio::test]
    async fn roster_deduplicates_members_admins_and_owner() {
        let store = MemoryStore::new();
        let alice = user("alice");
        let bob = user("bob");
        seed_user(&store, &alice).await;
        seed_user(&store, &bob).await;
        let project = create_project(&store, &alice, project_draft("X", Visibility::Public))
            .await
            .unwrap();
        // bob is member and admin; alice is owner, member, and admin.
        store
            .batch(vec![
                crate::store::WriteOp::SetUnion {
                    collection: crate::models::PROJECTS,
                    id: project.id.clone(),
                    field: "members",
                    value: Bson::String("bob".into()),
                },
                crate::store::WriteOp::SetUnion {
                    collection: crate::models::PROJECTS,
                    id: project.id.clone(),
                    field: "admins",
                    value: Bson::String("bob".into()),
                },
            ])
            .await
            .unwrap();

        let view = resolve_room(&store, &project.id, "alice").await.unwrap();
        let mut ids: Vec<&str> = view.members.iter().map(|u| u.id.as_str()).collect();
        ids.sort();
        assert_eq!(ids, vec!["alice", "bob"]);
    }

    #[tokio::test]
    async fn unknown_room_is_not_found() {
        let store = MemoryStore::new();
        let err = resolve_room(&store, "nope", "alice").await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn history_is_ascending_by_server_timestamp() {
        let store = MemoryStore::new();
        let alice = user("alice");
        let bob = user("bob");
        seed_user(&store, &alice).await;
        seed_user(&store, &bob).await;
        let room = ensure_dm_room(&store, &alice, &bob).await.unwrap();

        for (id, millis, text) in [("m2", 2_000, "second"), ("m1", 1_000, "first")] {
            let message = Message {
                id: id.to_string(),
                room_id: room.id.clone(),
                sender_id: "alice".to_string(),
                text: text.to_string(),
                created_at: BsonDateTime::from_millis(millis),
            };
            store
                .create(MESSAGES, id, store::to_doc(&message).unwrap())
                .await
                .unwrap();
        }

        let feed = history(&store, &room.id, "bob").await.unwrap();
        let texts: Vec<&str> = feed.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["first", "second"]);
    }
}
