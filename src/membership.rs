// src/membership.rs
//
// Membership and privacy transitions for projects. Every multi-document
// mutation goes through one store batch, so a project document, its chat
// room mirror, and the membership arrays never drift apart.

use chrono::Utc;
use log::info;
use mongodb::bson::{doc, to_bson, Bson};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{
    ChatRoom, Project, Theme, User, Visibility, MESSAGES, PROJECTS, PROJECT_ROOMS,
};
use crate::storage::ObjectStorage;
use crate::store::{self, DataStore, Predicate, WriteOp};

#[derive(Debug)]
pub struct NewProject {
    pub title: String,
    pub description: String,
    pub image_url: Option<String>,
    pub visibility: Visibility,
    pub requires_request_to_join: bool,
    pub theme: Theme,
}

#[derive(Debug, Default)]
pub struct ProjectPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub image_url: Option<String>,
    pub requires_request_to_join: Option<bool>,
    pub theme: Option<Theme>,
}

pub async fn load_project(store: &dyn DataStore, project_id: &str) -> Result<Project, AppError> {
    store::get_as(store, PROJECTS, project_id)
        .await
        .map_err(|err| match err {
            AppError::NotFound(_) => AppError::not_found("project"),
            other => other,
        })
}

fn require_admin(project: &Project, actor: &str) -> Result<(), AppError> {
    if project.is_admin(actor) {
        Ok(())
    } else {
        Err(AppError::denied("only project admins may do this"))
    }
}

/// Creates the project and its chat-room mirror together. The owner is
/// seeded into members and admins of both documents.
pub async fn create_project(
    store: &dyn DataStore,
    owner: &User,
    draft: NewProject,
) -> Result<Project, AppError> {
    if draft.title.trim().is_empty() {
        return Err(AppError::Validation("project title must not be empty".into()));
    }
    let now = Utc::now();
    let project = Project {
        id: Uuid::new_v4().to_string(),
        title: draft.title,
        description: draft.description,
        image_url: draft.image_url,
        owner: owner.id.clone(),
        visibility: draft.visibility,
        members: vec![owner.id.clone()],
        admins: vec![owner.id.clone()],
        requires_request_to_join: draft.requires_request_to_join,
        theme: draft.theme,
        views: 0,
        applicant_count: 0,
        created_at: now,
    };
    let room = ChatRoom {
        id: project.id.clone(),
        name: project.title.clone(),
        image_url: project.image_url.clone(),
        members: vec![owner.id.clone()],
        member_details: None,
        is_private: project.visibility == Visibility::Private,
        is_dm: false,
        created_at: now,
    };
    store
        .batch(vec![
            WriteOp::Create {
                collection: PROJECTS,
                id: project.id.clone(),
                doc: store::to_doc(&project)?,
            },
            WriteOp::Create {
                collection: PROJECT_ROOMS,
                id: room.id.clone(),
                doc: store::to_doc(&room)?,
            },
        ])
        .await?;
    info!("project {} created by {}", project.id, owner.id);
    Ok(project)
}

/// Admin-only metadata edit; title/image changes propagate to the room
/// mirror in the same batch.
pub async fn update_details(
    store: &dyn DataStore,
    actor: &str,
    project_id: &str,
    patch: ProjectPatch,
) -> Result<(), AppError> {
    let project = load_project(store, project_id).await?;
    require_admin(&project, actor)?;

    let mut project_patch = doc! {};
    let mut room_patch = doc! {};
    if let Some(title) = &patch.title {
        if title.trim().is_empty() {
            return Err(AppError::Validation("project title must not be empty".into()));
        }
        project_patch.insert("title", title.clone());
        room_patch.insert("name", title.clone());
    }
    if let Some(description) = &patch.description {
        project_patch.insert("description", description.clone());
    }
    if let Some(image_url) = &patch.image_url {
        project_patch.insert("image_url", image_url.clone());
        room_patch.insert("image_url", image_url.clone());
    }
    if let Some(requires) = patch.requires_request_to_join {
        project_patch.insert("requires_request_to_join", requires);
    }
    if let Some(theme) = &patch.theme {
        project_patch.insert("theme", to_bson(theme)?);
    }
    if project_patch.is_empty() {
        return Err(AppError::Validation("no fields to update".into()));
    }

    let mut ops = vec![WriteOp::Update {
        collection: PROJECTS,
        id: project_id.to_string(),
        patch: project_patch,
    }];
    if !room_patch.is_empty() {
        ops.push(WriteOp::Update {
            collection: PROJECT_ROOMS,
            id: project_id.to_string(),
            patch: room_patch,
        });
    }
    store.batch(ops).await
}

/// Public <-> private transition. One batch patches the visibility tag
/// and the room's `is_private` mirror; a crash can no longer leave the
/// two disagreeing. Toggling to the current state is a harmless no-op.
pub async fn set_visibility(
    store: &dyn DataStore,
    actor: &str,
    project_id: &str,
    visibility: Visibility,
) -> Result<(), AppError> {
    let project = load_project(store, project_id).await?;
    require_admin(&project, actor)?;

    let mut patch = doc! { "visibility": to_bson(&visibility)? };
    if project.members.is_empty() {
        // Repair a mangled document: the owner is always a member.
        patch.insert("members", vec![project.owner.clone()]);
    }
    store
        .batch(vec![
            WriteOp::Update {
                collection: PROJECTS,
                id: project_id.to_string(),
                patch,
            },
            WriteOp::Update {
                collection: PROJECT_ROOMS,
                id: project_id.to_string(),
                patch: doc! { "is_private": visibility == Visibility::Private },
            },
        ])
        .await?;
    info!(
        "project {} set to {:?} by {}",
        project_id, visibility, actor
    );
    Ok(())
}

pub async fn promote_admin(
    store: &dyn DataStore,
    actor: &str,
    project_id: &str,
    target: &str,
) -> Result<(), AppError> {
    let project = load_project(store, project_id).await?;
    require_admin(&project, actor)?;
    if !project.is_member(target) {
        return Err(AppError::Validation("user is not a project member".into()));
    }
    store
        .batch(vec![WriteOp::SetUnion {
            collection: PROJECTS,
            id: project_id.to_string(),
            field: "admins",
            value: Bson::String(target.to_string()),
        }])
        .await
}

pub async fn demote_admin(
    store: &dyn DataStore,
    actor: &str,
    project_id: &str,
    target: &str,
) -> Result<(), AppError> {
    let project = load_project(store, project_id).await?;
    require_admin(&project, actor)?;
    if target == project.owner {
        return Err(AppError::denied("the owner cannot be demoted"));
    }
    store
        .batch(vec![WriteOp::SetRemove {
            collection: PROJECTS,
            id: project_id.to_string(),
            field: "admins",
            value: Bson::String(target.to_string()),
        }])
        .await
}

/// Removing a member also strips any admin role and their room
/// membership in the same batch.
pub async fn remove_member(
    store: &dyn DataStore,
    actor: &str,
    project_id: &str,
    target: &str,
) -> Result<(), AppError> {
    let project = load_project(store, project_id).await?;
    require_admin(&project, actor)?;
    if target == project.owner {
        return Err(AppError::denied("the owner cannot be removed"));
    }
    let target = Bson::String(target.to_string());
    store
        .batch(vec![
            WriteOp::SetRemove {
                collection: PROJECTS,
                id: project_id.to_string(),
                field: "members",
                value: target.clone(),
            },
            WriteOp::SetRemove {
                collection: PROJECTS,
                id: project_id.to_string(),
                field: "admins",
                value: target.clone(),
            },
            WriteOp::SetRemove {
                collection: PROJECT_ROOMS,
                id: project_id.to_string(),
                field: "members",
                value: target,
            },
        ])
        .await
}

/// Deletes the project, its room, and the room's message history in one
/// batch, then discards the project image. Message history goes with the
/// project: orphaned messages would be unreachable and unowned.
pub async fn delete_project(
    store: &dyn DataStore,
    storage: &dyn ObjectStorage,
    actor: &str,
    project_id: &str,
) -> Result<(), AppError> {
    let project = load_project(store, project_id).await?;
    require_admin(&project, actor)?;
    store
        .batch(vec![
            WriteOp::Delete {
                collection: PROJECTS,
                id: project_id.to_string(),
            },
            WriteOp::Delete {
                collection: PROJECT_ROOMS,
                id: project_id.to_string(),
            },
            WriteOp::DeleteMany {
                collection: MESSAGES,
                predicates: vec![Predicate::Eq(
                    "room_id",
                    Bson::String(project_id.to_string()),
                )],
            },
        ])
        .await?;
    if let Some(url) = &project.image_url {
        storage.delete(url).await;
    }
    info!("project {} deleted by {}", project_id, actor);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DM_ROOMS;
    use crate::store::memory::MemoryStore;
    use crate::testutil::{project_draft, user};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct RecordingStorage {
        deleted: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ObjectStorage for RecordingStorage {
        async fn delete(&self, url: &str) {
            self.deleted.lock().unwrap().push(url.to_string());
        }
    }

    async fn room(store: &MemoryStore, id: &str) -> ChatRoom {
        store::get_as(store, PROJECT_ROOMS, id).await.unwrap()
    }

    #[tokio::test]
    async fn owner_is_seeded_into_members_and_admins() {
        let store = MemoryStore::new();
        let alice = user("alice");
        let project = create_project(&store, &alice, project_draft("X", Visibility::Public))
            .await
            .unwrap();

        let stored = load_project(&store, &project.id).await.unwrap();
        assert!(stored.is_member("alice"));
        assert!(stored.is_admin("alice"));
        let room = room(&store, &project.id).await;
        assert_eq!(room.members, vec!["alice"]);
        assert!(!room.is_private);
        assert!(!room.is_dm);
    }

    #[tokio::test]
    async fn visibility_toggle_keeps_members_and_flips_mirror() {
        let store = MemoryStore::new();
        let alice = user("alice");
        let project = create_project(&store, &alice, project_draft("X", Visibility::Public))
            .await
            .unwrap();
        promote_member(&store, &project.id, "bob").await;

        set_visibility(&store, "alice", &project.id, Visibility::Private)
            .await
            .unwrap();

        let stored = load_project(&store, &project.id).await.unwrap();
        assert_eq!(stored.visibility, Visibility::Private);
        assert!(stored.is_member("alice") && stored.is_member("bob"));
        assert!(room(&store, &project.id).await.is_private);

        set_visibility(&store, "alice", &project.id, Visibility::Public)
            .await
            .unwrap();
        assert!(!room(&store, &project.id).await.is_private);
    }

    #[tokio::test]
    async fn visibility_toggle_requires_admin() {
        let store = MemoryStore::new();
        let alice = user("alice");
        let project = create_project(&store, &alice, project_draft("X", Visibility::Public))
            .await
            .unwrap();
        promote_member(&store, &project.id, "bob").await;

        let err = set_visibility(&store, "bob", &project.id, Visibility::Private)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::PermissionDenied(_)));
    }

    #[tokio::test]
    async fn promoting_twice_keeps_admin_once() {
        let store = MemoryStore::new();
        let alice = user("alice");
        let project = create_project(&store, &alice, project_draft("X", Visibility::Public))
            .await
            .unwrap();
        promote_member(&store, &project.id, "bob").await;

        promote_admin(&store, "alice", &project.id, "bob").await.unwrap();
        promote_admin(&store, "alice", &project.id, "bob").await.unwrap();

        let stored = load_project(&store, &project.id).await.unwrap();
        let count = stored.admins.iter().filter(|a| *a == "bob").count();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn owner_cannot_be_demoted_or_removed() {
        let store = MemoryStore::new();
        let alice = user("alice");
        let project = create_project(&store, &alice, project_draft("X", Visibility::Public))
            .await
            .unwrap();

        let err = demote_admin(&store, "alice", &project.id, "alice")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::PermissionDenied(_)));

        let err = remove_member(&store, "alice", &project.id, "alice")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::PermissionDenied(_)));

        let stored = load_project(&store, &project.id).await.unwrap();
        assert!(stored.is_member("alice") && stored.is_admin("alice"));
    }

    #[tokio::test]
    async fn removing_a_member_strips_admin_and_room_membership() {
        let store = MemoryStore::new();
        let alice = user("alice");
        let project = create_project(&store, &alice, project_draft("X", Visibility::Public))
            .await
            .unwrap();
        promote_member(&store, &project.id, "bob").await;
        promote_admin(&store, "alice", &project.id, "bob").await.unwrap();

        remove_member(&store, "alice", &project.id, "bob").await.unwrap();

        let stored = load_project(&store, &project.id).await.unwrap();
        assert!(!stored.is_member("bob"));
        assert!(!stored.is_admin("bob"));
        assert!(!room(&store, &project.id).await.members.contains(&"bob".to_string()));
    }

    #[tokio::test]
    async fn delete_cascades_to_room_messages_and_image() {
        let store = MemoryStore::new();
        let alice = user("alice");
        let mut draft = project_draft("X", Visibility::Public);
        draft.image_url = Some("https://cdn.example/media/x.png".to_string());
        let project = create_project(&store, &alice, draft).await.unwrap();
        store
            .create(
                MESSAGES,
                "m1",
                doc! { "room_id": &project.id, "sender_id": "alice", "text": "hi" },
            )
            .await
            .unwrap();

        let storage = RecordingStorage { deleted: Mutex::new(Vec::new()) };
        delete_project(&store, &storage, "alice", &project.id)
            .await
            .unwrap();

        assert!(matches!(
            load_project(&store, &project.id).await.unwrap_err(),
            AppError::NotFound(_)
        ));
        assert!(store.get(PROJECT_ROOMS, &project.id).await.is_err());
        assert!(store.get(MESSAGES, "m1").await.is_err());
        assert_eq!(
            *storage.deleted.lock().unwrap(),
            vec!["https://cdn.example/media/x.png"]
        );
        // DM rooms are untouched by project deletion.
        assert!(store.find(DM_ROOMS, &[], None).await.unwrap().is_empty());
    }

    // Adds a bare member the way an approved join request would.
    async fn promote_member(store: &MemoryStore, project_id: &str, user_id: &str) {
        store
            .batch(vec![
                WriteOp::SetUnion {
                    collection: PROJECTS,
                    id: project_id.to_string(),
                    field: "members",
                    value: Bson::String(user_id.to_string()),
                },
                WriteOp::SetUnion {
                    collection: PROJECT_ROOMS,
                    id: project_id.to_string(),
                    field: "members",
                    value: Bson::String(user_id.to_string()),
                },
            ])
            .await
            .unwrap();
    }
}
