// src/join_requests.rs
//
// Join-request workflow: none -> pending -> {approved, declined}.
// Request ids are derived from (project, user), so a second submission
// is a store-level conflict rather than a duplicate document, and
// resolution is guarded on `status == pending`, so it happens exactly
// once even when two admins race.

use chrono::Utc;
use log::info;
use mongodb::bson::{doc, Bson};

use crate::error::AppError;
use crate::ledger::ReadStateLedger;
use crate::membership::load_project;
use crate::models::{
    JoinRequest, Project, RequestStatus, User, Visibility, JOIN_REQUESTS, PROJECTS, PROJECT_ROOMS,
};
use crate::store::{self, DataStore, Order, Predicate, WriteOp};

pub fn request_id(project_id: &str, user_id: &str) -> String {
    format!("{}_{}", project_id, user_id)
}

fn accepts_requests(project: &Project) -> bool {
    project.visibility == Visibility::Private || project.requires_request_to_join
}

/// Files a pending request and flags every admin's notification ledger.
pub async fn submit(
    store: &dyn DataStore,
    ledger: &dyn ReadStateLedger,
    applicant: &User,
    project_id: &str,
) -> Result<JoinRequest, AppError> {
    let project = load_project(store, project_id).await?;
    if project.is_member(&applicant.id) {
        return Err(AppError::conflict("already a project member"));
    }
    if !accepts_requests(&project) {
        return Err(AppError::Validation(
            "this project can be joined directly".into(),
        ));
    }

    let request = JoinRequest {
        id: request_id(project_id, &applicant.id),
        project_id: project_id.to_string(),
        user_id: applicant.id.clone(),
        user_display_name: applicant.display_name.clone(),
        user_photo_url: applicant.photo_url.clone(),
        status: RequestStatus::Pending,
        created_at: Utc::now(),
        resolved_at: None,
    };
    store
        .batch(vec![
            WriteOp::Create {
                collection: JOIN_REQUESTS,
                id: request.id.clone(),
                doc: store::to_doc(&request)?,
            },
            WriteOp::Increment {
                collection: PROJECTS,
                id: project_id.to_string(),
                field: "applicant_count",
                by: 1,
            },
        ])
        .await
        .map_err(|err| match err {
            AppError::Conflict(_) => AppError::conflict("join request already sent"),
            other => other,
        })?;

    for admin in admins_of(&project) {
        ledger.flag_join_requests(&admin);
    }
    info!(
        "join request {} filed for project {}",
        request.id, project_id
    );
    Ok(request)
}

/// Pending requests for a project, oldest first. Viewing them clears the
/// actor's new-requests flag.
pub async fn list_pending(
    store: &dyn DataStore,
    ledger: &dyn ReadStateLedger,
    actor: &str,
    project_id: &str,
) -> Result<Vec<JoinRequest>, AppError> {
    let project = load_project(store, project_id).await?;
    if !project.is_admin(actor) {
        return Err(AppError::denied("only project admins may view requests"));
    }
    let pending = store::find_as(
        store,
        JOIN_REQUESTS,
        &[
            Predicate::Eq("project_id", Bson::String(project_id.to_string())),
            Predicate::Eq("status", Bson::String("pending".to_string())),
        ],
        Some(Order::Asc("created_at")),
    )
    .await?;
    ledger.clear_join_requests(actor);
    Ok(pending)
}

pub async fn approve(
    store: &dyn DataStore,
    actor: &str,
    project_id: &str,
    request_id: &str,
) -> Result<(), AppError> {
    let request = load_request(store, project_id, request_id).await?;
    let project = load_project(store, &request.project_id).await?;
    if !project.is_admin(actor) {
        return Err(AppError::denied("only project admins may resolve requests"));
    }

    store
        .batch(vec![
            resolve_op(&request, RequestStatus::Approved)?,
            WriteOp::SetUnion {
                collection: PROJECTS,
                id: request.project_id.clone(),
                field: "members",
                value: Bson::String(request.user_id.clone()),
            },
            WriteOp::SetUnion {
                collection: PROJECT_ROOMS,
                id: request.project_id.clone(),
                field: "members",
                value: Bson::String(request.user_id.clone()),
            },
        ])
        .await
        .map_err(already_resolved)?;
    info!("join request {} approved by {}", request.id, actor);
    Ok(())
}

pub async fn decline(
    store: &dyn DataStore,
    actor: &str,
    project_id: &str,
    request_id: &str,
) -> Result<(), AppError> {
    let request = load_request(store, project_id, request_id).await?;
    let project = load_project(store, &request.project_id).await?;
    if !project.is_admin(actor) {
        return Err(AppError::denied("only project admins may resolve requests"));
    }
    store
        .batch(vec![resolve_op(&request, RequestStatus::Declined)?])
        .await
        .map_err(already_resolved)?;
    info!("join request {} declined by {}", request.id, actor);
    Ok(())
}

async fn load_request(
    store: &dyn DataStore,
    project_id: &str,
    request_id: &str,
) -> Result<JoinRequest, AppError> {
    let request: JoinRequest = store::get_as(store, JOIN_REQUESTS, request_id)
        .await
        .map_err(|err| match err {
            AppError::NotFound(_) => AppError::not_found("join request"),
            other => other,
        })?;
    // Requests are addressed through their project; a mismatched pair is
    // treated as absent rather than leaking another project's request.
    if request.project_id != project_id {
        return Err(AppError::not_found("join request"));
    }
    Ok(request)
}

// The pending guard makes pending -> resolved a one-way, one-time move.
fn resolve_op(request: &JoinRequest, status: RequestStatus) -> Result<WriteOp, AppError> {
    Ok(WriteOp::UpdateIf {
        collection: JOIN_REQUESTS,
        id: request.id.clone(),
        expect: vec![Predicate::Eq("status", Bson::String("pending".to_string()))],
        patch: doc! {
            "status": mongodb::bson::to_bson(&status)?,
            "resolved_at": mongodb::bson::to_bson(&Some(Utc::now()))?,
        },
    })
}

fn already_resolved(err: AppError) -> AppError {
    match err {
        AppError::Conflict(_) => AppError::conflict("join request already resolved"),
        other => other,
    }
}

fn admins_of(project: &Project) -> Vec<String> {
    let mut admins = project.admins.clone();
    if !admins.contains(&project.owner) {
        admins.push(project.owner.clone());
    }
    admins
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::MemoryLedger;
    use crate::membership::{self, create_project};
    use crate::store::memory::MemoryStore;
    use crate::testutil::{project_draft, user};

    async fn private_project(store: &MemoryStore, owner: &User) -> Project {
        create_project(store, owner, project_draft("X", Visibility::Private))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn submit_flags_admins_and_counts_applicants() {
        let store = MemoryStore::new();
        let ledger = MemoryLedger::new();
        let alice = user("alice");
        let carol = user("carol");
        let project = private_project(&store, &alice).await;

        let request = submit(&store, &ledger, &carol, &project.id).await.unwrap();
        assert_eq!(request.id, request_id(&project.id, "carol"));
        assert_eq!(request.status, RequestStatus::Pending);
        assert!(ledger.has_new_join_requests("alice"));

        let stored = membership::load_project(&store, &project.id).await.unwrap();
        assert_eq!(stored.applicant_count, 1);
    }

    #[tokio::test]
    async fn duplicate_submission_conflicts() {
        let store = MemoryStore::new();
        let ledger = MemoryLedger::new();
        let alice = user("alice");
        let carol = user("carol");
        let project = private_project(&store, &alice).await;

        submit(&store, &ledger, &carol, &project.id).await.unwrap();
        let err = submit(&store, &ledger, &carol, &project.id)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        // The failed batch must not bump the counter again.
        let stored = membership::load_project(&store, &project.id).await.unwrap();
        assert_eq!(stored.applicant_count, 1);
    }

    #[tokio::test]
    async fn members_and_open_projects_cannot_request() {
        let store = MemoryStore::new();
        let ledger = MemoryLedger::new();
        let alice = user("alice");
        let project = private_project(&store, &alice).await;

        let err = submit(&store, &ledger, &alice, &project.id)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        let open = create_project(&store, &alice, project_draft("Y", Visibility::Public))
            .await
            .unwrap();
        let carol = user("carol");
        let err = submit(&store, &ledger, &carol, &open.id).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn approval_adds_member_and_resolves_once() {
        let store = MemoryStore::new();
        let ledger = MemoryLedger::new();
        let alice = user("alice");
        let carol = user("carol");
        let project = private_project(&store, &alice).await;
        let request = submit(&store, &ledger, &carol, &project.id).await.unwrap();

        approve(&store, "alice", &project.id, &request.id).await.unwrap();

        let stored = membership::load_project(&store, &project.id).await.unwrap();
        assert!(stored.is_member("carol"));
        let room: crate::models::ChatRoom =
            store::get_as(&store, PROJECT_ROOMS, &project.id).await.unwrap();
        assert!(room.members.contains(&"carol".to_string()));

        let resolved = load_request(&store, &project.id, &request.id).await.unwrap();
        assert_eq!(resolved.status, RequestStatus::Approved);
        assert!(resolved.resolved_at.is_some());

        // A racing second resolution hits the pending guard.
        let err = decline(&store, "alice", &project.id, &request.id).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
        let resolved = load_request(&store, &project.id, &request.id).await.unwrap();
        assert_eq!(resolved.status, RequestStatus::Approved);
    }

    #[tokio::test]
    async fn decline_leaves_membership_untouched() {
        let store = MemoryStore::new();
        let ledger = MemoryLedger::new();
        let alice = user("alice");
        let carol = user("carol");
        let project = private_project(&store, &alice).await;
        let request = submit(&store, &ledger, &carol, &project.id).await.unwrap();

        decline(&store, "alice", &project.id, &request.id).await.unwrap();

        let stored = membership::load_project(&store, &project.id).await.unwrap();
        assert!(!stored.is_member("carol"));
        let resolved = load_request(&store, &project.id, &request.id).await.unwrap();
        assert_eq!(resolved.status, RequestStatus::Declined);
    }

    #[tokio::test]
    async fn only_admins_resolve_or_list() {
        let store = MemoryStore::new();
        let ledger = MemoryLedger::new();
        let alice = user("alice");
        let carol = user("carol");
        let project = private_project(&store, &alice).await;
        let request = submit(&store, &ledger, &carol, &project.id).await.unwrap();

        let err = approve(&store, "carol", &project.id, &request.id).await.unwrap_err();
        assert!(matches!(err, AppError::PermissionDenied(_)));
        let err = list_pending(&store, &ledger, "carol", &project.id)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::PermissionDenied(_)));
    }

    #[tokio::test]
    async fn listing_clears_the_viewers_flag_only() {
        let store = MemoryStore::new();
        let ledger = MemoryLedger::new();
        let alice = user("alice");
        let carol = user("carol");
        let project = private_project(&store, &alice).await;
        submit(&store, &ledger, &carol, &project.id).await.unwrap();
        ledger.flag_join_requests("bob");

        let pending = list_pending(&store, &ledger, "alice", &project.id)
            .await
            .unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].user_id, "carol");
        assert!(!ledger.has_new_join_requests("alice"));
        assert!(ledger.has_new_join_requests("bob"));
    }
}
