// src/projects.rs
//
// HTTP surface for projects: CRUD, visibility, membership management,
// and the join-request endpoints. The multi-document logic lives in
// membership.rs / join_requests.rs; handlers authenticate, validate the
// payload, and delegate.

use actix_web::{web, HttpRequest, HttpResponse};
use log::error;
use mongodb::bson::to_bson;
use serde::{Deserialize, Serialize};

use crate::app_state::AppState;
use crate::error::AppError;
use crate::join_requests;
use crate::membership::{self, NewProject, ProjectPatch};
use crate::models::{Project, Theme, User, Visibility, PROJECTS, USERS};
use crate::store::{self, Predicate, WriteOp};
use crate::users::current_user;

#[derive(Debug, Deserialize)]
pub struct CreateProjectRequest {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub image_url: Option<String>,
    #[serde(default = "default_visibility")]
    pub visibility: Visibility,
    #[serde(default)]
    pub requires_request_to_join: bool,
    pub theme: Theme,
}

fn default_visibility() -> Visibility {
    Visibility::Public
}

#[derive(Debug, Deserialize)]
pub struct UpdateProjectRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub image_url: Option<String>,
    pub requires_request_to_join: Option<bool>,
    pub theme: Option<Theme>,
}

#[derive(Debug, Deserialize)]
pub struct SetVisibilityRequest {
    pub visibility: Visibility,
}

#[derive(Debug, Deserialize)]
pub struct MemberActionRequest {
    pub user_id: String,
}

/// What a non-member sees of a private project: enough for a directory
/// card and a join button, nothing else.
#[derive(Debug, Serialize)]
pub struct ProjectSummary {
    pub id: String,
    pub title: String,
    pub description: String,
    pub image_url: Option<String>,
    pub theme: Theme,
    pub visibility: Visibility,
    pub requires_request_to_join: bool,
}

impl From<&Project> for ProjectSummary {
    fn from(project: &Project) -> Self {
        ProjectSummary {
            id: project.id.clone(),
            title: project.title.clone(),
            description: project.description.clone(),
            image_url: project.image_url.clone(),
            theme: project.theme,
            visibility: project.visibility,
            requires_request_to_join: project.requires_request_to_join,
        }
    }
}

async fn load_actor(data: &AppState, req: &HttpRequest) -> Result<User, AppError> {
    let user_id = current_user(req)?;
    store::get_as(data.store.as_ref(), USERS, &user_id)
        .await
        .map_err(|err| match err {
            AppError::NotFound(_) => AppError::denied("unknown user"),
            other => other,
        })
}

/// POST /projects
pub async fn create_project(
    req: HttpRequest,
    data: web::Data<AppState>,
    payload: web::Json<CreateProjectRequest>,
) -> Result<HttpResponse, AppError> {
    let owner = load_actor(&data, &req).await?;
    let payload = payload.into_inner();
    let project = membership::create_project(
        data.store.as_ref(),
        &owner,
        NewProject {
            title: payload.title,
            description: payload.description,
            image_url: payload.image_url,
            visibility: payload.visibility,
            requires_request_to_join: payload.requires_request_to_join,
            theme: payload.theme,
        },
    )
    .await?;
    Ok(HttpResponse::Ok().json(project))
}

/// GET /projects — every public project plus the caller's private ones.
pub async fn list_projects(
    req: HttpRequest,
    data: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let user_id = current_user(&req)?;
    let mut projects: Vec<Project> = store::find_as(
        data.store.as_ref(),
        PROJECTS,
        &[Predicate::Eq("visibility", to_bson(&Visibility::Public)?)],
        None,
    )
    .await?;
    let private: Vec<Project> = store::find_as(
        data.store.as_ref(),
        PROJECTS,
        &[
            Predicate::Eq("visibility", to_bson(&Visibility::Private)?),
            Predicate::Eq("members", to_bson(&user_id)?),
        ],
        None,
    )
    .await?;
    projects.extend(private);
    Ok(HttpResponse::Ok().json(projects))
}

/// GET /projects/{id} — full document for members, a summary card for
/// everyone else when the project is private.
pub async fn get_project(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let user_id = current_user(&req)?;
    let project_id = path.into_inner();
    let project = membership::load_project(data.store.as_ref(), &project_id).await?;

    // View counting is best-effort bookkeeping, never a request failure.
    if let Err(err) = data
        .store
        .batch(vec![WriteOp::Increment {
            collection: PROJECTS,
            id: project_id.clone(),
            field: "views",
            by: 1,
        }])
        .await
    {
        error!("could not bump views for {}: {}", project_id, err);
    }

    if project.visibility == Visibility::Private && !project.is_member(&user_id) {
        return Ok(HttpResponse::Ok().json(ProjectSummary::from(&project)));
    }
    Ok(HttpResponse::Ok().json(project))
}

/// PUT /projects/{id}
pub async fn update_project(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<UpdateProjectRequest>,
) -> Result<HttpResponse, AppError> {
    let user_id = current_user(&req)?;
    let payload = payload.into_inner();
    membership::update_details(
        data.store.as_ref(),
        &user_id,
        &path.into_inner(),
        ProjectPatch {
            title: payload.title,
            description: payload.description,
            image_url: payload.image_url,
            requires_request_to_join: payload.requires_request_to_join,
            theme: payload.theme,
        },
    )
    .await?;
    Ok(HttpResponse::Ok().body("Project updated"))
}

/// DELETE /projects/{id}
pub async fn delete_project(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let user_id = current_user(&req)?;
    membership::delete_project(
        data.store.as_ref(),
        data.storage.as_ref(),
        &user_id,
        &path.into_inner(),
    )
    .await?;
    Ok(HttpResponse::Ok().body("Project deleted"))
}

/// POST /projects/{id}/visibility
pub async fn set_visibility(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<SetVisibilityRequest>,
) -> Result<HttpResponse, AppError> {
    let user_id = current_user(&req)?;
    membership::set_visibility(
        data.store.as_ref(),
        &user_id,
        &path.into_inner(),
        payload.visibility,
    )
    .await?;
    Ok(HttpResponse::Ok().body("Visibility updated"))
}

/// POST /projects/{id}/admins
pub async fn promote_admin(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<MemberActionRequest>,
) -> Result<HttpResponse, AppError> {
    let user_id = current_user(&req)?;
    membership::promote_admin(
        data.store.as_ref(),
        &user_id,
        &path.into_inner(),
        &payload.user_id,
    )
    .await?;
    Ok(HttpResponse::Ok().body("Admin added"))
}

/// DELETE /projects/{id}/admins
pub async fn demote_admin(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<MemberActionRequest>,
) -> Result<HttpResponse, AppError> {
    let user_id = current_user(&req)?;
    membership::demote_admin(
        data.store.as_ref(),
        &user_id,
        &path.into_inner(),
        &payload.user_id,
    )
    .await?;
    Ok(HttpResponse::Ok().body("Admin removed"))
}

/// DELETE /projects/{id}/members
pub async fn remove_member(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<MemberActionRequest>,
) -> Result<HttpResponse, AppError> {
    let user_id = current_user(&req)?;
    membership::remove_member(
        data.store.as_ref(),
        &user_id,
        &path.into_inner(),
        &payload.user_id,
    )
    .await?;
    Ok(HttpResponse::Ok().body("Member removed"))
}

/// POST /projects/{id}/join_requests
pub async fn submit_join_request(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let applicant = load_actor(&data, &req).await?;
    let request = join_requests::submit(
        data.store.as_ref(),
        data.ledger.as_ref(),
        &applicant,
        &path.into_inner(),
    )
    .await?;
    Ok(HttpResponse::Ok().json(request))
}

/// GET /projects/{id}/join_requests
pub async fn list_join_requests(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let user_id = current_user(&req)?;
    let pending = join_requests::list_pending(
        data.store.as_ref(),
        data.ledger.as_ref(),
        &user_id,
        &path.into_inner(),
    )
    .await?;
    Ok(HttpResponse::Ok().json(pending))
}

/// POST /projects/{id}/join_requests/{request_id}/approve
pub async fn approve_join_request(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<(String, String)>,
) -> Result<HttpResponse, AppError> {
    let user_id = current_user(&req)?;
    let (project_id, request_id) = path.into_inner();
    join_requests::approve(data.store.as_ref(), &user_id, &project_id, &request_id).await?;
    Ok(HttpResponse::Ok().body("Request approved"))
}

/// POST /projects/{id}/join_requests/{request_id}/decline
pub async fn decline_join_request(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<(String, String)>,
) -> Result<HttpResponse, AppError> {
    let user_id = current_user(&req)?;
    let (project_id, request_id) = path.into_inner();
    join_requests::decline(data.store.as_ref(), &user_id, &project_id, &request_id).await?;
    Ok(HttpResponse::Ok().body("Request declined"))
}
