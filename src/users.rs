// src/users.rs

use std::sync::OnceLock;

use actix_web::{web, HttpMessage, HttpRequest, HttpResponse};
use chrono::Utc;
use log::info;
use mongodb::bson::{doc, to_bson};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::app_state::AppState;
use crate::error::AppError;
use crate::models::{Skill, User, UserStatus, USERS};
use crate::store::{self, Predicate};

/// A user document as shown to other users: everything but credentials.
#[derive(Debug, Serialize)]
pub struct ProfileResponse {
    pub id: String,
    pub display_name: String,
    pub email: String,
    pub photo_url: Option<String>,
    pub college: Option<String>,
    pub city: Option<String>,
    pub bio: Option<String>,
    pub status: UserStatus,
    pub skills: Vec<Skill>,
    pub interests: Vec<String>,
    pub github: Option<String>,
    pub linkedin: Option<String>,
    pub website: Option<String>,
    pub role: Option<String>,
    pub created_at: chrono::DateTime<Utc>,
}

impl From<User> for ProfileResponse {
    fn from(user: User) -> Self {
        ProfileResponse {
            id: user.id,
            display_name: user.display_name,
            email: user.email,
            photo_url: user.photo_url,
            college: user.college,
            city: user.city,
            bio: user.bio,
            status: user.status,
            skills: user.skills,
            interests: user.interests,
            github: user.github,
            linkedin: user.linkedin,
            website: user.website,
            role: user.role,
            created_at: user.created_at,
        }
    }
}

pub fn validate_email(email: &str) -> Result<(), AppError> {
    static EMAIL_RE: OnceLock<Regex> = OnceLock::new();
    let re = EMAIL_RE.get_or_init(|| {
        Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email pattern is valid")
    });
    if re.is_match(email) {
        Ok(())
    } else {
        Err(AppError::Validation("invalid email address".into()))
    }
}

/// Extracts the authenticated user id injected by the auth middleware.
/// No injected identity means the request carried no (valid) token, so
/// this is a 401, not a 403.
pub fn current_user(req: &HttpRequest) -> Result<String, AppError> {
    req.extensions()
        .get::<String>()
        .cloned()
        .ok_or_else(|| AppError::Unauthorized("authentication required".into()))
}

#[derive(Debug, Deserialize)]
pub struct UpdateProfileRequest {
    pub display_name: Option<String>,
    pub photo_url: Option<String>,
    pub college: Option<String>,
    pub city: Option<String>,
    pub bio: Option<String>,
    pub status: Option<UserStatus>,
    pub skills: Option<Vec<Skill>>,
    pub interests: Option<Vec<String>>,
    pub github: Option<String>,
    pub linkedin: Option<String>,
    pub website: Option<String>,
    pub role: Option<String>,
}

/// GET /users/get/{id}
pub async fn get_user_by_id(
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let user: User = store::get_as(data.store.as_ref(), USERS, &path.into_inner())
        .await
        .map_err(|err| match err {
            AppError::NotFound(_) => AppError::not_found("user"),
            other => other,
        })?;
    Ok(HttpResponse::Ok().json(ProfileResponse::from(user)))
}

/// PUT /users/{id}/profile — a user may only edit their own profile.
pub async fn update_profile(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<String>,
    update: web::Json<UpdateProfileRequest>,
) -> Result<HttpResponse, AppError> {
    let user_id = path.into_inner();
    if current_user(&req)? != user_id {
        return Err(AppError::denied("cannot edit another user's profile"));
    }

    if let Some(skills) = &update.skills {
        let primary_count = skills.iter().filter(|s| s.is_primary).count();
        if primary_count > 1 {
            return Err(AppError::Validation("at most one primary skill".into()));
        }
    }
    if let Some(display_name) = &update.display_name {
        if display_name.trim().is_empty() {
            return Err(AppError::Validation("display name must not be empty".into()));
        }
    }

    let mut patch = doc! {};
    if let Some(v) = &update.display_name {
        patch.insert("display_name", v.clone());
    }
    if let Some(v) = &update.photo_url {
        patch.insert("photo_url", v.clone());
    }
    if let Some(v) = &update.college {
        patch.insert("college", v.clone());
    }
    if let Some(v) = &update.city {
        patch.insert("city", v.clone());
    }
    if let Some(v) = &update.bio {
        patch.insert("bio", v.clone());
    }
    if let Some(v) = &update.status {
        patch.insert("status", to_bson(v)?);
    }
    if let Some(v) = &update.skills {
        patch.insert("skills", to_bson(v)?);
    }
    if let Some(v) = &update.interests {
        patch.insert("interests", to_bson(v)?);
    }
    if let Some(v) = &update.github {
        patch.insert("github", v.clone());
    }
    if let Some(v) = &update.linkedin {
        patch.insert("linkedin", v.clone());
    }
    if let Some(v) = &update.website {
        patch.insert("website", v.clone());
    }
    if let Some(v) = &update.role {
        patch.insert("role", v.clone());
    }
    if patch.is_empty() {
        return Err(AppError::Validation("no fields to update".into()));
    }

    data.store.update(USERS, &user_id, patch).await?;
    info!("profile {} updated", user_id);
    Ok(HttpResponse::Ok().body("Profile updated"))
}

#[derive(Debug, Deserialize)]
pub struct FindUserQuery {
    pub query: String,
}

/// GET /users/find_user_email?query=...
pub async fn find_user_email(
    data: web::Data<AppState>,
    query: web::Query<FindUserQuery>,
) -> Result<HttpResponse, AppError> {
    let users: Vec<User> = store::find_as(
        data.store.as_ref(),
        USERS,
        &[Predicate::TextContains("email", query.query.clone())],
        None,
    )
    .await?;
    let profiles: Vec<ProfileResponse> = users.into_iter().map(ProfileResponse::from).collect();
    Ok(HttpResponse::Ok().json(profiles))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_validation() {
        assert!(validate_email("student@college.edu").is_ok());
        assert!(validate_email("no-at-sign").is_err());
        assert!(validate_email("two@at@signs.edu").is_err());
        assert!(validate_email("nospace @x.edu").is_err());
    }

    #[test]
    fn missing_identity_is_unauthorized() {
        let req = actix_web::test::TestRequest::default().to_http_request();
        let err = current_user(&req).unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));

        let req = actix_web::test::TestRequest::default().to_http_request();
        req.extensions_mut().insert("alice".to_string());
        assert_eq!(current_user(&req).unwrap(), "alice");
    }
}
