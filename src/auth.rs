// src/auth.rs

use actix_web::{web, HttpResponse};
use bcrypt::{hash, verify, DEFAULT_COST};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use log::{error, info};
use mongodb::bson::Bson;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::app_state::AppState;
use crate::error::AppError;
use crate::models::{User, UserStatus, USERS};
use crate::store::{self, Predicate};
use crate::users::ProfileResponse;

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
}

#[derive(Debug, Deserialize)]
pub struct SignupInfo {
    pub display_name: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginInfo {
    pub email: String,
    pub password: String,
}

pub fn create_jwt(user_id: &str, secret: &str) -> Result<String, AppError> {
    let expiration = Utc::now() + Duration::hours(24);
    let claims = Claims {
        sub: user_id.to_string(),
        exp: expiration.timestamp() as usize,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_ref()),
    )
    .map_err(|e| AppError::Internal(format!("token encode: {}", e)))
}

pub fn verify_token(token: &str, secret: &str) -> Result<String, jsonwebtoken::errors::Error> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_ref()),
        &Validation::default(),
    )?;
    Ok(token_data.claims.sub)
}

/// POST /auth/signup
pub async fn signup(
    data: web::Data<AppState>,
    signup_info: web::Json<SignupInfo>,
) -> Result<HttpResponse, AppError> {
    if signup_info.display_name.trim().is_empty() {
        return Err(AppError::Validation("display name must not be empty".into()));
    }
    crate::users::validate_email(&signup_info.email)?;

    let taken = data
        .store
        .find(
            USERS,
            &[Predicate::Eq("email", Bson::String(signup_info.email.clone()))],
            None,
        )
        .await?;
    if !taken.is_empty() {
        return Err(AppError::conflict("email already registered"));
    }

    let password_hash = hash(&signup_info.password, DEFAULT_COST)
        .map_err(|e| AppError::Internal(format!("password hash: {}", e)))?;
    let user = User {
        id: Uuid::new_v4().to_string(),
        display_name: signup_info.display_name.clone(),
        email: signup_info.email.clone(),
        password_hash,
        photo_url: None,
        college: None,
        city: None,
        bio: None,
        status: UserStatus::None,
        skills: Vec::new(),
        interests: Vec::new(),
        github: None,
        linkedin: None,
        website: None,
        role: None,
        created_at: Utc::now(),
    };
    data.store
        .create(USERS, &user.id, store::to_doc(&user)?)
        .await?;
    info!("user {} signed up", user.id);

    let token = create_jwt(&user.id, &data.config.jwt_secret)?;
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "token": token,
        "user": ProfileResponse::from(user),
    })))
}

/// POST /auth/login
pub async fn login(
    data: web::Data<AppState>,
    login_info: web::Json<LoginInfo>,
) -> Result<HttpResponse, AppError> {
    let matches: Vec<User> = store::find_as(
        data.store.as_ref(),
        USERS,
        &[Predicate::Eq("email", Bson::String(login_info.email.clone()))],
        None,
    )
    .await?;
    let Some(user) = matches.into_iter().next() else {
        return Err(AppError::denied("invalid credentials"));
    };

    let ok = verify(&login_info.password, &user.password_hash).unwrap_or(false);
    if !ok {
        error!("failed login attempt for {}", user.id);
        return Err(AppError::denied("invalid credentials"));
    }

    let token = create_jwt(&user.id, &data.config.jwt_secret)?;
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "token": token,
        "user_id": user.id,
    })))
}
