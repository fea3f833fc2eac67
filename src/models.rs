// src/models.rs

use std::collections::HashMap;

use chrono::Utc;
use mongodb::bson::DateTime as BsonDateTime;
use serde::{Deserialize, Serialize};

// Collection names.
pub const USERS: &str = "users";
pub const PROJECTS: &str = "projects";
pub const DM_ROOMS: &str = "dm_rooms";
pub const PROJECT_ROOMS: &str = "project_rooms";
pub const MESSAGES: &str = "messages";
pub const JOIN_REQUESTS: &str = "join_requests";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    Private,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    Software,
    Hardware,
    Event,
    Design,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    None,
    Seeking,
    Active,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Pending,
    Approved,
    Declined,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Skill {
    pub name: String,
    pub is_primary: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    #[serde(rename = "_id")]
    pub id: String,
    pub display_name: String,
    pub email: String,
    pub password_hash: String,
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

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    #[serde(rename = "_id")]
    pub id: String,
    pub title: String,
    pub description: String,
    pub image_url: Option<String>,
    pub owner: String,
    pub visibility: Visibility,
    pub members: Vec<String>,
    pub admins: Vec<String>,
    pub requires_request_to_join: bool,
    pub theme: Theme,
    pub views: i64,
    pub applicant_count: i64,
    pub created_at: chrono::DateTime<Utc>,
}

impl Project {
    /// The owner counts as member and admin even if an array was mangled.
    pub fn is_member(&self, user_id: &str) -> bool {
        self.owner == user_id || self.members.iter().any(|m| m == user_id)
    }

    pub fn is_admin(&self, user_id: &str) -> bool {
        self.owner == user_id || self.admins.iter().any(|a| a == user_id)
    }
}

/// Per-member display snapshot kept on DM rooms, so a conversation header
/// renders without an extra user lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberDetail {
    pub display_name: String,
    pub photo_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRoom {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    pub image_url: Option<String>,
    pub members: Vec<String>,
    pub member_details: Option<HashMap<String, MemberDetail>>,
    pub is_private: bool,
    pub is_dm: bool,
    pub created_at: chrono::DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "_id")]
    pub id: String,
    pub room_id: String,
    pub sender_id: String,
    pub text: String,
    // Server-assigned; kept as a bson timestamp so feed ordering is
    // numeric, not lexicographic.
    pub created_at: BsonDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinRequest {
    #[serde(rename = "_id")]
    pub id: String,
    pub project_id: String,
    pub user_id: String,
    pub user_display_name: String,
    pub user_photo_url: Option<String>,
    pub status: RequestStatus,
    pub created_at: chrono::DateTime<Utc>,
    pub resolved_at: Option<chrono::DateTime<Utc>>,
}
