// src/testutil.rs

use chrono::Utc;

use crate::membership::NewProject;
use crate::models::{Theme, User, UserStatus, Visibility};

pub fn user(id: &str) -> User {
    User {
        id: id.to_string(),
        display_name: format!("{} Example", id),
        email: format!("{}@example.edu", id),
        password_hash: "hash".to_string(),
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
    }
}

pub fn project_draft(title: &str, visibility: Visibility) -> NewProject {
    NewProject {
        title: title.to_string(),
        description: "a project".to_string(),
        image_url: None,
        visibility,
        requires_request_to_join: visibility == Visibility::Private,
        theme: Theme::Software,
    }
}
