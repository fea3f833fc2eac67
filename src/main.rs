// src/main.rs

mod app_state;
mod auth;
mod chat;
mod chat_server;
mod config;
mod error;
mod join_requests;
mod ledger;
mod membership;
mod models;
mod notifications;
mod projects;
mod rooms;
mod storage;
mod store;
#[cfg(test)]
mod testutil;
mod users;
mod web_socket_server;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use actix::Actor;
use actix_cors::Cors;
use actix_web::{
    body::{BoxBody, MessageBody},
    dev::{Service, ServiceRequest, ServiceResponse, Transform},
    http,
    middleware::Logger,
    web, App, Error, HttpMessage, HttpResponse, HttpServer,
};
use env_logger::Env;
use futures::future::{ok, Ready};
use log::info;

use crate::app_state::AppState;
use crate::auth::{login, signup, verify_token};
use crate::chat::{create_dm, get_messages, get_room, get_user_chats, post_message};
use crate::notifications::{get_notifications, mark_room_read};
use crate::projects::{
    approve_join_request, create_project, decline_join_request, delete_project, demote_admin,
    get_project, list_join_requests, list_projects, promote_admin, remove_member, set_visibility,
    submit_join_request, update_project,
};
use crate::users::{find_user_email, get_user_by_id, update_profile};
use crate::web_socket_server::ws_index;

#[derive(Debug)]
pub struct Authentication {
    secret: String,
}

impl Authentication {
    pub fn new(secret: impl Into<String>) -> Self {
        Authentication {
            secret: secret.into(),
        }
    }
}

impl<S, B> Transform<S, ServiceRequest> for Authentication
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<BoxBody>;
    type Error = Error;
    type Transform = AuthMiddleware<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(AuthMiddleware {
            service,
            secret: self.secret.clone(),
        })
    }
}

pub struct AuthMiddleware<S> {
    service: S,
    secret: String,
}

impl<S, B> Service<ServiceRequest> for AuthMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<BoxBody>;
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>>>>;

    fn poll_ready(&self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.service.poll_ready(cx)
    }

    fn call(&self, req: ServiceRequest) -> Self::Future {
        // Extract "Bearer <token>" from the Authorization header if present
        if let Some(auth_header) = req.headers().get(http::header::AUTHORIZATION) {
            if let Ok(auth_str) = auth_header.to_str() {
                if let Some(token) = auth_str.strip_prefix("Bearer ") {
                    match verify_token(token.trim(), &self.secret) {
                        Ok(user_id) => {
                            req.extensions_mut().insert(user_id);
                        }
                        Err(e) => {
                            let (req_parts, _payload) = req.into_parts();
                            let resp = HttpResponse::Unauthorized()
                                .body(format!("Invalid token: {}", e))
                                .map_into_boxed_body();
                            let srv_resp = ServiceResponse::new(req_parts, resp);
                            return Box::pin(async move { Ok(srv_resp) });
                        }
                    }
                }
            }
        }

        let fut = self.service.call(req);
        Box::pin(async move {
            let res = fut.await?;
            Ok(res.map_into_boxed_body())
        })
    }
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let config = config::Config::from_env();
    let store: Arc<dyn store::DataStore> = Arc::new(
        store::mongo::MongoStore::init(&config.mongo_uri, &config.database_name)
            .await
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, format!("mongo init: {}", e)))?,
    );
    let ledger: Arc<dyn ledger::ReadStateLedger> = Arc::new(ledger::MemoryLedger::new());
    let media: Arc<dyn storage::ObjectStorage> =
        Arc::new(storage::DiskStorage::new(config.media_root.clone()));
    let chat_server = chat_server::ChatServer::new(store.clone(), ledger.clone()).start();

    let frontend_origin = config.frontend_origin.clone();
    let bind_addr = config.bind_addr.clone();
    let jwt_secret = config.jwt_secret.clone();

    info!("server running at http://{}", bind_addr);
    info!("allowed CORS origin: {}", frontend_origin);

    HttpServer::new(move || {
        let cors = Cors::default()
            .allowed_origin(&frontend_origin)
            .allowed_methods(vec!["GET", "POST", "PUT", "DELETE", "OPTIONS"])
            .allowed_headers(vec![
                http::header::CONTENT_TYPE,
                http::header::ACCEPT,
                http::header::AUTHORIZATION,
            ])
            .supports_credentials()
            .max_age(3600);

        App::new()
            .wrap(Logger::default())
            .wrap(cors)
            .wrap(Authentication::new(jwt_secret.clone()))
            .app_data(web::Data::new(AppState {
                chat_server: chat_server.clone(),
                store: store.clone(),
                ledger: ledger.clone(),
                storage: media.clone(),
                config: config.clone(),
            }))
            .service(
                web::scope("/auth")
                    .route("/signup", web::post().to(signup))
                    .route("/login", web::post().to(login)),
            )
            // PROJECTS
            .service(
                web::scope("/projects")
                    .route("", web::post().to(create_project))
                    .route("", web::get().to(list_projects))
                    .service(
                        web::scope("/{project_id}")
                            .route("", web::get().to(get_project))
                            .route("", web::put().to(update_project))
                            .route("", web::delete().to(delete_project))
                            .route("/visibility", web::post().to(set_visibility))
                            .service(
                                web::scope("/admins")
                                    .route("", web::post().to(promote_admin))
                                    .route("", web::delete().to(demote_admin)),
                            )
                            .route("/members", web::delete().to(remove_member))
                            .service(
                                web::scope("/join_requests")
                                    .route("", web::post().to(submit_join_request))
                                    .route("", web::get().to(list_join_requests))
                                    .route(
                                        "/{request_id}/approve",
                                        web::post().to(approve_join_request),
                                    )
                                    .route(
                                        "/{request_id}/decline",
                                        web::post().to(decline_join_request),
                                    ),
                            ),
                    ),
            )
            // CHATS
            .service(
                web::scope("/chats")
                    .route("", web::get().to(get_user_chats))
                    .route("/dm", web::post().to(create_dm))
                    .route("/{room_id}", web::get().to(get_room))
                    .route("/{room_id}/messages", web::get().to(get_messages))
                    .route("/{room_id}/messages", web::post().to(post_message)),
            )
            // NOTIFICATIONS
            .service(
                web::scope("/notifications")
                    .route("", web::get().to(get_notifications))
                    .route("/{room_id}/read", web::post().to(mark_room_read)),
            )
            // USERS
            .service(
                web::scope("/users")
                    .route("/find_user_email", web::get().to(find_user_email))
                    .route("/get/{id}", web::get().to(get_user_by_id))
                    .route("/{id}/profile", web::put().to(update_profile)),
            )
            // WEBSOCKET route for real-time
            .service(web::resource("/ws").route(web::get().to(ws_index)))
    })
    .bind(bind_addr)?
    .run()
    .await
}
