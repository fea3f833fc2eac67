// src/web_socket_server.rs

use std::time::{Duration, Instant};

use actix::prelude::*;
use actix_web::{web, Error, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use log::warn;
use serde::Deserialize;

use crate::app_state::AppState;
use crate::auth::verify_token;
use crate::chat_server::{ChatServer, Connect, Disconnect, MarkRead, SendMessage, WsMessage};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
const CLIENT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum ClientFrame {
    Send { room_id: String, text: String },
    Read { room_id: String },
}

pub struct WebSocketConnection {
    pub user_id: String,
    pub hb: Instant,
    pub addr: Addr<ChatServer>,
}

impl Actor for WebSocketConnection {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        self.hb(ctx);
        self.addr.do_send(Connect {
            user_id: self.user_id.clone(),
            addr: ctx.address().recipient(),
        });
    }

    fn stopped(&mut self, ctx: &mut Self::Context) {
        self.addr.do_send(Disconnect {
            user_id: self.user_id.clone(),
            addr: ctx.address().recipient(),
        });
    }
}

impl WebSocketConnection {
    fn hb(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.hb) > CLIENT_TIMEOUT {
                warn!("ws client heartbeat failed for {}, disconnecting", act.user_id);
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for WebSocketConnection {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(payload)) => {
                self.hb = Instant::now();
                ctx.pong(&payload);
            }
            Ok(ws::Message::Pong(_)) => {
                self.hb = Instant::now();
            }
            Ok(ws::Message::Text(text)) => match serde_json::from_str::<ClientFrame>(&text) {
                Ok(ClientFrame::Send { room_id, text }) => {
                    self.addr
                        .send(SendMessage {
                            user_id: self.user_id.clone(),
                            room_id,
                            text,
                        })
                        .into_actor(self)
                        .then(|res, _act, ctx| {
                            match res {
                                Ok(Ok(message)) => {
                                    // Echo the persisted message back, so the
                                    // sender sees the server timestamp.
                                    ctx.text(
                                        serde_json::to_string(&message).unwrap_or_default(),
                                    );
                                }
                                Ok(Err(err)) => {
                                    ctx.text(
                                        serde_json::json!({ "error": err.to_string() })
                                            .to_string(),
                                    );
                                }
                                Err(err) => {
                                    warn!("chat server mailbox error: {}", err);
                                }
                            }
                            fut::ready(())
                        })
                        .spawn(ctx);
                }
                Ok(ClientFrame::Read { room_id }) => {
                    self.addr.do_send(MarkRead {
                        user_id: self.user_id.clone(),
                        room_id,
                    });
                }
                Err(err) => {
                    ctx.text(serde_json::json!({ "error": format!("bad frame: {}", err) })
                        .to_string());
                }
            },
            Ok(ws::Message::Close(reason)) => {
                ctx.close(reason);
                ctx.stop();
            }
            Err(err) => {
                warn!("ws protocol error for {}: {}", self.user_id, err);
                ctx.stop();
            }
            _ => {}
        }
    }
}

impl Handler<WsMessage> for WebSocketConnection {
    type Result = ();

    fn handle(&mut self, msg: WsMessage, ctx: &mut ws::WebsocketContext<Self>) {
        let WsMessage::Chat(message) = msg;
        ctx.text(serde_json::to_string(&message).unwrap_or_default());
    }
}

#[derive(Deserialize)]
pub struct WsAuth {
    pub token: String,
}

/// GET /ws?token=<jwt>
pub async fn ws_index(
    req: HttpRequest,
    stream: web::Payload,
    data: web::Data<AppState>,
    auth: web::Query<WsAuth>,
) -> Result<HttpResponse, Error> {
    let user_id = match verify_token(&auth.token, &data.config.jwt_secret) {
        Ok(user_id) => user_id,
        Err(_) => return Ok(HttpResponse::Unauthorized().body("Invalid token")),
    };
    ws::start(
        WebSocketConnection {
            user_id,
            hb: Instant::now(),
            addr: data.chat_server.clone(),
        },
        &req,
        stream,
    )
}
