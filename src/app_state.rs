// src/app_state.rs

use std::sync::Arc;

use actix::Addr;

use crate::chat_server::ChatServer;
use crate::config::Config;
use crate::ledger::ReadStateLedger;
use crate::storage::ObjectStorage;
use crate::store::DataStore;

#[derive(Clone)]
pub struct AppState {
    pub chat_server: Addr<ChatServer>,
    pub store: Arc<dyn DataStore>,
    pub ledger: Arc<dyn ReadStateLedger>,
    pub storage: Arc<dyn ObjectStorage>,
    pub config: Config,
}
