//! Shared process state (5. Shared resources): one [`Processor`], one
//! session store, and the dispatch config, handed to every axum handler via
//! `State`.

use std::sync::Arc;
use std::time::Duration;

use relay_core::commands::CommandEngine;
use relay_core::middleware::Redactor;
use relay_core::processor::Processor;
use relay_core::session::store::{InMemorySessionStore, SessionStore};
use relay_core::backend::RelayConfig;

use crate::config::Args;

#[derive(Clone)]
pub struct ServerState {
    pub processor: Arc<Processor>,
    pub sessions: Arc<dyn SessionStore>,
    pub config: Arc<RelayConfig>,
    pub disable_auth: bool,
    pub auth_key: Option<String>,
}

impl ServerState {
    pub fn new(args: &Args, config: Arc<RelayConfig>) -> Self {
        let reasoning = (*config.reasoning).clone();
        let command_engine = CommandEngine::new(&args.command_prefix, true, reasoning);
        let known_keys = config.keys.values().flat_map(|v| v.iter()).map(|k| k.current()).collect();
        let redactor = Redactor::new(known_keys, &args.command_prefix);
        let processor = Arc::new(Processor::new(config.clone(), command_engine, redactor));
        ServerState {
            processor,
            sessions: Arc::new(InMemorySessionStore::new()),
            config,
            disable_auth: args.disable_auth,
            auth_key: args.auth_key.clone(),
        }
    }

    /// Periodically evicts idle sessions (4.D); runs for the life of the process.
    pub fn spawn_session_sweep(&self, ttl_secs: u64) {
        let sessions = self.sessions.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(ttl_secs.max(1) / 4 + 1));
            loop {
                interval.tick().await;
                sessions.sweep(ttl_secs).await;
            }
        });
    }
}
