//! # Service Root
//!
//! The explicit bundle of capabilities every subsystem receives instead of
//! reaching for process-wide singletons. Built once at startup, torn down
//! at shutdown, and cloned cheaply (everything inside is an `Arc`).

use std::sync::Arc;

use crate::auth::TokenSigner;
use crate::config::Config;
use crate::hub::Hub;
use crate::queue::JobQueue;
use crate::ratelimit::RateLimiter;
use crate::repository::Repository;
use crate::sandbox::Sandbox;

/// Shared service handles. Used as the axum router state and handed to the
/// gateway, the hub, and the worker pool.
#[derive(Clone)]
pub struct AppServices {
    pub config: Arc<Config>,
    pub repository: Arc<dyn Repository>,
    pub ratelimiter: Arc<dyn RateLimiter>,
    pub queue: Arc<dyn JobQueue>,
    pub sandbox: Arc<dyn Sandbox>,
    pub hub: Arc<Hub>,
    pub signer: Arc<TokenSigner>,
}

impl AppServices {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<Config>,
        repository: Arc<dyn Repository>,
        ratelimiter: Arc<dyn RateLimiter>,
        queue: Arc<dyn JobQueue>,
        sandbox: Arc<dyn Sandbox>,
        hub: Arc<Hub>,
        signer: Arc<TokenSigner>,
    ) -> Self {
        Self {
            config,
            repository,
            ratelimiter,
            queue,
            sandbox,
            hub,
            signer,
        }
    }
}
