use std::sync::Arc;
use std::time::Instant;

use crate::auth::{IdentityResolver, JwtValidator};
use crate::config::Settings;
use crate::lifecycle::LifecycleSupervisor;
use crate::presence::PresenceBroadcaster;
use crate::registry::ConnectionRegistry;
use crate::relay::MessageRouter;
use crate::store::{MemoryMessageStore, MessageStore};

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub jwt_validator: Arc<JwtValidator>,
    pub identity_resolver: Arc<IdentityResolver>,
    pub registry: Arc<ConnectionRegistry>,
    pub presence: Arc<PresenceBroadcaster>,
    pub supervisor: Arc<LifecycleSupervisor>,
    pub router: Arc<MessageRouter>,
    pub message_store: Arc<dyn MessageStore>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(settings: Settings) -> Self {
        Self::with_store(settings, MemoryMessageStore::shared())
    }

    /// Wire the state against a specific message store collaborator.
    pub fn with_store(settings: Settings, message_store: Arc<dyn MessageStore>) -> Self {
        let jwt_validator = Arc::new(JwtValidator::new(&settings.jwt));
        let identity_resolver = Arc::new(IdentityResolver::new(
            jwt_validator.clone(),
            &settings.auth,
        ));
        let registry = Arc::new(ConnectionRegistry::new());
        let presence = Arc::new(PresenceBroadcaster::new(registry.clone()));
        let supervisor = Arc::new(LifecycleSupervisor::new(
            registry.clone(),
            presence.clone(),
        ));
        let router = Arc::new(MessageRouter::new(registry.clone()));

        Self {
            settings: Arc::new(settings),
            jwt_validator,
            identity_resolver,
            registry,
            presence,
            supervisor,
            router,
            message_store,
            start_time: Instant::now(),
        }
    }
}
