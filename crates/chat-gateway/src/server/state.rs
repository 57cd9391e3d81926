//! Gateway state
//!
//! Application state for the gateway server.

use crate::broadcast::Sequencer;
use crate::connection::ConnectionManager;
use crate::presence::PresenceRegistry;
use crate::typing::TypingRegistry;
use chat_common::{AppConfig, JwtService};
use chat_core::{ConversationStore, SnowflakeGenerator};
use std::sync::Arc;

/// Gateway application state
///
/// Holds all shared dependencies for the gateway server.
#[derive(Clone)]
pub struct GatewayState {
    store: Arc<dyn ConversationStore>,
    connection_manager: Arc<ConnectionManager>,
    presence: Arc<PresenceRegistry>,
    typing: Arc<TypingRegistry>,
    sequencer: Arc<Sequencer>,
    jwt_service: Arc<JwtService>,
    ids: Arc<SnowflakeGenerator>,
    config: Arc<AppConfig>,
}

impl GatewayState {
    pub fn new(config: AppConfig, store: Arc<dyn ConversationStore>, ids: SnowflakeGenerator) -> Self {
        let jwt_service = JwtService::new(&config.jwt.secret, config.jwt.access_token_expiry);
        let typing = TypingRegistry::new(config.realtime.typing_ttl());

        Self {
            store,
            connection_manager: ConnectionManager::new_shared(),
            presence: Arc::new(PresenceRegistry::new()),
            typing: Arc::new(typing),
            sequencer: Arc::new(Sequencer::new()),
            jwt_service: Arc::new(jwt_service),
            ids: Arc::new(ids),
            config: Arc::new(config),
        }
    }

    pub fn store(&self) -> &dyn ConversationStore {
        self.store.as_ref()
    }

    pub fn connection_manager(&self) -> &ConnectionManager {
        &self.connection_manager
    }

    pub fn presence(&self) -> &PresenceRegistry {
        &self.presence
    }

    pub fn typing(&self) -> &TypingRegistry {
        &self.typing
    }

    pub fn sequencer(&self) -> &Sequencer {
        &self.sequencer
    }

    pub fn jwt_service(&self) -> &JwtService {
        &self.jwt_service
    }

    /// Durable id source for conversations and messages
    pub fn ids(&self) -> &SnowflakeGenerator {
        &self.ids
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }
}

#[cfg(test)]
impl GatewayState {
    /// State over an in-memory store seeded with `conversations`
    pub(crate) fn for_tests(conversations: Vec<chat_core::Conversation>) -> Self {
        use chat_common::{AppSettings, Environment, JwtConfig, RealtimeConfig, ServerConfig, SnowflakeConfig};

        let config = AppConfig {
            app: AppSettings {
                name: "chat-gateway-test".to_string(),
                env: Environment::Development,
            },
            gateway: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 0,
            },
            jwt: JwtConfig {
                secret: "test-secret".to_string(),
                access_token_expiry: 900,
            },
            realtime: RealtimeConfig::default(),
            snowflake: SnowflakeConfig::default(),
        };
        let store = crate::store::MemoryStore::with_conversations(conversations);
        Self::new(config, Arc::new(store), SnowflakeGenerator::new(1))
    }
}

impl std::fmt::Debug for GatewayState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayState")
            .field("connection_manager", &self.connection_manager)
            .field("presence", &self.presence.len())
            .field("config", &"AppConfig")
            .finish()
    }
}
