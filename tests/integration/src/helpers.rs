//! Test helpers for integration tests
//!
//! Provides utilities for spawning an in-process gateway, issuing tokens,
//! and waiting on client state.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chat_client::{ChatClient, ClientState, TransportSession};
use chat_common::{
    AppConfig, AppSettings, ClientConfig, Environment, JwtConfig, JwtService, RealtimeConfig,
    ServerConfig, SnowflakeConfig,
};
use chat_core::{Message, NewMessage, Snowflake, UserSummary};
use chat_gateway::{create_gateway_state, local_url, serve, GatewayState};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Secret shared by the test gateway and the token issuer
pub const TEST_JWT_SECRET: &str = "integration-test-secret";

/// Upper bound for any single wait on client state
pub const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Gateway configuration for tests: ephemeral port and short timers
pub fn test_config() -> AppConfig {
    AppConfig {
        app: AppSettings {
            name: "chat-gateway-test".to_string(),
            env: Environment::Development,
        },
        gateway: ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
        },
        jwt: JwtConfig {
            secret: TEST_JWT_SECRET.to_string(),
            access_token_expiry: 900,
        },
        realtime: RealtimeConfig {
            heartbeat_interval_ms: 1_000,
            heartbeat_timeout_ms: 5_000,
            typing_ttl_ms: 1_500,
            ..RealtimeConfig::default()
        },
        snowflake: SnowflakeConfig { worker_id: 1 },
    }
}

/// Gateway instance that manages lifecycle
pub struct TestGateway {
    pub addr: SocketAddr,
    pub state: GatewayState,
    jwt: JwtService,
    handle: JoinHandle<()>,
}

impl TestGateway {
    /// Start a new gateway on an ephemeral port
    pub async fn start() -> Result<Self> {
        Self::start_with_config(test_config()).await
    }

    /// Start a gateway with custom config
    pub async fn start_with_config(config: AppConfig) -> Result<Self> {
        let _ = chat_common::try_init_tracing();

        let listener = TcpListener::bind(config.gateway.address()).await?;
        let addr = listener.local_addr()?;
        let jwt = JwtService::new(&config.jwt.secret, config.jwt.access_token_expiry);
        let state = create_gateway_state(config);

        let handle = tokio::spawn({
            let state = state.clone();
            async move {
                serve(listener, state).await.ok();
            }
        });

        Ok(Self {
            addr,
            state,
            jwt,
            handle,
        })
    }

    pub fn url(&self) -> String {
        local_url(self.addr)
    }

    /// Issue an access token for `user`
    pub fn token_for(&self, user: &UserSummary) -> Result<String> {
        Ok(self.jwt.issue_access_token(user)?)
    }

    /// Client configuration pointing at this gateway
    pub fn client_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new(self.url());
        config.max_reconnect_attempts = 2;
        config.reconnect_base_delay_ms = 50;
        config.reconnect_max_delay_ms = 200;
        config.confirmation_timeout_ms = 3_000;
        config
    }

    /// A client that has not connected yet
    pub fn client(&self) -> ChatClient {
        ChatClient::new(Arc::new(TransportSession::new(self.client_config())))
    }

    /// Store a message as if `sender` had submitted it with `temp_id`,
    /// without any confirmation or fan-out reaching a client
    pub async fn store_as_sent(
        &self,
        conversation_id: Snowflake,
        sender: &UserSummary,
        content: &str,
        temp_id: &str,
    ) -> Result<Message> {
        let message = self
            .state
            .store()
            .append_message(NewMessage {
                id: self.state.ids().generate(),
                conversation_id,
                sender: sender.clone(),
                content: content.to_string(),
                attachments: Vec::new(),
                reply_to: None,
                temp_id: Some(temp_id.to_string()),
            })
            .await?;
        Ok(message)
    }

    /// Number of messages the gateway holds for a conversation
    pub async fn stored_count(&self, conversation_id: Snowflake) -> Result<usize> {
        Ok(self.state.store().recent_messages(conversation_id, usize::MAX).await?.len())
    }

    /// A connected client whose `ready` has been applied
    pub async fn connect(&self, user: &UserSummary) -> Result<ChatClient> {
        let client = self.client();
        client.connect(self.token_for(user)?).await?;
        let id = user.id;
        let ready = wait_until(&client, |s| s.user.as_ref().is_some_and(|u| u.id == id)).await;
        anyhow::ensure!(ready, "ready was not applied for {}", user.display_name);
        Ok(client)
    }
}

impl Drop for TestGateway {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Wait until `check` holds for the client's state, or [`WAIT_TIMEOUT`] passes
///
/// Returns the final value of `check`.
pub async fn wait_until(client: &ChatClient, check: impl Fn(&ClientState) -> bool) -> bool {
    let mut changes = client.watch_changes();
    let deadline = Instant::now() + WAIT_TIMEOUT;
    loop {
        if client.with_state(&check) {
            return true;
        }
        match tokio::time::timeout_at(deadline, changes.changed()).await {
            Ok(Ok(())) => {}
            _ => return client.with_state(&check),
        }
    }
}

/// Wait for a condition on the gateway side
pub async fn wait_for(check: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + WAIT_TIMEOUT;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}
