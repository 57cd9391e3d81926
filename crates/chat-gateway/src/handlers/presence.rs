//! Presence events: online list, status changes, and online/offline announcements

use crate::connection::{Connection, Exclude};
use crate::server::GatewayState;
use chat_core::protocol::{OnlineUsers, UserOffline, UserOnline, UserStatusChanged};
use chat_core::{DomainError, PresenceStatus, ServerEvent, Snowflake, StoreResult, UserSummary};

/// Handles presence events
pub struct PresenceHandler;

impl PresenceHandler {
    /// Reply with everyone currently online
    pub fn online_users(state: &GatewayState, connection: &Connection) -> StoreResult<()> {
        let users = state.presence().snapshot();
        connection.dispatch(&ServerEvent::OnlineUsers(OnlineUsers { users }));
        Ok(())
    }

    /// Change the caller's status and tell everyone
    pub fn update_status(state: &GatewayState, user: &UserSummary, status: PresenceStatus) -> StoreResult<()> {
        if !status.is_settable() {
            return Err(DomainError::ValidationError(format!("Status {status} cannot be set")));
        }

        if state.presence().set_status(user.id, status).is_some() {
            tracing::debug!(user_id = %user.id, status = %status, "Presence updated");
            state.connection_manager().broadcast(
                &ServerEvent::UserStatusChanged(UserStatusChanged { uid: user.id, status }),
                Exclude::Nobody,
            );
        }
        Ok(())
    }

    /// First connection of a user came up
    pub fn announce_online(state: &GatewayState, user: &UserSummary) {
        if state.presence().go_online(user) {
            state.connection_manager().broadcast(
                &ServerEvent::UserOnline(UserOnline {
                    uid: user.id,
                    name: user.display_name.clone(),
                }),
                Exclude::User(user.id),
            );
        }
    }

    /// Last connection of a user went away
    pub fn announce_offline(state: &GatewayState, user_id: Snowflake) {
        if state.presence().go_offline(user_id) {
            tracing::debug!(user_id = %user_id, "User presence set to offline");
            state.connection_manager().broadcast(
                &ServerEvent::UserOffline(UserOffline { uid: user_id }),
                Exclude::User(user_id),
            );
        }
    }
}
