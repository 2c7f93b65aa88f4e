//! Enforcement protocol types and the outbound transport port.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::timer::TabId;

/// One-shot command pushed to a tab's page agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AgentCommand {
    /// Suppress playback and show the block overlay.
    BlockVideo,
    /// Restore playback.
    UnblockVideo,
}

/// Answer to a tab's `checkMyStatus` handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnforcementAction {
    Block,
    Unblock,
}

/// A push message addressed to one tab.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentPush {
    pub tab_id: TabId,
    pub command: AgentCommand,
}

/// The page agent was unreachable (tab gone, mid-reload, no listener).
#[derive(Debug, Error)]
#[error("agent for tab {tab} unreachable: {reason}")]
pub struct DeliveryError {
    pub tab: TabId,
    pub reason: String,
}

/// Outbound channel to page agents.
///
/// Delivery is fire-and-forget: the engine logs failures and never rolls
/// back state or retries; the polling handshake is the correctness
/// backstop.
#[async_trait]
pub trait AgentTransport: Send + Sync {
    async fn send(&self, tab: TabId, command: AgentCommand) -> Result<(), DeliveryError>;
}

#[async_trait]
impl<T: AgentTransport + ?Sized> AgentTransport for &T {
    async fn send(&self, tab: TabId, command: AgentCommand) -> Result<(), DeliveryError> {
        (**self).send(tab, command).await
    }
}

#[async_trait]
impl<T: AgentTransport + ?Sized> AgentTransport for std::sync::Arc<T> {
    async fn send(&self, tab: TabId, command: AgentCommand) -> Result<(), DeliveryError> {
        (**self).send(tab, command).await
    }
}

/// Transport that drops every command. Used by read-only surfaces that
/// have no agents connected.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullTransport;

#[async_trait]
impl AgentTransport for NullTransport {
    async fn send(&self, _tab: TabId, _command: AgentCommand) -> Result<(), DeliveryError> {
        Ok(())
    }
}
