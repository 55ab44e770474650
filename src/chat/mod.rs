//! Interface to the group-chat platform. The transport itself is an external
//! collaborator; the tracker only needs best-effort delivery.

use anyhow::Result;
use async_trait::async_trait;
use tracing::info;

/// Outbound message delivery to a chat. Failures are logged by callers and
/// never treated as fatal: a missed notification is recovered by the
/// operator-visible log, not by re-delivery.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn send(&self, chat_id: i64, text: &str) -> Result<()>;
}

/// Stand-in transport that emits notifications to the log. Used until a real
/// chat platform client is wired in, and useful when running headless.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogTransport;

#[async_trait]
impl ChatTransport for LogTransport {
    async fn send(&self, chat_id: i64, text: &str) -> Result<()> {
        info!(chat_id, %text, "chat notification");
        Ok(())
    }
}
