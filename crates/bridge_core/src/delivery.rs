use std::{path::Path, sync::Arc, time::Duration};

use anyhow::Result;
use rand::{distributions::Alphanumeric, Rng};
use tracing::{debug, warn};

use shared::{
    domain::{PuppetId, RemoteRoom},
    protocol::ReceiveParams,
};

use crate::{
    identity,
    progress::ProgressDebouncer,
    remote::{noop_progress, OutboundContent, ProgressFn, RemoteConnection},
    EventStore, PuppetBridge,
};

/// Prefix of synthetic identifiers recorded for failed sends.
pub const FAILED_EVENT_PREFIX: &str = "err";
/// Prefix of identifiers pre-assigned to file transfers before the remote
/// file identifier is known.
pub const PLACEHOLDER_EVENT_PREFIX: &str = "pf";

const SYNTHETIC_SUFFIX_LEN: usize = 16;

#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Quiescence window for collapsing upload-progress annotations.
    pub progress_window: Duration,
    /// Wait after a transfer settles before the final exclusive annotation,
    /// letting any in-flight debounced progress annotation land first.
    pub completion_grace: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            progress_window: Duration::from_millis(200),
            completion_grace: Duration::from_millis(500),
        }
    }
}

/// Outcome of one remote send attempt, computed before the identifier is
/// encoded into the shared correlation keyspace.
enum SendOutcome {
    Sent(String),
    Failed(String),
}

/// Sends constructed messages and files to resolved remote actors, records
/// the correlation for every attempt, and posts status annotations.
///
/// Remote-side failures are converted into synthetic identifiers and failure
/// annotations; they never propagate to the caller, so the local network is
/// never blocked by the remote network.
#[derive(Clone)]
pub struct DeliveryEngine {
    bridge: Arc<dyn PuppetBridge>,
    store: Arc<dyn EventStore>,
    options: EngineOptions,
}

impl DeliveryEngine {
    pub fn new(
        bridge: Arc<dyn PuppetBridge>,
        store: Arc<dyn EventStore>,
        options: EngineOptions,
    ) -> Self {
        Self {
            bridge,
            store,
            options,
        }
    }

    /// Outbound message path. The correlation is persisted unconditionally,
    /// before any annotation, so failed attempts keep a stable handle too.
    pub async fn deliver(
        &self,
        conn: &Arc<dyn RemoteConnection>,
        puppet_id: PuppetId,
        room: &RemoteRoom,
        local_event_id: &str,
        content: &OutboundContent,
    ) -> Result<()> {
        let outcome = match identity::resolve_target(conn, room).await {
            Ok(target) => match target.send_message(content).await {
                Ok(message_id) => SendOutcome::Sent(message_id),
                Err(err) => SendOutcome::Failed(err.to_string()),
            },
            Err(err) => SendOutcome::Failed(err.to_string()),
        };

        let remote_event_id = match &outcome {
            SendOutcome::Sent(message_id) => message_id.clone(),
            SendOutcome::Failed(reason) => {
                warn!(
                    puppet_id = puppet_id.0,
                    room = %room.encode(),
                    local_event_id,
                    reason,
                    "delivery: remote send failed, recording synthetic identifier"
                );
                synthetic_event_id(FAILED_EVENT_PREFIX)
            }
        };

        self.store
            .insert(puppet_id, &room.encode(), local_event_id, &remote_event_id)
            .await?;

        let receipt = ReceiveParams::for_room(puppet_id, room).with_event_id(local_event_id);
        if let Err(err) = self.bridge.send_read_receipt(&receipt).await {
            warn!(
                puppet_id = puppet_id.0,
                local_event_id, "delivery: read receipt failed: {err}"
            );
        }

        if matches!(outcome, SendOutcome::Failed(_)) {
            self.annotate(conn, puppet_id, room, &remote_event_id, "failed", false)
                .await;
        }

        Ok(())
    }

    /// Outbound file path. A placeholder identifier is assigned and persisted
    /// before the transfer starts so progress annotations have a stable
    /// target; the final exclusive annotation supersedes them. No remote-side
    /// error escapes this call.
    pub async fn deliver_file(
        &self,
        conn: &Arc<dyn RemoteConnection>,
        puppet_id: PuppetId,
        room: &RemoteRoom,
        local_event_id: &str,
        path: &Path,
        filename: &str,
    ) -> Result<()> {
        let remote_event_id = synthetic_event_id(PLACEHOLDER_EVENT_PREFIX);
        self.store
            .insert(puppet_id, &room.encode(), local_event_id, &remote_event_id)
            .await?;

        let annotation_params = match identity::resolve_annotation_identity(conn, room).await {
            Ok(user) => Some(ReceiveParams::for_room(puppet_id, room).with_user(user)),
            Err(err) => {
                warn!(
                    puppet_id = puppet_id.0,
                    room = %room.encode(),
                    "delivery: skipping transfer annotations: {err}"
                );
                None
            }
        };

        let progress: ProgressFn = match annotation_params.clone() {
            Some(params) => {
                let engine = self.clone();
                let event_id = remote_event_id.clone();
                let debouncer = Arc::new(ProgressDebouncer::spawn(
                    self.options.progress_window,
                    move |percent| {
                        let engine = engine.clone();
                        let params = params.clone();
                        let event_id = event_id.clone();
                        async move {
                            if let Err(err) = engine
                                .mark_message(&params, &event_id, &format!("upload {percent}%"), false)
                                .await
                            {
                                warn!("delivery: progress annotation failed: {err}");
                            }
                        }
                    },
                ));
                Arc::new(move |percent| debouncer.observe(percent))
            }
            None => noop_progress(),
        };

        let result = match identity::resolve_target(conn, room).await {
            Ok(target) => {
                target
                    .send_file(path, filename, Arc::clone(&progress))
                    .await
            }
            Err(err) => Err(err),
        };
        // Closes the debouncer so the last observed percentage flushes.
        drop(progress);

        tokio::time::sleep(self.options.completion_grace).await;

        if let Err(err) = &result {
            warn!(
                puppet_id = puppet_id.0,
                room = %room.encode(),
                filename,
                "delivery: file transfer failed: {err}"
            );
        }

        if let Some(params) = &annotation_params {
            let text = if result.is_ok() { "sent" } else { "failed" };
            if let Err(err) = self
                .mark_message(params, &remote_event_id, text, true)
                .await
            {
                warn!("delivery: final transfer annotation failed: {err}");
            }
        }

        Ok(())
    }

    /// Posts a status annotation. An exclusive annotation clears all prior
    /// annotations from this engine before the new one becomes visible.
    pub async fn mark_message(
        &self,
        params: &ReceiveParams,
        remote_event_id: &str,
        text: &str,
        exclusive: bool,
    ) -> Result<()> {
        if exclusive {
            self.bridge
                .remove_all_reactions(params, remote_event_id)
                .await?;
        }
        self.bridge
            .send_reaction(params, remote_event_id, text)
            .await
    }

    /// Translates a remote recall into an additive "recalled" annotation on
    /// the correlated remote event. The local event is never deleted.
    pub async fn annotate_recall(
        &self,
        conn: &Arc<dyn RemoteConnection>,
        puppet_id: PuppetId,
        room: &RemoteRoom,
        remote_message_id: &str,
    ) -> Result<()> {
        let correlated = self
            .store
            .local_event_id(puppet_id, &room.encode(), remote_message_id)
            .await?;
        if correlated.is_none() {
            debug!(
                puppet_id = puppet_id.0,
                room = %room.encode(),
                remote_message_id,
                "delivery: recall for uncorrelated event ignored"
            );
            return Ok(());
        }
        self.annotate(conn, puppet_id, room, remote_message_id, "recalled", false)
            .await;
        Ok(())
    }

    async fn annotate(
        &self,
        conn: &Arc<dyn RemoteConnection>,
        puppet_id: PuppetId,
        room: &RemoteRoom,
        remote_event_id: &str,
        text: &str,
        exclusive: bool,
    ) {
        match identity::resolve_annotation_identity(conn, room).await {
            Ok(user) => {
                let params = ReceiveParams::for_room(puppet_id, room).with_user(user);
                if let Err(err) = self
                    .mark_message(&params, remote_event_id, text, exclusive)
                    .await
                {
                    warn!(
                        puppet_id = puppet_id.0,
                        remote_event_id, "delivery: '{text}' annotation failed: {err}"
                    );
                }
            }
            Err(err) => {
                warn!(
                    puppet_id = puppet_id.0,
                    remote_event_id, "delivery: '{text}' annotation skipped: {err}"
                );
            }
        }
    }
}

/// Synthetic identifiers carry 16 random alphanumerics so they cannot collide
/// with genuine remote identifiers or each other.
fn synthetic_event_id(prefix: &str) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SYNTHETIC_SUFFIX_LEN)
        .map(char::from)
        .collect();
    format!("{prefix}{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthetic_ids_carry_prefix_and_sixteen_alphanumerics() {
        let id = synthetic_event_id(FAILED_EVENT_PREFIX);
        assert!(id.starts_with("err"));
        let suffix = &id["err".len()..];
        assert_eq!(suffix.len(), 16);
        assert!(suffix.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn synthetic_ids_do_not_repeat() {
        let first = synthetic_event_id(PLACEHOLDER_EVENT_PREFIX);
        let second = synthetic_event_id(PLACEHOLDER_EVENT_PREFIX);
        assert_ne!(first, second);
    }
}
