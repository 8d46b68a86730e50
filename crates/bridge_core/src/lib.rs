use std::{collections::HashMap, path::PathBuf, sync::Arc};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{info, warn};

use shared::{
    domain::{PuppetId, RemoteRoom},
    protocol::{ReceiveParams, RemoteRoomInfo},
};

pub mod delivery;
pub mod identity;
pub mod media;
pub mod progress;
pub mod remote;
pub mod session;

pub use delivery::{DeliveryEngine, EngineOptions, FAILED_EVENT_PREFIX, PLACEHOLDER_EVENT_PREFIX};
pub use progress::ProgressDebouncer;
pub use remote::{MissingRemoteConnector, RemoteConnector};
pub use session::{AccountSession, AuthStage, SessionState};

use remote::OutboundContent;

/// The bridging framework surface this core consumes. Implemented by the
/// hosting framework adapter; tests implement it with recording fakes.
#[async_trait]
pub trait PuppetBridge: Send + Sync {
    async fn send_message(&self, params: &ReceiveParams, body: &str) -> Result<()>;
    async fn send_image(&self, params: &ReceiveParams, url: &str) -> Result<()>;
    async fn send_file(&self, params: &ReceiveParams, url: &str, filename: &str) -> Result<()>;
    async fn send_audio(&self, params: &ReceiveParams, url: &str) -> Result<()>;
    async fn send_reaction(
        &self,
        params: &ReceiveParams,
        remote_event_id: &str,
        text: &str,
    ) -> Result<()>;
    async fn remove_all_reactions(
        &self,
        params: &ReceiveParams,
        remote_event_id: &str,
    ) -> Result<()>;
    async fn send_read_receipt(&self, params: &ReceiveParams) -> Result<()>;
    /// Operator-facing status channel, distinct from the message channel.
    async fn send_status_message(&self, puppet_id: PuppetId, text: &str) -> Result<()>;
    async fn set_user_id(&self, puppet_id: PuppetId, remote_account_id: &str) -> Result<()>;
}

/// Persistent `(puppet, room, local event) ⇄ remote event` correlation.
#[async_trait]
pub trait EventStore: Send + Sync {
    async fn insert(
        &self,
        puppet_id: PuppetId,
        room_id: &str,
        local_event_id: &str,
        remote_event_id: &str,
    ) -> Result<()>;
    async fn remote_event_id(
        &self,
        puppet_id: PuppetId,
        room_id: &str,
        local_event_id: &str,
    ) -> Result<Option<String>>;
    async fn local_event_id(
        &self,
        puppet_id: PuppetId,
        room_id: &str,
        remote_event_id: &str,
    ) -> Result<Option<String>>;
}

#[async_trait]
impl EventStore for storage::Storage {
    async fn insert(
        &self,
        puppet_id: PuppetId,
        room_id: &str,
        local_event_id: &str,
        remote_event_id: &str,
    ) -> Result<()> {
        self.insert_event_correlation(puppet_id.0, room_id, local_event_id, remote_event_id)
            .await
    }

    async fn remote_event_id(
        &self,
        puppet_id: PuppetId,
        room_id: &str,
        local_event_id: &str,
    ) -> Result<Option<String>> {
        self.remote_event_id_for(puppet_id.0, room_id, local_event_id)
            .await
    }

    async fn local_event_id(
        &self,
        puppet_id: PuppetId,
        room_id: &str,
        remote_event_id: &str,
    ) -> Result<Option<String>> {
        self.local_event_id_for(puppet_id.0, room_id, remote_event_id)
            .await
    }
}

/// Audio codec boundary. The remote network speaks silk; the local network
/// expects ogg.
#[async_trait]
pub trait AudioTranscoder: Send + Sync {
    async fn silk_to_ogg(&self, path: &std::path::Path) -> Result<PathBuf>;
    async fn ogg_to_silk(&self, path: &std::path::Path) -> Result<PathBuf>;
}

pub struct MissingAudioTranscoder;

#[async_trait]
impl AudioTranscoder for MissingAudioTranscoder {
    async fn silk_to_ogg(&self, _path: &std::path::Path) -> Result<PathBuf> {
        Err(anyhow!("audio transcoder unavailable"))
    }

    async fn ogg_to_silk(&self, _path: &std::path::Path) -> Result<PathBuf> {
        Err(anyhow!("audio transcoder unavailable"))
    }
}

/// Per-account data stored by the bridging framework. The credential comes
/// from here, never inline from event handlers.
#[derive(Debug, Clone, Deserialize)]
pub struct PuppetData {
    pub remote_account_id: i64,
    #[serde(default)]
    pub password: Option<String>,
}

/// Room reference as handed over by the bridging framework.
#[derive(Debug, Clone)]
pub struct RoomContext {
    pub puppet_id: PuppetId,
    pub room_id: String,
}

#[derive(Debug, Clone)]
pub struct UserContext {
    pub puppet_id: PuppetId,
    pub user_id: String,
}

#[derive(Debug, Clone)]
pub struct MessageEvent {
    pub local_event_id: String,
    pub body: String,
}

#[derive(Debug, Clone)]
pub struct FileEvent {
    pub local_event_id: String,
    pub url: String,
    pub filename: String,
}

/// Controller-owned table of active sessions, keyed by puppet id. Created at
/// process start, passed by reference to everything that needs session
/// lookup; there is no ambient global.
pub struct AccountRegistry {
    bridge: Arc<dyn PuppetBridge>,
    connector: Arc<dyn RemoteConnector>,
    transcoder: Arc<dyn AudioTranscoder>,
    engine: DeliveryEngine,
    http: reqwest::Client,
    tmp_dir: PathBuf,
    sessions: Mutex<HashMap<PuppetId, Arc<AccountSession>>>,
}

impl AccountRegistry {
    pub fn new(
        bridge: Arc<dyn PuppetBridge>,
        store: Arc<dyn EventStore>,
        connector: Arc<dyn RemoteConnector>,
    ) -> Arc<Self> {
        Self::new_with_dependencies(
            bridge,
            store,
            connector,
            Arc::new(MissingAudioTranscoder),
            EngineOptions::default(),
            std::env::temp_dir().join("puppet-bridge-media"),
        )
    }

    pub fn new_with_dependencies(
        bridge: Arc<dyn PuppetBridge>,
        store: Arc<dyn EventStore>,
        connector: Arc<dyn RemoteConnector>,
        transcoder: Arc<dyn AudioTranscoder>,
        options: EngineOptions,
        tmp_dir: PathBuf,
    ) -> Arc<Self> {
        let engine = DeliveryEngine::new(Arc::clone(&bridge), store, options);
        Arc::new(Self {
            bridge,
            connector,
            transcoder,
            engine,
            http: reqwest::Client::new(),
            tmp_dir,
            sessions: Mutex::new(HashMap::new()),
        })
    }

    pub async fn session(&self, puppet_id: PuppetId) -> Option<Arc<AccountSession>> {
        self.sessions.lock().await.get(&puppet_id).cloned()
    }

    /// Creates a session for a bridged account and starts its login. An
    /// existing session for the same puppet id is torn down first.
    pub async fn new_puppet(self: &Arc<Self>, puppet_id: PuppetId, data: PuppetData) -> Result<()> {
        if self.session(puppet_id).await.is_some() {
            self.delete_puppet(puppet_id).await;
        }

        let (connection, events) = self.connector.connect(data.remote_account_id).await?;
        let session = AccountSession::new(
            puppet_id,
            data.remote_account_id,
            connection,
            Arc::clone(&self.bridge),
            self.engine.clone(),
            Arc::clone(&self.transcoder),
            self.http.clone(),
            self.tmp_dir.clone(),
        );
        session.spawn_event_loop(events).await;
        self.sessions
            .lock()
            .await
            .insert(puppet_id, Arc::clone(&session));

        info!(
            puppet_id = puppet_id.0,
            remote_account_id = data.remote_account_id,
            "puppet session created"
        );
        session.login(data.password.as_deref()).await;
        Ok(())
    }

    /// Terminal teardown: logs out, stops event dispatch, removes the session
    /// from the table. No further events are dispatched after removal.
    pub async fn delete_puppet(&self, puppet_id: PuppetId) {
        let removed = self.sessions.lock().await.remove(&puppet_id);
        if let Some(session) = removed {
            session.shutdown().await;
            info!(puppet_id = puppet_id.0, "puppet session removed");
        }
    }

    /// Forwards an operator-supplied slider-captcha ticket into the session's
    /// open connection.
    pub async fn submit_slider_ticket(&self, puppet_id: PuppetId, ticket: &str) -> Result<()> {
        let session = self
            .session(puppet_id)
            .await
            .ok_or_else(|| anyhow!("no session for puppet {}", puppet_id.0))?;
        session.submit_slider_ticket(ticket).await
    }

    pub async fn handle_matrix_message(&self, room: &RoomContext, event: &MessageEvent) -> Result<()> {
        let Some((session, remote_room)) = self.route(room).await else {
            return Ok(());
        };
        self.engine
            .deliver(
                session.connection(),
                room.puppet_id,
                &remote_room,
                &event.local_event_id,
                &OutboundContent::Text(event.body.clone()),
            )
            .await
    }

    pub async fn handle_matrix_image(&self, room: &RoomContext, event: &FileEvent) -> Result<()> {
        let Some((session, remote_room)) = self.route(room).await else {
            return Ok(());
        };
        self.engine
            .deliver(
                session.connection(),
                room.puppet_id,
                &remote_room,
                &event.local_event_id,
                &OutboundContent::Image {
                    url: event.url.clone(),
                },
            )
            .await
    }

    pub async fn handle_matrix_file(&self, room: &RoomContext, event: &FileEvent) -> Result<()> {
        let Some((session, remote_room)) = self.route(room).await else {
            return Ok(());
        };
        let path =
            media::download_temp_file(&self.http, &self.tmp_dir, &event.url, &event.filename)
                .await?;
        self.engine
            .deliver_file(
                session.connection(),
                room.puppet_id,
                &remote_room,
                &event.local_event_id,
                &path,
                &event.filename,
            )
            .await
    }

    /// Voice messages are transcoded to the remote codec before sending; if
    /// the transcoder is unavailable the audio is delivered as a plain file.
    pub async fn handle_matrix_audio(&self, room: &RoomContext, event: &FileEvent) -> Result<()> {
        let Some((session, remote_room)) = self.route(room).await else {
            return Ok(());
        };
        let path =
            media::download_temp_file(&self.http, &self.tmp_dir, &event.url, &event.filename)
                .await?;
        match self.transcoder.ogg_to_silk(&path).await {
            Ok(silk_path) => {
                self.engine
                    .deliver(
                        session.connection(),
                        room.puppet_id,
                        &remote_room,
                        &event.local_event_id,
                        &OutboundContent::Audio { path: silk_path },
                    )
                    .await
            }
            Err(err) => {
                warn!(
                    puppet_id = room.puppet_id.0,
                    "voice transcode failed, sending as file: {err}"
                );
                self.engine
                    .deliver_file(
                        session.connection(),
                        room.puppet_id,
                        &remote_room,
                        &event.local_event_id,
                        &path,
                        &event.filename,
                    )
                    .await
            }
        }
    }

    /// Room-creation hook: validates the encoded room id and fills in display
    /// information from the remote network, or yields `None` if the room
    /// cannot be resolved.
    pub async fn create_room(&self, room: &RoomContext) -> Result<Option<RemoteRoomInfo>> {
        let Some((session, remote_room)) = self.route(room).await else {
            return Ok(None);
        };
        match remote_room {
            RemoteRoom::Direct(user_id) => {
                let contact = session.connection().pick_friend(user_id).await?;
                let profile = contact.profile().await?;
                Ok(Some(RemoteRoomInfo {
                    room_id: remote_room.encode(),
                    is_direct: true,
                    name: profile.name,
                    avatar_url: profile.avatar_url,
                }))
            }
            RemoteRoom::Group(group_id) => {
                let group = session.connection().pick_group(group_id).await?;
                let profile = group.profile().await?;
                Ok(Some(RemoteRoomInfo {
                    room_id: remote_room.encode(),
                    is_direct: false,
                    name: profile.name,
                    avatar_url: profile.avatar_url,
                }))
            }
        }
    }

    /// DM-room hook: the direct room for a remote user is its encoded id.
    pub async fn get_dm_room_id(&self, user: &UserContext) -> Option<String> {
        self.session(user.puppet_id).await?;
        let user_id: i64 = user.user_id.parse().ok()?;
        if user_id <= 0 {
            return None;
        }
        Some(RemoteRoom::Direct(shared::domain::RemoteUserId(user_id)).encode())
    }

    async fn route(&self, room: &RoomContext) -> Option<(Arc<AccountSession>, RemoteRoom)> {
        let session = match self.session(room.puppet_id).await {
            Some(session) => session,
            None => {
                warn!(
                    puppet_id = room.puppet_id.0,
                    room_id = %room.room_id,
                    "event for unknown puppet dropped"
                );
                return None;
            }
        };
        match RemoteRoom::parse(&room.room_id) {
            Ok(remote_room) => Some((session, remote_room)),
            Err(err) => {
                warn!(
                    puppet_id = room.puppet_id.0,
                    room_id = %room.room_id,
                    "undecodable room id dropped: {err}"
                );
                None
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
