use std::{path::PathBuf, sync::Arc};

use anyhow::{anyhow, Result};
use tokio::{
    sync::{mpsc, Mutex},
    task::JoinHandle,
};
use tracing::{info, warn};

use shared::{
    domain::{PuppetId, RemoteRoom},
    protocol::{
        MessageElement, ReceiveParams, RemoteEvent, RemoteMessage, RemoteRoomInfo, RemoteUserInfo,
    },
};

use crate::{
    delivery::DeliveryEngine,
    media,
    remote::RemoteConnection,
    AudioTranscoder, PuppetBridge,
};

/// Authentication sub-states. `Failed` is terminal for the attempt; a retry
/// requires a fresh operator-initiated login.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStage {
    CredentialSubmitted,
    AwaitingSlider,
    AwaitingQrCode,
    AwaitingDeviceApproval,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Authenticating(AuthStage),
    Online,
    Reconnecting,
    Terminated,
}

/// The live state of one bridged account: the single remote connection and
/// the lifecycle state driven by that connection's events.
///
/// All state mutation happens on the session's event loop or through the
/// registry's create/teardown path; there is no background mutation.
pub struct AccountSession {
    puppet_id: PuppetId,
    remote_account_id: i64,
    connection: Arc<dyn RemoteConnection>,
    bridge: Arc<dyn PuppetBridge>,
    engine: DeliveryEngine,
    transcoder: Arc<dyn AudioTranscoder>,
    http: reqwest::Client,
    tmp_dir: PathBuf,
    state: Mutex<SessionState>,
    event_task: Mutex<Option<JoinHandle<()>>>,
}

impl AccountSession {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        puppet_id: PuppetId,
        remote_account_id: i64,
        connection: Arc<dyn RemoteConnection>,
        bridge: Arc<dyn PuppetBridge>,
        engine: DeliveryEngine,
        transcoder: Arc<dyn AudioTranscoder>,
        http: reqwest::Client,
        tmp_dir: PathBuf,
    ) -> Arc<Self> {
        Arc::new(Self {
            puppet_id,
            remote_account_id,
            connection,
            bridge,
            engine,
            transcoder,
            http,
            tmp_dir,
            state: Mutex::new(SessionState::Disconnected),
            event_task: Mutex::new(None),
        })
    }

    pub fn puppet_id(&self) -> PuppetId {
        self.puppet_id
    }

    pub fn remote_account_id(&self) -> i64 {
        self.remote_account_id
    }

    pub fn connection(&self) -> &Arc<dyn RemoteConnection> {
        &self.connection
    }

    pub async fn state(&self) -> SessionState {
        *self.state.lock().await
    }

    pub(crate) async fn spawn_event_loop(
        self: &Arc<Self>,
        mut events: mpsc::Receiver<RemoteEvent>,
    ) {
        let session = Arc::clone(self);
        let task = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                session.handle_remote_event(event).await;
            }
        });
        *self.event_task.lock().await = Some(task);
    }

    /// Submits the stored credential on the held connection. Completion
    /// arrives asynchronously as `Online` / `LoginSlider` / `LoginError`.
    pub(crate) async fn login(&self, password: Option<&str>) {
        self.set_state(SessionState::Authenticating(AuthStage::CredentialSubmitted))
            .await;
        if let Err(err) = self.connection.login(password).await {
            self.set_state(SessionState::Authenticating(AuthStage::Failed))
                .await;
            self.notify(&format!("login failed: {err}")).await;
        }
    }

    /// Resumes a login paused on a slider challenge. The ticket is submitted
    /// back into the connection held open by the challenge; no new connection
    /// is created.
    pub async fn submit_slider_ticket(&self, ticket: &str) -> Result<()> {
        let state = self.state().await;
        if state != SessionState::Authenticating(AuthStage::AwaitingSlider) {
            return Err(anyhow!(
                "no slider challenge pending for puppet {} (state {state:?})",
                self.puppet_id.0
            ));
        }
        self.connection.submit_slider_ticket(ticket.trim()).await
    }

    pub(crate) async fn shutdown(&self) {
        self.set_state(SessionState::Terminated).await;
        if let Some(task) = self.event_task.lock().await.take() {
            task.abort();
        }
        if let Err(err) = self.connection.logout().await {
            warn!(puppet_id = self.puppet_id.0, "logout failed: {err}");
        }
    }

    async fn set_state(&self, next: SessionState) {
        let mut state = self.state.lock().await;
        if *state == SessionState::Terminated && next != SessionState::Terminated {
            return;
        }
        info!(
            puppet_id = self.puppet_id.0,
            from = ?*state,
            to = ?next,
            "session state transition"
        );
        *state = next;
    }

    /// Operator-facing notice on the status channel. Status notices are kept
    /// apart from conversational messages so the local-network UI cannot
    /// mistake one for the other.
    async fn notify(&self, text: &str) {
        if let Err(err) = self.bridge.send_status_message(self.puppet_id, text).await {
            warn!(
                puppet_id = self.puppet_id.0,
                "status notice failed: {err} (text: {text})"
            );
        }
    }

    async fn handle_remote_event(&self, event: RemoteEvent) {
        match event {
            RemoteEvent::Message(message) => self.relay_remote_message(message).await,
            RemoteEvent::SyncMessage { from_id, to_id, body } => {
                let params = ReceiveParams {
                    puppet_id: self.puppet_id,
                    room: RemoteRoomInfo {
                        room_id: RemoteRoom::Direct(to_id).encode(),
                        is_direct: true,
                        name: None,
                        avatar_url: None,
                    },
                    user: Some(RemoteUserInfo {
                        user_id: from_id.0.to_string(),
                        name: None,
                        avatar_url: None,
                    }),
                    event_id: None,
                };
                if let Err(err) = self.bridge.send_message(&params, &body).await {
                    warn!(
                        puppet_id = self.puppet_id.0,
                        "sync message relay failed: {err}"
                    );
                }
            }
            RemoteEvent::Recall {
                room, message_id, ..
            } => {
                if let Err(err) = self
                    .engine
                    .annotate_recall(&self.connection, self.puppet_id, &room, &message_id)
                    .await
                {
                    warn!(
                        puppet_id = self.puppet_id.0,
                        message_id, "recall annotation failed: {err}"
                    );
                }
            }
            RemoteEvent::LoginSlider { url } => {
                self.set_state(SessionState::Authenticating(AuthStage::AwaitingSlider))
                    .await;
                self.notify(&format!(
                    "slider captcha required: open {url}, solve it, then submit the ticket"
                ))
                .await;
            }
            RemoteEvent::LoginQrCode => {
                self.set_state(SessionState::Authenticating(AuthStage::AwaitingQrCode))
                    .await;
                self.notify(
                    "QR-code login is not supported; link the account again with a password",
                )
                .await;
                self.set_state(SessionState::Authenticating(AuthStage::Failed))
                    .await;
            }
            RemoteEvent::LoginDeviceLock { url } => {
                self.set_state(SessionState::Authenticating(
                    AuthStage::AwaitingDeviceApproval,
                ))
                .await;
                self.notify(&format!(
                    "device lock: approve this device from your phone, then visit {url}"
                ))
                .await;
            }
            RemoteEvent::LoginError { code, message } => {
                self.set_state(SessionState::Authenticating(AuthStage::Failed))
                    .await;
                self.notify(&format!("login error {code}: {message}")).await;
            }
            RemoteEvent::Online { remote_account_id } => {
                let previous = self.state().await;
                self.set_state(SessionState::Online).await;
                match previous {
                    SessionState::Reconnecting => self.notify("reconnected").await,
                    SessionState::Online => {}
                    _ => {
                        // The external identifier is published only once the
                        // session is actually online.
                        if let Err(err) = self
                            .bridge
                            .set_user_id(self.puppet_id, &remote_account_id.to_string())
                            .await
                        {
                            warn!(
                                puppet_id = self.puppet_id.0,
                                "publishing remote id failed: {err}"
                            );
                        }
                        self.notify(&format!("logged in as {remote_account_id}"))
                            .await;
                    }
                }
            }
            RemoteEvent::Offline { reason } => {
                if self.state().await == SessionState::Online {
                    self.set_state(SessionState::Reconnecting).await;
                    self.notify(&format!("connection lost ({reason}); reconnecting"))
                        .await;
                }
            }
        }
    }

    fn receive_params(&self, message: &RemoteMessage) -> ReceiveParams {
        ReceiveParams {
            puppet_id: self.puppet_id,
            room: RemoteRoomInfo {
                room_id: message.room.encode(),
                is_direct: message.room.is_direct(),
                name: message.room_name.clone(),
                avatar_url: message.room_avatar_url.clone(),
            },
            user: Some(RemoteUserInfo {
                user_id: message.sender.user_id.0.to_string(),
                name: message.sender.display_name.clone(),
                avatar_url: message.sender.avatar_url.clone(),
            }),
            event_id: Some(message.message_id.clone()),
        }
    }

    /// Relays one remote message to the local network, element by element.
    /// Element-level failures are logged and never stop the remaining
    /// elements or the session.
    async fn relay_remote_message(&self, message: RemoteMessage) {
        let params = self.receive_params(&message);
        for element in &message.elements {
            let result = match element {
                MessageElement::Text { text } => self.bridge.send_message(&params, text).await,
                MessageElement::Image { url } => self.bridge.send_image(&params, url).await,
                MessageElement::File { file_id, name } => {
                    self.relay_remote_file(&params, &message.room, file_id, name)
                        .await
                }
                MessageElement::Audio { url } => self.relay_remote_audio(&params, url).await,
                MessageElement::Other { summary } => {
                    self.bridge.send_message(&params, summary).await
                }
            };
            if let Err(err) = result {
                warn!(
                    puppet_id = self.puppet_id.0,
                    message_id = %message.message_id,
                    "inbound relay failed for one element: {err}"
                );
            }
        }
    }

    async fn relay_remote_file(
        &self,
        params: &ReceiveParams,
        room: &RemoteRoom,
        file_id: &str,
        name: &str,
    ) -> Result<()> {
        match room {
            RemoteRoom::Direct(user_id) => {
                let contact = self.connection.pick_friend(*user_id).await?;
                let url = contact.file_url(file_id).await?;
                self.bridge.send_file(params, &url, name).await
            }
            // Group files stay in the group file module on the remote side;
            // only announce them.
            RemoteRoom::Group(_) => {
                self.bridge
                    .send_message(params, &format!("uploaded a new group file: {name}"))
                    .await
            }
        }
    }

    async fn relay_remote_audio(&self, params: &ReceiveParams, url: &str) -> Result<()> {
        let fetched =
            media::download_temp_file(&self.http, &self.tmp_dir, url, "voice.slk").await;
        let transcoded = match fetched {
            Ok(path) => self.transcoder.silk_to_ogg(&path).await,
            Err(err) => Err(err),
        };
        match transcoded {
            Ok(ogg_path) => {
                self.bridge
                    .send_audio(params, &ogg_path.to_string_lossy())
                    .await
            }
            Err(err) => {
                warn!(
                    puppet_id = self.puppet_id.0,
                    "voice transcode failed, relaying placeholder: {err}"
                );
                self.bridge.send_message(params, "[voice message]").await
            }
        }
    }
}
