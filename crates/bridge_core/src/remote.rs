use std::{path::Path, sync::Arc};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tokio::sync::mpsc;

use shared::{
    domain::{RemoteGroupId, RemoteRoom, RemoteUserId},
    protocol::{RemoteEvent, RemoteUserInfo},
};

/// Capacity of the per-session remote event channel.
pub const REMOTE_EVENT_CHANNEL_CAPACITY: usize = 256;

/// Upload/transfer progress callback, invoked with a percentage in 0..=100.
pub type ProgressFn = Arc<dyn Fn(u8) + Send + Sync>;

pub fn noop_progress() -> ProgressFn {
    Arc::new(|_| {})
}

/// Outbound content addressed to a remote actor. Audio is pre-transcoded to
/// the remote codec before it reaches this type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundContent {
    Text(String),
    Image { url: String },
    Audio { path: std::path::PathBuf },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupRole {
    Owner,
    Admin,
    Member,
}

#[derive(Debug, Clone)]
pub struct GroupMember {
    pub user_id: RemoteUserId,
    pub display_name: Option<String>,
    pub role: GroupRole,
}

impl GroupMember {
    pub fn is_admin(&self) -> bool {
        matches!(self.role, GroupRole::Owner | GroupRole::Admin)
    }
}

#[derive(Debug, Clone)]
pub struct GroupProfile {
    pub name: Option<String>,
    pub avatar_url: Option<String>,
}

/// A direct contact on the remote network.
#[async_trait]
pub trait RemoteContact: Send + Sync {
    fn user_id(&self) -> RemoteUserId;
    async fn profile(&self) -> Result<RemoteUserInfo>;
    /// Sends a message and returns the remote message identifier.
    async fn send_message(&self, content: &OutboundContent) -> Result<String>;
    async fn send_file(&self, path: &Path, filename: &str, progress: ProgressFn) -> Result<()>;
    /// Resolves a downloadable URL for a file the contact shared.
    async fn file_url(&self, file_id: &str) -> Result<String>;
}

/// A group on the remote network.
#[async_trait]
pub trait RemoteGroup: Send + Sync {
    fn group_id(&self) -> RemoteGroupId;
    async fn profile(&self) -> Result<GroupProfile>;
    async fn members(&self) -> Result<Vec<GroupMember>>;
    async fn send_message(&self, content: &OutboundContent) -> Result<String>;
    async fn upload_file(&self, path: &Path, filename: &str, progress: ProgressFn) -> Result<()>;
}

/// One live, exclusively owned connection to the remote network.
#[async_trait]
pub trait RemoteConnection: Send + Sync {
    /// Submits the credential. Completion is reported asynchronously through
    /// the event channel (`Online`, `LoginSlider`, `LoginError`, ...).
    async fn login(&self, password: Option<&str>) -> Result<()>;
    /// Resumes a login held open on a slider challenge. Must not reconnect.
    async fn submit_slider_ticket(&self, ticket: &str) -> Result<()>;
    async fn logout(&self) -> Result<()>;
    async fn pick_friend(&self, user_id: RemoteUserId) -> Result<Arc<dyn RemoteContact>>;
    async fn pick_group(&self, group_id: RemoteGroupId) -> Result<Arc<dyn RemoteGroup>>;
}

/// Creates connections for bridged accounts. One connection per account.
#[async_trait]
pub trait RemoteConnector: Send + Sync {
    async fn connect(
        &self,
        remote_account_id: i64,
    ) -> Result<(Arc<dyn RemoteConnection>, mpsc::Receiver<RemoteEvent>)>;
}

pub struct MissingRemoteConnector;

#[async_trait]
impl RemoteConnector for MissingRemoteConnector {
    async fn connect(
        &self,
        remote_account_id: i64,
    ) -> Result<(Arc<dyn RemoteConnection>, mpsc::Receiver<RemoteEvent>)> {
        Err(anyhow!(
            "remote connector unavailable for account {remote_account_id}"
        ))
    }
}

/// Tagged send target replacing the friend-or-group union: one capability
/// surface, implemented per variant.
#[derive(Clone)]
pub enum SendTarget {
    Direct(Arc<dyn RemoteContact>),
    Group(Arc<dyn RemoteGroup>),
}

impl SendTarget {
    pub async fn send_message(&self, content: &OutboundContent) -> Result<String> {
        match self {
            SendTarget::Direct(contact) => contact.send_message(content).await,
            SendTarget::Group(group) => group.send_message(content).await,
        }
    }

    pub async fn send_file(
        &self,
        path: &Path,
        filename: &str,
        progress: ProgressFn,
    ) -> Result<()> {
        match self {
            SendTarget::Direct(contact) => contact.send_file(path, filename, progress).await,
            SendTarget::Group(group) => group.upload_file(path, filename, progress).await,
        }
    }

    pub fn room(&self) -> RemoteRoom {
        match self {
            SendTarget::Direct(contact) => RemoteRoom::Direct(contact.user_id()),
            SendTarget::Group(group) => RemoteRoom::Group(group.group_id()),
        }
    }
}
