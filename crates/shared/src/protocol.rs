use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{PuppetId, RemoteRoom, RemoteUserId};

/// A single piece of a remote message. Remote messages arrive as a chain of
/// elements; each element is relayed to the local network independently.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum MessageElement {
    Text { text: String },
    Image { url: String },
    File { file_id: String, name: String },
    Audio { url: String },
    Other { summary: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteSender {
    pub user_id: RemoteUserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteMessage {
    pub room: RemoteRoom,
    pub message_id: String,
    pub sender: RemoteSender,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_avatar_url: Option<String>,
    pub elements: Vec<MessageElement>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<DateTime<Utc>>,
}

/// Inbound events from the remote-network connection, delivered over a
/// bounded channel into the session's single dispatch loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum RemoteEvent {
    Message(RemoteMessage),
    /// A message this account sent from another client (double puppeting).
    SyncMessage {
        from_id: RemoteUserId,
        to_id: RemoteUserId,
        body: String,
    },
    Recall {
        room: RemoteRoom,
        message_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        operator_id: Option<RemoteUserId>,
    },
    LoginSlider {
        url: String,
    },
    LoginQrCode,
    LoginDeviceLock {
        url: String,
    },
    LoginError {
        code: i32,
        message: String,
    },
    Online {
        remote_account_id: i64,
    },
    Offline {
        reason: String,
    },
}

/// Room context attached to every call into the bridging framework
/// (who sent it, in which room, under which remote event id).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteRoomInfo {
    pub room_id: String,
    pub is_direct: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteUserInfo {
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiveParams {
    pub puppet_id: PuppetId,
    pub room: RemoteRoomInfo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<RemoteUserInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
}

impl ReceiveParams {
    /// Bare room context with no sender identity, used for read receipts.
    pub fn for_room(puppet_id: PuppetId, room: &RemoteRoom) -> Self {
        Self {
            puppet_id,
            room: RemoteRoomInfo {
                room_id: room.encode(),
                is_direct: room.is_direct(),
                name: None,
                avatar_url: None,
            },
            user: None,
            event_id: None,
        }
    }

    pub fn with_user(mut self, user: RemoteUserInfo) -> Self {
        self.user = Some(user);
        self
    }

    pub fn with_event_id(mut self, event_id: impl Into<String>) -> Self {
        self.event_id = Some(event_id.into());
        self
    }
}
