use std::sync::Arc;

use anyhow::Result;
use shared::{
    domain::RemoteRoom,
    error::BridgeError,
    protocol::RemoteUserInfo,
};

use crate::remote::{RemoteConnection, SendTarget};

/// Resolves the concrete remote actor to address for sending into a room.
pub async fn resolve_target(
    conn: &Arc<dyn RemoteConnection>,
    room: &RemoteRoom,
) -> Result<SendTarget> {
    match room {
        RemoteRoom::Direct(user_id) => Ok(SendTarget::Direct(conn.pick_friend(*user_id).await?)),
        RemoteRoom::Group(group_id) => Ok(SendTarget::Group(conn.pick_group(*group_id).await?)),
    }
}

/// Resolves the identity used to post system-originated annotations.
///
/// Annotations inside a group cannot reuse the original author, so the first
/// administrator found in the membership is used as a stand-in. For direct
/// rooms the contact itself is the stand-in. A group without an administrator
/// yields `BridgeError::Resolution`; the caller must skip the annotation.
pub async fn resolve_annotation_identity(
    conn: &Arc<dyn RemoteConnection>,
    room: &RemoteRoom,
) -> Result<RemoteUserInfo, BridgeError> {
    match room {
        RemoteRoom::Direct(user_id) => {
            let contact = conn
                .pick_friend(*user_id)
                .await
                .map_err(|_| BridgeError::Resolution {
                    room: room.encode(),
                })?;
            contact.profile().await.map_err(|_| BridgeError::Resolution {
                room: room.encode(),
            })
        }
        RemoteRoom::Group(group_id) => {
            let group = conn
                .pick_group(*group_id)
                .await
                .map_err(|_| BridgeError::Resolution {
                    room: room.encode(),
                })?;
            let members = group.members().await.map_err(|_| BridgeError::Resolution {
                room: room.encode(),
            })?;
            members
                .into_iter()
                .find(|member| member.is_admin())
                .map(|admin| RemoteUserInfo {
                    user_id: admin.user_id.0.to_string(),
                    name: admin.display_name,
                    avatar_url: None,
                })
                .ok_or_else(|| BridgeError::Resolution {
                    room: room.encode(),
                })
        }
    }
}
