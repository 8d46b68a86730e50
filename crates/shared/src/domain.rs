use serde::{Deserialize, Serialize};

use crate::error::RoomIdError;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub i64);
    };
}

id_newtype!(PuppetId);
id_newtype!(RemoteUserId);
id_newtype!(RemoteGroupId);

/// The two remote conversation kinds. Encoded into the local-network room
/// identifier as a one-character prefix followed by the decimal remote id:
/// `p<user_id>` for direct chats, `g<group_id>` for groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum RemoteRoom {
    Direct(RemoteUserId),
    Group(RemoteGroupId),
}

impl RemoteRoom {
    pub fn encode(&self) -> String {
        match self {
            RemoteRoom::Direct(user_id) => format!("p{}", user_id.0),
            RemoteRoom::Group(group_id) => format!("g{}", group_id.0),
        }
    }

    pub fn parse(room_id: &str) -> Result<Self, RoomIdError> {
        let mut chars = room_id.chars();
        let prefix = chars
            .next()
            .ok_or_else(|| RoomIdError::MissingPrefix(room_id.to_string()))?;
        let id: i64 = chars
            .as_str()
            .parse()
            .map_err(|_| RoomIdError::InvalidIdentifier(room_id.to_string()))?;
        if id <= 0 {
            return Err(RoomIdError::InvalidIdentifier(room_id.to_string()));
        }
        match prefix {
            'p' => Ok(RemoteRoom::Direct(RemoteUserId(id))),
            'g' => Ok(RemoteRoom::Group(RemoteGroupId(id))),
            _ => Err(RoomIdError::MissingPrefix(room_id.to_string())),
        }
    }

    pub fn is_direct(&self) -> bool {
        matches!(self, RemoteRoom::Direct(_))
    }
}
