use thiserror::Error;

use crate::mapping::NetId;

#[derive(Error, PartialEq, Debug, Clone)]
pub enum Error {
    // --- capacity ---
    #[error("Lobby is full.")]
    LobbyFull,

    // --- protocol ---
    #[error("Empty packet.")]
    EmptyPacket,
    #[error("Unsupported protocol version {0}.")]
    ProtocolVersion(u8),
    #[error("Malformed packet: {0}")]
    Malformed(String),
    #[error("Object is not mapped.")]
    NotMapped,
    #[error("Unknown wire id {0}.")]
    UnknownId(NetId),
    #[error("Unknown character '{0}'.")]
    UnknownCharacter(String),

    // --- connection ---
    #[error("Connection lost: {0}")]
    ConnectionLost(String),
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("No room found for code '{0}'.")]
    RoomNotFound(String),
    #[error("Invalid room code '{0}'.")]
    InvalidRoomCode(String),

    // --- state ---
    #[error("Cannot {op} while in state {state}.")]
    WrongState { op: &'static str, state: String },
    #[error("Only the host can {0}.")]
    NotHost(&'static str),
    #[error("Slot index out of range.")]
    SlotOutOfRange,
    #[error("Slot is already occupied.")]
    SlotOccupied,
    #[error("Slot is empty.")]
    SlotEmpty,

    // --- timeout ---
    #[error("Not every member connected before the game started.")]
    PreparationTimeout,
}

impl Error {
    /// Connection and timeout failures end the session they occur in.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::ConnectionLost(_)
                | Error::Transport(_)
                | Error::RoomNotFound(_)
                | Error::InvalidRoomCode(_)
                | Error::PreparationTimeout
        )
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl From<postcard::Error> for Error {
    fn from(e: postcard::Error) -> Self {
        Error::Malformed(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_classification() {
        assert!(Error::PreparationTimeout.is_fatal());
        assert!(Error::ConnectionLost("peer".into()).is_fatal());
        assert!(!Error::LobbyFull.is_fatal());
        assert!(!Error::Malformed("bad".into()).is_fatal());
        assert!(
            !Error::WrongState {
                op: "start",
                state: "Init".into()
            }
            .is_fatal()
        );
    }
}
