use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::{members::MemberEvent, world::TeamIndex};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LobbyState {
    Init,
    /// Finding or creating the rendezvous point.
    Joining,
    InLobby,
    /// Host: waiting for every member's game link. Follower: dialing the host.
    GamePreparation,
    /// Follower only: game link up, waiting for `StartGame`.
    ConnectionsEstablished,
    GameInProgress,
    Error,
}

impl Display for LobbyState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

/// What the embedding game needs to load its scene.
#[derive(Debug, Clone, PartialEq)]
pub struct GameSetup {
    pub my_team: TeamIndex,
    /// Finalized club per team.
    pub clubs: Vec<String>,
    /// Display name per team.
    pub player_names: Vec<String>,
}

/// Public events the lobby sends to the UI
#[derive(Debug, Clone, PartialEq)]
pub enum LobbyEvent {
    StateChanged(LobbyState),
    MemberJoined(u8),
    MemberChanged(u8),
    MemberLeft(u8),
    MemberRenumbered { from: u8, to: u8 },
    GameStarted(GameSetup),
    Error(String),
}

impl From<MemberEvent> for LobbyEvent {
    fn from(event: MemberEvent) -> Self {
        match event {
            MemberEvent::Join(slot) => LobbyEvent::MemberJoined(slot),
            MemberEvent::Change(slot) => LobbyEvent::MemberChanged(slot),
            MemberEvent::Part(slot) => LobbyEvent::MemberLeft(slot),
            MemberEvent::Renumber { from, to } => LobbyEvent::MemberRenumbered { from, to },
        }
    }
}
