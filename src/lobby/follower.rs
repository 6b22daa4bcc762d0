use std::time::Duration;

use tracing::{debug, info, warn};

use super::{GameSetup, Lobby, LobbyEvent, LobbyState, Role, receive, send};
use crate::{
    error::{Error, Result},
    members::MemberState,
    packet::LobbyPacket,
    session::GameHandoff,
    socket::Socket,
};

pub(super) struct FollowerState {
    /// Room code until resolved.
    code: String,
    /// The local member's state, authored here and pushed upstream.
    pub(super) profile: MemberState,
    pub(super) lobby: Option<Socket>,
    game: Option<Socket>,
    hello_sent: bool,
}

impl FollowerState {
    pub(super) fn new(code: String, profile: MemberState) -> Self {
        Self {
            code,
            profile,
            lobby: None,
            game: None,
            hello_sent: false,
        }
    }

    pub(super) fn close(&mut self) {
        for socket in [self.lobby.as_mut(), self.game.as_mut()].into_iter().flatten() {
            socket.dispose();
        }
        self.lobby = None;
        self.game = None;
    }
}

impl Lobby {
    fn follower_mut(&mut self) -> Option<&mut FollowerState> {
        match &mut self.role {
            Role::Follower(follower) => Some(follower),
            Role::Host(_) => None,
        }
    }

    pub(super) fn update_follower(&mut self, dt: Duration) -> Result<()> {
        match self.state {
            LobbyState::Joining | LobbyState::InLobby => self.update_lobby_link(),
            LobbyState::GamePreparation | LobbyState::ConnectionsEstablished => {
                self.update_game_link(dt)
            }
            _ => Ok(()),
        }
    }

    fn update_lobby_link(&mut self) -> Result<()> {
        let limit = self.config.max_packets_per_tick;
        let Role::Follower(follower) = &mut self.role else {
            return Ok(());
        };
        if follower.lobby.is_none() {
            let address = self.rendezvous.resolve(&follower.code)?;
            info!(code = %follower.code, %address, "dialing lobby");
            follower.lobby = Some(Socket::new(self.network.connect(&address)?));
        }
        let Some(socket) = follower.lobby.as_mut() else {
            return Ok(());
        };
        socket.flush();
        let packets = receive(socket, limit);
        let lost = socket.error_state();
        for packet in packets {
            self.handle_host_packet(packet)?;
            // Prepare moves us to the game link
            if !matches!(self.state, LobbyState::Joining | LobbyState::InLobby) {
                return Ok(());
            }
        }
        if lost {
            return Err(Error::ConnectionLost("lost the host".into()));
        }
        Ok(())
    }

    fn handle_host_packet(&mut self, packet: LobbyPacket) -> Result<()> {
        match packet {
            LobbyPacket::Hello { index } => {
                if self.members.self_index().is_some() {
                    debug!(index, "ignoring repeated hello");
                    return Ok(());
                }
                let Some(follower) = self.follower_mut() else {
                    return Ok(());
                };
                let profile = follower.profile.clone();
                if let Err(e) = self.members.set_member_state(index, profile.clone()) {
                    warn!(index, error = %e, "bad hello from host");
                    return Ok(());
                }
                self.members.set_self_index(Some(index));
                info!(slot = index, "joined lobby");
                if let Some(socket) = self.follower_mut().and_then(|f| f.lobby.as_mut()) {
                    send(
                        socket,
                        &LobbyPacket::MemberSync {
                            slot: index,
                            state: profile,
                        }
                        .into(),
                    );
                }
                self.set_state(LobbyState::InLobby);
            }
            LobbyPacket::Full => return Err(Error::LobbyFull),
            LobbyPacket::MemberSync { slot, state } => {
                // our own state is authored locally
                if Some(slot) != self.members.self_index()
                    && let Err(e) = self.members.set_member_state(slot, state)
                {
                    warn!(slot, error = %e, "bad member sync from host");
                }
            }
            LobbyPacket::MemberDrop { slot } => {
                if Some(slot) == self.members.self_index() {
                    return Err(Error::ConnectionLost("dropped by the host".into()));
                }
                if self.members.part(slot).is_err() {
                    debug!(slot, "drop for an empty slot");
                }
            }
            LobbyPacket::Renumber { from, to } => {
                if let Err(e) = self.members.renumber(from, to) {
                    warn!(from, to, error = %e, "bad renumber from host");
                }
            }
            LobbyPacket::Prepare { address } => {
                info!(%address, "host is starting the game");
                let link = self.network.connect(&address)?;
                if let Some(follower) = self.follower_mut() {
                    follower.game = Some(Socket::new(link));
                }
                self.prep_elapsed = Duration::ZERO;
                self.set_state(LobbyState::GamePreparation);
            }
            other => warn!(packet = ?other, "unexpected lobby packet from host"),
        }
        Ok(())
    }

    fn update_game_link(&mut self, dt: Duration) -> Result<()> {
        self.prep_elapsed += dt;
        let limit = self.config.max_packets_per_tick;
        let slot = self.members.self_index().ok_or(Error::SlotEmpty)?;
        let Some(follower) = self.follower_mut() else {
            return Ok(());
        };
        let Some(game) = follower.game.as_mut() else {
            return Err(Error::ConnectionLost("no game link".into()));
        };

        if !follower.hello_sent && game.is_connected() {
            send(game, &LobbyPacket::Hello { index: slot }.into());
            follower.hello_sent = true;
        }
        game.flush();
        let packets = if follower.hello_sent {
            receive(game, limit)
        } else {
            Vec::new()
        };
        let lost = game.error_state();
        let hello_sent = follower.hello_sent;
        if hello_sent {
            self.set_state(LobbyState::ConnectionsEstablished);
        }

        for packet in packets {
            match packet {
                LobbyPacket::StartGame { team_index, clubs } => {
                    return self.enter_game(team_index, clubs);
                }
                other => debug!(packet = ?other, "ignoring lobby packet on game link"),
            }
        }
        if lost {
            return Err(Error::ConnectionLost("game link to host closed".into()));
        }
        if self.prep_elapsed >= self.config.preparation_timeout() {
            return Err(Error::PreparationTimeout);
        }
        Ok(())
    }

    fn enter_game(&mut self, team_index: u8, clubs: Vec<String>) -> Result<()> {
        if team_index != self.members.self_index().unwrap_or(team_index) {
            warn!(team_index, "assigned team differs from lobby slot");
        }
        let player_names = self
            .members
            .iter()
            .map(|m| m.display_name().to_string())
            .collect();
        let Some(follower) = self.follower_mut() else {
            return Ok(());
        };
        if let Some(mut lobby) = follower.lobby.take() {
            lobby.dispose();
        }
        let mut link = follower
            .game
            .take()
            .ok_or_else(|| Error::ConnectionLost("no game link".into()))?;
        send(&mut link, &LobbyPacket::AckStartGame.into());
        link.flush();

        let setup = GameSetup {
            my_team: team_index,
            clubs,
            player_names,
        };
        info!(team = team_index, "game in progress");
        self.handoff = Some(GameHandoff::Follower {
            setup: setup.clone(),
            link,
        });
        self.set_state(LobbyState::GameInProgress);
        self.emit(LobbyEvent::GameStarted(setup));
        Ok(())
    }
}
