use std::{collections::VecDeque, time::Duration};

use tokio::sync::mpsc;
use tracing::info;

use super::{
    Lobby, LobbyEvent, LobbyState, Rendezvous, Role, follower::FollowerState, host::HostState,
};
use crate::{
    config::SessionConfig,
    error::Result,
    members::{MemberSet, MemberState},
    transport::Network,
};

impl Lobby {
    fn new(
        config: SessionConfig,
        network: Box<dyn Network>,
        rendezvous: Box<dyn Rendezvous>,
        role: Role,
    ) -> (Self, mpsc::UnboundedReceiver<LobbyEvent>) {
        let (events, inbox) = mpsc::unbounded_channel();
        let lobby = Self {
            members: MemberSet::new(config.capacity()),
            config,
            state: LobbyState::Init,
            code: None,
            network,
            rendezvous,
            role,
            deferred: VecDeque::new(),
            events,
            handoff: None,
            prep_elapsed: Duration::ZERO,
            torn_down: false,
        };
        (lobby, inbox)
    }

    /// HOST: open a lobby and publish its room code.
    pub fn create(
        config: SessionConfig,
        mut network: Box<dyn Network>,
        rendezvous: Box<dyn Rendezvous>,
        profile: MemberState,
    ) -> Result<(Self, mpsc::UnboundedReceiver<LobbyEvent>)> {
        let listener = network.listen()?;
        let address = listener.address().to_string();
        let (mut lobby, inbox) =
            Self::new(config, network, rendezvous, Role::Host(HostState::new(listener)));
        lobby.set_state(LobbyState::Joining);

        let code = lobby.rendezvous.publish(&address)?;
        info!(%code, %address, "hosting lobby");
        lobby.code = Some(code);

        // the host always sits in slot 0
        lobby.members.try_join(None, true, profile)?;
        lobby.pump_member_events();
        lobby.set_state(LobbyState::InLobby);
        Ok((lobby, inbox))
    }

    /// FOLLOWER: join the lobby behind `code`. Resolution and dialing happen
    /// on the first [`Lobby::update`].
    pub fn join(
        config: SessionConfig,
        network: Box<dyn Network>,
        rendezvous: Box<dyn Rendezvous>,
        code: &str,
        profile: MemberState,
    ) -> (Self, mpsc::UnboundedReceiver<LobbyEvent>) {
        let follower = FollowerState::new(code.trim().to_string(), profile);
        let (mut lobby, inbox) = Self::new(config, network, rendezvous, Role::Follower(follower));
        lobby.set_state(LobbyState::Joining);
        (lobby, inbox)
    }
}
