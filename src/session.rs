//! Glue between a finished lobby and the replication engines.

use tracing::info;

use crate::{
    config::SessionConfig,
    error::Result,
    lobby::GameSetup,
    replication::{FollowerReplicator, HostReplicator},
    socket::Socket,
    world::{GameOutcome, LogEvent, TeamIndex, World},
};

/// Game links handed over by [`crate::Lobby::take_game`].
#[derive(Debug)]
pub enum GameHandoff {
    Host {
        setup: GameSetup,
        /// One link per remote team.
        links: Vec<(TeamIndex, Socket)>,
    },
    Follower {
        setup: GameSetup,
        link: Socket,
    },
}

impl GameHandoff {
    pub fn setup(&self) -> &GameSetup {
        match self {
            GameHandoff::Host { setup, .. } | GameHandoff::Follower { setup, .. } => setup,
        }
    }

    pub fn is_host(&self) -> bool {
        matches!(self, GameHandoff::Host { .. })
    }
}

/// A running game on either side.
pub enum GameSession<W: World> {
    Host(HostReplicator<W>),
    Follower(FollowerReplicator<W>),
}

impl<W: World> GameSession<W> {
    pub fn start(handoff: GameHandoff, world: W, config: SessionConfig) -> Self {
        match handoff {
            GameHandoff::Host { setup, links } => {
                info!(followers = links.len(), "starting host session");
                GameSession::Host(HostReplicator::new(world, config, setup, links))
            }
            GameHandoff::Follower { setup, link } => {
                info!(team = setup.my_team, "starting follower session");
                GameSession::Follower(FollowerReplicator::new(world, config, setup, link))
            }
        }
    }

    pub fn is_host(&self) -> bool {
        matches!(self, GameSession::Host(_))
    }

    /// Drive replication. Call once per frame. An error means the session is
    /// over and its links are closed.
    pub fn update(&mut self) -> Result<()> {
        match self {
            GameSession::Host(host) => host.update(),
            GameSession::Follower(follower) => follower.update(),
        }
    }

    /// Tick-completion hook. Followers don't replicate ticks.
    pub fn after_tick(&mut self) {
        if let GameSession::Host(host) = self {
            host.after_tick();
        }
    }

    /// Log interception hook. Followers only display what the host sends.
    pub fn enqueue_log(&mut self, event: LogEvent) {
        if let GameSession::Host(host) = self {
            host.enqueue_log(event);
        }
    }

    pub fn world(&self) -> &W {
        match self {
            GameSession::Host(host) => host.world(),
            GameSession::Follower(follower) => follower.world(),
        }
    }

    pub fn world_mut(&mut self) -> &mut W {
        match self {
            GameSession::Host(host) => host.world_mut(),
            GameSession::Follower(follower) => follower.world_mut(),
        }
    }

    pub fn setup(&self) -> &GameSetup {
        match self {
            GameSession::Host(host) => host.setup(),
            GameSession::Follower(follower) => follower.setup(),
        }
    }

    pub fn outcome(&self) -> Option<GameOutcome> {
        match self {
            GameSession::Host(host) => host.outcome(),
            GameSession::Follower(follower) => follower.outcome(),
        }
    }

    pub fn is_closed(&self) -> bool {
        match self {
            GameSession::Host(host) => host.is_closed(),
            GameSession::Follower(follower) => follower.is_closed(),
        }
    }

    /// Idempotent.
    pub fn shutdown(&mut self) {
        match self {
            GameSession::Host(host) => host.shutdown(),
            GameSession::Follower(follower) => follower.shutdown(),
        }
    }
}
