//! # Loopback game
//!
//! A host and a handful of followers on one in-process network. The lobby
//! starts a game, every follower orders its unit to capture the room it
//! stands in, and the host simulates until the ticks run out.
//!
//! ```sh
//! RUST_LOG=cp_multiplayer=debug cargo run --example loopback -- --followers 3 --ticks 12
//! ```

use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use cp_multiplayer::{
    Directory, GameSession, Lobby, LobbyState, MemberState, MemoryNetwork, SandboxWorld,
    SessionConfig, World,
};

const FRAME: Duration = Duration::from_millis(16);

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Remote players besides the host
    #[arg(long, default_value_t = 2)]
    followers: usize,
    /// Host simulation ticks to run
    #[arg(long, default_value_t = 10)]
    ticks: u32,
    /// Remove every follower's unit at the end so the host wins
    #[arg(long)]
    knockout: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
    let cli = Cli::parse();
    let config = SessionConfig::default();
    if cli.followers + 1 > config.capacity() {
        bail!("at most {} followers", config.capacity() - 1);
    }

    let network = MemoryNetwork::new(config.link_capacity);
    let directory = Directory::new();

    let (host, _host_events) = Lobby::create(
        config.clone(),
        Box::new(network.endpoint("host")),
        Box::new(directory.clone()),
        MemberState::named(&config, "host"),
    )?;
    let code = host.code().context("host has no room code")?.to_string();
    println!("room code: {code}");

    let mut lobbies = vec![host];
    let mut event_streams = Vec::new();
    for i in 1..=cli.followers {
        let name = format!("player{i}");
        let (lobby, events) = Lobby::join(
            config.clone(),
            Box::new(network.endpoint(&name)),
            Box::new(directory.clone()),
            &code,
            MemberState::named(&config, &name),
        );
        lobbies.push(lobby);
        event_streams.push(events);
        run_until(&mut lobbies, LobbyState::InLobby)?;
    }

    lobbies[0].start_game()?;
    run_until(&mut lobbies, LobbyState::GameInProgress)?;

    let teams = lobbies.len() as u8;
    let mut sessions = Vec::new();
    for lobby in lobbies.iter_mut() {
        let handoff = lobby.take_game().context("game did not start")?;
        let world = if handoff.is_host() {
            arena(teams)?
        } else {
            SandboxWorld::new(1..=8, std::iter::empty())
        };
        sessions.push(GameSession::start(handoff, world, config.clone()));
    }
    update_all(&mut sessions)?;

    // every follower captures where it stands
    for session in sessions.iter_mut().skip(1) {
        let team = session.setup().my_team;
        let Some(unit) = session.world().units().into_iter().find(|u| u.team == team) else {
            bail!("team {team} has no unit");
        };
        session.world_mut().set_command(unit.key, "capture");
    }
    update_all(&mut sessions)?;

    for tick in 1..=cli.ticks {
        if cli.knockout && tick == cli.ticks {
            let world = sessions[0].world_mut();
            for unit in world.units().into_iter().filter(|u| u.team != 0) {
                world.remove_unit(unit.key);
            }
        }
        sessions[0].world_mut().tick();
        sessions[0].after_tick();
        update_all(&mut sessions)?;
    }

    for session in &sessions {
        let setup = session.setup();
        let world = session.world();
        let clock = world.clock();
        println!(
            "{:>10} team {} club {:<10} money {:>4} day {} {:02}:{:02.0} outcome {:?}",
            setup.player_names.get(setup.my_team as usize).map_or("?", String::as_str),
            setup.my_team,
            world.clubs().get(setup.my_team as usize).map_or("?", String::as_str),
            world.money(),
            clock.day,
            clock.hour,
            clock.minute,
            session.outcome(),
        );
    }
    for session in sessions.iter_mut() {
        session.shutdown();
    }
    Ok(())
}

/// Eight rooms; team `t` starts in room `t + 1`.
fn arena(teams: u8) -> Result<SandboxWorld> {
    let mut world = SandboxWorld::new(1..=8, std::iter::empty());
    world.add_character("ryu", 3);
    for team in 0..teams {
        world.spawn("ryu", team, Some(team as u32 + 1))?;
    }
    Ok(world)
}

fn run_until(lobbies: &mut [Lobby], state: LobbyState) -> Result<()> {
    for _ in 0..500 {
        if lobbies.iter().all(|l| l.state() == state) {
            return Ok(());
        }
        for lobby in lobbies.iter_mut() {
            lobby.update(FRAME);
            if lobby.state() == LobbyState::Error {
                bail!("a lobby failed while waiting for {state:?}");
            }
        }
    }
    bail!("timed out waiting for {state:?}")
}

fn update_all(sessions: &mut [GameSession<SandboxWorld>]) -> Result<()> {
    for session in sessions.iter_mut() {
        session.update()?;
    }
    Ok(())
}
