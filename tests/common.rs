#![allow(dead_code)]

use cp_multiplayer::*;
use std::time::Duration;
use tokio::sync::mpsc;

pub const FRAME: Duration = Duration::from_millis(50);
const MAX_FRAMES: usize = 200;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub struct Player {
    pub name: String,
    pub lobby: Lobby,
    pub events: mpsc::UnboundedReceiver<LobbyEvent>,
}

impl Player {
    /// Every event received so far.
    pub fn drain_events(&mut self) -> Vec<LobbyEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}

pub async fn await_event(
    events: &mut mpsc::UnboundedReceiver<LobbyEvent>,
) -> anyhow::Result<LobbyEvent> {
    let duration = Duration::from_secs(2);
    tokio::time::timeout(duration, events.recv())
        .await?
        .ok_or_else(|| anyhow::anyhow!("Timed out waiting for event"))
}

/// The shared infrastructure every player in a test talks through.
pub struct Net {
    pub network: MemoryNetwork,
    pub directory: Directory,
    pub config: SessionConfig,
}

impl Net {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            network: MemoryNetwork::new(config.link_capacity),
            directory: Directory::new(),
            config,
        }
    }

    pub fn host(&self, name: &str) -> anyhow::Result<Player> {
        println!("Setting up Host Lobby");
        let (lobby, events) = Lobby::create(
            self.config.clone(),
            Box::new(self.network.endpoint(name)),
            Box::new(self.directory.clone()),
            MemberState::named(&self.config, name),
        )?;
        println!("Host Room Code: {:?}", lobby.code());
        Ok(Player {
            name: name.to_string(),
            lobby,
            events,
        })
    }

    pub fn join(&self, code: &str, name: &str) -> Player {
        println!("{name} joining {code}");
        let (lobby, events) = Lobby::join(
            self.config.clone(),
            Box::new(self.network.endpoint(name)),
            Box::new(self.directory.clone()),
            code,
            MemberState::named(&self.config, name),
        );
        Player {
            name: name.to_string(),
            lobby,
            events,
        }
    }
}

/// Run one frame on every player, host first.
pub fn pump(players: &mut [Player]) {
    for player in players.iter_mut() {
        player.lobby.update(FRAME);
    }
}

/// Pump until `done` holds or the frame budget runs out.
pub fn pump_until(players: &mut [Player], done: impl Fn(&[Player]) -> bool) -> bool {
    for _ in 0..MAX_FRAMES {
        if done(players) {
            return true;
        }
        pump(players);
    }
    done(players)
}

pub fn all_in(state: LobbyState) -> impl Fn(&[Player]) -> bool {
    move |players| players.iter().all(|p| p.lobby.state() == state)
}

/// A host plus `followers` players, everyone in the lobby with a synced roster.
pub fn lobby_with(net: &Net, followers: usize) -> anyhow::Result<Vec<Player>> {
    let host = net.host("host")?;
    let code = host
        .lobby
        .code()
        .ok_or_else(|| anyhow::anyhow!("host has no room code"))?
        .to_string();
    let mut players = vec![host];
    for i in 0..followers {
        players.push(net.join(&code, &format!("player{}", i + 1)));
        assert!(pump_until(&mut players, all_in(LobbyState::InLobby)));
    }
    let expected = followers + 1;
    assert!(pump_until(&mut players, |players| {
        players.iter().all(|p| {
            p.lobby.members().len() == expected
                && p.lobby.members().iter().all(|m| m.display_name() != "???")
        })
    }));
    Ok(players)
}

/// Start the game from the host and run every lobby into `GameInProgress`.
pub fn start_game(players: &mut [Player]) -> anyhow::Result<()> {
    players[0].lobby.start_game()?;
    assert!(pump_until(players, all_in(LobbyState::GameInProgress)));
    Ok(())
}

/// Four rooms, two waypoints, nobody home.
pub fn arena() -> SandboxWorld {
    SandboxWorld::new([1, 2, 3, 4], [10, 11])
}

/// An arena with one unit per team, team `t` standing in room `t + 1`.
pub fn populated_arena(teams: u8) -> SandboxWorld {
    let mut world = arena();
    world.add_character("ryu", 3);
    world.add_character("ken", 2);
    for team in 0..teams {
        let character = if team % 2 == 0 { "ryu" } else { "ken" };
        world
            .spawn(character, team, Some(team as u32 + 1))
            .expect("character exists");
    }
    world
}

/// Take the game links out of every lobby; the host gets a populated world.
pub fn sessions(
    players: &mut [Player],
    config: &SessionConfig,
) -> Vec<GameSession<SandboxWorld>> {
    let teams = players.len() as u8;
    players
        .iter_mut()
        .map(|player| {
            let handoff = player.lobby.take_game().expect("game started");
            let world = if handoff.is_host() {
                populated_arena(teams)
            } else {
                arena()
            };
            GameSession::start(handoff, world, config.clone())
        })
        .collect()
}

/// Update every session once, host first.
pub fn pump_sessions(sessions: &mut [GameSession<SandboxWorld>]) -> Result<()> {
    for session in sessions.iter_mut() {
        session.update()?;
    }
    Ok(())
}

/// The host's simulation tick: advance, replicate, let followers catch up.
pub fn game_tick(sessions: &mut [GameSession<SandboxWorld>]) -> Result<()> {
    sessions[0].world_mut().tick();
    sessions[0].after_tick();
    pump_sessions(sessions)
}

/// A lobby of `followers` + host that has already handed over to running sessions.
pub fn running_game(followers: usize) -> anyhow::Result<Vec<GameSession<SandboxWorld>>> {
    let net = Net::new(SessionConfig::default());
    let mut players = lobby_with(&net, followers)?;
    start_game(&mut players)?;
    let mut sessions = sessions(&mut players, &net.config);
    pump_sessions(&mut sessions)?;
    Ok(sessions)
}

pub fn setup(my_team: TeamIndex, teams: usize) -> GameSetup {
    let config = SessionConfig::default();
    GameSetup {
        my_team,
        clubs: config.clubs[..teams].to_vec(),
        player_names: (0..teams).map(|t| format!("player{t}")).collect(),
    }
}

/// Two ends of one in-memory link.
pub fn link_pair() -> (Socket, Socket) {
    let mut network = MemoryNetwork::new(1024);
    let mut listener = network.listen().expect("listen");
    let near = network.connect(listener.address()).expect("connect");
    let far = listener.try_accept().expect("accept");
    (Socket::new(near), Socket::new(far))
}

/// Everything waiting on `socket`, decoded.
pub fn read_all(socket: &mut Socket) -> Vec<NetPacket> {
    let mut packets = Vec::new();
    while let Some(bytes) = socket.try_receive() {
        packets.push(decode(&bytes).expect("valid packet"));
    }
    packets
}

/// The full sync a host with `world` sends to the follower on team `team`.
pub fn capture_full_sync(world: SandboxWorld, team: TeamIndex, teams: usize) -> Vec<NetPacket> {
    let (host_end, mut follower_end) = link_pair();
    let mut host = HostReplicator::new(
        world,
        SessionConfig::default(),
        setup(0, teams),
        vec![(team, host_end)],
    );
    host.update().expect("host update");
    read_all(&mut follower_end)
}

/// A follower on `team` plus the host's end of its link.
pub fn linked_follower(
    team: TeamIndex,
    teams: usize,
) -> (FollowerReplicator<SandboxWorld>, Socket) {
    let (follower_end, host_end) = link_pair();
    let follower = FollowerReplicator::new(
        arena(),
        SessionConfig::default(),
        setup(team, teams),
        follower_end,
    );
    (follower, host_end)
}

/// Feed a batch straight into a follower and apply it.
pub fn apply(follower: &mut FollowerReplicator<SandboxWorld>, packets: &[NetPacket]) {
    for packet in packets {
        follower.accept(packet.clone());
    }
    follower.update().expect("follower update");
}

/// Unit state per wire id, without the local key.
pub fn mirrored_units(
    follower: &FollowerReplicator<SandboxWorld>,
) -> Vec<(NetId, UnitSnapshot)> {
    let mut units: Vec<(NetId, UnitSnapshot)> = follower
        .world()
        .units()
        .into_iter()
        .filter_map(|unit| {
            let id = follower.unit_id(unit.key)?;
            Some((
                id,
                UnitSnapshot {
                    key: UnitKey(0),
                    ..unit
                },
            ))
        })
        .collect();
    units.sort_by_key(|(id, _)| *id);
    units
}
