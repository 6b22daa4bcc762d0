mod common;

use common::*;
use cp_multiplayer::*;
use std::{collections::BTreeSet, time::Duration};

fn game_started(events: &[LobbyEvent]) -> Vec<GameSetup> {
    events
        .iter()
        .filter_map(|e| match e {
            LobbyEvent::GameStarted(setup) => Some(setup.clone()),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_host_announces_itself() -> anyhow::Result<()> {
    init_tracing();
    let net = Net::new(SessionConfig::default());
    let mut host = net.host("host")?;

    let event = await_event(&mut host.events).await?;
    println!("Received Host Event: {event:?}");
    assert_eq!(event, LobbyEvent::StateChanged(LobbyState::Joining));
    assert_eq!(
        await_event(&mut host.events).await?,
        LobbyEvent::MemberJoined(0)
    );
    assert_eq!(
        await_event(&mut host.events).await?,
        LobbyEvent::StateChanged(LobbyState::InLobby)
    );

    assert!(host.lobby.is_host());
    assert_eq!(host.lobby.self_slot(), Some(0));
    let code = host.lobby.code().expect("room code");
    assert!(code.parse::<RoomCode>().is_ok());
    assert_eq!(net.directory.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_followers_mirror_the_roster() -> anyhow::Result<()> {
    init_tracing();
    let net = Net::new(SessionConfig::default());
    let players = lobby_with(&net, 2)?;

    // remote joiners fill from the top
    assert_eq!(players[0].lobby.members().occupied(), vec![0, 5, 6]);
    assert_eq!(players[1].lobby.self_slot(), Some(6));
    assert_eq!(players[2].lobby.self_slot(), Some(5));

    for player in &players {
        let names: Vec<&str> = player
            .lobby
            .members()
            .iter()
            .map(|m| m.display_name())
            .collect();
        println!("{} sees {names:?}", player.name);
        assert_eq!(names, vec!["host", "player2", "player1"]);
    }
    Ok(())
}

#[tokio::test]
async fn test_member_state_changes_are_gossiped() -> anyhow::Result<()> {
    init_tracing();
    let net = Net::new(SessionConfig::default());
    let mut players = lobby_with(&net, 2)?;

    players[1].lobby.update_self(|state| state.selected_club = "sumo".into())?;
    players[1].lobby.set_ready(true)?;
    assert!(pump_until(&mut players, |players| {
        players.iter().all(|p| {
            p.lobby
                .members()
                .get(6)
                .is_some_and(|m| m.state.ready && m.state.selected_club == "sumo")
        })
    }));

    // the host's own edits reach everyone too
    players[0].lobby.set_ready(true)?;
    assert!(pump_until(&mut players, |players| {
        players
            .iter()
            .all(|p| p.lobby.members().get(0).is_some_and(|m| m.state.ready))
    }));
    Ok(())
}

/// Two followers, host starts: each gets one `StartGame` with a contiguous
/// team and the same club list.
#[tokio::test]
async fn test_start_game_assigns_contiguous_teams() -> anyhow::Result<()> {
    init_tracing();
    let net = Net::new(SessionConfig::default());
    let mut players = lobby_with(&net, 2)?;
    for player in players.iter_mut() {
        player.drain_events();
    }

    start_game(&mut players)?;

    let mut teams = BTreeSet::new();
    let mut club_lists = Vec::new();
    for player in players.iter_mut() {
        let started = game_started(&player.drain_events());
        assert_eq!(started.len(), 1, "{} started more than once", player.name);
        let setup = &started[0];
        println!("{} plays team {} with {:?}", player.name, setup.my_team, setup.clubs);
        teams.insert(setup.my_team);
        club_lists.push(setup.clubs.clone());
        assert_eq!(player.lobby.self_slot(), Some(setup.my_team));
    }
    assert_eq!(teams, BTreeSet::from([0, 1, 2]));
    assert!(club_lists.windows(2).all(|w| w[0] == w[1]));
    assert_eq!(club_lists[0].len(), 3);

    // the follower that joined first held slot 6 and is compacted last
    assert_eq!(players[1].lobby.self_slot(), Some(2));
    assert_eq!(players[2].lobby.self_slot(), Some(1));

    assert!(players[0].lobby.take_game().is_some_and(|h| h.is_host()));
    assert!(players[1].lobby.take_game().is_some_and(|h| !h.is_host()));
    // handed over exactly once
    assert!(players[1].lobby.take_game().is_none());
    Ok(())
}

#[tokio::test]
async fn test_start_game_is_host_only() -> anyhow::Result<()> {
    init_tracing();
    let net = Net::new(SessionConfig::default());
    let mut players = lobby_with(&net, 1)?;
    assert_eq!(
        players[1].lobby.start_game(),
        Err(Error::NotHost("start the game"))
    );
    players[0].lobby.start_game()?;
    assert!(matches!(
        players[0].lobby.start_game(),
        Err(Error::WrongState { .. })
    ));
    Ok(())
}

#[tokio::test]
async fn test_joiner_is_rejected_when_full() -> anyhow::Result<()> {
    init_tracing();
    let config = SessionConfig {
        max_members: 2,
        ..SessionConfig::default()
    };
    let net = Net::new(config);
    let mut players = lobby_with(&net, 1)?;
    let code = players[0].lobby.code().unwrap_or_default().to_string();

    players.push(net.join(&code, "latecomer"));
    assert!(pump_until(&mut players, |players| {
        players[2].lobby.state() == LobbyState::Error
    }));
    let events = players[2].drain_events();
    assert!(events.contains(&LobbyEvent::Error(Error::LobbyFull.to_string())));

    // the existing session is untouched
    pump(&mut players);
    assert_eq!(players[0].lobby.state(), LobbyState::InLobby);
    assert_eq!(players[0].lobby.members().len(), 2);
    assert_eq!(players[1].lobby.state(), LobbyState::InLobby);
    Ok(())
}

/// The member in slot 3 drops: exactly one part, everywhere.
#[tokio::test]
async fn test_member_disconnect_parts_once() -> anyhow::Result<()> {
    init_tracing();
    let net = Net::new(SessionConfig::default());
    let mut players = lobby_with(&net, 4)?;
    assert_eq!(players[4].lobby.self_slot(), Some(3));
    for player in players.iter_mut() {
        player.drain_events();
    }

    let mut leaver = players.remove(4);
    leaver.lobby.leave();
    drop(leaver);
    for _ in 0..5 {
        pump(&mut players);
    }

    for player in players.iter_mut() {
        let parts = player
            .drain_events()
            .into_iter()
            .filter(|e| *e == LobbyEvent::MemberLeft(3))
            .count();
        assert_eq!(parts, 1, "{} saw {parts} parts", player.name);
        assert!(player.lobby.members().get(3).is_none());
        assert_eq!(player.lobby.members().occupied(), vec![0, 4, 5, 6]);
    }
    Ok(())
}

#[tokio::test]
async fn test_renumbering_reaches_followers() -> anyhow::Result<()> {
    init_tracing();
    let net = Net::new(SessionConfig::default());
    let mut players = lobby_with(&net, 3)?;
    // drop the middle joiner so the roster has a hole
    let mut leaver = players.remove(2);
    leaver.lobby.leave();
    drop(leaver);
    assert!(pump_until(&mut players, |players| {
        players.iter().all(|p| p.lobby.members().len() == 3)
    }));

    start_game(&mut players)?;
    for player in &players {
        assert_eq!(player.lobby.members().occupied(), vec![0, 1, 2]);
    }
    assert_eq!(players[1].lobby.self_slot(), Some(2));
    assert_eq!(players[2].lobby.self_slot(), Some(1));
    Ok(())
}

#[tokio::test]
async fn test_preparation_times_out() -> anyhow::Result<()> {
    init_tracing();
    let net = Net::new(SessionConfig::default());
    let mut players = lobby_with(&net, 1)?;
    let mut host = players.remove(0);
    host.drain_events();

    // the follower never answers
    host.lobby.start_game()?;
    for _ in 0..25 {
        host.lobby.update(Duration::from_secs(1));
    }
    assert_eq!(host.lobby.state(), LobbyState::Error);
    let events = host.drain_events();
    assert!(events.contains(&LobbyEvent::Error(Error::PreparationTimeout.to_string())));
    assert!(host.lobby.take_game().is_none());
    Ok(())
}

#[tokio::test]
async fn test_follower_loses_host() -> anyhow::Result<()> {
    init_tracing();
    let net = Net::new(SessionConfig::default());
    let mut players = lobby_with(&net, 1)?;
    let mut host = players.remove(0);
    host.lobby.leave();
    assert_eq!(host.lobby.state(), LobbyState::Init);
    // the room is gone from the directory
    assert!(net.directory.is_empty());

    assert!(pump_until(&mut players, all_in(LobbyState::Error)));
    assert!(players[0].lobby.members().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_leave_is_idempotent() -> anyhow::Result<()> {
    init_tracing();
    let net = Net::new(SessionConfig::default());
    let mut players = lobby_with(&net, 1)?;
    let follower = &mut players[1];
    follower.drain_events();

    follower.lobby.leave();
    follower.lobby.leave();
    follower.lobby.update(FRAME);
    let events = follower.drain_events();
    assert_eq!(events, vec![LobbyEvent::StateChanged(LobbyState::Init)]);
    assert_eq!(follower.lobby.self_slot(), None);
    Ok(())
}

#[tokio::test]
async fn test_unknown_room_code_fails() -> anyhow::Result<()> {
    init_tracing();
    let net = Net::new(SessionConfig::default());
    let _host = net.host("host")?;
    let mut players = vec![net.join("0000-0000", "lost")];
    pump(&mut players);
    assert_eq!(players[0].lobby.state(), LobbyState::Error);
    Ok(())
}

/// Slots the follower cannot hold are dropped, not fatal.
#[tokio::test]
async fn test_bad_slots_from_host_are_dropped() -> anyhow::Result<()> {
    init_tracing();
    let net = Net::new(SessionConfig::default());
    let mut host_net = net.network.endpoint("fake-host");
    let mut listener = host_net.listen()?;
    let code = net.directory.clone().publish(listener.address())?;

    // this follower only has room for two slots
    let small = Net {
        network: net.network.clone(),
        directory: net.directory.clone(),
        config: SessionConfig {
            max_members: 2,
            ..SessionConfig::default()
        },
    };
    let mut players = vec![small.join(&code, "player1")];
    pump(&mut players);
    let link = listener
        .try_accept()
        .ok_or_else(|| anyhow::anyhow!("follower never dialed"))?;
    let mut host_end = Socket::new(link);

    host_end.send(encode(&LobbyPacket::Hello { index: 6 }.into())?);
    pump(&mut players);
    assert_eq!(players[0].lobby.state(), LobbyState::Joining);

    host_end.send(encode(&LobbyPacket::Hello { index: 1 }.into())?);
    host_end.send(encode(
        &LobbyPacket::MemberSync {
            slot: 42,
            state: MemberState::named(&small.config, "ghost"),
        }
        .into(),
    )?);
    pump(&mut players);
    assert_eq!(players[0].lobby.state(), LobbyState::InLobby);
    assert_eq!(players[0].lobby.self_slot(), Some(1));
    assert_eq!(players[0].lobby.members().occupied(), vec![1]);
    Ok(())
}
