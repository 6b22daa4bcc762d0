//! Lobby membership

use std::{
    collections::{BTreeMap, VecDeque},
    fmt::Display,
};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::{
    config::{MAX_MEMBERS, SessionConfig},
    error::{Error, Result},
    packet::CharaChara,
    socket::Socket,
};

/// Public, gossiped state of one participant.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct MemberState {
    pub display_name: String,
    pub selected_club: String,
    /// Chosen roster; entries may be the random sentinel.
    pub characters: Vec<String>,
    pub ready: bool,
    pub team_index: u8,
    pub roster: BTreeMap<String, CharaChara>,
}

impl MemberState {
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            display_name: config.default_display_name.clone(),
            selected_club: config.random_club.clone(),
            characters: vec![config.random_character.clone(); config.roster_size],
            ready: false,
            team_index: 0,
            roster: BTreeMap::new(),
        }
    }

    pub fn named(config: &SessionConfig, name: &str) -> Self {
        Self {
            display_name: name.to_string(),
            ..Self::new(config)
        }
    }
}

impl Default for MemberState {
    fn default() -> Self {
        Self::new(&SessionConfig::default())
    }
}

#[derive(Debug)]
pub struct Member {
    slot: u8,
    pub state: MemberState,
    socket: Option<Socket>,
    connected: bool,
}

impl Display for Member {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] '{}'", self.slot, self.state.display_name)
    }
}

impl Member {
    fn new(slot: u8, socket: Option<Socket>, state: MemberState) -> Self {
        let mut member = Self {
            slot,
            state,
            socket,
            connected: true,
        };
        member.state.team_index = slot;
        member
    }

    pub fn slot(&self) -> u8 {
        self.slot
    }

    pub fn display_name(&self) -> &str {
        &self.state.display_name
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn socket(&self) -> Option<&Socket> {
        self.socket.as_ref()
    }

    pub fn socket_mut(&mut self) -> Option<&mut Socket> {
        self.socket.as_mut()
    }

    /// Swap in a new link, disposing the previous one.
    pub fn attach(&mut self, socket: Socket) -> Option<Socket> {
        self.socket.replace(socket)
    }

    pub fn take_socket(&mut self) -> Option<Socket> {
        self.socket.take()
    }

    fn close(&mut self) {
        self.connected = false;
        self.state.ready = false;
        if let Some(mut socket) = self.socket.take() {
            socket.dispose();
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberEvent {
    Join(u8),
    Change(u8),
    Part(u8),
    Renumber { from: u8, to: u8 },
}

/// Fixed-capacity slot table. Notifications queue up until drained.
#[derive(Debug)]
pub struct MemberSet {
    slots: Vec<Option<Member>>,
    self_index: Option<u8>,
    events: VecDeque<MemberEvent>,
}

impl Default for MemberSet {
    fn default() -> Self {
        Self::new(MAX_MEMBERS)
    }
}

impl MemberSet {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.clamp(1, MAX_MEMBERS);
        Self {
            slots: (0..capacity).map(|_| None).collect(),
            self_index: None,
            events: VecDeque::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Take a free slot. Remote joiners fill from the top so the low end stays
    /// free for the local member.
    pub fn try_join(
        &mut self,
        socket: Option<Socket>,
        is_self: bool,
        state: MemberState,
    ) -> Result<u8> {
        let free = |i: &usize| self.slots[*i].is_none();
        let slot = if is_self {
            (0..self.slots.len()).find(free)
        } else {
            (0..self.slots.len()).rev().find(free)
        };
        let Some(slot) = slot else {
            debug!("member set full, rejecting join");
            return Err(Error::LobbyFull);
        };
        let slot = slot as u8;
        self.slots[slot as usize] = Some(Member::new(slot, socket, state));
        if is_self {
            self.self_index = Some(slot);
        }
        self.events.push_back(MemberEvent::Join(slot));
        Ok(slot)
    }

    /// Apply a remote state update, creating the member when the slot is empty.
    pub fn set_member_state(&mut self, slot: u8, mut state: MemberState) -> Result<()> {
        let entry = self
            .slots
            .get_mut(slot as usize)
            .ok_or(Error::SlotOutOfRange)?;
        state.team_index = slot;
        match entry {
            Some(member) => {
                member.state = state;
                self.events.push_back(MemberEvent::Change(slot));
            }
            None => {
                *entry = Some(Member::new(slot, None, state));
                self.events.push_back(MemberEvent::Join(slot));
            }
        }
        Ok(())
    }

    /// Remove a member immediately, closing its link.
    pub fn part(&mut self, slot: u8) -> Result<Member> {
        let entry = self
            .slots
            .get_mut(slot as usize)
            .ok_or(Error::SlotOutOfRange)?;
        let mut member = entry.take().ok_or(Error::SlotEmpty)?;
        member.close();
        if self.self_index == Some(slot) {
            self.self_index = None;
        }
        trace!(slot, "member parted");
        self.events.push_back(MemberEvent::Part(slot));
        Ok(member)
    }

    pub fn renumber(&mut self, from: u8, to: u8) -> Result<()> {
        let cap = self.slots.len();
        if from as usize >= cap || to as usize >= cap {
            return Err(Error::SlotOutOfRange);
        }
        if from == to {
            return Ok(());
        }
        if self.slots[to as usize].is_some() {
            return Err(Error::SlotOccupied);
        }
        let mut member = self.slots[from as usize].take().ok_or(Error::SlotEmpty)?;
        member.slot = to;
        member.state.team_index = to;
        self.slots[to as usize] = Some(member);
        if self.self_index == Some(from) {
            self.self_index = Some(to);
        }
        self.events.push_back(MemberEvent::Renumber { from, to });
        Ok(())
    }

    /// Compact occupied slots toward zero, lowest first. Returns the moves.
    pub fn defragment(&mut self) -> Vec<(u8, u8)> {
        let mut moves = Vec::new();
        let mut first_empty = 0u8;
        for i in 0..self.slots.len() as u8 {
            if self.slots[i as usize].is_none() {
                continue;
            }
            if first_empty != i && self.renumber(i, first_empty).is_ok() {
                moves.push((i, first_empty));
            }
            first_empty += 1;
        }
        moves
    }

    pub fn get(&self, slot: u8) -> Option<&Member> {
        self.slots.get(slot as usize).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, slot: u8) -> Option<&mut Member> {
        self.slots.get_mut(slot as usize).and_then(Option::as_mut)
    }

    pub fn self_index(&self) -> Option<u8> {
        self.self_index
    }

    pub fn set_self_index(&mut self, slot: Option<u8>) {
        self.self_index = slot;
    }

    pub fn self_member(&self) -> Option<&Member> {
        self.self_index.and_then(|slot| self.get(slot))
    }

    pub fn self_member_mut(&mut self) -> Option<&mut Member> {
        let slot = self.self_index?;
        self.get_mut(slot)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Member> {
        self.slots.iter().flatten()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Member> {
        self.slots.iter_mut().flatten()
    }

    pub fn occupied(&self) -> Vec<u8> {
        self.iter().map(Member::slot).collect()
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() == self.slots.len()
    }

    pub fn drain_events(&mut self) -> Vec<MemberEvent> {
        self.events.drain(..).collect()
    }

    /// Close every link and forget everyone without raising events.
    pub fn clear(&mut self) {
        for slot in self.slots.iter_mut() {
            if let Some(mut member) = slot.take() {
                member.close();
            }
        }
        self.self_index = None;
        self.events.clear();
    }
}

impl Display for MemberSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for member in self.iter() {
            writeln!(f, "{member}")?;
        }
        Ok(())
    }
}
