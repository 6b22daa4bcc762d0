use std::ops::{Deref, DerefMut};

use crate::world::{RoomSnapshot, TeamIndex};

/// Authoritative money per team, indexed by team.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TeamLedger(Vec<i64>);

impl Deref for TeamLedger {
    type Target = Vec<i64>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for TeamLedger {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl TeamLedger {
    pub fn new(teams: usize) -> Self {
        Self(vec![0; teams])
    }

    pub fn get(&self, team: TeamIndex) -> i64 {
        self.0.get(team as usize).copied().unwrap_or_default()
    }

    pub fn set(&mut self, team: TeamIndex, amount: i64) {
        let index = team as usize;
        if index >= self.0.len() {
            self.0.resize(index + 1, 0);
        }
        self.0[index] = amount;
    }

    pub fn credit(&mut self, team: TeamIndex, amount: i64) {
        let current = self.get(team);
        self.set(team, current.saturating_add(amount));
    }

    /// Income a team earns this tick from the rooms it dominates.
    pub fn income(rooms: &[RoomSnapshot], team: TeamIndex, per_room: i64) -> i64 {
        rooms
            .iter()
            .filter(|r| r.domination_team == Some(team))
            .count() as i64
            * per_room
    }

    /// Credit every team except `skip` with its room income.
    pub fn apply_income(&mut self, rooms: &[RoomSnapshot], per_room: i64, skip: TeamIndex) {
        for team in 0..self.0.len() as TeamIndex {
            if team != skip {
                self.credit(team, Self::income(rooms, team, per_room));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn room(id: u32, team: Option<TeamIndex>) -> RoomSnapshot {
        RoomSnapshot {
            id,
            domination_team: team,
            dominance: 1.0,
            training_power: 0,
        }
    }

    #[test]
    fn income_counts_dominated_rooms() {
        let rooms = [room(0, Some(1)), room(1, Some(2)), room(2, Some(1)), room(3, None)];
        assert_eq!(TeamLedger::income(&rooms, 1, 10), 20);
        assert_eq!(TeamLedger::income(&rooms, 0, 10), 0);
    }

    #[test]
    fn apply_income_skips_local_team() {
        let rooms = [room(0, Some(0)), room(1, Some(1))];
        let mut ledger = TeamLedger::new(3);
        ledger.set(0, 500);
        ledger.apply_income(&rooms, 10, 0);
        assert_eq!(*ledger, vec![500, 10, 0]);
    }

    #[test]
    fn set_grows() {
        let mut ledger = TeamLedger::default();
        ledger.credit(2, 7);
        assert_eq!(*ledger, vec![0, 0, 7]);
    }
}
