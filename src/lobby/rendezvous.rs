//! Out-of-band room discovery

use std::{
    collections::HashMap,
    fmt::Display,
    str::FromStr,
    sync::{Arc, Mutex, MutexGuard},
};

use rand::Rng;
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Maps a short code a player can type to an address a follower can dial.
pub trait Rendezvous: Send {
    fn publish(&mut self, address: &str) -> Result<String>;
    fn resolve(&self, code: &str) -> Result<String>;
    fn withdraw(&mut self, code: &str);
}

/// Human-typeable `NNNN-NNNN` room code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RoomCode(u16, u16);

impl RoomCode {
    pub fn random(rng: &mut impl Rng) -> Self {
        Self(rng.random_range(0..10_000), rng.random_range(0..10_000))
    }
}

impl Display for RoomCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:04}-{:04}", self.0, self.1)
    }
}

impl FromStr for RoomCode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::InvalidRoomCode(s.to_string());
        let (a, b) = s.trim().split_once('-').ok_or_else(invalid)?;
        let half = |part: &str| -> Result<u16> {
            if part.len() != 4 || !part.bytes().all(|c| c.is_ascii_digit()) {
                return Err(invalid());
            }
            part.parse().map_err(|_| invalid())
        };
        Ok(Self(half(a)?, half(b)?))
    }
}

/// In-process matchmaking directory. Clones share one table.
#[derive(Clone, Default)]
pub struct Directory {
    rooms: Arc<Mutex<HashMap<RoomCode, String>>>,
}

impl Directory {
    pub fn new() -> Self {
        Self::default()
    }

    fn rooms(&self) -> MutexGuard<'_, HashMap<RoomCode, String>> {
        self.rooms.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn len(&self) -> usize {
        self.rooms().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Rendezvous for Directory {
    fn publish(&mut self, address: &str) -> Result<String> {
        let mut rooms = self.rooms();
        let mut rng = rand::rng();
        let code = loop {
            let code = RoomCode::random(&mut rng);
            if !rooms.contains_key(&code) {
                break code;
            }
        };
        rooms.insert(code, address.to_string());
        info!(%code, address, "room published");
        Ok(code.to_string())
    }

    fn resolve(&self, code: &str) -> Result<String> {
        let parsed: RoomCode = code.parse()?;
        self.rooms()
            .get(&parsed)
            .cloned()
            .ok_or_else(|| Error::RoomNotFound(code.to_string()))
    }

    fn withdraw(&mut self, code: &str) {
        if let Ok(parsed) = code.parse::<RoomCode>()
            && self.rooms().remove(&parsed).is_some()
        {
            debug!(code, "room withdrawn");
        }
    }
}

/// The address is the code, e.g. a relay identity pasted by hand.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectRendezvous;

impl Rendezvous for DirectRendezvous {
    fn publish(&mut self, address: &str) -> Result<String> {
        Ok(address.to_string())
    }

    fn resolve(&self, code: &str) -> Result<String> {
        let code = code.trim();
        if code.is_empty() {
            return Err(Error::InvalidRoomCode(code.to_string()));
        }
        Ok(code.to_string())
    }

    fn withdraw(&mut self, _code: &str) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_format() {
        let code: RoomCode = "0042-9001".parse().unwrap();
        assert_eq!(code.to_string(), "0042-9001");
        for bad in ["42-9001", "0042 9001", "abcd-1234", "00420-001", ""] {
            assert!(bad.parse::<RoomCode>().is_err(), "{bad}");
        }
    }

    #[test]
    fn directory_publish_resolve_withdraw() {
        let mut directory = Directory::new();
        let code = directory.publish("mem:1").unwrap();
        let other = directory.clone();
        assert_eq!(other.resolve(&code), Ok("mem:1".to_string()));
        directory.withdraw(&code);
        assert_eq!(other.resolve(&code), Err(Error::RoomNotFound(code.clone())));
        assert!(matches!(
            other.resolve("nope"),
            Err(Error::InvalidRoomCode(_))
        ));
    }

    #[test]
    fn direct_passthrough() {
        let mut direct = DirectRendezvous;
        let code = direct.publish("endpoint-abc").unwrap();
        assert_eq!(direct.resolve(&code), Ok("endpoint-abc".to_string()));
        assert!(direct.resolve("  ").is_err());
    }
}
