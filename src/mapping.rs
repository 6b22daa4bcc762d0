//! Wire id tables.

use std::{collections::HashMap, fmt::Debug, hash::Hash};

use tracing::warn;

use crate::error::{Error, Result};

/// Small integer standing in for a simulation object on the wire.
pub type NetId = u32;

/// How far past the end of a table a remote id may land.
pub const MAX_ID_GAP: usize = 1024;

/// Bidirectional table between local objects and wire ids.
///
/// The sender assigns ids in append order with [`ObjectMapping::add_or_get`];
/// the receiver mirrors them with [`ObjectMapping::set`]. Destroyed ids are
/// nulled, never reused.
#[derive(Debug, Clone)]
pub struct ObjectMapping<T> {
    by_id: Vec<Option<T>>,
    by_object: HashMap<T, NetId>,
}

impl<T> Default for ObjectMapping<T> {
    fn default() -> Self {
        Self {
            by_id: Vec::new(),
            by_object: HashMap::new(),
        }
    }
}

impl<T: Clone + Eq + Hash + Debug> ObjectMapping<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, object: T) -> NetId {
        let id = self.by_id.len() as NetId;
        self.by_id.push(Some(object.clone()));
        self.by_object.insert(object, id);
        id
    }

    pub fn add_or_get(&mut self, object: T) -> NetId {
        match self.by_object.get(&object) {
            Some(id) => *id,
            None => self.add(object),
        }
    }

    /// Place `object` at an id chosen by the remote side.
    ///
    /// Ids more than [`MAX_ID_GAP`] past the end of the table are rejected.
    pub fn set(&mut self, id: NetId, object: T) -> Result<()> {
        let index = id as usize;
        if index > self.by_id.len() + MAX_ID_GAP {
            return Err(Error::Malformed(format!(
                "wire id {id} is far past the {} mapped",
                self.by_id.len()
            )));
        }
        if index != self.by_id.len() {
            warn!(id, next = self.by_id.len(), ?object, "unexpected wire id");
        }
        if index >= self.by_id.len() {
            self.by_id.resize(index + 1, None);
        }
        // an object lives at one id only
        if let Some(old) = self.by_object.get(&object).copied()
            && old != id
            && let Some(slot) = self.by_id.get_mut(old as usize)
        {
            *slot = None;
        }
        if let Some(previous) = self.by_id[index].replace(object.clone())
            && previous != object
        {
            self.by_object.remove(&previous);
        }
        self.by_object.insert(object, id);
        Ok(())
    }

    pub fn id_of(&self, object: &T) -> Result<NetId> {
        self.by_object.get(object).copied().ok_or(Error::NotMapped)
    }

    pub fn try_id_of(&self, object: &T) -> Option<NetId> {
        self.by_object.get(object).copied()
    }

    pub fn get(&self, id: NetId) -> Result<&T> {
        self.try_get(id).ok_or(Error::UnknownId(id))
    }

    pub fn try_get(&self, id: NetId) -> Option<&T> {
        self.by_id.get(id as usize).and_then(Option::as_ref)
    }

    pub fn contains(&self, object: &T) -> bool {
        self.by_object.contains_key(object)
    }

    /// Null the slot of `object`, returning its former id.
    pub fn destroy(&mut self, object: &T) -> Result<NetId> {
        let id = self.by_object.remove(object).ok_or(Error::NotMapped)?;
        if let Some(slot) = self.by_id.get_mut(id as usize) {
            *slot = None;
        }
        Ok(id)
    }

    /// Number of ids handed out so far, including destroyed ones.
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub fn clear(&mut self) {
        self.by_id.clear();
        self.by_object.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (NetId, &T)> {
        self.by_id
            .iter()
            .enumerate()
            .filter_map(|(id, o)| o.as_ref().map(|o| (id as NetId, o)))
    }
}
