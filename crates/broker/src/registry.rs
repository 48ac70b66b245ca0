//! The broker's view of the worker fleet: query addresses indexed by shard
//! tag, grown as higher tags announce. A respawned worker re-announces and
//! replaces its slot.

use std::net::SocketAddr;
use std::sync::Mutex;

#[derive(Debug, Default)]
pub struct Registry {
    slots: Mutex<Vec<Option<SocketAddr>>>,
}

impl Registry {
    /// Record `tag`'s query address, growing the table if needed. Returns
    /// whether an earlier announcement was replaced.
    pub fn announce(&self, tag: usize, addr: SocketAddr) -> bool {
        let mut slots = self.slots.lock().unwrap();
        if tag >= slots.len() {
            slots.resize(tag + 1, None);
        }
        let replaced = slots[tag].is_some();
        slots[tag] = Some(addr);
        replaced
    }

    /// Every announced worker address, in tag order.
    pub fn workers(&self) -> Vec<SocketAddr> {
        self.slots.lock().unwrap().iter().flatten().copied().collect()
    }
}
