//! Ephemeral download keys
//!
//! A download key binds a bulk-export request to the identity that asked for
//! it, so command line tools (wget, curl) can fetch an archive without a
//! browser session.
//!
//! # Lifecycle
//!
//! - `issue` records the identity under a fresh random key
//! - `lookup` resolves a key; it does not consume it, the same key may be
//!   used for several downloads until it expires
//! - Keys expire after the configured TTL and are evicted on the next `issue`
//! - The store never holds more than `capacity` keys; the oldest go first
//!
//! Callers must keep "no key supplied" and "key not resolvable" apart, since
//! they answer with different status codes (403 and 400).

use crate::{Error, Result};
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};
use tracing::debug;

/// Length of generated keys
pub const KEY_LENGTH: usize = 32;

/// Outcome of resolving a key supplied (or not) by a caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyLookup {
    /// Key is live and bound to this identity
    Found(String),
    /// Caller supplied no key at all
    Absent,
    /// Caller supplied a key that is unknown or expired
    Unresolvable,
}

#[derive(Debug)]
struct KeyEntry {
    identity: String,
    issued_at: Instant,
}

/// Process-wide store of live download keys
#[derive(Debug)]
pub struct DownloadKeyStore {
    ttl: Duration,
    capacity: usize,
    entries: RwLock<HashMap<String, KeyEntry>>,
}

impl DownloadKeyStore {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            ttl,
            capacity: capacity.max(1),
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Issue a new key for `identity`
    pub fn issue(&self, identity: &str) -> String {
        let key = generate_key();
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());

        let ttl = self.ttl;
        entries.retain(|_, entry| entry.issued_at.elapsed() < ttl);

        while entries.len() >= self.capacity {
            let oldest = entries
                .iter()
                .min_by_key(|(_, entry)| entry.issued_at)
                .map(|(key, _)| key.clone());
            match oldest {
                Some(oldest) => {
                    debug!("Evicting download key to stay within capacity");
                    entries.remove(&oldest);
                }
                None => break,
            }
        }

        entries.insert(
            key.clone(),
            KeyEntry {
                identity: identity.to_string(),
                issued_at: Instant::now(),
            },
        );
        key
    }

    /// Identity bound to `key`, or `NotFound` if unknown or expired
    pub fn resolve(&self, key: &str) -> Result<String> {
        {
            let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
            match entries.get(key) {
                Some(entry) if entry.issued_at.elapsed() < self.ttl => {
                    return Ok(entry.identity.clone());
                }
                Some(_) => {}
                None => return Err(Error::NotFound("download key".to_string())),
            }
        }

        // Expired: drop it now rather than waiting for the next issue
        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key);
        Err(Error::NotFound("download key".to_string()))
    }

    /// Resolve a possibly-missing key into the three caller-visible cases
    pub fn lookup(&self, key: Option<&str>) -> KeyLookup {
        match key {
            None => KeyLookup::Absent,
            Some(key) => match self.resolve(key) {
                Ok(identity) => KeyLookup::Found(identity),
                Err(_) => KeyLookup::Unresolvable,
            },
        }
    }

    /// Number of keys currently held, expired ones included
    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn generate_key() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(KEY_LENGTH)
        .map(char::from)
        .collect()
}
