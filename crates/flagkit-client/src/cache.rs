//! In-memory cache for flag and config values.
//!
//! One store serves both SDK tiers: the client tier keeps wholesale
//! snapshots alive until replaced, while the server tier stamps every entry
//! with a TTL. The two modes differ only in the [`ExpiryPolicy`], so the
//! bookkeeping lives in a single implementation instead of being duplicated
//! per binding.
//!
//! Expiry uses [`tokio::time::Instant`] so tests driving a paused clock can
//! observe entries aging out deterministically.

use std::collections::HashMap;
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::time::Instant;

/// Expiry policy applied to every entry in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiryPolicy {
    /// Entries live until replaced (snapshot mode).
    Never,
    /// Entries expire `Duration` after being stored. A zero duration
    /// disables caching entirely: reads always miss, writes are no-ops.
    Ttl(Duration),
}

impl ExpiryPolicy {
    /// Derives the policy from the configured optional TTL.
    pub fn from_ttl(ttl: Option<Duration>) -> Self {
        match ttl {
            Some(duration) => Self::Ttl(duration),
            None => Self::Never,
        }
    }

    /// Returns `true` when entries can age out (any TTL, including zero).
    pub fn expires(&self) -> bool {
        matches!(self, Self::Ttl(_))
    }

    /// Returns `true` when the policy rejects all caching.
    fn disabled(&self) -> bool {
        matches!(self, Self::Ttl(duration) if duration.is_zero())
    }

    /// Computes the expiry instant for an entry stored now.
    fn deadline(&self) -> Option<Instant> {
        match self {
            Self::Never => None,
            Self::Ttl(duration) => Some(Instant::now() + *duration),
        }
    }
}

/// Resource kinds tracked by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheKind {
    /// Feature flag values.
    Flags,
    /// Remote config values.
    Configs,
}

/// A stored value plus its optional expiry instant.
#[derive(Debug, Clone)]
struct CacheEntry {
    value: Value,
    expires_at: Option<Instant>,
}

impl CacheEntry {
    /// An entry read at or past its expiry is treated as absent.
    fn is_expired(&self, now: Instant) -> bool {
        match self.expires_at {
            Some(deadline) => now >= deadline,
            None => false,
        }
    }
}

/// Per-kind section holding individual entries plus the wholesale snapshot.
///
/// The "all" entry is validated independently from per-key entries so a
/// stale bulk snapshot never masks fresh single-key fetches (or vice versa).
#[derive(Debug, Default)]
struct Section {
    entries: HashMap<String, CacheEntry>,
    all: Option<CacheEntry>,
}

/// Unified value cache parameterized by an expiry policy.
#[derive(Debug)]
pub struct ValueCache {
    policy: ExpiryPolicy,
    flags: Section,
    configs: Section,
}

impl ValueCache {
    /// Creates an empty cache with the given policy.
    pub fn new(policy: ExpiryPolicy) -> Self {
        Self {
            policy,
            flags: Section::default(),
            configs: Section::default(),
        }
    }

    /// Returns the policy this cache was built with.
    pub fn policy(&self) -> ExpiryPolicy {
        self.policy
    }

    /// Looks up a single key, evicting it when expired.
    pub fn get(&mut self, kind: CacheKind, key: &str) -> Option<Value> {
        let now = Instant::now();
        let section = self.section_mut(kind);
        match section.entries.get(key) {
            Some(entry) if entry.is_expired(now) => {
                section.entries.remove(key);
                None
            }
            Some(entry) => Some(entry.value.clone()),
            None => None,
        }
    }

    /// Stores a single key. No-op when caching is disabled.
    pub fn set(&mut self, kind: CacheKind, key: &str, value: Value) {
        if self.policy.disabled() {
            return;
        }
        let expires_at = self.policy.deadline();
        self.section_mut(kind)
            .entries
            .insert(key.to_string(), CacheEntry { value, expires_at });
    }

    /// Returns the wholesale snapshot for a kind, evicting it when expired.
    pub fn get_all(&mut self, kind: CacheKind) -> Option<Map<String, Value>> {
        let now = Instant::now();
        let section = self.section_mut(kind);
        match &section.all {
            Some(entry) if entry.is_expired(now) => {
                section.all = None;
                None
            }
            Some(entry) => match &entry.value {
                Value::Object(map) => Some(map.clone()),
                _ => None,
            },
            None => None,
        }
    }

    /// Replaces the wholesale snapshot and seeds every per-key entry with
    /// the same expiry instant.
    pub fn set_all(&mut self, kind: CacheKind, values: Map<String, Value>) {
        if self.policy.disabled() {
            return;
        }
        let expires_at = self.policy.deadline();
        let section = self.section_mut(kind);
        section.entries.clear();
        for (key, value) in &values {
            section.entries.insert(
                key.clone(),
                CacheEntry {
                    value: value.clone(),
                    expires_at,
                },
            );
        }
        section.all = Some(CacheEntry {
            value: Value::Object(values),
            expires_at,
        });
    }

    /// Drops everything immediately, regardless of TTL.
    pub fn clear(&mut self) {
        self.flags = Section::default();
        self.configs = Section::default();
    }

    fn section_mut(&mut self, kind: CacheKind) -> &mut Section {
        match kind {
            CacheKind::Flags => &mut self.flags,
            CacheKind::Configs => &mut self.configs,
        }
    }
}
