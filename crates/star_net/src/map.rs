//! Replicated hash map with a change log

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;

use star_core::{DataReader, DataWriter};

use crate::element::NetElement;
use crate::error::{NetError, NetResult};
use crate::value::NetValue;
use crate::version::{current_version, NetCompatibilityRules, NetElementVersion};

const DELTA_FULL: u8 = 0;
const DELTA_CHANGES: u8 = 1;

const CHANGE_SET: u8 = 0;
const CHANGE_REMOVE: u8 = 1;
const CHANGE_CLEAR: u8 = 2;

/// Extra log entries kept beyond twice the map size
const CHANGE_LOG_SLACK: usize = 32;

#[derive(Debug, Clone)]
enum MapChange<K, V> {
    Set(K, V),
    Remove(K),
    Clear,
}

/// Keyed collection replicated as add / remove / modify changes.
///
/// Peers older than the retained change log receive a full reset instead.
#[derive(Debug, Clone)]
pub struct NetElementHashMap<K, V> {
    map: HashMap<K, V>,
    changes: VecDeque<(u64, MapChange<K, V>)>,
    /// Deltas from before this version must be sent as full resets
    min_retained: u64,
    version: Option<NetElementVersion>,
    updated: bool,
}

impl<K, V> Default for NetElementHashMap<K, V> {
    fn default() -> Self {
        Self {
            map: HashMap::new(),
            changes: VecDeque::new(),
            min_retained: 0,
            version: None,
            updated: false,
        }
    }
}

impl<K, V> NetElementHashMap<K, V>
where
    K: NetValue + Eq + Hash + Ord,
    V: NetValue,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.map.get(key)
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.map.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.map.iter()
    }

    /// Entries sorted by key
    pub fn sorted(&self) -> Vec<(&K, &V)> {
        let mut entries: Vec<_> = self.map.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        entries
    }

    pub fn set(&mut self, key: K, value: V) {
        if self.map.get(&key) == Some(&value) {
            return;
        }
        self.map.insert(key.clone(), value.clone());
        self.log(MapChange::Set(key, value));
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        let removed = self.map.remove(key)?;
        self.log(MapChange::Remove(key.clone()));
        Some(removed)
    }

    pub fn clear(&mut self) {
        if self.map.is_empty() {
            return;
        }
        self.map.clear();
        self.log(MapChange::Clear);
    }

    /// Replace the whole contents, logging only the differences
    pub fn reset(&mut self, values: HashMap<K, V>) {
        let stale: Vec<K> = self
            .map
            .keys()
            .filter(|k| !values.contains_key(k))
            .cloned()
            .collect();
        for key in stale {
            self.remove(&key);
        }
        for (key, value) in values {
            self.set(key, value);
        }
    }

    /// Whether a read changed the map since the last call
    pub fn pull_updated(&mut self) -> bool {
        std::mem::take(&mut self.updated)
    }

    fn log(&mut self, change: MapChange<K, V>) {
        let version = current_version(&self.version);
        self.changes.push_back((version, change));
        let limit = self.map.len() * 2 + CHANGE_LOG_SLACK;
        while self.changes.len() > limit {
            if let Some((dropped, _)) = self.changes.pop_front() {
                self.min_retained = self.min_retained.max(dropped);
            }
        }
    }

    fn store_entries(&self, out: &mut DataWriter) {
        let entries = self.sorted();
        out.write_vlq_u(entries.len() as u64);
        for (k, v) in entries {
            k.write_value(out);
            v.write_value(out);
        }
    }

    fn load_entries(&mut self, input: &mut DataReader<'_>) -> NetResult<()> {
        let count = input.read_vlq_u()? as usize;
        if count > input.remaining() {
            return Err(NetError::Malformed(format!("map size {count} exceeds payload")));
        }
        let mut map = HashMap::with_capacity(count);
        for _ in 0..count {
            let k = K::read_value(input)?;
            let v = V::read_value(input)?;
            map.insert(k, v);
        }
        self.map = map;
        self.updated = true;
        Ok(())
    }
}

impl<K, V> NetElement for NetElementHashMap<K, V>
where
    K: NetValue + Eq + Hash + Ord,
    V: NetValue,
{
    fn init_net_version(&mut self, version: Option<NetElementVersion>) {
        self.version = version;
        self.changes.clear();
        self.min_retained = 0;
    }

    fn net_store(&self, out: &mut DataWriter, _rules: NetCompatibilityRules) {
        self.store_entries(out);
    }

    fn net_load(&mut self, input: &mut DataReader<'_>, _rules: NetCompatibilityRules) -> NetResult<()> {
        self.changes.clear();
        self.load_entries(input)
    }

    fn write_net_delta(&self, out: &mut DataWriter, from_version: u64, _rules: NetCompatibilityRules) -> bool {
        if from_version < self.min_retained {
            out.write_u8(DELTA_FULL);
            self.store_entries(out);
            return true;
        }

        let pending: Vec<&MapChange<K, V>> = self
            .changes
            .iter()
            .filter(|(version, _)| *version > from_version)
            .map(|(_, change)| change)
            .collect();
        if pending.is_empty() {
            return false;
        }

        out.write_u8(DELTA_CHANGES);
        out.write_vlq_u(pending.len() as u64);
        for change in pending {
            match change {
                MapChange::Set(k, v) => {
                    out.write_u8(CHANGE_SET);
                    k.write_value(out);
                    v.write_value(out);
                }
                MapChange::Remove(k) => {
                    out.write_u8(CHANGE_REMOVE);
                    k.write_value(out);
                }
                MapChange::Clear => out.write_u8(CHANGE_CLEAR),
            }
        }
        true
    }

    fn read_net_delta(
        &mut self,
        input: &mut DataReader<'_>,
        _interpolation_time: f32,
        _rules: NetCompatibilityRules,
    ) -> NetResult<()> {
        match input.read_u8()? {
            DELTA_FULL => self.load_entries(input),
            DELTA_CHANGES => {
                let count = input.read_vlq_u()?;
                for _ in 0..count {
                    match input.read_u8()? {
                        CHANGE_SET => {
                            let k = K::read_value(input)?;
                            let v = V::read_value(input)?;
                            self.map.insert(k, v);
                        }
                        CHANGE_REMOVE => {
                            let k = K::read_value(input)?;
                            self.map.remove(&k);
                        }
                        CHANGE_CLEAR => self.map.clear(),
                        other => {
                            return Err(NetError::Malformed(format!("unknown map change {other}")))
                        }
                    }
                }
                self.updated = true;
                Ok(())
            }
            other => Err(NetError::Malformed(format!("unknown map delta kind {other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules() -> NetCompatibilityRules {
        NetCompatibilityRules::latest()
    }

    #[test]
    fn test_changes_replicate() {
        let version = NetElementVersion::new();
        let mut master: NetElementHashMap<String, i32> = NetElementHashMap::new();
        master.init_net_version(Some(version.clone()));
        master.set("a".into(), 1);
        master.set("b".into(), 2);

        let mut slave: NetElementHashMap<String, i32> = NetElementHashMap::new();
        let mut out = DataWriter::new();
        master.net_store(&mut out, rules());
        slave.net_load(&mut DataReader::new(out.as_bytes()), rules()).unwrap();
        let seen = version.increment();

        master.remove(&"a".to_string());
        master.set("c".into(), 3);
        let mut out = DataWriter::new();
        assert!(master.write_net_delta(&mut out, seen, rules()));
        slave.read_net_delta(&mut DataReader::new(out.as_bytes()), 0.0, rules()).unwrap();

        assert_eq!(slave.get(&"a".to_string()), None);
        assert_eq!(slave.get(&"b".to_string()), Some(&2));
        assert_eq!(slave.get(&"c".to_string()), Some(&3));
        assert!(slave.pull_updated());
    }

    #[test]
    fn test_stale_peer_gets_full_reset() {
        let version = NetElementVersion::new();
        let mut master: NetElementHashMap<u32, u32> = NetElementHashMap::new();
        master.init_net_version(Some(version.clone()));
        for i in 0..100 {
            version.increment();
            master.set(0, i);
        }
        let mut out = DataWriter::new();
        assert!(master.write_net_delta(&mut out, 1, rules()));
        assert_eq!(out.as_bytes()[0], DELTA_FULL);
    }
}
