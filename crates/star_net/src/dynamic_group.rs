//! Ordered, id-addressed collection of child elements

use std::collections::{BTreeMap, VecDeque};

use star_core::{DataReader, DataWriter};

use crate::element::NetElement;
use crate::error::{NetError, NetResult};
use crate::version::{current_version, NetCompatibilityRules, NetElementVersion};

/// Id of an element inside a [`NetElementDynamicGroup`]
pub type ElementId = u64;

const DELTA_FULL: u8 = 0;
const DELTA_CHANGES: u8 = 1;

const CHANGE_ADD: u8 = 0;
const CHANGE_REMOVE: u8 = 1;

const CHANGE_LOG_SLACK: usize = 32;

#[derive(Debug, Clone, Copy)]
enum GroupChange {
    Added(ElementId),
    Removed(ElementId),
}

/// Children that come and go at runtime.
///
/// Insertions and removals are tagged with the version they happened at;
/// a delta carries the membership changes followed by the deltas of the
/// surviving members, each addressed by id.
#[derive(Debug, Clone)]
pub struct NetElementDynamicGroup<E> {
    elements: BTreeMap<ElementId, E>,
    next_id: ElementId,
    changes: VecDeque<(u64, GroupChange)>,
    min_retained: u64,
    version: Option<NetElementVersion>,
    interpolation: Option<f32>,
}

impl<E> Default for NetElementDynamicGroup<E> {
    fn default() -> Self {
        Self {
            elements: BTreeMap::new(),
            next_id: 1,
            changes: VecDeque::new(),
            min_retained: 0,
            version: None,
            interpolation: None,
        }
    }
}

impl<E: NetElement + Default> NetElementDynamicGroup<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an element on the master, returning its id
    pub fn add_net_element(&mut self, mut element: E) -> ElementId {
        let id = self.next_id;
        self.next_id += 1;
        self.attach(&mut element);
        self.elements.insert(id, element);
        self.log(GroupChange::Added(id));
        id
    }

    pub fn remove_net_element(&mut self, id: ElementId) -> Option<E> {
        let mut element = self.elements.remove(&id)?;
        element.init_net_version(None);
        self.log(GroupChange::Removed(id));
        Some(element)
    }

    pub fn clear_net_elements(&mut self) {
        let ids: Vec<ElementId> = self.elements.keys().copied().collect();
        for id in ids {
            self.remove_net_element(id);
        }
    }

    pub fn get(&self, id: ElementId) -> Option<&E> {
        self.elements.get(&id)
    }

    pub fn get_mut(&mut self, id: ElementId) -> Option<&mut E> {
        self.elements.get_mut(&id)
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Elements in id order
    pub fn iter(&self) -> impl Iterator<Item = (ElementId, &E)> {
        self.elements.iter().map(|(id, e)| (*id, e))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (ElementId, &mut E)> {
        self.elements.iter_mut().map(|(id, e)| (*id, e))
    }

    fn attach(&self, element: &mut E) {
        element.init_net_version(self.version.clone());
        match self.interpolation {
            Some(hint) => element.enable_net_interpolation(hint),
            None => element.disable_net_interpolation(),
        }
    }

    fn log(&mut self, change: GroupChange) {
        self.changes.push_back((current_version(&self.version), change));
        let limit = self.elements.len() * 2 + CHANGE_LOG_SLACK;
        while self.changes.len() > limit {
            if let Some((dropped, _)) = self.changes.pop_front() {
                self.min_retained = self.min_retained.max(dropped);
            }
        }
    }

    fn store_elements(&self, out: &mut DataWriter, rules: NetCompatibilityRules) {
        out.write_vlq_u(self.elements.len() as u64);
        for (id, element) in &self.elements {
            out.write_vlq_u(*id);
            element.net_store(out, rules);
        }
    }

    fn load_elements(&mut self, input: &mut DataReader<'_>, rules: NetCompatibilityRules) -> NetResult<()> {
        let count = input.read_vlq_u()? as usize;
        if count > input.remaining() {
            return Err(NetError::Malformed(format!("group size {count} exceeds payload")));
        }
        self.elements.clear();
        for _ in 0..count {
            let id = input.read_vlq_u()?;
            self.load_one(id, input, rules)?;
        }
        Ok(())
    }

    fn load_one(&mut self, id: ElementId, input: &mut DataReader<'_>, rules: NetCompatibilityRules) -> NetResult<()> {
        let mut element = E::default();
        self.attach(&mut element);
        element.net_load(input, rules)?;
        self.elements.insert(id, element);
        self.next_id = self.next_id.max(id + 1);
        Ok(())
    }
}

impl<E: NetElement + Default> NetElement for NetElementDynamicGroup<E> {
    fn init_net_version(&mut self, version: Option<NetElementVersion>) {
        self.version = version;
        self.changes.clear();
        self.min_retained = 0;
        for element in self.elements.values_mut() {
            element.init_net_version(self.version.clone());
        }
    }

    fn net_store(&self, out: &mut DataWriter, rules: NetCompatibilityRules) {
        self.store_elements(out, rules);
    }

    fn net_load(&mut self, input: &mut DataReader<'_>, rules: NetCompatibilityRules) -> NetResult<()> {
        self.changes.clear();
        self.load_elements(input, rules)
    }

    fn write_net_delta(&self, out: &mut DataWriter, from_version: u64, rules: NetCompatibilityRules) -> bool {
        if from_version < self.min_retained {
            out.write_u8(DELTA_FULL);
            self.store_elements(out, rules);
            return true;
        }

        let mut membership = DataWriter::new();
        let mut membership_count = 0u64;
        let mut fresh = Vec::new();
        for (_, change) in self.changes.iter().filter(|(v, _)| *v > from_version) {
            match *change {
                GroupChange::Added(id) => {
                    // Elements removed again before this write only send the removal.
                    if let Some(element) = self.elements.get(&id) {
                        membership.write_u8(CHANGE_ADD);
                        membership.write_vlq_u(id);
                        element.net_store(&mut membership, rules);
                        membership_count += 1;
                        fresh.push(id);
                    }
                }
                GroupChange::Removed(id) => {
                    membership.write_u8(CHANGE_REMOVE);
                    membership.write_vlq_u(id);
                    membership_count += 1;
                }
            }
        }

        let mut member_deltas = DataWriter::new();
        let mut any_member = false;
        for (id, element) in &self.elements {
            if fresh.contains(id) {
                continue;
            }
            let mut delta = DataWriter::new();
            if element.write_net_delta(&mut delta, from_version, rules) {
                member_deltas.write_vlq_u(id + 1);
                member_deltas.write_bytes(delta.as_bytes());
                any_member = true;
            }
        }

        if membership_count == 0 && !any_member {
            return false;
        }
        out.write_u8(DELTA_CHANGES);
        out.write_vlq_u(membership_count);
        out.write_raw(membership.as_bytes());
        out.write_raw(member_deltas.as_bytes());
        out.write_vlq_u(0);
        true
    }

    fn read_net_delta(
        &mut self,
        input: &mut DataReader<'_>,
        interpolation_time: f32,
        rules: NetCompatibilityRules,
    ) -> NetResult<()> {
        match input.read_u8()? {
            DELTA_FULL => self.load_elements(input, rules),
            DELTA_CHANGES => {
                let count = input.read_vlq_u()?;
                for _ in 0..count {
                    match input.read_u8()? {
                        CHANGE_ADD => {
                            let id = input.read_vlq_u()?;
                            self.load_one(id, input, rules)?;
                        }
                        CHANGE_REMOVE => {
                            let id = input.read_vlq_u()?;
                            self.elements.remove(&id);
                        }
                        other => {
                            return Err(NetError::Malformed(format!("unknown group change {other}")))
                        }
                    }
                }

                let mut touched = Vec::new();
                loop {
                    let tag = input.read_vlq_u()?;
                    if tag == 0 {
                        break;
                    }
                    let id = tag - 1;
                    let bytes = input.read_bytes()?;
                    let element = self
                        .elements
                        .get_mut(&id)
                        .ok_or_else(|| NetError::Malformed(format!("delta for unknown element {id}")))?;
                    element.read_net_delta(&mut DataReader::new(&bytes), interpolation_time, rules)?;
                    touched.push(id);
                }
                for (id, element) in self.elements.iter_mut() {
                    if !touched.contains(id) {
                        element.blank_net_delta(interpolation_time);
                    }
                }
                Ok(())
            }
            other => Err(NetError::Malformed(format!("unknown group delta kind {other}"))),
        }
    }

    fn blank_net_delta(&mut self, interpolation_time: f32) {
        for element in self.elements.values_mut() {
            element.blank_net_delta(interpolation_time);
        }
    }

    fn enable_net_interpolation(&mut self, extrapolation_hint: f32) {
        self.interpolation = Some(extrapolation_hint);
        for element in self.elements.values_mut() {
            element.enable_net_interpolation(extrapolation_hint);
        }
    }

    fn disable_net_interpolation(&mut self) {
        self.interpolation = None;
        for element in self.elements.values_mut() {
            element.disable_net_interpolation();
        }
    }

    fn tick_net_interpolation(&mut self, dt: f32) {
        for element in self.elements.values_mut() {
            element.tick_net_interpolation(dt);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::NetElementString;

    fn rules() -> NetCompatibilityRules {
        NetCompatibilityRules::latest()
    }

    #[test]
    fn test_add_modify_remove() {
        let version = NetElementVersion::new();
        let mut master: NetElementDynamicGroup<NetElementString> = NetElementDynamicGroup::new();
        master.init_net_version(Some(version.clone()));
        let first = master.add_net_element(NetElementString::new("one".into()));
        let second = master.add_net_element(NetElementString::new("two".into()));

        let mut slave: NetElementDynamicGroup<NetElementString> = NetElementDynamicGroup::new();
        let mut out = DataWriter::new();
        assert!(master.write_net_delta(&mut out, 0, rules()));
        slave.read_net_delta(&mut DataReader::new(out.as_bytes()), 0.0, rules()).unwrap();
        let seen = version.increment();
        assert_eq!(slave.len(), 2);

        master.get_mut(first).unwrap().set("uno".into());
        master.remove_net_element(second);
        let mut out = DataWriter::new();
        assert!(master.write_net_delta(&mut out, seen, rules()));
        slave.read_net_delta(&mut DataReader::new(out.as_bytes()), 0.0, rules()).unwrap();

        assert_eq!(slave.len(), 1);
        assert_eq!(slave.get(first).unwrap().get(), "uno");

        let mut out = DataWriter::new();
        assert!(!master.write_net_delta(&mut out, version.increment(), rules()));
    }
}
