//! Root of a replication tree

use std::ops::{Deref, DerefMut};

use star_core::{DataReader, DataWriter};

use crate::element::NetElement;
use crate::error::{NetError, NetResult};
use crate::version::{NetCompatibilityRules, NetElementVersion};

/// Owns the version counter for a group and frames its state.
///
/// `write_net_state` payloads are a flag byte (1 = full store, 0 = delta)
/// followed by the group's bytes. An empty delta is an empty payload.
#[derive(Debug)]
pub struct NetElementTop<G> {
    version: NetElementVersion,
    group: G,
}

impl<G: NetElement> NetElementTop<G> {
    pub fn new(mut group: G) -> Self {
        let version = NetElementVersion::new();
        group.init_net_version(Some(version.clone()));
        Self { version, group }
    }

    /// Current counter value
    pub fn net_version(&self) -> u64 {
        self.version.current()
    }

    /// Serialize for a peer that last saw `from_version` (0 for a new peer).
    ///
    /// Returns the payload and the version the peer should send next time.
    /// An empty delta leaves the counter alone and returns `from_version`.
    pub fn write_net_state(&mut self, from_version: u64, rules: NetCompatibilityRules) -> (Vec<u8>, u64) {
        let mut out = DataWriter::new();
        if from_version == 0 {
            out.write_bool(true);
            self.group.net_store(&mut out, rules);
            return (out.into_bytes(), self.version.increment());
        }

        out.write_bool(false);
        if !self.group.write_net_delta(&mut out, from_version, rules) {
            return (Vec::new(), from_version);
        }
        (out.into_bytes(), self.version.increment())
    }

    /// Apply a payload from [`NetElementTop::write_net_state`]. An empty
    /// payload counts as a blank delta.
    pub fn read_net_state(
        &mut self,
        data: &[u8],
        interpolation_time: f32,
        rules: NetCompatibilityRules,
    ) -> NetResult<()> {
        if data.is_empty() {
            self.group.blank_net_delta(interpolation_time);
            return Ok(());
        }

        let mut input = DataReader::new(data);
        if input.read_bool()? {
            self.group.net_load(&mut input, rules)?;
        } else {
            self.group.read_net_delta(&mut input, interpolation_time, rules)?;
        }
        if !input.at_end() {
            return Err(NetError::Malformed(format!(
                "{} trailing bytes in net state",
                input.remaining()
            )));
        }
        Ok(())
    }

    pub fn enable_net_interpolation(&mut self, extrapolation_hint: f32) {
        self.group.enable_net_interpolation(extrapolation_hint);
    }

    pub fn disable_net_interpolation(&mut self) {
        self.group.disable_net_interpolation();
    }

    pub fn tick_net_interpolation(&mut self, dt: f32) {
        self.group.tick_net_interpolation(dt);
    }

    pub fn into_inner(mut self) -> G {
        self.group.init_net_version(None);
        self.group
    }
}

impl<G: NetElement + Default> Default for NetElementTop<G> {
    fn default() -> Self {
        Self::new(G::default())
    }
}

impl<G> Deref for NetElementTop<G> {
    type Target = G;
    fn deref(&self) -> &G {
        &self.group
    }
}

impl<G> DerefMut for NetElementTop<G> {
    fn deref_mut(&mut self) -> &mut G {
        &mut self.group
    }
}
