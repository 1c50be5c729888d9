//! The net element trait

use star_core::{DataReader, DataWriter};

use crate::error::NetResult;
use crate::version::{NetCompatibilityRules, NetElementVersion};

/// A node in the replication tree.
///
/// Leaves record the owning counter's current value whenever they change and
/// write themselves into a delta only when that value is strictly greater
/// than the peer's `from_version`.
pub trait NetElement {
    /// Attach to (or detach from) the counter of the owning top element
    fn init_net_version(&mut self, version: Option<NetElementVersion>);

    /// Write the complete state
    fn net_store(&self, out: &mut DataWriter, rules: NetCompatibilityRules);

    /// Replace the complete state
    fn net_load(&mut self, input: &mut DataReader<'_>, rules: NetCompatibilityRules)
        -> NetResult<()>;

    /// Write changes newer than `from_version`, returning whether anything
    /// was written. Output must be self-delimiting.
    fn write_net_delta(
        &self,
        out: &mut DataWriter,
        from_version: u64,
        rules: NetCompatibilityRules,
    ) -> bool;

    /// Apply a delta written by [`NetElement::write_net_delta`]
    fn read_net_delta(
        &mut self,
        input: &mut DataReader<'_>,
        interpolation_time: f32,
        rules: NetCompatibilityRules,
    ) -> NetResult<()>;

    /// A delta arrived with nothing for this element
    fn blank_net_delta(&mut self, _interpolation_time: f32) {}

    fn enable_net_interpolation(&mut self, _extrapolation_hint: f32) {}

    fn disable_net_interpolation(&mut self) {}

    fn tick_net_interpolation(&mut self, _dt: f32) {}

    /// Whether this element takes part in serialization under `rules`
    fn check_with_rules(&self, _rules: NetCompatibilityRules) -> bool {
        true
    }
}

/// Wrapper that only replicates its element to peers at or above a
/// protocol version
#[derive(Debug, Clone, Default)]
pub struct NetCompat<E> {
    min_version: u32,
    inner: E,
}

impl<E> NetCompat<E> {
    pub fn new(min_version: u32, inner: E) -> Self {
        Self { min_version, inner }
    }
}

impl<E> std::ops::Deref for NetCompat<E> {
    type Target = E;
    fn deref(&self) -> &E {
        &self.inner
    }
}

impl<E> std::ops::DerefMut for NetCompat<E> {
    fn deref_mut(&mut self) -> &mut E {
        &mut self.inner
    }
}

impl<E: NetElement> NetElement for NetCompat<E> {
    fn init_net_version(&mut self, version: Option<NetElementVersion>) {
        self.inner.init_net_version(version);
    }

    fn net_store(&self, out: &mut DataWriter, rules: NetCompatibilityRules) {
        self.inner.net_store(out, rules);
    }

    fn net_load(&mut self, input: &mut DataReader<'_>, rules: NetCompatibilityRules) -> NetResult<()> {
        self.inner.net_load(input, rules)
    }

    fn write_net_delta(&self, out: &mut DataWriter, from_version: u64, rules: NetCompatibilityRules) -> bool {
        self.inner.write_net_delta(out, from_version, rules)
    }

    fn read_net_delta(
        &mut self,
        input: &mut DataReader<'_>,
        interpolation_time: f32,
        rules: NetCompatibilityRules,
    ) -> NetResult<()> {
        self.inner.read_net_delta(input, interpolation_time, rules)
    }

    fn blank_net_delta(&mut self, interpolation_time: f32) {
        self.inner.blank_net_delta(interpolation_time);
    }

    fn enable_net_interpolation(&mut self, extrapolation_hint: f32) {
        self.inner.enable_net_interpolation(extrapolation_hint);
    }

    fn disable_net_interpolation(&mut self) {
        self.inner.disable_net_interpolation();
    }

    fn tick_net_interpolation(&mut self, dt: f32) {
        self.inner.tick_net_interpolation(dt);
    }

    fn check_with_rules(&self, rules: NetCompatibilityRules) -> bool {
        rules.version() >= self.min_version
    }
}
