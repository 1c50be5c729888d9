//! Scalar leaves: replaced wholesale when they change

use star_core::{DataReader, DataWriter, Json};

use crate::element::NetElement;
use crate::error::NetResult;
use crate::value::NetValue;
use crate::version::{current_version, NetCompatibilityRules, NetElementVersion};

/// A single replicated value
#[derive(Debug, Clone, Default)]
pub struct NetElementData<T> {
    value: T,
    last_changed: u64,
    version: Option<NetElementVersion>,
    updated: bool,
}

pub type NetElementBool = NetElementData<bool>;
pub type NetElementInt = NetElementData<i64>;
pub type NetElementUInt = NetElementData<u64>;
pub type NetElementString = NetElementData<String>;
pub type NetElementBytes = NetElementData<Vec<u8>>;
pub type NetElementJson = NetElementData<Json>;
/// Enums use [`crate::net_enum!`] to become [`NetValue`]s
pub type NetElementEnum<E> = NetElementData<E>;

impl<T: NetValue> NetElementData<T> {
    pub fn new(value: T) -> Self {
        Self {
            value,
            last_changed: 0,
            version: None,
            updated: false,
        }
    }

    #[inline]
    pub fn get(&self) -> &T {
        &self.value
    }

    /// Replace the value; unchanged values do not bump the version
    pub fn set(&mut self, value: T) {
        if self.value != value {
            self.value = value;
            self.mark_changed();
        }
    }

    /// Mutate in place and always mark changed
    pub fn update(&mut self, f: impl FnOnce(&mut T)) {
        f(&mut self.value);
        self.mark_changed();
    }

    /// Whether a read changed the value since the last call
    pub fn pull_updated(&mut self) -> bool {
        std::mem::take(&mut self.updated)
    }

    #[inline]
    pub fn last_changed(&self) -> u64 {
        self.last_changed
    }

    fn mark_changed(&mut self) {
        self.last_changed = current_version(&self.version);
    }

    fn receive(&mut self, value: T) {
        if self.value != value {
            self.value = value;
            self.updated = true;
        }
    }
}

impl<T: NetValue> NetElement for NetElementData<T> {
    fn init_net_version(&mut self, version: Option<NetElementVersion>) {
        self.version = version;
    }

    fn net_store(&self, out: &mut DataWriter, _rules: NetCompatibilityRules) {
        self.value.write_value(out);
    }

    fn net_load(&mut self, input: &mut DataReader<'_>, _rules: NetCompatibilityRules) -> NetResult<()> {
        let value = T::read_value(input)?;
        self.receive(value);
        self.mark_changed();
        Ok(())
    }

    fn write_net_delta(&self, out: &mut DataWriter, from_version: u64, _rules: NetCompatibilityRules) -> bool {
        if self.last_changed > from_version {
            self.value.write_value(out);
            true
        } else {
            false
        }
    }

    fn read_net_delta(
        &mut self,
        input: &mut DataReader<'_>,
        _interpolation_time: f32,
        _rules: NetCompatibilityRules,
    ) -> NetResult<()> {
        let value = T::read_value(input)?;
        self.receive(value);
        self.mark_changed();
        Ok(())
    }
}

/// An optional size, where `None` is encoded as the "max" sentinel 0 and
/// `Some(n)` as `n + 1`
#[derive(Debug, Clone, Default)]
pub struct NetElementSize {
    inner: NetElementData<SizeRepr>,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
struct SizeRepr(Option<u64>);

impl NetValue for SizeRepr {
    fn write_value(&self, out: &mut DataWriter) {
        out.write_vlq_u(self.0.map_or(0, |n| n + 1));
    }
    fn read_value(input: &mut DataReader<'_>) -> NetResult<Self> {
        let raw = input.read_vlq_u()?;
        Ok(SizeRepr(raw.checked_sub(1)))
    }
}

impl NetElementSize {
    pub fn new(value: Option<u64>) -> Self {
        Self {
            inner: NetElementData::new(SizeRepr(value)),
        }
    }

    #[inline]
    pub fn get(&self) -> Option<u64> {
        self.inner.get().0
    }

    pub fn set(&mut self, value: Option<u64>) {
        self.inner.set(SizeRepr(value));
    }
}

impl NetElement for NetElementSize {
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
    fn read_net_delta(&mut self, input: &mut DataReader<'_>, t: f32, rules: NetCompatibilityRules) -> NetResult<()> {
        self.inner.read_net_delta(input, t, rules)
    }
}

/// Monotonic trigger counter.
///
/// The producer calls [`NetElementEvent::trigger`]; the consumer calls
/// [`NetElementEvent::pull_occurrences`] to get the number of triggers since
/// its last pull.
#[derive(Debug, Clone, Default)]
pub struct NetElementEvent {
    counter: NetElementData<u64>,
    pulled: u64,
    ignore_on_load: bool,
}

impl NetElementEvent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&mut self) {
        self.counter.update(|c| *c += 1);
    }

    /// Triggers since the previous pull
    pub fn pull_occurrences(&mut self) -> u64 {
        let current = *self.counter.get();
        let occurred = current.saturating_sub(self.pulled);
        self.pulled = current;
        occurred
    }

    /// Whether at least one trigger happened since the previous pull
    pub fn pull_occurred(&mut self) -> bool {
        self.pull_occurrences() > 0
    }

    /// Forget pending occurrences
    pub fn ignore_occurrences(&mut self) {
        self.pulled = *self.counter.get();
    }

    /// Silence history carried by a full load, so reconnecting peers do not
    /// replay it
    pub fn set_ignore_occurrences_on_net_load(&mut self, ignore: bool) {
        self.ignore_on_load = ignore;
    }
}

impl NetElement for NetElementEvent {
    fn init_net_version(&mut self, version: Option<NetElementVersion>) {
        self.counter.init_net_version(version);
    }

    fn net_store(&self, out: &mut DataWriter, rules: NetCompatibilityRules) {
        self.counter.net_store(out, rules);
    }

    fn net_load(&mut self, input: &mut DataReader<'_>, rules: NetCompatibilityRules) -> NetResult<()> {
        self.counter.net_load(input, rules)?;
        if self.ignore_on_load {
            self.ignore_occurrences();
        }
        Ok(())
    }

    fn write_net_delta(&self, out: &mut DataWriter, from_version: u64, rules: NetCompatibilityRules) -> bool {
        self.counter.write_net_delta(out, from_version, rules)
    }

    fn read_net_delta(&mut self, input: &mut DataReader<'_>, t: f32, rules: NetCompatibilityRules) -> NetResult<()> {
        self.counter.read_net_delta(input, t, rules)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_same_value_keeps_version() {
        let version = NetElementVersion::new();
        let mut e = NetElementInt::new(3);
        e.init_net_version(Some(version.clone()));
        version.increment();
        e.set(3);
        assert_eq!(e.last_changed(), 0);
        e.set(4);
        assert_eq!(e.last_changed(), 2);
    }

    #[test]
    fn test_pull_occurrences_counts_and_clears() {
        let mut event = NetElementEvent::new();
        for _ in 0..3 {
            event.trigger();
        }
        assert_eq!(event.pull_occurrences(), 3);
        assert_eq!(event.pull_occurrences(), 0);
        event.trigger();
        assert!(event.pull_occurred());
    }

    #[test]
    fn test_event_ignore_on_load() {
        let mut source = NetElementEvent::new();
        source.trigger();
        source.trigger();
        let mut w = DataWriter::new();
        source.net_store(&mut w, NetCompatibilityRules::latest());
        let bytes = w.into_bytes();

        let mut sink = NetElementEvent::new();
        sink.set_ignore_occurrences_on_net_load(true);
        sink.net_load(&mut DataReader::new(&bytes), NetCompatibilityRules::latest()).unwrap();
        assert_eq!(sink.pull_occurrences(), 0);
    }

    #[test]
    fn test_size_sentinel() {
        let mut w = DataWriter::new();
        NetElementSize::new(None).net_store(&mut w, NetCompatibilityRules::latest());
        NetElementSize::new(Some(5)).net_store(&mut w, NetCompatibilityRules::latest());
        assert_eq!(w.as_bytes(), &[0, 6]);
    }
}
