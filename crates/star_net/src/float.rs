//! Interpolated float leaf

use star_core::{DataReader, DataWriter};

use crate::element::NetElement;
use crate::error::NetResult;
use crate::version::{current_version, NetCompatibilityRules, NetElementVersion};

/// A float that slaves can interpolate toward each received value.
///
/// With interpolation enabled, `read_net_delta(t)` starts a segment from the
/// currently displayed value to the received one lasting `t` seconds, after
/// which the received value holds. A blank delta that arrives once that
/// segment is over keeps the value moving at the segment's rate for the
/// blank's window, never more than the extrapolation hint in total since the
/// last received value. A blank delta mid-segment changes nothing.
#[derive(Debug, Clone, Default)]
pub struct NetElementFloat {
    value: f32,
    fixed_point: Option<f32>,
    last_changed: u64,
    version: Option<NetElementVersion>,

    interpolating: bool,
    extrapolation_hint: f32,
    source: f32,
    target: f32,
    elapsed: f32,
    duration: f32,
    rate: f32,
    /// Seconds extrapolated since the last received value
    extrapolated: f32,
}

impl NetElementFloat {
    pub fn new(value: f32) -> Self {
        Self {
            value,
            source: value,
            target: value,
            ..Default::default()
        }
    }

    /// Encode as a signed variable-length multiple of `base`
    pub fn with_fixed_point(mut self, base: f32) -> Self {
        self.fixed_point = (base > 0.0).then_some(base);
        self
    }

    /// Value as currently displayed, including interpolation
    pub fn get(&self) -> f32 {
        if !self.interpolating || self.duration <= 0.0 {
            return self.value;
        }
        if self.elapsed >= self.duration {
            return self.target;
        }
        let t = self.elapsed / self.duration;
        self.source + (self.target - self.source) * t
    }

    /// Latest value received or set, ignoring interpolation
    #[inline]
    pub fn target(&self) -> f32 {
        self.value
    }

    pub fn set(&mut self, value: f32) {
        if self.value != value {
            self.value = value;
            self.reset_interpolation();
            self.last_changed = current_version(&self.version);
        }
    }

    fn reset_interpolation(&mut self) {
        self.source = self.value;
        self.target = self.value;
        self.elapsed = 0.0;
        self.duration = 0.0;
        self.rate = 0.0;
        self.extrapolated = 0.0;
    }

    fn write_raw(&self, out: &mut DataWriter) {
        match self.fixed_point {
            Some(base) => out.write_vlq_i((self.value / base).round() as i64),
            None => out.write_f32(self.value),
        }
    }

    fn read_raw(&self, input: &mut DataReader<'_>) -> NetResult<f32> {
        Ok(match self.fixed_point {
            Some(base) => input.read_vlq_i()? as f32 * base,
            None => input.read_f32()?,
        })
    }
}

impl NetElement for NetElementFloat {
    fn init_net_version(&mut self, version: Option<NetElementVersion>) {
        self.version = version;
    }

    fn net_store(&self, out: &mut DataWriter, _rules: NetCompatibilityRules) {
        self.write_raw(out);
    }

    fn net_load(&mut self, input: &mut DataReader<'_>, _rules: NetCompatibilityRules) -> NetResult<()> {
        self.value = self.read_raw(input)?;
        self.reset_interpolation();
        self.last_changed = current_version(&self.version);
        Ok(())
    }

    fn write_net_delta(&self, out: &mut DataWriter, from_version: u64, _rules: NetCompatibilityRules) -> bool {
        if self.last_changed > from_version {
            self.write_raw(out);
            true
        } else {
            false
        }
    }

    fn read_net_delta(
        &mut self,
        input: &mut DataReader<'_>,
        interpolation_time: f32,
        _rules: NetCompatibilityRules,
    ) -> NetResult<()> {
        let received = self.read_raw(input)?;
        if self.interpolating && interpolation_time > 0.0 {
            let from = self.get();
            self.value = received;
            self.source = from;
            self.target = received;
            self.elapsed = 0.0;
            self.duration = interpolation_time;
            self.rate = (received - from) / interpolation_time;
            self.extrapolated = 0.0;
        } else {
            self.value = received;
            self.reset_interpolation();
        }
        self.last_changed = current_version(&self.version);
        Ok(())
    }

    fn blank_net_delta(&mut self, interpolation_time: f32) {
        if !self.interpolating || self.rate == 0.0 || self.elapsed < self.duration {
            return;
        }
        let window = interpolation_time.min(self.extrapolation_hint - self.extrapolated);
        if window <= 0.0 {
            return;
        }
        let from = self.target;
        self.source = from;
        self.target = from + self.rate * window;
        self.elapsed = 0.0;
        self.duration = window;
        self.extrapolated += window;
    }

    fn enable_net_interpolation(&mut self, extrapolation_hint: f32) {
        self.interpolating = true;
        self.extrapolation_hint = extrapolation_hint.max(0.0);
    }

    fn disable_net_interpolation(&mut self) {
        self.interpolating = false;
        self.reset_interpolation();
    }

    fn tick_net_interpolation(&mut self, dt: f32) {
        if self.interpolating && self.duration > 0.0 {
            self.elapsed += dt;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn delta_bytes(value: f32) -> Vec<u8> {
        let mut w = DataWriter::new();
        w.write_f32(value);
        w.into_bytes()
    }

    #[test]
    fn test_interpolation_converges() {
        let rules = NetCompatibilityRules::latest();
        let mut f = NetElementFloat::new(0.0);
        f.enable_net_interpolation(0.0);
        f.read_net_delta(&mut DataReader::new(&delta_bytes(10.0)), 1.0, rules).unwrap();

        assert_relative_eq!(f.get(), 0.0);
        f.tick_net_interpolation(0.25);
        assert_relative_eq!(f.get(), 2.5, epsilon = 1e-5);
        f.tick_net_interpolation(0.75);
        assert_relative_eq!(f.get(), 10.0, epsilon = 1e-5);
        f.tick_net_interpolation(5.0);
        assert_relative_eq!(f.get(), 10.0, epsilon = 1e-5);
    }

    #[test]
    fn test_extrapolation_bounded_by_hint() {
        let rules = NetCompatibilityRules::latest();
        let mut f = NetElementFloat::new(0.0);
        f.enable_net_interpolation(0.5);
        f.read_net_delta(&mut DataReader::new(&delta_bytes(10.0)), 1.0, rules).unwrap();
        f.tick_net_interpolation(3.0);
        assert_relative_eq!(f.get(), 10.0, epsilon = 1e-4);

        f.blank_net_delta(0.2);
        f.tick_net_interpolation(0.1);
        assert_relative_eq!(f.get(), 11.0, epsilon = 1e-4);
        f.tick_net_interpolation(1.0);
        assert_relative_eq!(f.get(), 12.0, epsilon = 1e-4);

        f.blank_net_delta(1.0);
        f.tick_net_interpolation(1.0);
        assert_relative_eq!(f.get(), 15.0, epsilon = 1e-4);
        f.blank_net_delta(1.0);
        f.tick_net_interpolation(1.0);
        assert_relative_eq!(f.get(), 15.0, epsilon = 1e-4);

        f.read_net_delta(&mut DataReader::new(&delta_bytes(16.0)), 0.5, rules).unwrap();
        f.tick_net_interpolation(0.5);
        assert_relative_eq!(f.get(), 16.0, epsilon = 1e-4);
    }

    #[test]
    fn test_blank_delta_mid_segment_keeps_target() {
        let rules = NetCompatibilityRules::latest();
        let mut f = NetElementFloat::new(0.0);
        f.enable_net_interpolation(0.5);
        f.read_net_delta(&mut DataReader::new(&delta_bytes(10.0)), 1.0, rules).unwrap();
        f.tick_net_interpolation(0.25);
        f.blank_net_delta(0.1);
        assert_relative_eq!(f.get(), 2.5, epsilon = 1e-4);
        f.tick_net_interpolation(0.75);
        assert_relative_eq!(f.get(), 10.0, epsilon = 1e-4);
    }

    #[test]
    fn test_fixed_point_encoding() {
        let mut f = NetElementFloat::new(0.0).with_fixed_point(0.01);
        f.set(1.234);
        let mut w = DataWriter::new();
        f.net_store(&mut w, NetCompatibilityRules::latest());
        let bytes = w.into_bytes();

        let mut g = NetElementFloat::new(0.0).with_fixed_point(0.01);
        g.net_load(&mut DataReader::new(&bytes), NetCompatibilityRules::latest()).unwrap();
        assert_relative_eq!(g.get(), 1.23, epsilon = 1e-4);
    }
}
