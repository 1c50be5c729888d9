//! Fixed groups of child elements
//!
//! A group delta is a presence bitmask, one bit per child in declaration
//! order packed into `ceil(n / 8)` bytes, followed by the deltas of the
//! present children. Children filtered out by compatibility rules take no
//! bit.

use star_core::{DataReader, DataWriter};

use crate::element::NetElement;
use crate::error::NetResult;
use crate::version::{NetCompatibilityRules, NetElementVersion};

pub fn group_init_net_version(children: &mut [&mut dyn NetElement], version: Option<NetElementVersion>) {
    for child in children.iter_mut() {
        child.init_net_version(version.clone());
    }
}

pub fn group_net_store(children: &[&dyn NetElement], out: &mut DataWriter, rules: NetCompatibilityRules) {
    for child in children.iter().filter(|c| c.check_with_rules(rules)) {
        child.net_store(out, rules);
    }
}

pub fn group_net_load(
    children: &mut [&mut dyn NetElement],
    input: &mut DataReader<'_>,
    rules: NetCompatibilityRules,
) -> NetResult<()> {
    for child in children.iter_mut() {
        if child.check_with_rules(rules) {
            child.net_load(input, rules)?;
        }
    }
    Ok(())
}

pub fn group_write_net_delta(
    children: &[&dyn NetElement],
    out: &mut DataWriter,
    from_version: u64,
    rules: NetCompatibilityRules,
) -> bool {
    let active: Vec<&dyn NetElement> = children
        .iter()
        .copied()
        .filter(|c| c.check_with_rules(rules))
        .collect();

    let mut mask = vec![0u8; active.len().div_ceil(8)];
    let mut body = DataWriter::new();
    for (i, child) in active.iter().enumerate() {
        if child.write_net_delta(&mut body, from_version, rules) {
            mask[i / 8] |= 1 << (i % 8);
        }
    }

    if mask.iter().all(|b| *b == 0) {
        return false;
    }
    out.write_raw(&mask);
    out.write_raw(body.as_bytes());
    true
}

pub fn group_read_net_delta(
    children: &mut [&mut dyn NetElement],
    input: &mut DataReader<'_>,
    interpolation_time: f32,
    rules: NetCompatibilityRules,
) -> NetResult<()> {
    let active = children.iter().filter(|c| c.check_with_rules(rules)).count();
    let mask = input.read_raw(active.div_ceil(8))?;

    let mut i = 0;
    for child in children.iter_mut() {
        if !child.check_with_rules(rules) {
            continue;
        }
        if mask[i / 8] & (1 << (i % 8)) != 0 {
            child.read_net_delta(input, interpolation_time, rules)?;
        } else {
            child.blank_net_delta(interpolation_time);
        }
        i += 1;
    }
    Ok(())
}

/// Implement [`NetElement`] for a struct whose listed fields are net
/// elements, in the listed order.
///
/// ```ignore
/// struct BodyNetState {
///     x: NetElementFloat,
///     y: NetElementFloat,
///     facing: NetElementEnum<Direction>,
/// }
/// net_element_group!(BodyNetState { x, y, facing });
/// ```
#[macro_export]
macro_rules! net_element_group {
    ($ty:ty { $($field:ident),+ $(,)? }) => {
        impl $crate::NetElement for $ty {
            fn init_net_version(&mut self, version: Option<$crate::NetElementVersion>) {
                $crate::group::group_init_net_version(
                    &mut [$(&mut self.$field as &mut dyn $crate::NetElement),+],
                    version,
                );
            }

            fn net_store(&self, out: &mut $crate::DataWriter, rules: $crate::NetCompatibilityRules) {
                $crate::group::group_net_store(
                    &[$(&self.$field as &dyn $crate::NetElement),+],
                    out,
                    rules,
                );
            }

            fn net_load(
                &mut self,
                input: &mut $crate::DataReader<'_>,
                rules: $crate::NetCompatibilityRules,
            ) -> $crate::NetResult<()> {
                $crate::group::group_net_load(
                    &mut [$(&mut self.$field as &mut dyn $crate::NetElement),+],
                    input,
                    rules,
                )
            }

            fn write_net_delta(
                &self,
                out: &mut $crate::DataWriter,
                from_version: u64,
                rules: $crate::NetCompatibilityRules,
            ) -> bool {
                $crate::group::group_write_net_delta(
                    &[$(&self.$field as &dyn $crate::NetElement),+],
                    out,
                    from_version,
                    rules,
                )
            }

            fn read_net_delta(
                &mut self,
                input: &mut $crate::DataReader<'_>,
                interpolation_time: f32,
                rules: $crate::NetCompatibilityRules,
            ) -> $crate::NetResult<()> {
                $crate::group::group_read_net_delta(
                    &mut [$(&mut self.$field as &mut dyn $crate::NetElement),+],
                    input,
                    interpolation_time,
                    rules,
                )
            }

            fn blank_net_delta(&mut self, interpolation_time: f32) {
                $($crate::NetElement::blank_net_delta(&mut self.$field, interpolation_time);)+
            }

            fn enable_net_interpolation(&mut self, extrapolation_hint: f32) {
                $($crate::NetElement::enable_net_interpolation(&mut self.$field, extrapolation_hint);)+
            }

            fn disable_net_interpolation(&mut self) {
                $($crate::NetElement::disable_net_interpolation(&mut self.$field);)+
            }

            fn tick_net_interpolation(&mut self, dt: f32) {
                $($crate::NetElement::tick_net_interpolation(&mut self.$field, dt);)+
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::NetElementInt;

    #[derive(Default)]
    struct Nine {
        a: NetElementInt,
        b: NetElementInt,
        c: NetElementInt,
        d: NetElementInt,
        e: NetElementInt,
        f: NetElementInt,
        g: NetElementInt,
        h: NetElementInt,
        i: NetElementInt,
    }
    crate::net_element_group!(Nine { a, b, c, d, e, f, g, h, i });

    #[test]
    fn test_mask_spans_two_bytes() {
        let version = NetElementVersion::new();
        let mut group = Nine::default();
        group.init_net_version(Some(version.clone()));
        version.increment();
        group.i.set(5);

        let rules = NetCompatibilityRules::latest();
        let mut out = DataWriter::new();
        assert!(group.write_net_delta(&mut out, 1, rules));
        assert_eq!(&out.as_bytes()[..2], &[0x00, 0x01]);

        let mut sink = Nine::default();
        sink.read_net_delta(&mut DataReader::new(out.as_bytes()), 0.0, rules).unwrap();
        assert_eq!(*sink.i.get(), 5);
        assert_eq!(*sink.a.get(), 0);
    }
}
