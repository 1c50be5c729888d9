//! Replication behaviour across a master and slave tree

use approx::assert_relative_eq;
use star_core::DataWriter;
use star_net::{
    net_element_group, NetCompat, NetCompatibilityRules, NetElement, NetElementEvent,
    NetElementFloat, NetElementInt, NetElementString, NetElementTop,
};

#[derive(Default)]
struct Triple {
    a: NetElementInt,
    b: NetElementInt,
    c: NetElementInt,
}
net_element_group!(Triple { a, b, c });

#[derive(Default)]
struct Mover {
    x: NetElementFloat,
    hits: NetElementEvent,
}
net_element_group!(Mover { x, hits });

fn rules() -> NetCompatibilityRules {
    NetCompatibilityRules::latest()
}

#[test]
fn test_full_then_empty_delta() {
    let mut master = NetElementTop::new(Triple::default());
    let (full, seen) = master.write_net_state(0, rules());
    assert_eq!(full[0], 1);

    let (delta, next) = master.write_net_state(seen, rules());
    assert!(delta.is_empty());
    assert_eq!(next, seen);
}

#[test]
fn test_delta_minimality() {
    let mut master = NetElementTop::new(Triple::default());
    let (_, seen) = master.write_net_state(0, rules());

    master.b.set(1000);
    let (only_b, _) = master.write_net_state(seen, rules());

    let mut other = NetElementTop::new(Triple::default());
    let (_, other_seen) = other.write_net_state(0, rules());
    other.a.set(1000);
    other.b.set(1000);
    other.c.set(1000);
    let (all, _) = other.write_net_state(other_seen, rules());

    assert!(!only_b.is_empty());
    assert!(only_b.len() < all.len());
}

#[test]
fn test_slave_follows_master() {
    let mut master = NetElementTop::new(Triple::default());
    let mut slave = NetElementTop::new(Triple::default());

    master.a.set(7);
    let (full, mut seen) = master.write_net_state(0, rules());
    slave.read_net_state(&full, 0.0, rules()).unwrap();
    assert_eq!(*slave.a.get(), 7);

    master.c.set(-3);
    let (delta, next) = master.write_net_state(seen, rules());
    seen = next;
    slave.read_net_state(&delta, 0.0, rules()).unwrap();
    assert_eq!(*slave.c.get(), -3);
    assert_eq!(*slave.a.get(), 7);

    let (nothing, _) = master.write_net_state(seen, rules());
    assert!(nothing.is_empty());
}

#[test]
fn test_interpolated_float_converges() {
    let mut master = NetElementTop::new(Mover::default());
    let mut slave = NetElementTop::new(Mover::default());
    slave.enable_net_interpolation(0.0);

    let (full, seen) = master.write_net_state(0, rules());
    slave.read_net_state(&full, 0.0, rules()).unwrap();

    master.x.set(4.0);
    let (delta, _) = master.write_net_state(seen, rules());
    slave.read_net_state(&delta, 0.5, rules()).unwrap();

    assert_relative_eq!(slave.x.get(), 0.0);
    slave.tick_net_interpolation(0.25);
    assert_relative_eq!(slave.x.get(), 2.0, epsilon = 1e-5);
    slave.tick_net_interpolation(0.25);
    assert_relative_eq!(slave.x.get(), 4.0, epsilon = 1e-5);
    slave.tick_net_interpolation(1.0);
    assert_relative_eq!(slave.x.get(), 4.0, epsilon = 1e-5);
}

#[test]
fn test_blank_delta_mid_interpolation_still_reaches_target() {
    let mut master = NetElementTop::new(Mover::default());
    let mut slave = NetElementTop::new(Mover::default());
    slave.enable_net_interpolation(0.5);

    let (full, seen) = master.write_net_state(0, rules());
    slave.read_net_state(&full, 0.0, rules()).unwrap();

    master.x.set(10.0);
    let (delta, _) = master.write_net_state(seen, rules());
    slave.read_net_state(&delta, 1.0, rules()).unwrap();
    slave.tick_net_interpolation(0.25);
    assert_relative_eq!(slave.x.get(), 2.5, epsilon = 1e-5);

    slave.read_net_state(&[], 0.1, rules()).unwrap();
    for _ in 0..40 {
        slave.tick_net_interpolation(0.1);
    }
    assert_relative_eq!(slave.x.get(), 10.0, epsilon = 1e-5);

    // Past the segment end a blank keeps the last rate for its window only
    slave.read_net_state(&[], 0.1, rules()).unwrap();
    slave.tick_net_interpolation(1.0);
    assert_relative_eq!(slave.x.get(), 11.0, epsilon = 1e-4);
}

#[test]
fn test_events_replicate_without_replay() {
    let mut master = NetElementTop::new(Mover::default());
    let mut slave = NetElementTop::new(Mover::default());
    slave.hits.set_ignore_occurrences_on_net_load(true);

    master.hits.trigger();
    master.hits.trigger();
    let (full, seen) = master.write_net_state(0, rules());
    slave.read_net_state(&full, 0.0, rules()).unwrap();
    assert_eq!(slave.hits.pull_occurrences(), 0);

    for _ in 0..3 {
        master.hits.trigger();
    }
    let (delta, _) = master.write_net_state(seen, rules());
    slave.read_net_state(&delta, 0.0, rules()).unwrap();
    assert_eq!(slave.hits.pull_occurrences(), 3);
    assert_eq!(slave.hits.pull_occurrences(), 0);
}

#[test]
fn test_reconnecting_reader_gets_full_store() {
    let mut master = NetElementTop::new(Mover::default());
    let mut first = NetElementTop::new(Mover::default());

    let (full, mut seen) = master.write_net_state(0, rules());
    first.read_net_state(&full, 0.0, rules()).unwrap();
    for value in [1.5, 2.5] {
        master.x.set(value);
        let (delta, next) = master.write_net_state(seen, rules());
        first.read_net_state(&delta, 0.0, rules()).unwrap();
        seen = next;
    }
    master.write_net_state(seen, rules());
    assert!(master.net_version() >= 4);

    let mut second = NetElementTop::new(Mover::default());
    second.enable_net_interpolation(0.5);
    let (full, _) = master.write_net_state(0, rules());
    assert_eq!(full[0], 1);
    second.read_net_state(&full, 0.0, rules()).unwrap();
    assert_relative_eq!(second.x.get(), 2.5);

    second.read_net_state(&[], 0.1, rules()).unwrap();
    second.tick_net_interpolation(0.1);
    assert_relative_eq!(second.x.get(), 2.5);
}

#[test]
fn test_malformed_payload_is_error() {
    let mut slave = NetElementTop::new(Triple::default());
    assert!(slave.read_net_state(&[0, 0xff], 0.0, rules()).is_err());
    assert!(slave.read_net_state(&[1, 2, 4, 6, 9], 0.0, rules()).is_err());
}

#[derive(Default)]
struct Versioned {
    name: NetElementString,
    extra: NetCompat<NetElementInt>,
}
net_element_group!(Versioned { name, extra });

#[test]
fn test_legacy_peer_skips_newer_fields() {
    let mut master = NetElementTop::new(Versioned {
        name: NetElementString::new("crate".into()),
        extra: NetCompat::new(2, NetElementInt::new(5)),
    });
    let legacy = NetCompatibilityRules::new(1);
    let (legacy_full, _) = master.write_net_state(0, legacy);
    let (latest_full, _) = master.write_net_state(0, rules());
    assert!(legacy_full.len() < latest_full.len());

    let mut slave = NetElementTop::new(Versioned {
        name: NetElementString::default(),
        extra: NetCompat::new(2, NetElementInt::new(0)),
    });
    slave.read_net_state(&legacy_full, 0.0, legacy).unwrap();
    assert_eq!(slave.name.get(), "crate");
    assert_eq!(*slave.extra.get(), 0);

    let mut out = DataWriter::new();
    assert!(!slave.extra.write_net_delta(&mut out, 100, rules()));
}
