//! # star_net - Replicated State Trees
//!
//! Entity state is described as a tree of net elements. A
//! [`NetElementTop`] owns a version counter shared by every leaf below it;
//! each leaf remembers the counter value of its last change, so a delta for
//! a peer that last saw version `v` holds exactly the leaves changed after
//! `v`.
//!
//! - Leaves: [`NetElementData`] and its aliases, [`NetElementSize`],
//!   [`NetElementFloat`], [`NetElementEvent`]
//! - Containers: [`NetElementHashMap`], [`NetElementDynamicGroup`]
//! - Fixed groups: the [`net_element_group!`] macro
//!
//! Slaves may interpolate floats between deltas and are told about empty
//! deltas through [`NetElement::blank_net_delta`] so extrapolation stops in
//! time.

pub mod data;
pub mod dynamic_group;
pub mod element;
pub mod error;
pub mod float;
pub mod group;
pub mod map;
pub mod top;
pub mod value;
pub mod version;

pub use data::{
    NetElementBool, NetElementBytes, NetElementData, NetElementEnum, NetElementEvent, NetElementInt,
    NetElementJson, NetElementSize, NetElementString, NetElementUInt,
};
pub use dynamic_group::{ElementId, NetElementDynamicGroup};
pub use element::{NetCompat, NetElement};
pub use error::{NetError, NetResult};
pub use float::NetElementFloat;
pub use map::NetElementHashMap;
pub use top::NetElementTop;
pub use value::NetValue;
pub use version::{NetCompatibilityRules, NetElementVersion};

pub use star_core::{DataReader, DataWriter};
