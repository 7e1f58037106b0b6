//! Signal metadata propagation
//!
//! Pulls each signal's custom attribute mapping out of the registry so it
//! can ride along with a result table and be written next to any export.

use crate::signals::{SignalAttributeMap, SignalDatabase};
use std::collections::BTreeMap;

/// Signal name -> attribute name -> value
pub type SignalAttributes = BTreeMap<String, SignalAttributeMap>;

/// Collect the attribute mapping of every named signal the registry knows
///
/// Signals absent from the registry (e.g. injected expected signals) are
/// left out; known signals without attributes map to an empty mapping.
pub fn attributes<S: AsRef<str>>(registry: &SignalDatabase, signal_names: &[S]) -> SignalAttributes {
    signal_names
        .iter()
        .filter_map(|name| {
            let name = name.as_ref();
            registry
                .signal(name)
                .map(|def| (name.to_string(), def.attributes.clone()))
        })
        .collect()
}
