//! DBC file parser
//!
//! Parses Vector DBC files and converts them into our internal signal database format.

use crate::signals::database::{
    AttributeValue, ByteOrder, MessageDefinition, MultiplexerInfo, SignalAttributeMap,
    SignalDefinition, ValueType,
};
use crate::types::{DecoderError, Result};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

/// Signal attributes keyed by (message id, signal name)
type AttributeIndex = HashMap<(u32, String), SignalAttributeMap>;

/// Parse a DBC file and return message definitions
pub fn parse_dbc_file(path: &Path) -> Result<Vec<MessageDefinition>> {
    log::info!("Parsing DBC file: {:?}", path);

    // Read the DBC file as bytes first (handle non-UTF8 encodings)
    let bytes = std::fs::read(path).map_err(|e| {
        DecoderError::Definition(format!("Failed to read file {:?}: {}", path, e))
    })?;

    // Try UTF-8 first, then fallback to Latin-1/Windows-1252 encoding
    let dbc_content = match String::from_utf8(bytes) {
        Ok(content) => content,
        Err(e) => {
            log::warn!("DBC file {:?} is not UTF-8, trying Latin-1 encoding", path);
            e.into_bytes().iter().map(|&b| b as char).collect()
        }
    };

    let dbc = can_dbc::DBC::from_slice(dbc_content.as_bytes()).map_err(|e| {
        DecoderError::Definition(format!("Failed to parse DBC file {:?}: {:?}", path, e))
    })?;

    let source_filename = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("unknown.dbc")
        .to_string();

    let attributes = collect_signal_attributes(&dbc);

    let mut messages = Vec::new();
    for dbc_msg in dbc.messages() {
        let message = convert_message(&dbc, dbc_msg, &attributes, &source_filename)?;
        messages.push(message);
    }

    log::info!("Parsed {} messages from {:?}", messages.len(), path);

    Ok(messages)
}

/// Gather `BA_ "<name>" SG_ <id> <signal> <value>;` entries
fn collect_signal_attributes(dbc: &can_dbc::DBC) -> AttributeIndex {
    let mut index = AttributeIndex::new();

    for attr in dbc.attribute_values() {
        if let can_dbc::AttributeValuedForObjectType::SignalAttributeValue(
            message_id,
            signal_name,
            value,
        ) = attr.attribute_value()
        {
            index
                .entry((message_id.0, signal_name.clone()))
                .or_default()
                .insert(attr.attribute_name().clone(), convert_attribute_value(value));
        }
    }

    index
}

fn convert_attribute_value(value: &can_dbc::AttributeValue) -> AttributeValue {
    match value {
        can_dbc::AttributeValue::AttributeValueU64(v) => i64::try_from(*v)
            .map(AttributeValue::Integer)
            .unwrap_or(AttributeValue::Float(*v as f64)),
        can_dbc::AttributeValue::AttributeValueI64(v) => AttributeValue::Integer(*v),
        can_dbc::AttributeValue::AttributeValueF64(v) => AttributeValue::Float(*v),
        can_dbc::AttributeValue::AttributeValueCharString(v) => AttributeValue::Text(v.clone()),
    }
}

/// Convert a can-dbc message to our MessageDefinition
fn convert_message(
    dbc: &can_dbc::DBC,
    dbc_msg: &can_dbc::Message,
    attributes: &AttributeIndex,
    source: &str,
) -> Result<MessageDefinition> {
    let raw_id = dbc_msg.message_id().0;

    // First pass: identify multiplexer signal
    let multiplexer_signal_name = dbc_msg
        .signals()
        .iter()
        .find(|sig| {
            matches!(
                sig.multiplexer_indicator(),
                can_dbc::MultiplexIndicator::Multiplexor
                    | can_dbc::MultiplexIndicator::MultiplexorAndMultiplexedSignal(_)
            )
        })
        .map(|sig| sig.name().to_string());

    // Second pass: convert all signals
    let mut signals = Vec::new();
    for dbc_sig in dbc_msg.signals() {
        let mut signal = convert_signal(dbc_sig, multiplexer_signal_name.as_deref())?;

        signal.value_table = dbc
            .value_descriptions_for_signal(can_dbc::MessageId(raw_id), dbc_sig.name())
            .map(|descriptions| {
                descriptions
                    .iter()
                    .map(|d| (*d.a() as i64, d.b().clone()))
                    .collect::<BTreeMap<i64, String>>()
            })
            .filter(|table| !table.is_empty());

        if let Some(attrs) = attributes.get(&(raw_id, dbc_sig.name().clone())) {
            signal.attributes = attrs.clone();
        }

        signals.push(signal);
    }

    MessageDefinition::new(
        raw_id,
        dbc_msg.message_name().to_string(),
        *dbc_msg.message_size() as usize,
        match dbc_msg.transmitter() {
            can_dbc::Transmitter::NodeName(name) => Some(name.to_string()),
            _ => None,
        },
        signals,
        source,
    )
}

/// Convert a can-dbc signal to our SignalDefinition
fn convert_signal(
    dbc_sig: &can_dbc::Signal,
    multiplexer_signal_name: Option<&str>,
) -> Result<SignalDefinition> {
    let byte_order = match *dbc_sig.byte_order() {
        can_dbc::ByteOrder::LittleEndian => ByteOrder::LittleEndian,
        can_dbc::ByteOrder::BigEndian => ByteOrder::BigEndian,
    };

    let value_type = match *dbc_sig.value_type() {
        can_dbc::ValueType::Signed => ValueType::Signed,
        can_dbc::ValueType::Unsigned => ValueType::Unsigned,
    };

    let switch_value = match *dbc_sig.multiplexer_indicator() {
        can_dbc::MultiplexIndicator::MultiplexedSignal(v) => Some(v),
        can_dbc::MultiplexIndicator::MultiplexorAndMultiplexedSignal(v) => Some(v),
        _ => None,
    };

    let multiplexer_info = match switch_value {
        // The selector never gates itself
        Some(_) if multiplexer_signal_name == Some(dbc_sig.name().as_str()) => None,
        Some(value) => Some(MultiplexerInfo {
            multiplexer_signal: multiplexer_signal_name
                .ok_or_else(|| {
                    DecoderError::Definition(format!(
                        "Multiplexed signal '{}' but no multiplexer found",
                        dbc_sig.name()
                    ))
                })?
                .to_string(),
            multiplexer_values: vec![value],
        }),
        None => None,
    };

    Ok(SignalDefinition {
        name: dbc_sig.name().to_string(),
        start_bit: bit_field(dbc_sig.name(), "start bit", *dbc_sig.start_bit())?,
        length: bit_field(dbc_sig.name(), "length", *dbc_sig.signal_size())?,
        byte_order,
        value_type,
        factor: *dbc_sig.factor(),
        offset: *dbc_sig.offset(),
        min: *dbc_sig.min(),
        max: *dbc_sig.max(),
        unit: if dbc_sig.unit().is_empty() {
            None
        } else {
            Some(dbc_sig.unit().to_string())
        },
        value_table: None,
        attributes: SignalAttributeMap::new(),
        multiplexer_info,
    })
}

/// Narrow a DBC bit position or size, rejecting values that do not fit
fn bit_field(signal: &str, what: &str, value: u64) -> Result<u16> {
    u16::try_from(value).map_err(|_| {
        DecoderError::Definition(format!("Signal '{}' has out-of-range {} {}", signal, what, value))
    })
}
