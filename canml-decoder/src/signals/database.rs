//! Unified signal database
//!
//! Merges signal definitions from one or more DBC files into a single
//! queryable registry. After a successful build every signal name is
//! globally unique and every arbitration id maps to exactly one message.

use crate::types::{DecoderError, Result, CAN_ID_MASK};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};

/// Custom attribute mapping attached to a signal (`BA_ ... SG_` in DBC)
pub type SignalAttributeMap = BTreeMap<String, AttributeValue>;

/// A CAN message definition
#[derive(Debug, Clone)]
pub struct MessageDefinition {
    /// CAN message ID (extended flag stripped)
    pub id: u32,
    /// Message name
    pub name: String,
    /// Message size in bytes
    pub size: usize,
    /// Sender ECU name (optional)
    pub sender: Option<String>,
    /// All signals in this message, in definition order
    pub signals: Vec<SignalDefinition>,
    /// Active-signal table for multiplexed messages
    pub multiplexer: Option<MultiplexTable>,
    /// Source file (DBC filename)
    pub source: String,
}

/// A CAN signal definition
#[derive(Debug, Clone)]
pub struct SignalDefinition {
    /// Signal name
    pub name: String,
    /// Start bit in the CAN frame (DBC numbering)
    pub start_bit: u16,
    /// Length in bits
    pub length: u16,
    /// Byte order of the signal's bits
    pub byte_order: ByteOrder,
    /// Value type (signed/unsigned)
    pub value_type: ValueType,
    /// Scale factor to convert raw value to physical value
    pub factor: f64,
    /// Offset to add after scaling
    pub offset: f64,
    /// Minimum physical value
    pub min: f64,
    /// Maximum physical value
    pub max: f64,
    /// Engineering unit (e.g., "km/h", "°C", "V")
    pub unit: Option<String>,
    /// Value table for enum-like values (raw_value -> label)
    pub value_table: Option<BTreeMap<i64, String>>,
    /// Custom attributes declared for this signal
    pub attributes: SignalAttributeMap,
    /// Multiplexer info (None if not multiplexed)
    pub multiplexer_info: Option<MultiplexerInfo>,
}

/// Byte order for signal extraction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    /// Little-endian (Intel format)
    LittleEndian,
    /// Big-endian (Motorola format)
    BigEndian,
}

/// Value type for signal interpretation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    /// Signed integer
    Signed,
    /// Unsigned integer
    Unsigned,
}

/// Multiplexer information for multiplexed signals
#[derive(Debug, Clone)]
pub struct MultiplexerInfo {
    /// Name of the multiplexer signal that controls this signal
    pub multiplexer_signal: String,
    /// Multiplexer value(s) for which this signal is active
    pub multiplexer_values: Vec<u64>,
}

/// Explicit conditional table of active signals, keyed by multiplexor value
///
/// Built once when the message is loaded; the decoder resolves it once per
/// frame.
#[derive(Debug, Clone)]
pub struct MultiplexTable {
    /// Index of the multiplexor signal
    pub selector: usize,
    /// Signals active regardless of the multiplexor value (includes the selector)
    pub always_active: Vec<usize>,
    /// Signals active only for the keyed multiplexor value
    pub by_value: BTreeMap<u64, Vec<usize>>,
}

impl MultiplexTable {
    /// Indices of the signals active under `value`, in definition order
    pub fn active(&self, value: u64) -> Vec<usize> {
        let mut active = self.always_active.clone();
        if let Some(extra) = self.by_value.get(&value) {
            active.extend_from_slice(extra);
        }
        active.sort_unstable();
        active
    }
}

/// A custom attribute value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Integer(i64),
    Float(f64),
    Text(String),
}

impl AttributeValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AttributeValue::Integer(v) => Some(*v as f64),
            AttributeValue::Float(v) => Some(*v),
            AttributeValue::Text(_) => None,
        }
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::Integer(v) => write!(f, "{}", v),
            AttributeValue::Float(v) => write!(f, "{}", v),
            AttributeValue::Text(v) => f.write_str(v),
        }
    }
}

impl SignalDefinition {
    /// Number of payload bytes the signal's bits reach into
    pub fn required_bytes(&self) -> usize {
        let start = self.start_bit as usize;
        let length = self.length as usize;
        match self.byte_order {
            ByteOrder::LittleEndian => (start + length + 7) / 8,
            ByteOrder::BigEndian => {
                // Motorola sawtooth: walk from the MSB towards the LSB
                let mut bit = start;
                for _ in 1..length {
                    if bit % 8 == 0 {
                        bit += 15;
                    } else {
                        bit -= 1;
                    }
                }
                bit / 8 + 1
            }
        }
    }

    /// True when scale and offset keep decoded values integral
    pub fn is_integral(&self) -> bool {
        self.factor.fract() == 0.0 && self.offset.fract() == 0.0
    }

    /// True if the signal carries an enumeration mapping
    pub fn is_enum(&self) -> bool {
        self.value_table.as_ref().is_some_and(|t| !t.is_empty())
    }
}

impl MessageDefinition {
    /// Build a message definition, validating signal layout and deriving the
    /// multiplex table
    pub fn new(
        id: u32,
        name: impl Into<String>,
        size: usize,
        sender: Option<String>,
        signals: Vec<SignalDefinition>,
        source: impl Into<String>,
    ) -> Result<Self> {
        let name = name.into();

        for signal in &signals {
            if signal.length == 0 || signal.length > 64 {
                return Err(DecoderError::Definition(format!(
                    "Signal '{}' in message '{}' has unsupported length {}",
                    signal.name, name, signal.length
                )));
            }
            if signal.required_bytes() > size {
                return Err(DecoderError::Definition(format!(
                    "Signal '{}' does not fit in message '{}' ({} bytes)",
                    signal.name, name, size
                )));
            }
        }

        let multiplexer = build_multiplex_table(&name, &signals)?;

        Ok(Self {
            id: id & CAN_ID_MASK,
            name,
            size,
            sender,
            signals,
            multiplexer,
            source: source.into(),
        })
    }

    pub fn is_multiplexed(&self) -> bool {
        self.multiplexer.is_some()
    }

    /// Rename every signal to `<prefix>_<name>`
    fn prefix_signals(&mut self, prefix: &str) {
        for signal in &mut self.signals {
            signal.name = format!("{}_{}", prefix, signal.name);
            if let Some(info) = signal.multiplexer_info.as_mut() {
                info.multiplexer_signal = format!("{}_{}", prefix, info.multiplexer_signal);
            }
        }
    }
}

fn build_multiplex_table(
    message_name: &str,
    signals: &[SignalDefinition],
) -> Result<Option<MultiplexTable>> {
    if signals.iter().all(|s| s.multiplexer_info.is_none()) {
        return Ok(None);
    }

    let selector_name = signals
        .iter()
        .find_map(|s| s.multiplexer_info.as_ref())
        .map(|info| info.multiplexer_signal.as_str())
        .unwrap_or_default();

    let selector = signals
        .iter()
        .position(|s| s.name == selector_name)
        .ok_or_else(|| {
            DecoderError::Definition(format!(
                "Message '{}' has multiplexed signals but no multiplexer '{}'",
                message_name, selector_name
            ))
        })?;

    let mut always_active = Vec::new();
    let mut by_value: BTreeMap<u64, Vec<usize>> = BTreeMap::new();
    for (idx, signal) in signals.iter().enumerate() {
        match &signal.multiplexer_info {
            Some(info) => {
                for value in &info.multiplexer_values {
                    by_value.entry(*value).or_default().push(idx);
                }
            }
            None => always_active.push(idx),
        }
    }

    Ok(Some(MultiplexTable {
        selector,
        always_active,
        by_value,
    }))
}

/// The unified signal database (the registry)
///
/// Read-only once built; share it behind an `Arc` across any number of
/// concurrent decodes.
#[derive(Debug, Default)]
pub struct SignalDatabase {
    /// All message definitions by CAN ID
    messages: BTreeMap<u32, MessageDefinition>,

    /// Signal name lookup for quick access
    /// Key: Signal name, Value: List of (CAN ID, signal index) tuples
    signal_lookup: HashMap<String, Vec<(u32, usize)>>,

    /// Source files in merge order
    sources: Vec<PathBuf>,
}

impl SignalDatabase {
    /// Create a new empty signal database
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and merge DBC files into one registry
    ///
    /// Sources are merged in sorted path order. With `prefix_signals` every
    /// signal from a source is renamed `<file stem>_<signal>` first.
    /// Fails with `Definition` for unreadable or malformed sources and with
    /// `Collision` if signal names are not globally unique after the merge.
    pub fn load<P: AsRef<Path>>(sources: &[P], prefix_signals: bool) -> Result<Self> {
        if sources.is_empty() {
            return Err(DecoderError::Definition(
                "At least one DBC file must be provided".to_string(),
            ));
        }

        let mut paths: Vec<PathBuf> = sources.iter().map(|p| p.as_ref().to_path_buf()).collect();
        paths.sort();
        paths.dedup();

        let mut db = Self::new();
        for path in &paths {
            let is_dbc = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case("dbc"));
            if !is_dbc {
                return Err(DecoderError::Definition(format!(
                    "File {:?} is not a .dbc file",
                    path
                )));
            }
            if !path.is_file() {
                return Err(DecoderError::Definition(format!(
                    "DBC file not found: {:?}",
                    path
                )));
            }

            let mut messages = crate::signals::dbc::parse_dbc_file(path)?;
            if prefix_signals {
                let stem = path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .unwrap_or("dbc")
                    .to_string();
                for message in &mut messages {
                    message.prefix_signals(&stem);
                }
            }
            for message in messages {
                db.add_message(message)?;
            }
            db.sources.push(path.clone());
        }

        let duplicates = db.duplicate_signal_names();
        if !duplicates.is_empty() {
            return Err(DecoderError::Collision { names: duplicates });
        }

        let stats = db.stats();
        log::info!(
            "Signal registry built from {} file(s): {} messages, {} signals",
            db.sources.len(),
            stats.num_messages,
            stats.num_signals
        );

        Ok(db)
    }

    /// Add a message definition to the database
    ///
    /// An arbitration id can only be defined once.
    pub fn add_message(&mut self, message: MessageDefinition) -> Result<()> {
        let can_id = message.id;

        if let Some(existing) = self.messages.get(&can_id) {
            return Err(DecoderError::Definition(format!(
                "CAN ID 0x{:X} defined by both '{}' ({}) and '{}' ({})",
                can_id, existing.name, existing.source, message.name, message.source
            )));
        }

        // Build signal lookup indices
        for (sig_idx, signal) in message.signals.iter().enumerate() {
            self.signal_lookup
                .entry(signal.name.clone())
                .or_default()
                .push((can_id, sig_idx));
        }

        self.messages.insert(can_id, message);
        Ok(())
    }

    /// Look up the message definition for an arbitration id
    pub fn lookup(&self, can_id: u32) -> Option<&MessageDefinition> {
        self.messages.get(&(can_id & CAN_ID_MASK))
    }

    /// Find a signal definition by its (globally unique) name
    pub fn signal(&self, name: &str) -> Option<&SignalDefinition> {
        self.signal_lookup
            .get(name)
            .and_then(|locations| locations.first())
            .and_then(|(can_id, sig_idx)| {
                self.messages
                    .get(can_id)
                    .and_then(|msg| msg.signals.get(*sig_idx))
            })
    }

    pub fn contains_signal(&self, name: &str) -> bool {
        self.signal_lookup.contains_key(name)
    }

    /// Every signal name, ordered by arbitration id then definition order
    pub fn signal_names(&self) -> Vec<&str> {
        self.messages
            .values()
            .flat_map(|msg| msg.signals.iter().map(|s| s.name.as_str()))
            .collect()
    }

    /// Union of every enumeration label declared for `name`, ordered by raw value
    ///
    /// Returns `None` if no definition of the signal carries a value table.
    pub fn enum_labels(&self, name: &str) -> Option<Vec<String>> {
        let locations = self.signal_lookup.get(name)?;
        let mut labels: Vec<(i64, String)> = Vec::new();
        for (can_id, sig_idx) in locations {
            let table = self
                .messages
                .get(can_id)
                .and_then(|msg| msg.signals.get(*sig_idx))
                .and_then(|sig| sig.value_table.as_ref());
            for (raw, label) in table.into_iter().flatten() {
                if !labels.iter().any(|(_, l)| l == label) {
                    labels.push((*raw, label.clone()));
                }
            }
        }
        if labels.is_empty() {
            return None;
        }
        labels.sort_by_key(|(raw, _)| *raw);
        Some(labels.into_iter().map(|(_, l)| l).collect())
    }

    /// All message definitions in ascending arbitration id order
    pub fn messages(&self) -> impl Iterator<Item = &MessageDefinition> {
        self.messages.values()
    }

    /// Source files the registry was merged from
    pub fn sources(&self) -> &[PathBuf] {
        &self.sources
    }

    /// Signal names defined more than once, sorted
    pub fn duplicate_signal_names(&self) -> Vec<String> {
        let mut dupes: Vec<String> = self
            .signal_lookup
            .iter()
            .filter(|(_, locations)| locations.len() > 1)
            .map(|(name, _)| name.clone())
            .collect();
        dupes.sort();
        dupes
    }

    /// Get database statistics
    pub fn stats(&self) -> DatabaseStats {
        let num_messages = self.messages.len();
        let num_signals: usize = self.messages.values().map(|msg| msg.signals.len()).sum();
        let num_multiplexed = self
            .messages
            .values()
            .filter(|msg| msg.is_multiplexed())
            .count();

        DatabaseStats {
            num_messages,
            num_signals,
            num_multiplexed,
        }
    }
}

/// Database statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatabaseStats {
    /// Total number of message definitions
    pub num_messages: usize,
    /// Total number of signal definitions
    pub num_signals: usize,
    /// Messages with a multiplexor
    pub num_multiplexed: usize,
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn signal(name: &str, start_bit: u16, length: u16) -> SignalDefinition {
        SignalDefinition {
            name: name.to_string(),
            start_bit,
            length,
            byte_order: ByteOrder::LittleEndian,
            value_type: ValueType::Unsigned,
            factor: 1.0,
            offset: 0.0,
            min: 0.0,
            max: 0.0,
            unit: None,
            value_table: None,
            attributes: SignalAttributeMap::new(),
            multiplexer_info: None,
        }
    }

    #[test]
    fn test_empty_database() {
        let db = SignalDatabase::new();
        let stats = db.stats();
        assert_eq!(stats.num_messages, 0);
        assert_eq!(stats.num_signals, 0);
        assert!(db.lookup(0x123).is_none());
    }

    #[test]
    fn test_add_message() {
        let mut db = SignalDatabase::new();

        let mut speed = signal("EngineSpeed", 0, 16);
        speed.unit = Some("rpm".to_string());
        let message = MessageDefinition::new(
            0x123,
            "EngineData",
            8,
            Some("ECU1".to_string()),
            vec![speed],
            "test.dbc",
        )
        .unwrap();

        db.add_message(message).unwrap();

        let stats = db.stats();
        assert_eq!(stats.num_messages, 1);
        assert_eq!(stats.num_signals, 1);

        let msg = db.lookup(0x123).unwrap();
        assert_eq!(msg.name, "EngineData");
        assert_eq!(db.signal("EngineSpeed").unwrap().unit.as_deref(), Some("rpm"));
        assert_eq!(db.signal_names(), vec!["EngineSpeed"]);
    }

    #[test]
    fn test_duplicate_can_id_rejected() {
        let mut db = SignalDatabase::new();
        let a = MessageDefinition::new(0x10, "A", 8, None, vec![signal("X", 0, 8)], "a.dbc").unwrap();
        let b = MessageDefinition::new(0x10, "B", 8, None, vec![signal("Y", 0, 8)], "b.dbc").unwrap();
        db.add_message(a).unwrap();
        assert!(matches!(db.add_message(b), Err(DecoderError::Definition(_))));
    }

    #[test]
    fn test_signal_must_fit_message() {
        let result = MessageDefinition::new(0x10, "Short", 2, None, vec![signal("Wide", 8, 16)], "a.dbc");
        assert!(matches!(result, Err(DecoderError::Definition(_))));
    }

    #[test]
    fn test_big_endian_required_bytes() {
        let mut sig = signal("Motorola", 7, 16);
        sig.byte_order = ByteOrder::BigEndian;
        // MSB at bit 7 of byte 0, 16 bits run through byte 1
        assert_eq!(sig.required_bytes(), 2);

        sig.start_bit = 39;
        sig.length = 8;
        assert_eq!(sig.required_bytes(), 5);
    }

    #[test]
    fn test_multiplex_table() {
        let mode = signal("Mode", 0, 8);
        let mut a = signal("SignalA", 8, 16);
        a.multiplexer_info = Some(MultiplexerInfo {
            multiplexer_signal: "Mode".into(),
            multiplexer_values: vec![0],
        });
        let mut b = signal("SignalB", 8, 16);
        b.multiplexer_info = Some(MultiplexerInfo {
            multiplexer_signal: "Mode".into(),
            multiplexer_values: vec![1],
        });
        let counter = signal("Counter", 24, 8);

        let msg = MessageDefinition::new(0x200, "Mux", 8, None, vec![mode, a, b, counter], "m.dbc").unwrap();
        let table = msg.multiplexer.as_ref().unwrap();
        assert_eq!(table.selector, 0);
        assert_eq!(table.active(0), vec![0, 1, 3]);
        assert_eq!(table.active(1), vec![0, 2, 3]);
        assert_eq!(table.active(7), vec![0, 3]);
    }

    #[test]
    fn test_enum_labels_follow_raw_order() {
        let mut gear = signal("Gear", 0, 8);
        gear.value_table = Some(BTreeMap::from([
            (2, "Reverse".to_string()),
            (0, "Park".to_string()),
            (1, "Drive".to_string()),
        ]));
        let mut db = SignalDatabase::new();
        db.add_message(MessageDefinition::new(0x1, "Trans", 8, None, vec![gear], "t.dbc").unwrap())
            .unwrap();

        assert_eq!(
            db.enum_labels("Gear").unwrap(),
            vec!["Park".to_string(), "Drive".to_string(), "Reverse".to_string()]
        );
        assert!(db.enum_labels("Missing").is_none());
    }
}
