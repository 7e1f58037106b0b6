//! Message Decoding Engine
//!
//! Extracts signal values from raw CAN frames based on signal definitions
//! from the signal database. Handles bit extraction, endianness, multiplexing,
//! enumeration labels and physical value conversion.

use crate::signals::database::{ByteOrder, MessageDefinition, SignalDefinition, ValueType};
use crate::signals::SignalDatabase;
use crate::types::{DecodedRow, DecodedSignal, DecoderError, RawFrame, Result, SignalValue};

/// Message decoder - extracts signals from CAN frames
pub struct MessageDecoder;

impl MessageDecoder {
    /// Decode a raw frame against the registry
    ///
    /// Fails with `UnknownMessage` if the registry has no definition for the
    /// frame's id and with `FrameLength` if the payload is shorter than the
    /// message's declared length. Both are per-frame errors; callers skip
    /// the frame and carry on.
    pub fn decode(frame: &RawFrame, registry: &SignalDatabase) -> Result<DecodedRow> {
        let can_id = frame.arbitration_id();
        let message_def = registry
            .lookup(can_id)
            .ok_or(DecoderError::UnknownMessage(can_id))?;
        Self::decode_message(frame, message_def)
    }

    /// Decode a frame whose message definition is already known
    pub fn decode_message(frame: &RawFrame, message_def: &MessageDefinition) -> Result<DecodedRow> {
        if frame.data.len() < message_def.size {
            return Err(DecoderError::FrameLength {
                can_id: message_def.id,
                expected: message_def.size,
                actual: frame.data.len(),
            });
        }

        let (active, multiplexer_value) = match &message_def.multiplexer {
            Some(table) => {
                let selector = &message_def.signals[table.selector];
                let value = Self::extract_signal_value(&frame.data, selector) as u64;
                (table.active(value), Some(value))
            }
            None => ((0..message_def.signals.len()).collect(), None),
        };

        let signals = active
            .into_iter()
            .map(|idx| Self::decode_signal(&frame.data, &message_def.signals[idx]))
            .collect();

        Ok(DecodedRow {
            timestamp: frame.timestamp_secs(),
            can_id: message_def.id,
            multiplexer_value,
            signals,
        })
    }

    /// Decode a single signal from CAN frame data
    fn decode_signal(data: &[u8], signal: &SignalDefinition) -> DecodedSignal {
        let raw_value = Self::extract_signal_value(data, signal);

        let label = signal
            .value_table
            .as_ref()
            .and_then(|table| table.get(&raw_value));

        let value = match label {
            Some(label) => SignalValue::Label(label.clone()),
            None => {
                let physical_value = signal.offset + signal.factor * (raw_value as f64);
                if signal.is_integral() {
                    SignalValue::Integer(physical_value as i64)
                } else {
                    SignalValue::Float(physical_value)
                }
            }
        };

        DecodedSignal {
            name: signal.name.clone(),
            value,
            raw_value,
        }
    }

    /// Extract raw signal value from CAN frame data
    ///
    /// The caller guarantees the payload covers the message's declared
    /// length, and registry validation guarantees every signal fits in it.
    fn extract_signal_value(data: &[u8], signal: &SignalDefinition) -> i64 {
        let start_bit = signal.start_bit as usize;
        let length = signal.length as usize;

        let raw_value = match signal.byte_order {
            ByteOrder::LittleEndian => Self::extract_little_endian(data, start_bit, length),
            ByteOrder::BigEndian => Self::extract_big_endian(data, start_bit, length),
        };

        match signal.value_type {
            ValueType::Unsigned => raw_value as i64,
            ValueType::Signed => Self::sign_extend(raw_value, length),
        }
    }

    /// Extract signal with little-endian (Intel) byte order
    ///
    /// Start bit points to the LSB; bits are numbered from LSB to MSB within
    /// each byte, byte 0 first.
    fn extract_little_endian(data: &[u8], start_bit: usize, length: usize) -> u64 {
        let mut result: u64 = 0;

        for i in 0..length {
            let bit_pos = start_bit + i;
            let byte_idx = bit_pos / 8;
            let bit_in_byte = bit_pos % 8;

            if byte_idx < data.len() {
                let bit_value = (data[byte_idx] >> bit_in_byte) & 0x01;
                result |= (bit_value as u64) << i;
            }
        }

        result
    }

    /// Extract signal with big-endian (Motorola) byte order
    ///
    /// DBC numbering: start bit is the MSB, bit 0 is the LSB of byte 0.
    /// The signal runs towards lower bits and wraps to bit 7 of the next byte.
    fn extract_big_endian(data: &[u8], start_bit: usize, length: usize) -> u64 {
        let mut result: u64 = 0;
        let mut bit_pos = start_bit;

        for i in 0..length {
            let byte_idx = bit_pos / 8;
            let bit_in_byte = bit_pos % 8;

            let bit_value = data
                .get(byte_idx)
                .map(|byte| (byte >> bit_in_byte) & 0x01)
                .unwrap_or(0);
            result = (result << 1) | bit_value as u64;

            if i + 1 < length {
                if bit_in_byte == 0 {
                    bit_pos += 15;
                } else {
                    bit_pos -= 1;
                }
            }
        }

        result
    }

    /// Sign-extend a value from N bits to 64 bits
    fn sign_extend(value: u64, bit_length: usize) -> i64 {
        if bit_length >= 64 {
            return value as i64;
        }

        let sign_bit = 1u64 << (bit_length - 1);
        if (value & sign_bit) != 0 {
            let mask = !0u64 << bit_length;
            (value | mask) as i64
        } else {
            value as i64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signals::database::tests::signal;
    use crate::signals::database::MultiplexerInfo;
    use std::collections::BTreeMap;

    #[test]
    fn test_extract_little_endian_simple() {
        let data = vec![0xAB, 0xCD, 0xEF, 0x12];
        assert_eq!(MessageDecoder::extract_little_endian(&data, 0, 8), 0xAB);
    }

    #[test]
    fn test_extract_little_endian_cross_byte() {
        let data = vec![0xAB, 0xCD, 0xEF, 0x12];
        assert_eq!(MessageDecoder::extract_little_endian(&data, 0, 16), 0xCDAB);
        assert_eq!(MessageDecoder::extract_little_endian(&data, 4, 8), 0xDA);
    }

    #[test]
    fn test_extract_big_endian() {
        let data = vec![0xAB, 0xCD, 0xEF, 0x12];
        assert_eq!(MessageDecoder::extract_big_endian(&data, 7, 8), 0xAB);
        // 16-bit Motorola signal with MSB at bit 7 reads bytes 0..2 in order
        assert_eq!(MessageDecoder::extract_big_endian(&data, 7, 16), 0xABCD);
        // 4-bit nibble starting at bit 3 of byte 0
        assert_eq!(MessageDecoder::extract_big_endian(&data, 3, 4), 0x0B);
    }

    #[test]
    fn test_sign_extend() {
        assert_eq!(MessageDecoder::sign_extend(0x7F, 8), 127);
        assert_eq!(MessageDecoder::sign_extend(0xFF, 8), -1);
        assert_eq!(MessageDecoder::sign_extend(0x8000, 16), -32768);
    }

    fn registry_with(message: MessageDefinition) -> SignalDatabase {
        let mut db = SignalDatabase::new();
        db.add_message(message).unwrap();
        db
    }

    #[test]
    fn test_decode_scaled_and_signed() {
        let mut speed = signal("Speed", 0, 16);
        speed.factor = 0.01;
        let mut temp = signal("Temp", 16, 8);
        temp.value_type = ValueType::Signed;
        temp.offset = -40.0;
        let db = registry_with(
            MessageDefinition::new(0x100, "Vehicle", 8, None, vec![speed, temp], "v.dbc").unwrap(),
        );

        let frame = RawFrame::new(1_000_000_000, 0x100, vec![0x10, 0x27, 0xFE, 0, 0, 0, 0, 0]);
        let row = MessageDecoder::decode(&frame, &db).unwrap();

        assert_eq!(row.timestamp, 1.0);
        assert_eq!(row.get("Speed"), Some(&SignalValue::Float(100.0)));
        // 0xFE as signed 8-bit is -2, then offset -40
        assert_eq!(row.get("Temp"), Some(&SignalValue::Integer(-42)));
    }

    #[test]
    fn test_decode_enum_label_and_unlabelled_value() {
        let mut gear = signal("Gear", 0, 8);
        gear.value_table = Some(BTreeMap::from([(0, "Park".to_string()), (1, "Drive".to_string())]));
        let db = registry_with(MessageDefinition::new(0x10, "Trans", 1, None, vec![gear], "t.dbc").unwrap());

        let row = MessageDecoder::decode(&RawFrame::new(0, 0x10, vec![1]), &db).unwrap();
        assert_eq!(row.get("Gear"), Some(&SignalValue::Label("Drive".into())));

        let row = MessageDecoder::decode(&RawFrame::new(0, 0x10, vec![9]), &db).unwrap();
        assert_eq!(row.get("Gear"), Some(&SignalValue::Integer(9)));
    }

    #[test]
    fn test_decode_multiplexed_subset() {
        let mode = signal("Mode", 0, 8);
        let mut a = signal("SignalA", 8, 8);
        a.multiplexer_info = Some(MultiplexerInfo {
            multiplexer_signal: "Mode".into(),
            multiplexer_values: vec![0],
        });
        let mut b = signal("SignalB", 8, 8);
        b.multiplexer_info = Some(MultiplexerInfo {
            multiplexer_signal: "Mode".into(),
            multiplexer_values: vec![1],
        });
        let db = registry_with(MessageDefinition::new(0x20, "Mux", 2, None, vec![mode, a, b], "m.dbc").unwrap());

        let row = MessageDecoder::decode(&RawFrame::new(0, 0x20, vec![1, 55]), &db).unwrap();
        assert_eq!(row.multiplexer_value, Some(1));
        assert_eq!(row.get("SignalB"), Some(&SignalValue::Integer(55)));
        assert!(row.get("SignalA").is_none());
        assert_eq!(row.signals.len(), 2);
    }

    #[test]
    fn test_unknown_and_short_frames() {
        let db = registry_with(
            MessageDefinition::new(0x30, "Eight", 8, None, vec![signal("X", 0, 8)], "e.dbc").unwrap(),
        );

        let unknown = MessageDecoder::decode(&RawFrame::new(0, 0x31, vec![0; 8]), &db);
        assert!(matches!(unknown, Err(DecoderError::UnknownMessage(0x31))));

        let short = MessageDecoder::decode(&RawFrame::new(0, 0x30, vec![0; 5]), &db);
        assert!(matches!(
            short,
            Err(DecoderError::FrameLength { expected: 8, actual: 5, .. })
        ));
    }

    #[test]
    fn test_extended_id_matches_masked_definition() {
        let db = registry_with(
            MessageDefinition::new(0x8000_1234, "Ext", 1, None, vec![signal("X", 0, 8)], "x.dbc").unwrap(),
        );
        let row = MessageDecoder::decode(&RawFrame::new(0, 0x1234, vec![7]), &db).unwrap();
        assert_eq!(row.get("X"), Some(&SignalValue::Integer(7)));
    }
}
