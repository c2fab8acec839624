//! Order-preserving BSON reader
//!
//! Stock BSON libraries decode documents into associative maps, which
//! silently collapses duplicate keys. FTDC reference documents are known
//! to contain duplicated subtrees, and the delta stream is encoded against
//! the exact key multiset the producer saw. This reader keeps every
//! element, in file order, as a plain `(key, value)` sequence.
//!
//! Wire format per element:
//! - type: u8
//! - key: NUL-terminated UTF-8
//! - value: type-dependent payload
//!
//! A document is a little-endian i32 total size (including itself and the
//! trailing NUL), the element list, and a `0x00` terminator.

use crate::decode::error::{DecodeError, DecodeResult};

/// A decoded BSON value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// 64-bit IEEE 754
    Double(f64),
    /// UTF-8 string
    String(String),
    /// Embedded document
    Document(Document),
    /// Array; element keys are decimal indices "0", "1", ...
    Array(Document),
    /// Binary blob with subtype byte
    Binary { subtype: u8, data: Vec<u8> },
    /// 12-byte ObjectId
    ObjectId([u8; 12]),
    /// Boolean
    Bool(bool),
    /// UTC datetime, signed milliseconds since the Unix epoch
    DateTime(i64),
    /// Null
    Null,
    /// Regular expression: pattern and options
    Regex { pattern: String, options: String },
    /// 32-bit signed integer
    Int32(i32),
    /// Internal MongoDB timestamp: seconds and increment
    Timestamp { seconds: u32, increment: u32 },
    /// 64-bit signed integer
    Int64(i64),
    /// 128-bit decimal, kept opaque
    Decimal128([u8; 16]),
    /// MinKey marker
    MinKey,
    /// MaxKey marker
    MaxKey,
    /// JavaScript code
    JavaScript(String),
}

/// An ordered list of BSON elements.
///
/// Duplicate keys are distinct entries; iteration order is file order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Document {
    elements: Vec<(String, Value)>,
}

impl Document {
    /// Parse a length-prefixed BSON document from a byte slice.
    ///
    /// The slice must contain exactly one document: the length prefix must
    /// equal `bytes.len()`.
    pub fn parse(bytes: &[u8]) -> DecodeResult<Document> {
        if bytes.len() < 5 {
            return Err(DecodeError::MalformedBson(format!(
                "document too short: {} bytes",
                bytes.len()
            )));
        }

        let declared = read_i32(bytes, 0)? as usize;
        if declared != bytes.len() {
            return Err(DecodeError::MalformedBson(format!(
                "document size mismatch: header says {}, got {}",
                declared,
                bytes.len()
            )));
        }

        if bytes[bytes.len() - 1] != 0x00 {
            return Err(DecodeError::MalformedBson(
                "document missing trailing NUL".into(),
            ));
        }

        let mut parser = Parser {
            bytes,
            offset: 4,
            end: bytes.len(),
        };
        let elements = parser.parse_elements()?;

        Ok(Document { elements })
    }

    /// Number of elements (duplicates counted)
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Iterate elements in file order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.elements.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// First value for `key`, linear scan
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.elements
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    /// Construct from parts (fixtures and tests)
    pub fn from_elements(elements: Vec<(String, Value)>) -> Document {
        Document { elements }
    }
}

struct Parser<'a> {
    bytes: &'a [u8],
    offset: usize,
    end: usize,
}

impl<'a> Parser<'a> {
    fn parse_elements(&mut self) -> DecodeResult<Vec<(String, Value)>> {
        let mut elements = Vec::new();

        loop {
            let type_byte = self.read_u8()?;
            if type_byte == 0x00 {
                break;
            }

            let key = self.read_cstring()?;
            let value = self.parse_value(type_byte, &key)?;
            elements.push((key, value));
        }

        if self.offset != self.end {
            return Err(DecodeError::MalformedBson(
                "document terminator before declared end".into(),
            ));
        }

        Ok(elements)
    }

    fn parse_value(&mut self, type_byte: u8, key: &str) -> DecodeResult<Value> {
        match type_byte {
            0x01 => Ok(Value::Double(f64::from_bits(self.read_u64()?))),
            0x02 => Ok(Value::String(self.read_string()?)),
            0x03 => {
                let doc = self.read_subdocument()?;
                Ok(Value::Document(doc))
            }
            0x04 => {
                let doc = self.read_subdocument()?;
                Ok(Value::Array(doc))
            }
            0x05 => {
                let len = self.read_i32()?;
                if len < 0 {
                    return Err(DecodeError::MalformedBson(format!(
                        "negative binary length for '{}'",
                        key
                    )));
                }
                let subtype = self.read_u8()?;
                let data = self.read_bytes(len as usize)?.to_vec();
                Ok(Value::Binary { subtype, data })
            }
            0x07 => {
                let mut oid = [0u8; 12];
                oid.copy_from_slice(self.read_bytes(12)?);
                Ok(Value::ObjectId(oid))
            }
            0x08 => Ok(Value::Bool(self.read_u8()? != 0)),
            0x09 => Ok(Value::DateTime(self.read_u64()? as i64)),
            0x0A => Ok(Value::Null),
            0x0B => {
                let pattern = self.read_cstring()?;
                let options = self.read_cstring()?;
                Ok(Value::Regex { pattern, options })
            }
            0x0D => Ok(Value::JavaScript(self.read_string()?)),
            0x10 => Ok(Value::Int32(self.read_i32()?)),
            0x11 => {
                // Wire order is increment first, then seconds
                let increment = self.read_u32()?;
                let seconds = self.read_u32()?;
                Ok(Value::Timestamp { seconds, increment })
            }
            0x12 => Ok(Value::Int64(self.read_u64()? as i64)),
            0x13 => {
                let mut dec = [0u8; 16];
                dec.copy_from_slice(self.read_bytes(16)?);
                Ok(Value::Decimal128(dec))
            }
            0xFF => Ok(Value::MinKey),
            0x7F => Ok(Value::MaxKey),
            other => Err(DecodeError::MalformedBson(format!(
                "unsupported type 0x{:02x} for field '{}'",
                other, key
            ))),
        }
    }

    fn read_subdocument(&mut self) -> DecodeResult<Document> {
        if self.offset + 4 > self.end {
            return Err(DecodeError::MalformedBson(
                "nested document size runs past parent".into(),
            ));
        }
        let size = read_i32(self.bytes, self.offset)? as usize;
        if size < 5 || self.offset + size > self.end {
            return Err(DecodeError::MalformedBson(format!(
                "nested document of {} bytes runs past parent",
                size
            )));
        }
        let doc = Document::parse(&self.bytes[self.offset..self.offset + size])?;
        self.offset += size;
        Ok(doc)
    }

    fn read_u8(&mut self) -> DecodeResult<u8> {
        if self.offset >= self.end {
            return Err(DecodeError::MalformedBson(
                "unexpected end of document".into(),
            ));
        }
        let b = self.bytes[self.offset];
        self.offset += 1;
        Ok(b)
    }

    fn read_bytes(&mut self, count: usize) -> DecodeResult<&'a [u8]> {
        if self.offset + count > self.end {
            return Err(DecodeError::MalformedBson(format!(
                "unexpected end of document reading {} bytes",
                count
            )));
        }
        let slice = &self.bytes[self.offset..self.offset + count];
        self.offset += count;
        Ok(slice)
    }

    fn read_i32(&mut self) -> DecodeResult<i32> {
        let v = read_i32(self.bytes, self.offset)?;
        self.offset += 4;
        Ok(v)
    }

    fn read_u32(&mut self) -> DecodeResult<u32> {
        let bytes = self.read_bytes(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn read_u64(&mut self) -> DecodeResult<u64> {
        let b = self.read_bytes(8)?;
        Ok(u64::from_le_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    /// NUL-terminated UTF-8
    fn read_cstring(&mut self) -> DecodeResult<String> {
        let start = self.offset;
        while self.offset < self.end && self.bytes[self.offset] != 0x00 {
            self.offset += 1;
        }
        if self.offset >= self.end {
            return Err(DecodeError::MalformedBson(
                "unterminated C string".into(),
            ));
        }
        let s = std::str::from_utf8(&self.bytes[start..self.offset])
            .map_err(|e| DecodeError::MalformedBson(format!("invalid UTF-8 in key: {}", e)))?
            .to_string();
        self.offset += 1; // NUL
        Ok(s)
    }

    /// Length-prefixed UTF-8 with trailing NUL
    fn read_string(&mut self) -> DecodeResult<String> {
        let len = self.read_i32()?;
        if len < 1 {
            return Err(DecodeError::MalformedBson(format!(
                "invalid string length {}",
                len
            )));
        }
        let bytes = self.read_bytes(len as usize)?;
        if bytes[bytes.len() - 1] != 0x00 {
            return Err(DecodeError::MalformedBson(
                "string missing trailing NUL".into(),
            ));
        }
        std::str::from_utf8(&bytes[..bytes.len() - 1])
            .map(|s| s.to_string())
            .map_err(|e| DecodeError::MalformedBson(format!("invalid UTF-8 in string: {}", e)))
    }
}

fn read_i32(bytes: &[u8], offset: usize) -> DecodeResult<i32> {
    if offset + 4 > bytes.len() {
        return Err(DecodeError::MalformedBson(
            "unexpected end of document reading int32".into(),
        ));
    }
    Ok(i32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::testutil::DocBuilder;

    #[test]
    fn test_empty_document() {
        // Minimal document: size 5, terminator only
        let bytes = [5u8, 0, 0, 0, 0];
        let doc = Document::parse(&bytes).unwrap();
        assert!(doc.is_empty());
    }

    #[test]
    fn test_scalar_types() {
        let bytes = DocBuilder::new()
            .double("d", 1.5)
            .string("s", "hi")
            .int32("i", -7)
            .int64("l", 1 << 40)
            .bool("b", true)
            .date("t", 1_700_000_000_000)
            .null("n")
            .build();

        let doc = Document::parse(&bytes).unwrap();
        assert_eq!(doc.len(), 7);
        assert_eq!(doc.get("d"), Some(&Value::Double(1.5)));
        assert_eq!(doc.get("s"), Some(&Value::String("hi".into())));
        assert_eq!(doc.get("i"), Some(&Value::Int32(-7)));
        assert_eq!(doc.get("l"), Some(&Value::Int64(1 << 40)));
        assert_eq!(doc.get("b"), Some(&Value::Bool(true)));
        assert_eq!(doc.get("t"), Some(&Value::DateTime(1_700_000_000_000)));
        assert_eq!(doc.get("n"), Some(&Value::Null));
    }

    #[test]
    fn test_element_order_is_file_order() {
        let bytes = DocBuilder::new()
            .int32("z", 1)
            .int32("a", 2)
            .int32("m", 3)
            .build();

        let doc = Document::parse(&bytes).unwrap();
        let keys: Vec<&str> = doc.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["z", "a", "m"]);
    }

    #[test]
    fn test_duplicate_keys_preserved() {
        let bytes = DocBuilder::new()
            .int32("mount", 3)
            .int32("mount", 4)
            .build();

        let doc = Document::parse(&bytes).unwrap();
        assert_eq!(doc.len(), 2);

        let values: Vec<&Value> = doc.iter().map(|(_, v)| v).collect();
        assert_eq!(values, vec![&Value::Int32(3), &Value::Int32(4)]);

        // get returns the first occurrence
        assert_eq!(doc.get("mount"), Some(&Value::Int32(3)));
    }

    #[test]
    fn test_nested_document_and_array() {
        let inner = DocBuilder::new().int32("current", 10).int64("total", 99);
        let arr = DocBuilder::new().int32("0", 1).int32("1", 2);
        let bytes = DocBuilder::new()
            .document("connections", inner)
            .array("latencies", arr)
            .build();

        let doc = Document::parse(&bytes).unwrap();
        match doc.get("connections") {
            Some(Value::Document(d)) => {
                assert_eq!(d.get("current"), Some(&Value::Int32(10)));
                assert_eq!(d.get("total"), Some(&Value::Int64(99)));
            }
            other => panic!("expected document, got {:?}", other),
        }
        match doc.get("latencies") {
            Some(Value::Array(a)) => {
                let keys: Vec<&str> = a.iter().map(|(k, _)| k).collect();
                assert_eq!(keys, vec!["0", "1"]);
            }
            other => panic!("expected array, got {:?}", other),
        }
    }

    #[test]
    fn test_timestamp_wire_order() {
        // increment is stored before seconds on the wire
        let bytes = DocBuilder::new().timestamp("op", 42, 7).build();
        let doc = Document::parse(&bytes).unwrap();
        assert_eq!(
            doc.get("op"),
            Some(&Value::Timestamp {
                seconds: 42,
                increment: 7
            })
        );
    }

    #[test]
    fn test_binary_and_objectid() {
        let bytes = DocBuilder::new()
            .binary("data", 0, &[1, 2, 3])
            .object_id("_id", [9; 12])
            .build();

        let doc = Document::parse(&bytes).unwrap();
        assert_eq!(
            doc.get("data"),
            Some(&Value::Binary {
                subtype: 0,
                data: vec![1, 2, 3]
            })
        );
        assert_eq!(doc.get("_id"), Some(&Value::ObjectId([9; 12])));
    }

    #[test]
    fn test_size_mismatch_rejected() {
        let mut bytes = DocBuilder::new().int32("a", 1).build();
        // Lie about the size
        bytes[0] = bytes[0].wrapping_add(4);
        let result = Document::parse(&bytes);
        assert!(matches!(result, Err(DecodeError::MalformedBson(_))));
    }

    #[test]
    fn test_missing_terminator_rejected() {
        let mut bytes = DocBuilder::new().int32("a", 1).build();
        let last = bytes.len() - 1;
        bytes[last] = 0x01;
        let result = Document::parse(&bytes);
        assert!(matches!(result, Err(DecodeError::MalformedBson(_))));
    }

    #[test]
    fn test_nested_size_overrun_rejected() {
        let inner = DocBuilder::new().int32("x", 1);
        let mut bytes = DocBuilder::new().document("d", inner).build();
        // Inflate the nested document's declared size past its parent.
        // Nested size field sits after: i32 size, 0x03, "d\0".
        let nested_at = 4 + 1 + 2;
        bytes[nested_at] = 0xF0;
        let result = Document::parse(&bytes);
        assert!(matches!(result, Err(DecodeError::MalformedBson(_))));
    }

    #[test]
    fn test_unsupported_type_rejected() {
        let mut bytes = DocBuilder::new().int32("a", 1).build();
        bytes[4] = 0x60; // no such BSON type
        let result = Document::parse(&bytes);
        assert!(matches!(result, Err(DecodeError::MalformedBson(_))));
    }

    #[test]
    fn test_string_without_nul_rejected() {
        let bytes = DocBuilder::new().string("s", "abc").build();
        // Corrupt the string's trailing NUL (last byte before doc terminator)
        let mut bytes = bytes;
        let len = bytes.len();
        bytes[len - 2] = b'x';
        let result = Document::parse(&bytes);
        assert!(matches!(result, Err(DecodeError::MalformedBson(_))));
    }
}
