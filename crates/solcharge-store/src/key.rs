//! Mapping from free-form configuration names to persistence keys.
//!
//! Names are operator text such as `Batería Litio 100Ah Casa`. Keys must be
//! safe as file names on every platform and as SQLite text, and must map
//! back to the exact name.
//!
//! Encoding: every UTF-8 byte outside `[A-Za-z0-9_-]` becomes `%XX`
//! (uppercase hex). A key that would spell a Windows reserved device name
//! (`CON`, `NUL`, `COM1`, ...) has its first character escaped as well.

use std::fmt;

use crate::error::{Error, Result};

const RESERVED: [&str; 22] = [
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// A path-safe, reversible encoding of a configuration name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StorageKey(String);

impl StorageKey {
    /// Encode a configuration name.
    pub fn from_name(name: &str) -> Result<Self> {
        if name.is_empty() {
            return Err(Error::InvalidName("name cannot be empty".to_string()));
        }

        let mut key = String::with_capacity(name.len());
        for byte in name.bytes() {
            if is_safe(byte) {
                key.push(char::from(byte));
            } else {
                push_escaped(&mut key, byte);
            }
        }

        if RESERVED.iter().any(|r| r.eq_ignore_ascii_case(&key)) {
            let first = key.as_bytes()[0];
            let mut escaped = String::with_capacity(key.len() + 2);
            push_escaped(&mut escaped, first);
            escaped.push_str(&key[1..]);
            key = escaped;
        }

        Ok(Self(key))
    }

    /// Wrap a key read back from persistence, checking that it decodes.
    pub fn from_raw(raw: &str) -> Result<Self> {
        let key = Self(raw.to_string());
        key.to_name()?;
        Ok(key)
    }

    /// Decode back to the configuration name.
    pub fn to_name(&self) -> Result<String> {
        let corrupt = || Error::CorruptKey(self.0.clone());
        let bytes = self.0.as_bytes();
        let mut out = Vec::with_capacity(bytes.len());
        let mut i = 0;
        while i < bytes.len() {
            match bytes[i] {
                b'%' => {
                    let hex = bytes
                        .get(i + 1..i + 3)
                        .filter(|h| h.iter().all(u8::is_ascii_hexdigit))
                        .ok_or_else(corrupt)?;
                    let hex = std::str::from_utf8(hex).map_err(|_| corrupt())?;
                    out.push(u8::from_str_radix(hex, 16).map_err(|_| corrupt())?);
                    i += 3;
                }
                b if is_safe(b) => {
                    out.push(b);
                    i += 1;
                }
                _ => return Err(corrupt()),
            }
        }
        String::from_utf8(out).map_err(|_| corrupt())
    }

    /// The encoded key.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn is_safe(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || byte == b'_' || byte == b'-'
}

fn push_escaped(out: &mut String, byte: u8) {
    const HEX: &[u8; 16] = b"0123456789ABCDEF";
    out.push('%');
    out.push(char::from(HEX[usize::from(byte >> 4)]));
    out.push(char::from(HEX[usize::from(byte & 0x0F)]));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_names_unchanged() {
        let key = StorageKey::from_name("AGM_120Ah-UPS").unwrap();
        assert_eq!(key.as_str(), "AGM_120Ah-UPS");
    }

    #[test]
    fn test_spaces_and_accents() {
        let key = StorageKey::from_name("Batería Litio 100Ah Casa").unwrap();
        assert_eq!(key.as_str(), "Bater%C3%ADa%20Litio%20100Ah%20Casa");
        assert_eq!(key.to_name().unwrap(), "Batería Litio 100Ah Casa");
    }

    #[test]
    fn test_path_characters_escaped() {
        for name in ["../etc/passwd", "a/b", "a\\b", "c:d", "what?", "x*y", "<tag>", "..", "."] {
            let key = StorageKey::from_name(name).unwrap();
            assert!(
                key.as_str()
                    .bytes()
                    .all(|b| b.is_ascii_alphanumeric() || b"%_-".contains(&b)),
                "{} -> {}",
                name,
                key
            );
            assert_eq!(key.to_name().unwrap(), name);
        }
        assert_eq!(StorageKey::from_name("..").unwrap().as_str(), "%2E%2E");
    }

    #[test]
    fn test_reserved_device_names() {
        let key = StorageKey::from_name("CON").unwrap();
        assert_eq!(key.as_str(), "%43ON");
        assert_eq!(key.to_name().unwrap(), "CON");

        let key = StorageKey::from_name("lpt1").unwrap();
        assert_eq!(key.as_str(), "%6Cpt1");

        assert_eq!(StorageKey::from_name("CONSOLE").unwrap().as_str(), "CONSOLE");
    }

    #[test]
    fn test_distinct_names_distinct_keys() {
        let a = StorageKey::from_name("a b").unwrap();
        let b = StorageKey::from_name("a%20b").unwrap();
        assert_ne!(a, b);
        assert_eq!(b.to_name().unwrap(), "a%20b");
    }

    #[test]
    fn test_empty_name_rejected() {
        assert!(matches!(StorageKey::from_name(""), Err(Error::InvalidName(_))));
    }

    #[test]
    fn test_corrupt_keys() {
        assert!(StorageKey::from_raw("bad%2").is_err());
        assert!(StorageKey::from_raw("bad%ZZ").is_err());
        assert!(StorageKey::from_raw("has space").is_err());
        assert!(StorageKey::from_raw("%FF").is_err());
        assert!(StorageKey::from_raw("ok%20key").is_ok());
    }
}
