//! Random (version 4) UUIDs.

use core::fmt;

use rand::RngCore;

/// A 128-bit UUID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Uuid([u8; 16]);

impl Uuid {
    /// Generates a random version-4 UUID.
    #[must_use]
    pub fn new_v4() -> Self {
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);
        // RFC 4122 version and variant bits.
        bytes[6] = (bytes[6] & 0x0F) | 0x40;
        bytes[8] = (bytes[8] & 0x3F) | 0x80;
        Self(bytes)
    }

    /// Builds a UUID from raw bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// The raw bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Returns true for the all-zero UUID.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|&byte| byte == 0)
    }
}

impl fmt::Display for Uuid {
    /// Lowercase hyphenated form, `8-4-4-4-12` hex digits.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let groups = [(0, 4), (4, 6), (6, 8), (8, 10), (10, 16)];
        for (i, (start, end)) in groups.into_iter().enumerate() {
            if i > 0 {
                write!(f, "-")?;
            }
            for byte in &self.0[start..end] {
                write!(f, "{byte:02x}")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn v4_bits_and_format() {
        for _ in 0..1024 {
            let uuid = Uuid::new_v4();
            let s = uuid.to_string();
            assert_eq!(s.len(), 36);
            assert_eq!(s.as_bytes()[14], b'4', "{s}");
            assert!(matches!(s.as_bytes()[19], b'8' | b'9' | b'a' | b'b'), "{s}");
        }
    }

    #[test]
    fn zero_check_and_round_trip() {
        assert!(Uuid::default().is_zero());
        let uuid = Uuid::new_v4();
        assert!(!uuid.is_zero());
        assert_eq!(Uuid::from_bytes(*uuid.as_bytes()), uuid);
    }

    #[test]
    fn display_matches_known_bytes() {
        let uuid = Uuid::from_bytes([
            0x12, 0x34, 0x56, 0x78, 0x9a, 0xbc, 0x4d, 0xef, 0x80, 0x01, 0x02, 0x03, 0x04, 0x05,
            0x06, 0x07,
        ]);
        assert_eq!(uuid.to_string(), "12345678-9abc-4def-8001-020304050607");
    }
}
