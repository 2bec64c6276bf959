//! FFI layer between Rust and scripts
//!
//! Host identities cross into script code as opaque pointer values. Raw byte
//! buffers cross as strings with one code unit per byte.

use std::fmt;

/// Opaque pointer value visible to scripts
///
/// Script code can store, compare and pass it back, never dereference it.
/// `0` is the null pointer.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub struct ScriptHandle(pub u64);

impl ScriptHandle {
    pub const NULL: ScriptHandle = ScriptHandle(0);

    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    pub fn to_bits(self) -> u64 {
        self.0
    }
}

impl From<u64> for ScriptHandle {
    fn from(bits: u64) -> Self {
        ScriptHandle(bits)
    }
}

impl From<ScriptHandle> for u64 {
    fn from(handle: ScriptHandle) -> Self {
        handle.0
    }
}

impl fmt::Display for ScriptHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Script string holding `bytes` verbatim, one code unit (U+0000..U+00FF) per byte.
pub fn byte_string(bytes: &[u8]) -> String {
    bytes.iter().map(|&byte| char::from(byte)).collect()
}

/// Inverse of [`byte_string`]. Text with code units above U+00FF was not
/// built from bytes and is taken as UTF-8.
pub fn string_bytes(text: &str) -> Vec<u8> {
    if text.chars().all(|c| u32::from(c) <= 0xff) {
        text.chars().map(|c| c as u8).collect()
    } else {
        text.as_bytes().to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_byte_strings_keep_every_byte() {
        let raw = [0xff, 0x61, 0x00, 0x80];
        let text = byte_string(&raw);
        assert_eq!(text.chars().count(), raw.len());
        assert_eq!(string_bytes(&text), raw);
    }

    #[test]
    fn test_wide_text_is_utf8() {
        assert_eq!(string_bytes("h\u{e9}"), vec![b'h', 0xe9]);
        assert_eq!(string_bytes("\u{263a}"), "\u{263a}".as_bytes());
    }

    #[test]
    fn test_handle_display_is_hex() {
        assert_eq!(ScriptHandle(255).to_string(), "0xff");
        assert!(ScriptHandle::NULL.is_null());
    }
}
