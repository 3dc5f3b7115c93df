//! Object layout shared by the translator, the runtime routines, and the
//! reference machine.
//!
//! An object reference points at the first payload word. Three header words
//! sit directly below it:
//!
//! ```text
//! ref - 12   type tag
//! ref -  8   dispatch table address
//! ref -  4   size word: attribute count, or element/char count for list/str
//! ref +  0   payload (attributes, list elements, or string bytes)
//! ```

use crate::ir::WORD_SIZE;

pub const HEADER_WORDS: i32 = 3;
pub const TYPE_TAG_OFFSET: i32 = -3 * WORD_SIZE;
pub const DISPATCH_TABLE_OFFSET: i32 = -2 * WORD_SIZE;
pub const SIZE_OFFSET: i32 = -WORD_SIZE;

/// Type tags of the built-in classes; user classes count up from `FIRST_USER_TAG`.
pub mod tag {
    pub const OBJECT: i32 = 0;
    pub const INT: i32 = 1;
    pub const BOOL: i32 = 2;
    pub const STR: i32 = 3;
    pub const LIST: i32 = -1;
    pub const FIRST_USER_TAG: i32 = 4;
}

/// Process exit status for each way a program can end.
pub mod exit_code {
    pub const OK: i32 = 0;
    pub const DIVISION_BY_ZERO: i32 = 2;
    pub const INDEX_OUT_OF_BOUNDS: i32 = 3;
    pub const OPERATION_ON_NONE: i32 = 4;
}

/// Byte offset of payload slot `index` (attribute or list element).
pub fn slot_offset(index: usize) -> i32 {
    index as i32 * WORD_SIZE
}

/// Payload words a string of `len` bytes needs, NUL terminator included.
pub fn str_payload_words(len: usize) -> i32 {
    (len as i32 + WORD_SIZE) / WORD_SIZE
}

/// Name of the single attribute of a boxed int, bool, or str, whose payload
/// starts at offset 0.
pub fn builtin_attr_name(class_name: &str) -> Option<&'static str> {
    match class_name {
        "int" => Some("__int__"),
        "bool" => Some("__bool__"),
        "str" => Some("__str__"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_payload_keeps_room_for_terminator() {
        assert_eq!(str_payload_words(0), 1);
        assert_eq!(str_payload_words(3), 1);
        assert_eq!(str_payload_words(4), 2);
    }

    #[test]
    fn header_sits_below_payload() {
        assert_eq!(TYPE_TAG_OFFSET, -12);
        assert_eq!(DISPATCH_TABLE_OFFSET, -8);
        assert_eq!(SIZE_OFFSET, -4);
        assert_eq!(slot_offset(1), WORD_SIZE);
    }
}
