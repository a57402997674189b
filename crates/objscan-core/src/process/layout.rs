//! Structural offsets of the target runtime's object model.
//!
//! All offsets are relative to the start of an object. The defaults describe
//! a 64-bit, reference-counted, dict-backed runtime.
//!
//! # Object Header
//!
//! ```text
//! Offset   Field              Size    Description
//! ──────────────────────────────────────────────────────
//! 0x00     refcount           8       Signed reference count
//! 0x08     type               8       Pointer to the type record
//! 0x10     size / value       8       Item count (var objects) or value cell
//! ```
//!
//! # Dict
//!
//! ```text
//! Offset   Field              Size    Description
//! ──────────────────────────────────────────────────────
//! 0x10     fill               8       Active + dummy slots
//! 0x18     used               8       Active slots
//! 0x20     mask               8       Slot count - 1 (power of two)
//! 0x28     table              8       Pointer to {hash, key, value} entries
//! ```

use serde::{Deserialize, Serialize};

/// Pointer width of the target process.
pub const POINTER_SIZE: u64 = 8;

/// Size of one `{hash, key, value}` dict entry.
pub const DICT_ENTRY_SIZE: u64 = 24;

/// Offsets probed for an attribute dict when the type-declared offset fails.
pub const DICT_PROBE_OFFSETS: [u64; 6] = [0x10, 0x18, 0x20, 0x28, 0x30, 0x38];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObjectLayout {
    pub refcount: u64,
    pub type_ptr: u64,
    /// Item count of variable-size objects.
    pub var_size: u64,

    pub type_name: u64,
    pub type_basic_size: u64,
    pub type_dict_offset: u64,

    pub bytes_len: u64,
    pub bytes_data: u64,

    pub wide_len: u64,
    pub wide_data: u64,

    pub int_value: u64,
    pub long_digits: u64,
    pub float_value: u64,

    pub list_len: u64,
    pub list_items: u64,
    pub tuple_len: u64,
    pub tuple_items: u64,

    pub dict_fill: u64,
    pub dict_used: u64,
    pub dict_mask: u64,
    pub dict_table: u64,
}

impl Default for ObjectLayout {
    fn default() -> Self {
        Self {
            refcount: 0x00,
            type_ptr: 0x08,
            var_size: 0x10,

            type_name: 0x18,
            type_basic_size: 0x20,
            type_dict_offset: 0x120,

            bytes_len: 0x10,
            bytes_data: 0x24,

            wide_len: 0x10,
            wide_data: 0x18,

            int_value: 0x10,
            long_digits: 0x18,
            float_value: 0x10,

            list_len: 0x10,
            list_items: 0x18,
            tuple_len: 0x10,
            tuple_items: 0x18,

            dict_fill: 0x10,
            dict_used: 0x18,
            dict_mask: 0x20,
            dict_table: 0x28,
        }
    }
}

impl ObjectLayout {
    /// Width of the refcount + type pointer header.
    pub fn header_size(&self) -> u64 {
        self.refcount.max(self.type_ptr) + POINTER_SIZE
    }

    /// Bytes that must be readable to decode a dict header.
    pub fn dict_header_size(&self) -> u64 {
        self.dict_fill
            .max(self.dict_used)
            .max(self.dict_mask)
            .max(self.dict_table)
            + POINTER_SIZE
    }
}
