//! Synthetic heaps for tests.
//!
//! `SyntheticHeap` lays out runtime-shaped objects (type records with the
//! metaclass chain, strings, numbers, containers, instances with attribute
//! dicts) in one contiguous segment using the default [`ObjectLayout`], and
//! builds a [`MockMemoryReader`] over it.

use std::collections::HashMap;

use crate::process::MockMemoryReader;
use crate::process::layout::{DICT_ENTRY_SIZE, ObjectLayout, POINTER_SIZE};

/// Where synthetic heaps are mapped.
pub const HEAP_BASE: u64 = 0x5500_0000_0000;

const ALIGN: u64 = 16;

const PAGE_SIZE: u64 = 0x1000;

/// Attribute dict pointer offset inside instances built by the heap.
const INSTANCE_DICT_OFFSET: u64 = 0x10;

pub struct SyntheticHeap {
    base: u64,
    data: Vec<u8>,
    layout: ObjectLayout,
    type_type: u64,
    builtins: HashMap<String, u64>,
    interned: HashMap<String, u64>,
    none: Option<u64>,
}

impl Default for SyntheticHeap {
    fn default() -> Self {
        Self::new()
    }
}

impl SyntheticHeap {
    pub fn new() -> Self {
        Self::with_base(HEAP_BASE)
    }

    pub fn with_base(base: u64) -> Self {
        let mut heap = Self {
            base,
            // keep address `base` itself unused so no object sits at offset 0
            data: vec![0; ALIGN as usize],
            layout: ObjectLayout::default(),
            type_type: 0,
            builtins: HashMap::new(),
            interned: HashMap::new(),
            none: None,
        };
        let type_type = heap.type_record("type", 0, 0);
        heap.set_u64(type_type + heap.layout.type_ptr, type_type);
        heap.type_type = type_type;
        heap
    }

    pub fn base(&self) -> u64 {
        self.base
    }

    /// One past the last allocated byte.
    pub fn end(&self) -> u64 {
        self.base + self.data.len() as u64
    }

    /// The metaclass: a type record whose type is itself.
    pub fn type_type(&self) -> u64 {
        self.type_type
    }

    /// An address inside user space that the built reader does not map.
    pub fn unmapped_address(&self) -> u64 {
        self.end() + 0x1000_0000
    }

    pub fn alloc(&mut self, size: u64) -> u64 {
        let offset = (self.data.len() as u64).next_multiple_of(ALIGN);
        let size = size.max(POINTER_SIZE).next_multiple_of(ALIGN);
        self.data.resize((offset + size) as usize, 0);
        self.base + offset
    }

    pub fn set_u64(&mut self, address: u64, value: u64) {
        self.set_bytes(address, &value.to_le_bytes());
    }

    pub fn set_i64(&mut self, address: u64, value: i64) {
        self.set_bytes(address, &value.to_le_bytes());
    }

    pub fn set_bytes(&mut self, address: u64, bytes: &[u8]) {
        let offset = (address - self.base) as usize;
        self.data[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    fn cstring(&mut self, text: &str) -> u64 {
        let address = self.alloc(text.len() as u64 + 1);
        self.set_bytes(address, text.as_bytes());
        address
    }

    fn object(&mut self, type_address: u64, size: u64) -> u64 {
        let address = self.alloc(size.max(self.layout.header_size()));
        self.set_i64(address + self.layout.refcount, 1);
        self.set_u64(address + self.layout.type_ptr, type_address);
        address
    }

    fn type_record(&mut self, name: &str, type_address: u64, dict_offset: i64) -> u64 {
        let name_ptr = self.cstring(name);
        let size = self.layout.type_dict_offset + POINTER_SIZE;
        let record = self.object(type_address, size);
        self.set_u64(record + self.layout.type_name, name_ptr);
        self.set_i64(record + self.layout.type_basic_size, 0x20);
        self.set_i64(record + self.layout.type_dict_offset, dict_offset);
        record
    }

    /// Built-in type record by name, created on first use.
    pub fn builtin_type(&mut self, name: &str) -> u64 {
        if let Some(&address) = self.builtins.get(name) {
            return address;
        }
        let address = self.type_record(name, self.type_type, 0);
        self.builtins.insert(name.to_string(), address);
        address
    }

    /// A class whose instances keep their attribute dict at the usual offset.
    pub fn class(&mut self, name: &str) -> u64 {
        self.class_with_dict_offset(name, INSTANCE_DICT_OFFSET as i64)
    }

    /// A class declaring `dict_offset`; instances still store their dict at
    /// the usual offset, so a wrong declaration exercises probing.
    pub fn class_with_dict_offset(&mut self, name: &str, dict_offset: i64) -> u64 {
        self.type_record(name, self.type_type, dict_offset)
    }

    /// Interned byte string.
    pub fn str(&mut self, text: &str) -> u64 {
        if let Some(&address) = self.interned.get(text) {
            return address;
        }
        let address = self.bytes_object(text.as_bytes());
        self.interned.insert(text.to_string(), address);
        address
    }

    /// Byte string with arbitrary contents, never interned.
    pub fn bytes_object(&mut self, bytes: &[u8]) -> u64 {
        let ty = self.builtin_type("str");
        let address = self.object(ty, self.layout.bytes_data + bytes.len() as u64 + 1);
        self.set_i64(address + self.layout.bytes_len, bytes.len() as i64);
        self.set_i64(address + 0x18, -1);
        self.set_bytes(address + self.layout.bytes_data, bytes);
        address
    }

    /// Wide string stored as 2-byte code units.
    pub fn unicode(&mut self, text: &str) -> u64 {
        let units: Vec<u8> = text.encode_utf16().flat_map(|u| u.to_le_bytes()).collect();
        let len = text.encode_utf16().count();
        self.wide_object(&units, len)
    }

    /// Wide string stored as 4-byte code units.
    pub fn unicode_ucs4(&mut self, text: &str) -> u64 {
        let units: Vec<u8> = text.chars().flat_map(|c| (c as u32).to_le_bytes()).collect();
        let len = text.chars().count();
        self.wide_object(&units, len)
    }

    fn wide_object(&mut self, units: &[u8], len: usize) -> u64 {
        let ty = self.builtin_type("unicode");
        let buffer = self.alloc(units.len() as u64 + 4);
        self.set_bytes(buffer, units);
        let address = self.object(ty, 0x30);
        self.set_i64(address + self.layout.wide_len, len as i64);
        self.set_u64(address + self.layout.wide_data, buffer);
        address
    }

    pub fn int(&mut self, value: i64) -> u64 {
        let ty = self.builtin_type("int");
        let address = self.object(ty, 0x18);
        self.set_i64(address + self.layout.int_value, value);
        address
    }

    /// Arbitrary-precision integer with 30-bit digits.
    pub fn long(&mut self, value: i64) -> u64 {
        let ty = self.builtin_type("long");
        let mut magnitude = value.unsigned_abs();
        let mut digits = Vec::new();
        while magnitude != 0 {
            digits.push((magnitude & 0x3FFF_FFFF) as u32);
            magnitude >>= 30;
        }
        let address = self.object(ty, self.layout.long_digits + 4 * digits.len() as u64);
        let size = if value < 0 {
            -(digits.len() as i64)
        } else {
            digits.len() as i64
        };
        self.set_i64(address + self.layout.var_size, size);
        for (i, digit) in digits.iter().enumerate() {
            self.set_bytes(
                address + self.layout.long_digits + 4 * i as u64,
                &digit.to_le_bytes(),
            );
        }
        address
    }

    pub fn float(&mut self, value: f64) -> u64 {
        let ty = self.builtin_type("float");
        let address = self.object(ty, 0x18);
        self.set_bytes(address + self.layout.float_value, &value.to_le_bytes());
        address
    }

    pub fn bool(&mut self, value: bool) -> u64 {
        let ty = self.builtin_type("bool");
        let address = self.object(ty, 0x18);
        self.set_i64(address + self.layout.int_value, i64::from(value));
        address
    }

    /// The `None` singleton.
    pub fn none(&mut self) -> u64 {
        if let Some(address) = self.none {
            return address;
        }
        let ty = self.builtin_type("NoneType");
        let address = self.object(ty, self.layout.header_size());
        self.none = Some(address);
        address
    }

    pub fn list(&mut self, items: &[u64]) -> u64 {
        let ty = self.builtin_type("list");
        let array = self.alloc(items.len() as u64 * POINTER_SIZE);
        for (i, &item) in items.iter().enumerate() {
            self.set_u64(array + i as u64 * POINTER_SIZE, item);
        }
        let address = self.object(ty, 0x28);
        self.set_i64(address + self.layout.list_len, items.len() as i64);
        self.set_u64(
            address + self.layout.list_items,
            if items.is_empty() { 0 } else { array },
        );
        self.set_i64(address + 0x20, items.len() as i64);
        address
    }

    pub fn tuple(&mut self, items: &[u64]) -> u64 {
        let ty = self.builtin_type("tuple");
        let address = self.object(
            ty,
            self.layout.tuple_items + items.len() as u64 * POINTER_SIZE,
        );
        self.set_i64(address + self.layout.tuple_len, items.len() as i64);
        for (i, &item) in items.iter().enumerate() {
            self.set_u64(
                address + self.layout.tuple_items + i as u64 * POINTER_SIZE,
                item,
            );
        }
        address
    }

    /// Dict with entries in table order. The table keeps at least a third
    /// of its slots free, like the runtime's own resize policy.
    pub fn dict(&mut self, entries: &[(u64, u64)]) -> u64 {
        let ty = self.builtin_type("dict");
        let slots = ((entries.len() * 3 / 2) + 1).next_power_of_two().max(8) as u64;
        let table = self.alloc(slots * DICT_ENTRY_SIZE);
        for (i, &(key, value)) in entries.iter().enumerate() {
            let entry = table + i as u64 * DICT_ENTRY_SIZE;
            self.set_i64(entry, i as i64);
            self.set_u64(entry + 8, key);
            self.set_u64(entry + 16, value);
        }
        let address = self.object(ty, self.layout.dict_header_size());
        self.set_i64(address + self.layout.dict_fill, entries.len() as i64);
        self.set_i64(address + self.layout.dict_used, entries.len() as i64);
        self.set_i64(address + self.layout.dict_mask, slots as i64 - 1);
        self.set_u64(address + self.layout.dict_table, table);
        address
    }

    /// Instance of `class` with string-keyed attributes.
    pub fn instance(&mut self, class: u64, attributes: &[(&str, u64)]) -> u64 {
        let entries: Vec<(u64, u64)> = attributes
            .iter()
            .map(|&(name, value)| (self.str(name), value))
            .collect();
        let dict = self.dict(&entries);
        self.instance_with_dict(class, dict)
    }

    /// Instance of `class` whose attribute dict is `dict`, keys unrestricted.
    pub fn instance_with_dict(&mut self, class: u64, dict: u64) -> u64 {
        let address = self.object(class, INSTANCE_DICT_OFFSET + POINTER_SIZE);
        self.set_u64(address + INSTANCE_DICT_OFFSET, dict);
        address
    }

    /// UI-style node: `children._childrenObjects` holds the child list.
    pub fn node(&mut self, class: u64, attributes: &[(&str, u64)], children: &[u64]) -> u64 {
        self.node_with_children_list(class, attributes, children).0
    }

    /// Like [`node`](Self::node), also returning the child list so tests
    /// can rewire it with [`set_list_item`](Self::set_list_item).
    pub fn node_with_children_list(
        &mut self,
        class: u64,
        attributes: &[(&str, u64)],
        children: &[u64],
    ) -> (u64, u64) {
        let list_class = self.class("UIChildrenList");
        let list = self.list(children);
        let container = self.instance(list_class, &[("_childrenObjects", list)]);

        let mut attributes = attributes.to_vec();
        attributes.push(("children", container));
        (self.instance(class, &attributes), list)
    }

    /// Point slot `index` of a non-empty list at `item`.
    pub fn set_list_item(&mut self, list: u64, index: usize, item: u64) {
        let items = self.get_u64(list + self.layout.list_items);
        self.set_u64(items + index as u64 * POINTER_SIZE, item);
    }

    fn get_u64(&self, address: u64) -> u64 {
        let offset = (address - self.base) as usize;
        let bytes = <[u8; 8]>::try_from(&self.data[offset..offset + 8]).unwrap_or([0; 8]);
        u64::from_le_bytes(bytes)
    }

    /// Map the heap, padded to whole pages like a real anonymous mapping.
    pub fn build(mut self) -> MockMemoryReader {
        let mapped = (self.data.len() as u64).next_multiple_of(PAGE_SIZE);
        self.data.resize(mapped as usize, 0);
        MockMemoryReader::with_base(self.data, self.base)
    }
}
