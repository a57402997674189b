//! Decoding of the target runtime's object layouts.
//!
//! Every decode step returns `Option`: a null pointer, an out-of-range length
//! or an unreadable address all read as "not decodable" and the caller omits
//! the value. Only [`ObjectCodec::header`] reports the underlying error, so a
//! root read can tell a dead process from a bad pointer.
//!
//! Length fields are checked against [`crate::config::limits`] before they
//! size any follow-up read.

mod value;

pub use value::{ObjectKind, PrimitiveValue};

use std::cell::RefCell;
use std::collections::HashMap;

use tracing::trace;

use crate::config::limits::{MAX_DICT_SIZE, MAX_LIST_SIZE, MAX_STRING_LEN, MAX_TYPE_NAME_LEN};
use crate::error::Result;
use crate::process::layout::{DICT_ENTRY_SIZE, DICT_PROBE_OFFSETS, ObjectLayout, POINTER_SIZE};
use crate::process::{ByteBuffer, ReadMemory, decode_byte_string, decode_ucs2, decode_ucs4};

/// Negative metaclass answers stop being remembered past this many entries;
/// type scans test millions of garbage words.
const TYPE_CACHE_CAPACITY: usize = 1 << 16;

/// Largest attribute-dict offset accepted from a type record.
const MAX_DECLARED_DICT_OFFSET: i64 = 0x1000;

/// Reference count and type pointer of an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectHeader {
    pub refcount: i64,
    pub type_address: u64,
}

/// Decoded shape of an open-addressed dict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DictHeader {
    pub fill: i64,
    pub used: i64,
    pub mask: i64,
    pub table: u64,
}

impl DictHeader {
    /// Slot count, if the header looks like a live table within limits.
    pub fn slots(&self) -> Option<usize> {
        let slots = self.mask.checked_add(1)?;
        let plausible = self.table != 0
            && slots > 0
            && (slots as u64).is_power_of_two()
            && slots as usize <= MAX_DICT_SIZE
            && 0 <= self.used
            && self.used <= self.fill
            && self.fill <= slots;
        plausible.then_some(slots as usize)
    }
}

pub struct ObjectCodec<R> {
    reader: R,
    layout: ObjectLayout,
    type_names: RefCell<HashMap<u64, String>>,
    metaclasses: RefCell<HashMap<u64, bool>>,
}

impl<R: ReadMemory> ObjectCodec<R> {
    pub fn new(reader: R, layout: ObjectLayout) -> Self {
        Self {
            reader,
            layout,
            type_names: RefCell::new(HashMap::new()),
            metaclasses: RefCell::new(HashMap::new()),
        }
    }

    pub fn reader(&self) -> &R {
        &self.reader
    }

    pub fn layout(&self) -> &ObjectLayout {
        &self.layout
    }

    /// Forget cached type identities, e.g. after the root was invalidated.
    pub fn clear_type_cache(&self) {
        self.type_names.borrow_mut().clear();
        self.metaclasses.borrow_mut().clear();
    }

    fn ptr_at(&self, address: u64, offset: u64) -> Option<u64> {
        self.reader.read_u64(address.checked_add(offset)?).ok()
    }

    fn i64_at(&self, address: u64, offset: u64) -> Option<i64> {
        self.reader.read_i64(address.checked_add(offset)?).ok()
    }

    pub fn header(&self, address: u64) -> Result<ObjectHeader> {
        let bytes = self
            .reader
            .read_bytes(address, self.layout.header_size() as usize)?;
        let buf = ByteBuffer::new(&bytes);
        Ok(ObjectHeader {
            refcount: buf.read_i64_at(self.layout.refcount as usize)?,
            type_address: buf.read_u64_at(self.layout.type_ptr as usize)?,
        })
    }

    /// Whether `address` is its own type, the signature of the metaclass.
    pub fn is_metaclass(&self, address: u64) -> bool {
        if address == 0 {
            return false;
        }
        if let Some(&known) = self.metaclasses.borrow().get(&address) {
            return known;
        }
        let result = self.ptr_at(address, self.layout.type_ptr) == Some(address);

        let mut cache = self.metaclasses.borrow_mut();
        if result || cache.len() < TYPE_CACHE_CAPACITY {
            cache.insert(address, result);
        }
        result
    }

    /// A type record's type pointer, followed once more, points at itself.
    pub fn is_type_descriptor(&self, address: u64) -> bool {
        self.ptr_at(address, self.layout.type_ptr)
            .is_some_and(|meta| self.is_metaclass(meta))
    }

    /// Name stored in a type record.
    pub fn type_name_of_type(&self, type_address: u64) -> Option<String> {
        if type_address == 0 {
            return None;
        }
        if let Some(name) = self.type_names.borrow().get(&type_address) {
            return Some(name.clone());
        }

        let name_ptr = self.ptr_at(type_address, self.layout.type_name)?;
        if name_ptr == 0 {
            return None;
        }
        let name = self
            .reader
            .read_cstring(name_ptr, MAX_TYPE_NAME_LEN)
            .ok()
            .filter(|n| is_plausible_type_name(n))?;

        self.type_names
            .borrow_mut()
            .insert(type_address, name.clone());
        Some(name)
    }

    /// Declared type name of an object.
    pub fn type_name(&self, address: u64) -> Option<String> {
        let header = self.header(address).ok()?;
        self.type_name_of_type(header.type_address)
    }

    pub fn kind_of(&self, address: u64) -> Option<ObjectKind> {
        self.type_name(address)
            .map(|name| ObjectKind::from_type_name(&name))
    }

    fn read_byte_string(&self, address: u64) -> Option<String> {
        let len = self.length_at(address, self.layout.bytes_len, MAX_STRING_LEN)?;
        let bytes = self
            .reader
            .read_bytes(address.checked_add(self.layout.bytes_data)?, len)
            .ok()?;
        Some(decode_byte_string(&bytes))
    }

    /// Wide strings are stored NUL-terminated at their declared length. The
    /// unit width whose buffer decodes cleanly and carries that terminator
    /// wins, 2-byte first. Without a terminator under either width, the
    /// first width that decodes cleanly is taken.
    fn read_wide_string(&self, address: u64) -> Option<String> {
        let len = self.length_at(address, self.layout.wide_len, MAX_STRING_LEN)?;
        if len == 0 {
            return Some(String::new());
        }
        let data = self.ptr_at(address, self.layout.wide_data)?;
        if data == 0 {
            return None;
        }

        let narrow = self.wide_units(data, len, 2, decode_ucs2);
        let wide = self.wide_units(data, len, 4, decode_ucs4);
        match (narrow, wide) {
            (Some((s, true)), _) => Some(s),
            (_, Some((s, true))) => Some(s),
            (narrow, wide) => {
                trace!("Wide string at {:#x} has no terminator", address);
                narrow.or(wide).map(|(s, _)| s)
            }
        }
    }

    /// Decodes `len` units of `width` bytes at `data`, reporting whether a NUL
    /// unit follows them.
    fn wide_units(
        &self,
        data: u64,
        len: usize,
        width: usize,
        decode: fn(&[u8]) -> Option<String>,
    ) -> Option<(String, bool)> {
        let size = len.checked_mul(width)?;
        if let Ok(bytes) = self.reader.read_bytes(data, size + width) {
            let (text, terminator) = bytes.split_at(size);
            return decode(text).map(|s| (s, terminator.iter().all(|&b| b == 0)));
        }
        let bytes = self.reader.read_bytes(data, size).ok()?;
        decode(&bytes).map(|s| (s, false))
    }

    /// Text of a `str` or `unicode` object.
    pub fn read_string(&self, address: u64) -> Option<String> {
        match self.kind_of(address)? {
            ObjectKind::Str => self.read_byte_string(address),
            ObjectKind::Unicode => self.read_wide_string(address),
            _ => None,
        }
    }

    /// Arbitrary-precision integers, decoded only when they fit two digits.
    fn read_long(&self, address: u64) -> Option<i64> {
        const DIGIT_BITS: u32 = 30;

        let size = self.i64_at(address, self.layout.var_size)?;
        let digits = size.unsigned_abs();
        if digits > 2 {
            return None;
        }
        let base = address.checked_add(self.layout.long_digits)?;
        let mut magnitude: i64 = 0;
        for i in 0..digits {
            let digit = self.reader.read_u32(base + i * 4).ok()?;
            if digit >> DIGIT_BITS != 0 {
                return None;
            }
            magnitude |= i64::from(digit) << (DIGIT_BITS as u64 * i);
        }
        Some(if size < 0 { -magnitude } else { magnitude })
    }

    /// Decode an object into a value.
    ///
    /// Lists and tuples decode their elements one level deep; nested
    /// containers and unknown objects become references.
    pub fn read_primitive(&self, address: u64) -> Option<PrimitiveValue> {
        self.read_value(address, true)
    }

    fn read_value(&self, address: u64, expand: bool) -> Option<PrimitiveValue> {
        if address == 0 {
            return None;
        }
        let type_name = self.type_name(address)?;
        let value = match ObjectKind::from_type_name(&type_name) {
            ObjectKind::NoneType => PrimitiveValue::None,
            ObjectKind::Bool => PrimitiveValue::Bool(self.i64_at(address, self.layout.int_value)? != 0),
            ObjectKind::Int => PrimitiveValue::Int(self.i64_at(address, self.layout.int_value)?),
            ObjectKind::Long => PrimitiveValue::Int(self.read_long(address)?),
            ObjectKind::Float => PrimitiveValue::Float(
                self.reader
                    .read_f64(address.checked_add(self.layout.float_value)?)
                    .ok()?,
            ),
            ObjectKind::Str => PrimitiveValue::Str(self.read_byte_string(address)?),
            ObjectKind::Unicode => PrimitiveValue::Str(self.read_wide_string(address)?),
            ObjectKind::List | ObjectKind::Tuple if expand => PrimitiveValue::List(
                self.read_sequence(address)?
                    .into_iter()
                    .filter_map(|item| self.read_value(item, false))
                    .collect(),
            ),
            _ => PrimitiveValue::Reference { type_name, address },
        };
        Some(value)
    }

    /// Item pointers of a list or tuple, in source order.
    ///
    /// Null items are kept so positions line up with the source sequence.
    pub fn read_sequence(&self, address: u64) -> Option<Vec<u64>> {
        let (len, items) = match self.kind_of(address)? {
            ObjectKind::List => (
                self.length_at(address, self.layout.list_len, MAX_LIST_SIZE)?,
                self.ptr_at(address, self.layout.list_items)?,
            ),
            ObjectKind::Tuple => (
                self.length_at(address, self.layout.tuple_len, MAX_LIST_SIZE)?,
                address.checked_add(self.layout.tuple_items)?,
            ),
            _ => return None,
        };
        if len == 0 {
            return Some(Vec::new());
        }
        if items == 0 {
            return None;
        }

        let bytes = self
            .reader
            .read_bytes(items, len * POINTER_SIZE as usize)
            .ok()?;
        let buf = ByteBuffer::new(&bytes);
        (0..len)
            .map(|i| buf.read_u64_at(i * POINTER_SIZE as usize).ok())
            .collect()
    }

    pub fn dict_header(&self, address: u64) -> Option<DictHeader> {
        let bytes = self
            .reader
            .read_bytes(address, self.layout.dict_header_size() as usize)
            .ok()?;
        let buf = ByteBuffer::new(&bytes);
        Some(DictHeader {
            fill: buf.read_i64_at(self.layout.dict_fill as usize).ok()?,
            used: buf.read_i64_at(self.layout.dict_used as usize).ok()?,
            mask: buf.read_i64_at(self.layout.dict_mask as usize).ok()?,
            table: buf.read_u64_at(self.layout.dict_table as usize).ok()?,
        })
    }

    /// A `dict` object whose table header is internally consistent.
    pub fn is_dict(&self, address: u64) -> bool {
        address != 0
            && self.kind_of(address) == Some(ObjectKind::Dict)
            && self
                .dict_header(address)
                .is_some_and(|h| h.slots().is_some())
    }

    /// Live `(key, value)` pointer pairs of a dict, in table order.
    ///
    /// Empty slots and deleted slots (null value) are skipped.
    pub fn read_dict(&self, address: u64) -> Option<Vec<(u64, u64)>> {
        if self.kind_of(address)? != ObjectKind::Dict {
            return None;
        }
        let header = self.dict_header(address)?;
        let Some(slots) = header.slots() else {
            trace!("Dict at {:#x} has implausible header {:?}", address, header);
            return None;
        };

        let bytes = self
            .reader
            .read_bytes(header.table, slots * DICT_ENTRY_SIZE as usize)
            .ok()?;
        let buf = ByteBuffer::new(&bytes);
        let mut entries = Vec::with_capacity(header.used as usize);
        for slot in 0..slots {
            let offset = slot * DICT_ENTRY_SIZE as usize;
            let key = buf.read_u64_at(offset + 8).ok()?;
            let value = buf.read_u64_at(offset + 16).ok()?;
            if key != 0 && value != 0 {
                entries.push((key, value));
            }
        }
        Some(entries)
    }

    /// Address of an instance's attribute dict.
    ///
    /// The offset declared by the type is tried first; when it is missing or
    /// does not lead to a dict, a fixed set of offsets is tried. Those slots
    /// stay inside the instance's basic size when the type gives a sane one.
    pub fn instance_dict(&self, address: u64) -> Option<u64> {
        let header = self.header(address).ok()?;

        let declared = self
            .i64_at(header.type_address, self.layout.type_dict_offset)
            .filter(|&o| o > 0 && o <= MAX_DECLARED_DICT_OFFSET && o as u64 % POINTER_SIZE == 0);
        let from_declared = declared
            .and_then(|offset| self.ptr_at(address, offset as u64))
            .filter(|&dict| self.is_dict(dict));
        if from_declared.is_some() {
            return from_declared;
        }

        let basic_size = self
            .i64_at(header.type_address, self.layout.type_basic_size)
            .filter(|&size| {
                size > self.layout.header_size() as i64 && size <= MAX_DECLARED_DICT_OFFSET
            })
            .map_or(u64::MAX, |size| size as u64);
        DICT_PROBE_OFFSETS
            .iter()
            .filter(|&&offset| offset + POINTER_SIZE <= basic_size)
            .find_map(|&offset| {
                self.ptr_at(address, offset)
                    .filter(|&dict| self.is_dict(dict))
            })
    }

    /// Named attributes of an instance. Non-string keys are skipped.
    pub fn read_attributes(&self, address: u64) -> Option<Vec<(String, u64)>> {
        let dict = self.instance_dict(address)?;
        let entries = self.read_dict(dict)?;
        Some(
            entries
                .into_iter()
                .filter_map(|(key, value)| Some((self.read_string(key)?, value)))
                .collect(),
        )
    }

    /// Value pointer of one attribute.
    pub fn attribute(&self, address: u64, name: &str) -> Option<u64> {
        self.read_attributes(address)?
            .into_iter()
            .find_map(|(key, value)| (key == name).then_some(value))
    }

    fn length_at(&self, address: u64, offset: u64, max: usize) -> Option<usize> {
        let len = self.i64_at(address, offset)?;
        if len < 0 || len as usize > max {
            trace!(
                "Length {} at {:#x}+{:#x} outside 0..={}",
                len, address, offset, max
            );
            return None;
        }
        Some(len as usize)
    }
}

fn is_plausible_type_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_graphic() || c == ' ')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::SyntheticHeap;

    fn codec(heap: SyntheticHeap) -> ObjectCodec<crate::process::MockMemoryReader> {
        ObjectCodec::new(heap.build(), ObjectLayout::default())
    }

    #[test]
    fn test_header_and_type_name() {
        let mut heap = SyntheticHeap::new();
        let value = heap.int(42);
        let codec = codec(heap);

        let header = codec.header(value).unwrap();
        assert_eq!(header.refcount, 1);
        assert_eq!(codec.type_name(value).as_deref(), Some("int"));
        assert_eq!(codec.kind_of(value), Some(ObjectKind::Int));
    }

    #[test]
    fn test_metaclass_chain() {
        let mut heap = SyntheticHeap::new();
        let meta = heap.type_type();
        let class = heap.class("Sprite");
        let instance = heap.instance(class, &[]);
        let codec = codec(heap);

        assert!(codec.is_metaclass(meta));
        assert!(codec.is_type_descriptor(class));
        assert!(codec.is_type_descriptor(meta));
        assert!(!codec.is_type_descriptor(instance));
        assert_eq!(codec.type_name_of_type(class).as_deref(), Some("Sprite"));
    }

    #[test]
    fn test_primitives() {
        let mut heap = SyntheticHeap::new();
        let s = heap.str("caption");
        let u = heap.unicode("Überblick ✓");
        let wide = heap.unicode_ucs4("wide 𝄞");
        let i = heap.int(-7);
        let big = heap.long(1 << 40);
        let f = heap.float(1.25);
        let t = heap.bool(true);
        let n = heap.none();
        let codec = codec(heap);

        assert_eq!(codec.read_primitive(s), Some(PrimitiveValue::Str("caption".into())));
        assert_eq!(
            codec.read_primitive(u),
            Some(PrimitiveValue::Str("Überblick ✓".into()))
        );
        assert_eq!(
            codec.read_primitive(wide),
            Some(PrimitiveValue::Str("wide 𝄞".into()))
        );
        assert_eq!(codec.read_primitive(i), Some(PrimitiveValue::Int(-7)));
        assert_eq!(codec.read_primitive(big), Some(PrimitiveValue::Int(1 << 40)));
        assert_eq!(codec.read_primitive(f), Some(PrimitiveValue::Float(1.25)));
        assert_eq!(codec.read_primitive(t), Some(PrimitiveValue::Bool(true)));
        assert_eq!(codec.read_primitive(n), Some(PrimitiveValue::None));
        assert_eq!(codec.read_primitive(0), None);
    }

    #[test]
    fn test_wide_string_outside_basic_plane() {
        let mut heap = SyntheticHeap::new();
        let one = heap.unicode_ucs4("\u{1F600}");
        let two = heap.unicode_ucs4("\u{1F600}\u{1F600}");
        let narrow = heap.unicode("\u{1F600}");
        let codec = codec(heap);

        assert_eq!(codec.read_string(one).as_deref(), Some("\u{1F600}"));
        assert_eq!(codec.read_string(two).as_deref(), Some("\u{1F600}\u{1F600}"));
        // surrogate pair in 2-byte units
        assert_eq!(codec.read_string(narrow).as_deref(), Some("\u{1F600}"));
    }

    #[test]
    fn test_wide_string_without_terminator() {
        let mut heap = SyntheticHeap::new();
        let text = heap.unicode("ok");
        let reader = heap.build();
        let data = reader.read_u64(text + 0x18).unwrap();
        // "ok" followed by 'A' where the NUL unit should be
        reader
            .poke_u64(data, u64::from_le_bytes([b'o', 0, b'k', 0, b'A', 0, 0, 0]))
            .unwrap();
        let codec = ObjectCodec::new(reader, ObjectLayout::default());

        assert_eq!(codec.read_string(text).as_deref(), Some("ok"));
    }

    #[test]
    fn test_oversized_string_length_is_rejected() {
        let mut heap = SyntheticHeap::new();
        let s = heap.str("short");
        heap.set_i64(s + 0x10, (MAX_STRING_LEN + 1) as i64);
        let codec = codec(heap);

        assert_eq!(codec.read_string(s), None);
    }

    #[test]
    fn test_list_of_primitives_and_references() {
        let mut heap = SyntheticHeap::new();
        let class = heap.class("Sprite");
        let sprite = heap.instance(class, &[]);
        let one = heap.int(1);
        let two = heap.int(2);
        let list = heap.list(&[one, sprite, two]);
        let codec = codec(heap);

        assert_eq!(
            codec.read_primitive(list),
            Some(PrimitiveValue::List(vec![
                PrimitiveValue::Int(1),
                PrimitiveValue::Reference {
                    type_name: "Sprite".into(),
                    address: sprite
                },
                PrimitiveValue::Int(2),
            ]))
        );
    }

    #[test]
    fn test_tuple_items_inline() {
        let mut heap = SyntheticHeap::new();
        let a = heap.str("a");
        let b = heap.str("b");
        let tuple = heap.tuple(&[a, b]);
        let codec = codec(heap);

        assert_eq!(codec.read_sequence(tuple), Some(vec![a, b]));
    }

    #[test]
    fn test_oversized_list_is_rejected() {
        let mut heap = SyntheticHeap::new();
        let item = heap.int(0);
        let list = heap.list(&[item]);
        heap.set_i64(list + 0x10, (MAX_LIST_SIZE + 1) as i64);
        let codec = codec(heap);

        assert_eq!(codec.read_sequence(list), None);
        assert_eq!(codec.read_primitive(list), None);
    }

    #[test]
    fn test_dict_shape_checks() {
        let mut heap = SyntheticHeap::new();
        let key = heap.str("k");
        let value = heap.int(5);
        let dict = heap.dict(&[(key, value)]);
        let broken = heap.dict(&[(key, value)]);
        // 12 slots is not a power of two
        heap.set_i64(broken + 0x20, 11);
        let codec = codec(heap);

        assert!(codec.is_dict(dict));
        assert_eq!(codec.read_dict(dict), Some(vec![(key, value)]));
        assert!(!codec.is_dict(broken));
        assert_eq!(codec.read_dict(broken), None);
    }

    #[test]
    fn test_oversized_dict_is_rejected() {
        let mut heap = SyntheticHeap::new();
        let dict = heap.dict(&[]);
        heap.set_i64(dict + 0x20, (MAX_DICT_SIZE * 2 - 1) as i64);
        let codec = codec(heap);

        assert_eq!(codec.read_dict(dict), None);
    }

    #[test]
    fn test_instance_dict_falls_back_to_probing() {
        let mut heap = SyntheticHeap::new();
        // declared offset points at the refcount, not a dict pointer
        let class = heap.class_with_dict_offset("Label", 0x18);
        let text = heap.str("hello");
        let instance = heap.instance(class, &[("_text", text)]);
        let codec = codec(heap);

        let attrs = codec.read_attributes(instance).unwrap();
        assert_eq!(attrs, vec![("_text".to_string(), text)]);
        assert_eq!(codec.attribute(instance, "_text"), Some(text));
        assert_eq!(codec.attribute(instance, "_missing"), None);
    }

    #[test]
    fn test_fallback_dict_stays_within_basic_size() {
        let layout = ObjectLayout::default();
        let mut heap = SyntheticHeap::new();
        let text = heap.str("hello");
        let key = heap.str("_text");
        let dict = heap.dict(&[(key, text)]);

        let instance_of = |heap: &mut SyntheticHeap, class: u64| {
            let address = heap.alloc(0x30);
            heap.set_i64(address + layout.refcount, 1);
            heap.set_u64(address + layout.type_ptr, class);
            heap.set_u64(address + 0x28, dict);
            address
        };
        let small = heap.class_with_dict_offset("Small", 0);
        let large = heap.class_with_dict_offset("Large", 0);
        heap.set_i64(large + layout.type_basic_size, 0x30);
        let small_instance = instance_of(&mut heap, small);
        let large_instance = instance_of(&mut heap, large);
        let codec = codec(heap);

        assert_eq!(codec.instance_dict(small_instance), None);
        assert_eq!(codec.instance_dict(large_instance), Some(dict));
    }

    #[test]
    fn test_type_cache_can_be_cleared() {
        let mut heap = SyntheticHeap::new();
        let class = heap.class("Sprite");
        let codec = codec(heap);

        assert_eq!(codec.type_name_of_type(class).as_deref(), Some("Sprite"));
        codec.clear_type_cache();
        assert!(codec.type_names.borrow().is_empty());
        assert_eq!(codec.type_name_of_type(class).as_deref(), Some("Sprite"));
    }

    #[test]
    fn test_dict_header_slots() {
        let header = DictHeader {
            fill: 3,
            used: 2,
            mask: 7,
            table: 0x1000,
        };
        assert_eq!(header.slots(), Some(8));
        assert_eq!(DictHeader { used: 4, ..header }.slots(), None);
        assert_eq!(DictHeader { table: 0, ..header }.slots(), None);
        assert_eq!(DictHeader { mask: -1, ..header }.slots(), None);
    }
}
