//! Reconstruction of a live object graph into a generic tree.
//!
//! One read walks from a root address through attribute dicts and the
//! configured children path. Anything that fails to decode below the root is
//! left out; the target mutates its heap while we read it, so a partial tree
//! is a normal result.

pub mod format;
mod properties;

pub use properties::Properties;

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::codec::{ObjectCodec, PrimitiveValue};
use crate::config::GraphConfig;
use crate::deadline::Deadline;
use crate::error::{Error, Result};
use crate::process::ReadMemory;

/// One reconstructed object.
///
/// `properties` is open-ended: whatever primitive attributes the object
/// carried at read time, in the order its attribute dict held them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectNode {
    pub address: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
    #[serde(default, skip_serializing_if = "Properties::is_empty")]
    pub properties: Properties,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ObjectNode>,
    /// Set on leaves cut off by the depth limit or an already-visited address.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub truncated: bool,
}

impl ObjectNode {
    pub fn new(address: u64, type_name: impl Into<String>) -> Self {
        Self {
            address,
            type_name: Some(type_name.into()),
            properties: Properties::new(),
            children: Vec::new(),
            truncated: false,
        }
    }

    pub fn truncated(address: u64) -> Self {
        Self {
            address,
            type_name: None,
            properties: Properties::new(),
            children: Vec::new(),
            truncated: true,
        }
    }

    /// This node plus all descendants.
    pub fn node_count(&self) -> usize {
        1 + self.children.iter().map(ObjectNode::node_count).sum::<usize>()
    }

    pub fn depth(&self) -> usize {
        1 + self.children.iter().map(ObjectNode::depth).max().unwrap_or(0)
    }

    pub fn property(&self, name: &str) -> Option<&PrimitiveValue> {
        self.properties.get(name)
    }

    /// First node of the given type, depth-first in source order.
    pub fn find_by_type(&self, type_name: &str) -> Option<&ObjectNode> {
        if self.type_name.as_deref() == Some(type_name) {
            return Some(self);
        }
        self.children
            .iter()
            .find_map(|child| child.find_by_type(type_name))
    }

    pub fn find_all_by_type<'a>(&'a self, type_name: &str, out: &mut Vec<&'a ObjectNode>) {
        if self.type_name.as_deref() == Some(type_name) {
            out.push(self);
        }
        for child in &self.children {
            child.find_all_by_type(type_name, out);
        }
    }

    /// First value of the named property, depth-first in source order.
    pub fn find_property(&self, name: &str) -> Option<&PrimitiveValue> {
        self.properties.get(name).or_else(|| {
            self.children
                .iter()
                .find_map(|child| child.find_property(name))
        })
    }
}

pub struct ObjectGraphReader<'a, R> {
    codec: &'a ObjectCodec<R>,
    config: &'a GraphConfig,
}

impl<'a, R: ReadMemory> ObjectGraphReader<'a, R> {
    pub fn new(codec: &'a ObjectCodec<R>, config: &'a GraphConfig) -> Self {
        Self { codec, config }
    }

    pub fn read_tree(&self, root: u64) -> Result<ObjectNode> {
        self.read_tree_within(root, &Deadline::unbounded("tree read"))
    }

    /// Read the tree below `root`, aborting once `deadline` passes.
    ///
    /// Errors only when the root itself is unreadable or has no type name,
    /// or the deadline expires.
    pub fn read_tree_within(&self, root: u64, deadline: &Deadline) -> Result<ObjectNode> {
        let header = self.codec.header(root)?;
        if self
            .codec
            .type_name_of_type(header.type_address)
            .is_none()
        {
            return Err(Error::unreadable(
                root,
                self.codec.layout().header_size() as usize,
                "root has no readable type name",
            ));
        }

        let mut visited = HashSet::new();
        let node = self
            .visit(root, 0, &mut visited, deadline)?
            .ok_or_else(|| Error::unreadable(root, 0, "root vanished during read"))?;
        debug!(
            "Read tree at {:#x}: {} nodes in {:?}",
            root,
            node.node_count(),
            deadline.elapsed()
        );
        Ok(node)
    }

    fn visit(
        &self,
        address: u64,
        depth: usize,
        visited: &mut HashSet<u64>,
        deadline: &Deadline,
    ) -> Result<Option<ObjectNode>> {
        deadline.check()?;

        if depth > self.config.max_depth || !visited.insert(address) {
            return Ok(Some(ObjectNode::truncated(address)));
        }
        let Some(type_name) = self.codec.type_name(address) else {
            return Ok(None);
        };
        let mut node = ObjectNode::new(address, type_name);

        let attributes = self.codec.read_attributes(address).unwrap_or_default();
        let children_attr = self.config.children_path.first();
        for (name, value) in &attributes {
            if Some(name) == children_attr {
                continue;
            }
            let Some(decoded) = self.codec.read_primitive(*value) else {
                continue;
            };
            if decoded.is_plain() || self.config.structural_fields.contains(name) {
                node.properties.insert(name.as_str(), decoded);
            }
        }

        for child in self.child_addresses(&attributes) {
            if child == 0 {
                continue;
            }
            if let Some(child_node) = self.visit(child, depth + 1, visited, deadline)? {
                node.children.push(child_node);
            }
        }
        Ok(Some(node))
    }

    /// Follow the children path from already-read attributes to the sequence.
    fn child_addresses(&self, attributes: &[(String, u64)]) -> Vec<u64> {
        let Some((first, rest)) = self.config.children_path.split_first() else {
            return Vec::new();
        };
        let Some(mut current) = attributes
            .iter()
            .find_map(|(name, value)| (name == first).then_some(*value))
        else {
            return Vec::new();
        };
        for hop in rest {
            match self.codec.attribute(current, hop) {
                Some(next) => current = next,
                None => return Vec::new(),
            }
        }
        self.codec.read_sequence(current).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::SyntheticHeap;
    use crate::process::layout::ObjectLayout;

    #[test]
    fn test_node_count_and_lookup() {
        let mut leaf = ObjectNode::new(3, "Label");
        leaf.properties
            .insert("_text", PrimitiveValue::Str("OK".into()));
        let mut middle = ObjectNode::new(2, "Container");
        middle.children.push(leaf);
        let mut root = ObjectNode::new(1, "UIRoot");
        root.children.push(middle);
        root.children.push(ObjectNode::truncated(1));

        assert_eq!(root.node_count(), 4);
        assert_eq!(root.depth(), 3);
        assert_eq!(root.find_by_type("Label").unwrap().address, 3);
        assert!(root.find_by_type("Button").is_none());
        assert_eq!(
            root.find_property("_text"),
            Some(&PrimitiveValue::Str("OK".into()))
        );

        let mut found = Vec::new();
        root.find_all_by_type("Container", &mut found);
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn test_serialization_skips_empty_fields() {
        let node = ObjectNode::truncated(16);
        assert_eq!(
            serde_json::to_string(&node).unwrap(),
            r#"{"address":16,"truncated":true}"#
        );
        let node = ObjectNode::new(16, "UIRoot");
        assert_eq!(
            serde_json::to_string(&node).unwrap(),
            r#"{"address":16,"type_name":"UIRoot"}"#
        );
    }

    #[test]
    fn test_properties_filtered_by_whitelist() {
        let mut heap = SyntheticHeap::new();
        let sprite_class = heap.class("Sprite");
        let other = heap.instance(sprite_class, &[]);
        let root_class = heap.class("UIRoot");
        let name = heap.str("root");
        let x = heap.int(10);
        let a = heap.int(1);
        let b = heap.int(2);
        let color = heap.tuple(&[a, b]);
        let numbers = heap.list(&[a, b]);
        let root = heap.node(
            root_class,
            &[
                ("_name", name),
                ("_displayX", x),
                ("_color", color),
                ("_numbers", numbers),
                ("_sr", other),
            ],
            &[],
        );
        let codec = ObjectCodec::new(heap.build(), ObjectLayout::default());
        let config = GraphConfig::default();

        let tree = ObjectGraphReader::new(&codec, &config).read_tree(root).unwrap();
        assert_eq!(tree.type_name.as_deref(), Some("UIRoot"));
        assert_eq!(tree.property("_name"), Some(&PrimitiveValue::Str("root".into())));
        assert_eq!(tree.property("_displayX"), Some(&PrimitiveValue::Int(10)));
        assert_eq!(
            tree.property("_color"),
            Some(&PrimitiveValue::List(vec![
                PrimitiveValue::Int(1),
                PrimitiveValue::Int(2)
            ]))
        );
        // not whitelisted
        assert!(tree.property("_numbers").is_none());
        assert!(tree.property("_sr").is_none());
        // children attribute is structure, not a property
        assert!(tree.property("children").is_none());
        assert!(tree.children.is_empty());
    }

    #[test]
    fn test_depth_limit_truncates() {
        let mut heap = SyntheticHeap::new();
        let class = heap.class("Container");
        let mut current = heap.node(class, &[], &[]);
        for _ in 0..4 {
            current = heap.node(class, &[], &[current]);
        }
        let codec = ObjectCodec::new(heap.build(), ObjectLayout::default());
        let config = GraphConfig {
            max_depth: 2,
            ..GraphConfig::default()
        };

        let tree = ObjectGraphReader::new(&codec, &config).read_tree(current).unwrap();
        assert_eq!(tree.depth(), 4);
        let leaf = &tree.children[0].children[0].children[0];
        assert!(leaf.truncated);
        assert!(leaf.type_name.is_none());
    }

    #[test]
    fn test_empty_children_path_disables_children() {
        let mut heap = SyntheticHeap::new();
        let class = heap.class("Container");
        let child = heap.node(class, &[], &[]);
        let root = heap.node(class, &[], &[child]);
        let codec = ObjectCodec::new(heap.build(), ObjectLayout::default());
        let config = GraphConfig {
            children_path: Vec::new(),
            ..GraphConfig::default()
        };

        let tree = ObjectGraphReader::new(&codec, &config).read_tree(root).unwrap();
        assert_eq!(tree.node_count(), 1);
    }

    #[test]
    fn test_unreadable_root_is_error() {
        let heap = SyntheticHeap::new();
        let missing = heap.unmapped_address();
        let codec = ObjectCodec::new(heap.build(), ObjectLayout::default());
        let config = GraphConfig::default();

        let err = ObjectGraphReader::new(&codec, &config)
            .read_tree(missing)
            .unwrap_err();
        assert!(matches!(err, Error::Unreadable { .. }));
    }

    #[test]
    fn test_expired_deadline_aborts() {
        let mut heap = SyntheticHeap::new();
        let class = heap.class("UIRoot");
        let root = heap.node(class, &[], &[]);
        let codec = ObjectCodec::new(heap.build(), ObjectLayout::default());
        let config = GraphConfig::default();

        let deadline = Deadline::new("tree read", std::time::Duration::ZERO);
        let err = ObjectGraphReader::new(&codec, &config)
            .read_tree_within(root, &deadline)
            .unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));
    }
}
