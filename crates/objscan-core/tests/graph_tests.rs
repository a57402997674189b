//! Graph reader tests against synthetic heaps.
//!
//! Each test lays out a small runtime-shaped object graph, then reads it back
//! through the public codec and graph reader.

use std::collections::HashSet;

use objscan_core::codec::ObjectCodec;
use objscan_core::config::GraphConfig;
use objscan_core::config::limits::{MAX_DICT_SIZE, MAX_LIST_SIZE};
use objscan_core::fixture::SyntheticHeap;
use objscan_core::graph::format::{OutputFormat, render};
use objscan_core::process::layout::ObjectLayout;
use objscan_core::{ObjectGraphReader, ObjectNode, PrimitiveValue};

fn read(heap: SyntheticHeap, root: u64) -> ObjectNode {
    let codec = ObjectCodec::new(heap.build(), ObjectLayout::default());
    let config = GraphConfig::default();
    ObjectGraphReader::new(&codec, &config)
        .read_tree(root)
        .unwrap()
}

fn collect_addresses(node: &ObjectNode, out: &mut Vec<u64>) {
    if !node.truncated {
        out.push(node.address);
    }
    for child in &node.children {
        collect_addresses(child, out);
    }
}

mod traversal_tests {
    use super::*;

    #[test]
    fn test_cycle_terminates_and_visits_once() {
        let mut heap = SyntheticHeap::new();
        let class = heap.class("Container");
        let (root, root_list) = heap.node_with_children_list(class, &[], &[0, 0]);
        let child = heap.node(class, &[], &[root]);
        heap.set_list_item(root_list, 0, child);
        heap.set_list_item(root_list, 1, root);

        let tree = read(heap, root);
        let mut addresses = Vec::new();
        collect_addresses(&tree, &mut addresses);
        let unique: HashSet<u64> = addresses.iter().copied().collect();
        assert_eq!(unique.len(), addresses.len());
        assert_eq!(addresses, vec![root, child]);

        // root -> [child -> [root (cut)], root (cut)]
        assert_eq!(tree.node_count(), 4);
        assert_eq!(tree.children[0].address, child);
        assert!(tree.children[0].children[0].truncated);
        assert!(tree.children[1].truncated);
        assert_eq!(tree.children[1].address, root);
    }

    #[test]
    fn test_cycle_not_through_root() {
        let mut heap = SyntheticHeap::new();
        let class = heap.class("Container");
        let (a, a_list) = heap.node_with_children_list(class, &[], &[0]);
        let b = heap.node(class, &[], &[a]);
        heap.set_list_item(a_list, 0, b);
        let root = heap.node(class, &[], &[a]);

        let tree = read(heap, root);
        let mut addresses = Vec::new();
        collect_addresses(&tree, &mut addresses);
        assert_eq!(addresses, vec![root, a, b]);
        assert_eq!(tree.depth(), 4);
    }

    #[test]
    fn test_unreadable_child_is_omitted() {
        let mut heap = SyntheticHeap::new();
        let root_class = heap.class("UIRoot");
        let label_class = heap.class("Label");
        let missing = heap.unmapped_address();
        let title = heap.str("Inventory");

        let mut children = Vec::new();
        for i in 0..5 {
            if i == 2 {
                children.push(missing);
            } else {
                let index = heap.int(i);
                children.push(heap.node(label_class, &[("_index", index)], &[]));
            }
        }
        let root = heap.node(root_class, &[("_name", title)], &children);

        let tree = read(heap, root);
        assert_eq!(tree.children.len(), 4);
        assert_eq!(
            tree.property("_name"),
            Some(&PrimitiveValue::Str("Inventory".into()))
        );
        let indices: Vec<i64> = tree
            .children
            .iter()
            .filter_map(|c| c.property("_index").and_then(PrimitiveValue::as_i64))
            .collect();
        assert_eq!(indices, vec![0, 1, 3, 4]);
    }

    #[test]
    fn test_children_keep_source_order() {
        let mut heap = SyntheticHeap::new();
        let root_class = heap.class("UIRoot");
        let column_class = heap.class("Column");

        // allocate in reverse so address order disagrees with list order
        let mut columns: Vec<u64> = (0..6)
            .rev()
            .map(|i| {
                let index = heap.int(i);
                heap.node(column_class, &[("_index", index)], &[])
            })
            .collect();
        columns.reverse();
        let root = heap.node(root_class, &[], &columns);

        let tree = read(heap, root);
        assert_eq!(tree.children.len(), 6);
        for (position, child) in tree.children.iter().enumerate() {
            assert_eq!(
                child.property("_index"),
                Some(&PrimitiveValue::Int(position as i64))
            );
            assert_eq!(child.address, columns[position]);
        }
    }

    #[test]
    fn test_null_child_slots_skipped() {
        let mut heap = SyntheticHeap::new();
        let class = heap.class("Container");
        let leaf = heap.node(class, &[], &[]);
        let root = heap.node(class, &[], &[0, leaf, 0]);

        let tree = read(heap, root);
        assert_eq!(tree.children.len(), 1);
        assert_eq!(tree.children[0].address, leaf);
    }
}

mod property_tests {
    use super::*;

    #[test]
    fn test_non_string_keys_filtered() {
        let mut heap = SyntheticHeap::new();
        let class = heap.class("Label");
        let mut entries = Vec::new();
        for i in 0..10 {
            let value = heap.int(i);
            let key = if i % 5 == 0 {
                heap.int(1000 + i)
            } else {
                heap.str(&format!("_field{}", i))
            };
            entries.push((key, value));
        }
        let dict = heap.dict(&entries);
        let label = heap.instance_with_dict(class, dict);

        let tree = read(heap, label);
        assert_eq!(tree.properties.len(), 8);
        assert_eq!(tree.property("_field1"), Some(&PrimitiveValue::Int(1)));
        assert!(tree.property("_field5").is_none());
    }

    #[test]
    fn test_mixed_primitives_decoded() {
        let mut heap = SyntheticHeap::new();
        let class = heap.class("Label");
        let text = heap.unicode("Überladen");
        let opacity = heap.float(0.75);
        let visible = heap.bool(true);
        let item_id = heap.long(1 << 40);
        let nothing = heap.none();
        let label = heap.instance(
            class,
            &[
                ("_text", text),
                ("_opacity", opacity),
                ("_display", visible),
                ("_itemID", item_id),
                ("_hint", nothing),
            ],
        );

        let tree = read(heap, label);
        assert_eq!(
            tree.property("_text"),
            Some(&PrimitiveValue::Str("Überladen".into()))
        );
        assert_eq!(tree.property("_opacity"), Some(&PrimitiveValue::Float(0.75)));
        assert_eq!(tree.property("_display"), Some(&PrimitiveValue::Bool(true)));
        assert_eq!(tree.property("_itemID"), Some(&PrimitiveValue::Int(1 << 40)));
        assert_eq!(tree.property("_hint"), Some(&PrimitiveValue::None));
    }

    #[test]
    fn test_properties_keep_dict_order() {
        let mut heap = SyntheticHeap::new();
        let class = heap.class("Label");
        let zeta = heap.int(1);
        let alpha = heap.int(2);
        let mid = heap.int(3);
        let label = heap.instance(class, &[("zeta", zeta), ("alpha", alpha), ("mid", mid)]);
        let codec = ObjectCodec::new(heap.build(), ObjectLayout::default());
        let config = GraphConfig::default();

        let dict_order: Vec<String> = codec
            .read_attributes(label)
            .unwrap()
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        assert_eq!(dict_order, vec!["zeta", "alpha", "mid"]);

        let tree = ObjectGraphReader::new(&codec, &config)
            .read_tree(label)
            .unwrap();
        assert_eq!(tree.properties.keys().collect::<Vec<_>>(), dict_order);

        let json = render(&tree, OutputFormat::Json, false).unwrap();
        let zeta_at = json.find("\"zeta\"").unwrap();
        let alpha_at = json.find("\"alpha\"").unwrap();
        let mid_at = json.find("\"mid\"").unwrap();
        assert!(zeta_at < alpha_at && alpha_at < mid_at);
    }

    #[test]
    fn test_oversized_list_is_dropped() {
        let mut heap = SyntheticHeap::new();
        let class = heap.class("Label");
        let a = heap.float(0.5);
        let color = heap.list(&[a, a, a, a]);
        let text = heap.str("ok");
        let label = heap.instance(class, &[("_color", color), ("_text", text)]);
        heap.set_i64(
            color + ObjectLayout::default().list_len,
            MAX_LIST_SIZE as i64 + 1,
        );

        let tree = read(heap, label);
        assert!(tree.property("_color").is_none());
        assert_eq!(tree.property("_text"), Some(&PrimitiveValue::Str("ok".into())));
    }

    #[test]
    fn test_oversized_dict_yields_no_properties() {
        let mut heap = SyntheticHeap::new();
        let class = heap.class("Label");
        let text = heap.str("ok");
        let dict = heap.dict(&[(text, text)]);
        let label = heap.instance_with_dict(class, dict);
        heap.set_i64(
            dict + ObjectLayout::default().dict_mask,
            (MAX_DICT_SIZE * 2) as i64 - 1,
        );

        let tree = read(heap, label);
        assert_eq!(tree.type_name.as_deref(), Some("Label"));
        assert!(tree.properties.is_empty());
    }
}

mod format_tests {
    use super::*;

    #[test]
    fn test_render_json_and_tree() {
        let mut heap = SyntheticHeap::new();
        let root_class = heap.class("UIRoot");
        let label_class = heap.class("Label");
        let text = heap.str("Undock");
        let label = heap.node(label_class, &[("_text", text)], &[]);
        let root = heap.node(root_class, &[], &[label]);
        let tree = read(heap, root);

        let json = render(&tree, OutputFormat::Json, false).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["type_name"], "UIRoot");
        assert_eq!(value["children"][0]["properties"]["_text"], "Undock");

        let text = render(&tree, OutputFormat::Tree, false).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert!(lines[0].starts_with("UIRoot 0x"));
        assert!(lines[1].starts_with("  Label 0x"));
        assert_eq!(lines[2], "    _text = \"Undock\"");
    }
}
