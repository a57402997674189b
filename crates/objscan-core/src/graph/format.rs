//! Text renderings of a reconstructed tree.

use std::fmt::Write as _;

use owo_colors::OwoColorize;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::codec::PrimitiveValue;
use crate::error::Result;

use super::ObjectNode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Json,
    Tree,
}

/// Pretty-printed JSON.
pub fn to_json(node: &ObjectNode) -> Result<String> {
    Ok(serde_json::to_string_pretty(node)?)
}

/// Indented tree, one line per node followed by its properties.
pub fn format_tree(node: &ObjectNode, color: bool) -> String {
    let mut output = String::new();
    write_node(&mut output, node, 0, color);
    output
}

pub fn render(node: &ObjectNode, format: OutputFormat, color: bool) -> Result<String> {
    match format {
        OutputFormat::Json => to_json(node),
        OutputFormat::Tree => Ok(format_tree(node, color)),
    }
}

fn write_node(output: &mut String, node: &ObjectNode, depth: usize, color: bool) {
    let indent = "  ".repeat(depth);
    let address = format!("{:#x}", node.address);
    let address = if color {
        address.dimmed().to_string()
    } else {
        address
    };

    if node.truncated {
        let marker = if color {
            "…".yellow().to_string()
        } else {
            "…".to_string()
        };
        let _ = writeln!(output, "{}{} {}", indent, marker, address);
        return;
    }

    let name = node.type_name.as_deref().unwrap_or("?");
    let name = if color {
        name.bold().cyan().to_string()
    } else {
        name.to_string()
    };
    let _ = writeln!(output, "{}{} {}", indent, name, address);

    for (key, value) in &node.properties {
        let key = if color {
            key.green().to_string()
        } else {
            key.clone()
        };
        let _ = writeln!(output, "{}  {} = {}", indent, key, format_value(value));
    }
    for child in &node.children {
        write_node(output, child, depth + 1, color);
    }
}

fn format_value(value: &PrimitiveValue) -> String {
    match value {
        PrimitiveValue::None => "None".to_string(),
        PrimitiveValue::Bool(b) => b.to_string(),
        PrimitiveValue::Int(i) => i.to_string(),
        PrimitiveValue::Float(f) => f.to_string(),
        PrimitiveValue::Str(s) => format!("{:?}", s),
        PrimitiveValue::List(items) => {
            let items: Vec<String> = items.iter().map(format_value).collect();
            format!("[{}]", items.join(", "))
        }
        PrimitiveValue::Reference { type_name, address } => {
            format!("<{} at {:#x}>", type_name, address)
        }
    }
}
