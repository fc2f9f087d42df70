//! `dvm list-labels` and `dvm list-classes`
//!
//! Both print a table by default, or a JSON document with `--json`.

use clap::Parser;
use color_eyre::Result;
use comfy_table::{presets::UTF8_FULL, Table};
use itertools::Itertools;
use serde_json::{json, Value};

use crate::class::{ClassCatalog, DomainClass, VolumeLayout};
use crate::registry::Label;

/// List the labels domains can be assigned
#[derive(Debug, Parser)]
pub struct ListLabelsOpts {
    /// Output as JSON
    #[clap(long)]
    pub json: bool,
}

/// List the available domain classes
#[derive(Debug, Parser)]
pub struct ListClassesOpts {
    /// Output as JSON
    #[clap(long)]
    pub json: bool,
}

fn format_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KiB", "MiB", "GiB", "TiB"];
    let mut size = bytes;
    let mut unit = 0;
    while size >= 1024 && size % 1024 == 0 && unit + 1 < UNITS.len() {
        size /= 1024;
        unit += 1;
    }
    format!("{size} {}", UNITS[unit])
}

fn describe_volume(v: &VolumeLayout) -> String {
    let mut s = format!("{} ({}", v.name, format_size(v.size));
    if v.from_template {
        s.push_str(", from template");
    } else if !v.rw {
        s.push_str(", read-only");
    }
    s.push(')');
    s
}

fn labels_table(labels: &[Label]) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["INDEX", "NAME", "COLOR"]);
    for label in labels {
        table.add_row(vec![label.index.to_string(), label.name.clone(), label.color.clone()]);
    }
    table
}

fn labels_json(labels: &[Label]) -> Value {
    json!({ "labels": labels })
}

fn classes_table<'a>(classes: impl Iterator<Item = &'a DomainClass>) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["NAME", "TEMPLATE", "VOLUMES", "DESCRIPTION"]);
    for class in classes {
        table.add_row(vec![
            class.name.to_owned(),
            if class.is_template { "yes" } else { "no" }.to_owned(),
            class.volumes.iter().map(describe_volume).join("\n"),
            class.description.to_owned(),
        ]);
    }
    table
}

fn classes_json<'a>(classes: impl Iterator<Item = &'a DomainClass>) -> Value {
    let classes: Vec<Value> = classes
        .map(|c| {
            json!({
                "name": c.name,
                "description": c.description,
                "is_template": c.is_template,
                "properties": c.property_list().collect::<Vec<_>>(),
                "volumes": c.volumes,
            })
        })
        .collect();
    json!({ "classes": classes })
}

/// Execute the list-labels command.
pub fn run_labels(labels: &[Label], opts: ListLabelsOpts) -> Result<()> {
    if opts.json {
        println!("{}", serde_json::to_string_pretty(&labels_json(labels))?);
    } else if labels.is_empty() {
        println!("No labels defined");
    } else {
        println!("{}", labels_table(labels));
    }
    Ok(())
}

/// Execute the list-classes command.
pub fn run_classes(catalog: &ClassCatalog, opts: ListClassesOpts) -> Result<()> {
    if opts.json {
        println!("{}", serde_json::to_string_pretty(&classes_json(catalog.iter()))?);
    } else {
        println!("{}", classes_table(catalog.iter()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::PlatformState;
    use camino::Utf8Path;

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(0), "0 B");
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2 << 30), "2 GiB");
        assert_eq!(format_size(1536), "1536 B");
        assert_eq!(format_size(3 << 20), "3 MiB");
    }

    #[test]
    fn test_labels() {
        let state = PlatformState::initial(Utf8Path::new("/srv/dvm"));
        let rendered = labels_table(&state.labels).to_string();
        assert!(rendered.contains("INDEX"));
        assert!(rendered.contains("purple"));
        assert!(rendered.contains("0x75507b"));

        let json = labels_json(&state.labels);
        let labels = json["labels"].as_array().unwrap();
        assert_eq!(labels.len(), 8);
        assert_eq!(labels[0]["name"], "red");
        assert_eq!(labels[0]["index"], 1);
        assert_eq!(labels[7]["name"], "black");
    }

    #[test]
    fn test_classes() {
        let catalog = ClassCatalog::builtin();
        let rendered = classes_table(catalog.iter()).to_string();
        assert!(rendered.contains("root (10 GiB, from template)"));
        assert!(rendered.contains("private (2 GiB)"));
        assert!(rendered.contains("StandaloneVM"));

        let json = classes_json(catalog.iter());
        let classes = json["classes"].as_array().unwrap();
        let names: Vec<_> = classes.iter().map(|c| c["name"].as_str().unwrap()).collect();
        assert_eq!(names, ["AppVM", "StandaloneVM", "TemplateVM"]);
        let appvm = &classes[0];
        assert!(appvm["properties"]
            .as_array()
            .unwrap()
            .iter()
            .any(|p| p == "template"));
        assert_eq!(appvm["volumes"][0]["name"], "root");
        assert_eq!(appvm["volumes"][0]["from_template"], true);
        assert_eq!(classes[2]["is_template"], true);
    }
}
