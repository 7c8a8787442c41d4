use std::path::Path;

use anyhow::{Context, Result};
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use autojournal_core::food_db::parse_food_db_csv;
use autojournal_core::models::FoodItem;
use autojournal_core::service::AutojournalService;

use super::helpers::{format_amount, parse_nutrients, print_json, truncate};

pub(crate) fn cmd_food_add(
    svc: &AutojournalService,
    identifier: &str,
    name: &str,
    unit: &str,
    nutrients: &[String],
    json: bool,
) -> Result<()> {
    let item = FoodItem {
        identifier: identifier.trim().to_string(),
        display_name: name.trim().to_string(),
        unit: unit.trim().to_string(),
        nutrients: parse_nutrients(nutrients)?,
    };
    svc.add_food_item(&item)?;

    if json {
        print_json(&item)
    } else {
        println!("Saved food: {} ({})", item.display_name, item.identifier);
        Ok(())
    }
}

pub(crate) fn cmd_food_list(svc: &AutojournalService, json: bool) -> Result<()> {
    let items = svc.list_food_items()?;

    if json {
        return print_json(&items);
    }
    if items.is_empty() {
        eprintln!("The food database is empty");
        return Ok(());
    }
    print_food_table(&items);
    Ok(())
}

pub(crate) fn cmd_food_import(svc: &AutojournalService, path: &Path, json: bool) -> Result<()> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open file: {}", path.display()))?;
    let items = parse_food_db_csv(file)?;

    if items.is_empty() {
        if json {
            println!("{}", serde_json::json!({ "error": "No rows found in CSV file" }));
        } else {
            eprintln!("No rows found in CSV file.");
        }
        return Ok(());
    }

    let imported = svc.import_food_items(&items)?;
    if json {
        println!("{}", serde_json::json!({ "imported": imported }));
    } else {
        println!("Imported {imported} foods.");
    }
    Ok(())
}

fn print_food_table(items: &[FoodItem]) {
    #[derive(Tabled)]
    struct FoodRow {
        #[tabled(rename = "ID")]
        identifier: String,
        #[tabled(rename = "Name")]
        name: String,
        #[tabled(rename = "Per")]
        unit: String,
        #[tabled(rename = "Nutrients")]
        nutrients: String,
    }

    let rows: Vec<FoodRow> = items
        .iter()
        .map(|item| FoodRow {
            identifier: truncate(&item.identifier, 20),
            name: truncate(&item.display_name, 35),
            unit: item.unit.clone(),
            nutrients: item
                .nutrients
                .iter()
                .map(|(k, v)| format!("{k} {}", format_amount(*v)))
                .collect::<Vec<_>>()
                .join(", "),
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::single(2)).with(Alignment::center()))
        .to_string();
    println!("{table}");
}
