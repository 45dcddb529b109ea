//! Compute command - run the reconciliation engine over a snapshot

use crate::cmd::read_input;
use crate::core::{reconcile_snapshot, AssignmentRecord, NewItem};
use clap::Args;
use serde::Serialize;
use std::io;
use std::path::PathBuf;
use tabled::{
    settings::{object::Rows, Alignment, Modify, Style},
    Table, Tabled,
};

#[derive(Args, Debug)]
pub struct ComputeCommand {
    /// JSON file containing the reconciliation snapshot (or "-" for stdin)
    #[arg(short, long)]
    input: PathBuf,

    /// Output computed items as CSV instead of a formatted table
    #[arg(long)]
    csv: bool,

    /// Output as JSON, including newly created assignment records
    #[arg(long)]
    json: bool,
}

/// Row for the computed-items table output
#[derive(Debug, Clone, Tabled, Serialize)]
struct ItemRow {
    #[tabled(rename = "Invoice")]
    invoice: String,

    #[tabled(rename = "Type")]
    item_type: String,

    #[tabled(rename = "Linked Item")]
    linked_item: String,

    #[tabled(rename = "Amount")]
    amount: String,

    #[tabled(rename = "Date")]
    date: String,

    #[tabled(rename = "Description")]
    description: String,
}

impl From<&NewItem> for ItemRow {
    fn from(item: &NewItem) -> Self {
        ItemRow {
            invoice: item.invoice_id.clone(),
            item_type: format!("{:?}", item.item_type),
            linked_item: item.linked_item_id.clone(),
            amount: item.amount.to_string(),
            date: item.date.format("%Y-%m-%d").to_string(),
            description: item.description.clone(),
        }
    }
}

/// JSON output structure
#[derive(Debug, Serialize)]
struct ComputeOutput {
    new_items: Vec<NewItem>,
    new_assignments: Vec<AssignmentRecord>,
}

impl ComputeCommand {
    pub fn exec(&self) -> anyhow::Result<()> {
        let input = read_input(&self.input)?;
        let (new_items, new_assignments) = reconcile_snapshot(&input);

        if self.json {
            let output = ComputeOutput {
                new_items,
                new_assignments,
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
            return Ok(());
        }

        let rows: Vec<ItemRow> = new_items.iter().map(ItemRow::from).collect();
        if self.csv {
            self.write_csv(&rows)
        } else {
            self.print_table(&rows, &new_assignments);
            Ok(())
        }
    }

    fn print_table(&self, rows: &[ItemRow], new_assignments: &[AssignmentRecord]) {
        if rows.is_empty() {
            println!("All invoices are consistent, nothing to emit");
        } else {
            let table = Table::new(rows)
                .with(Style::rounded())
                .with(Modify::new(Rows::new(1..)).with(Alignment::right()))
                .to_string();
            println!("{}", table);
        }

        if !new_assignments.is_empty() {
            println!();
            println!("New tax code assignments:");
            for record in new_assignments {
                println!("  {} -> {}", record.item_id, record.tax_codes);
            }
        }
    }

    fn write_csv(&self, rows: &[ItemRow]) -> anyhow::Result<()> {
        let mut wtr = csv::Writer::from_writer(io::stdout());
        for row in rows {
            wtr.serialize(row)?;
        }
        wtr.flush()?;
        Ok(())
    }
}
