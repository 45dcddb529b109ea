//! Validate command - surface data quality issues without running the engine

use crate::cmd::read_input;
use crate::core::catalog::{split_names, PRODUCTS_PREFIX, TAX_CODES_PREFIX};
use crate::core::config::{PRECISION_KEY, TAXATION_TIME_ZONE_KEY, TAX_RESOLVER_KEY};
use crate::core::resolver;
use crate::core::{ItemType, ReconcileInput, TaxCodeCatalog, TimeZoneSpec};
use clap::Args;
use serde::Serialize;
use std::collections::HashSet;
use std::path::PathBuf;

#[derive(Args, Debug)]
pub struct ValidateCommand {
    /// JSON file containing the reconciliation snapshot (or "-" for stdin)
    #[arg(short, long)]
    input: PathBuf,

    /// Output as JSON instead of formatted text
    #[arg(long)]
    json: bool,
}

/// A validation issue for output
#[derive(Debug, Clone, Serialize)]
struct ValidationIssue {
    #[serde(rename = "type")]
    issue_type: String,
    subject: String,
    message: String,
}

/// JSON output structure
#[derive(Debug, Serialize)]
struct ValidationOutput {
    issue_count: usize,
    issues: Vec<ValidationIssue>,
}

impl ValidateCommand {
    pub fn exec(&self) -> anyhow::Result<()> {
        let input = read_input(&self.input)?;
        let issues = collect_issues(&input);

        if self.json {
            let output = ValidationOutput {
                issue_count: issues.len(),
                issues: issues.clone(),
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        } else {
            self.print_text(&issues);
        }

        // Exit with code 1 if issues found
        if !issues.is_empty() {
            std::process::exit(1);
        }
        Ok(())
    }

    fn print_text(&self, issues: &[ValidationIssue]) {
        println!();
        println!("VALIDATION RESULTS");
        println!();

        if issues.is_empty() {
            println!("\u{2713} No issues found.");
        } else {
            println!("\u{26A0} {} issue(s) found:", issues.len());
            println!();
            for (i, issue) in issues.iter().enumerate() {
                println!("  {}. [{}] {}", i + 1, issue.issue_type, issue.subject);
                println!("     {}", issue.message);
                println!();
            }
        }
    }
}

fn issue(issue_type: &str, subject: impl Into<String>, message: impl Into<String>) -> ValidationIssue {
    ValidationIssue {
        issue_type: issue_type.to_string(),
        subject: subject.into(),
        message: message.into(),
    }
}

fn collect_issues(input: &ReconcileInput) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    check_config(input, &mut issues);

    let catalog = TaxCodeCatalog::from_config(&input.config);
    check_catalog(&catalog, &mut issues);
    check_invoices(input, &catalog, &mut issues);
    check_assignments(input, &catalog, &mut issues);
    issues
}

fn check_config(input: &ReconcileInput, issues: &mut Vec<ValidationIssue>) {
    if let Some(id) = input.config.get(TAX_RESOLVER_KEY) {
        if !resolver::is_registered(id.trim()) {
            issues.push(issue(
                "config",
                TAX_RESOLVER_KEY,
                format!("unknown resolver {id:?}, the null resolver would be used"),
            ));
        }
    }
    if let Some(raw) = input.config.get(PRECISION_KEY) {
        if raw.trim().parse::<u32>().is_err() {
            issues.push(issue(
                "config",
                PRECISION_KEY,
                format!("not a valid precision: {raw:?}"),
            ));
        }
    }
    if let Some(raw) = input.config.get(TAXATION_TIME_ZONE_KEY) {
        if raw.parse::<TimeZoneSpec>().is_err() {
            issues.push(issue(
                "config",
                TAXATION_TIME_ZONE_KEY,
                format!("not an IANA zone or fixed offset: {raw:?}"),
            ));
        }
    }
    if let Some(zone) = &input.account.time_zone {
        if zone.parse::<TimeZoneSpec>().is_err() {
            issues.push(issue(
                "account",
                &input.account.id,
                format!("account time zone {zone:?} is invalid, UTC would be assumed"),
            ));
        }
    }
    for key in input.config.keys() {
        if let Some(rest) = key.strip_prefix(TAX_CODES_PREFIX) {
            let known_suffix = [".rate", ".taxItem.description", ".startingOn", ".stoppingOn"]
                .iter()
                .any(|suffix| {
                    rest.strip_suffix(suffix)
                        .is_some_and(|name| !name.is_empty())
                });
            if !known_suffix {
                issues.push(issue("config", key, "unrecognized tax code property"));
            }
        }
    }
}

fn check_catalog(catalog: &TaxCodeCatalog, issues: &mut Vec<ValidationIssue>) {
    for code in catalog.codes() {
        if let (Some(start), Some(stop)) = (code.starting_on, code.stopping_on) {
            if start > stop {
                issues.push(issue(
                    "catalog",
                    &code.name,
                    format!("startingOn {start} is after stoppingOn {stop}, the code never applies"),
                ));
            }
        }
    }
    for (product, names) in catalog.product_mappings() {
        for name in split_names(names) {
            if catalog.find_by_name(name).is_none() {
                issues.push(issue(
                    "catalog",
                    format!("{PRODUCTS_PREFIX}{product}"),
                    format!("references undefined tax code {name:?}"),
                ));
            }
        }
    }
}

fn check_invoices(
    input: &ReconcileInput,
    catalog: &TaxCodeCatalog,
    issues: &mut Vec<ValidationIssue>,
) {
    if !input
        .invoices
        .iter()
        .any(|inv| inv.id == input.new_invoice_id)
    {
        issues.push(issue(
            "invoices",
            &input.new_invoice_id,
            "new_invoice_id does not match any invoice in the snapshot",
        ));
    }

    let mut seen_ids = HashSet::new();
    for invoice in &input.invoices {
        for item in &invoice.items {
            if !seen_ids.insert(item.id.as_str()) {
                issues.push(issue("items", &item.id, "duplicate item id"));
            }
        }
    }

    let all_ids: HashSet<&str> = input
        .invoices
        .iter()
        .flat_map(|inv| inv.items.iter().map(|item| item.id.as_str()))
        .collect();

    for invoice in &input.invoices {
        let is_new = invoice.id == input.new_invoice_id;
        for item in &invoice.items {
            match item.item_type {
                ItemType::Tax | ItemType::Adjustment => match item.linked_item_id.as_deref() {
                    None => issues.push(issue(
                        "items",
                        &item.id,
                        format!("{:?} item has no linked item", item.item_type),
                    )),
                    Some(linked) if !all_ids.contains(linked) => issues.push(issue(
                        "items",
                        &item.id,
                        format!("linked item {linked:?} does not exist in the snapshot"),
                    )),
                    Some(_) => {}
                },
                ItemType::Taxable => {
                    // Only new-invoice items reach the resolver, and only
                    // when their product has candidate codes.
                    let has_candidates = item
                        .product
                        .as_deref()
                        .is_some_and(|p| !catalog.codes_for_product(p).is_empty());
                    if is_new && has_candidates && item.taxation_date().is_none() {
                        issues.push(issue(
                            "items",
                            &item.id,
                            "taxable item has neither end date nor start date, \
                             no tax code can be resolved for it",
                        ));
                    }
                }
                ItemType::Other => {}
            }
        }
    }
}

fn check_assignments(
    input: &ReconcileInput,
    catalog: &TaxCodeCatalog,
    issues: &mut Vec<ValidationIssue>,
) {
    let all_ids: HashSet<&str> = input
        .invoices
        .iter()
        .flat_map(|inv| inv.items.iter().map(|item| item.id.as_str()))
        .collect();

    let mut seen = HashSet::new();
    for record in &input.assignments {
        if !seen.insert(record.item_id.as_str()) {
            issues.push(issue(
                "assignments",
                &record.item_id,
                "duplicate assignment record, only the first is used",
            ));
        }
        if !all_ids.contains(record.item_id.as_str()) {
            issues.push(issue(
                "assignments",
                &record.item_id,
                "assignment references an item missing from the snapshot",
            ));
        }
        for name in split_names(&record.tax_codes) {
            if catalog.find_by_name(name).is_none() {
                issues.push(issue(
                    "assignments",
                    &record.item_id,
                    format!("assigned tax code {name:?} is not defined in the catalog"),
                ));
            }
        }
    }
}
