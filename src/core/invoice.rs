use chrono::NaiveDate;
use rust_decimal::Decimal;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Root of the per-run snapshot: everything the engine is allowed to see.
///
/// The host fetches this once per invoice finalization; the engine never
/// re-reads during a run.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ReconcileInput {
    /// Account owning all invoices in the snapshot
    pub account: Account,
    /// Id of the one invoice currently being finalized
    pub new_invoice_id: String,
    /// Every invoice of the account, historical ones included
    pub invoices: Vec<Invoice>,
    /// Flat tenant configuration (`taxResolver`, `taxCodes.<name>.rate`, ...)
    #[serde(default)]
    pub config: BTreeMap<String, String>,
    /// Previously persisted tax-code assignments
    #[serde(default)]
    pub assignments: Vec<AssignmentRecord>,
}

/// Account owning the invoices under reconciliation
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Account {
    pub id: String,
    /// IANA zone name or fixed offset (e.g. "Europe/Paris", "+02:00");
    /// unparseable values degrade to UTC
    #[serde(default)]
    pub time_zone: Option<String>,
}

/// An invoice with its line items
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Invoice {
    pub id: String,
    pub date: NaiveDate,
    pub items: Vec<InvoiceItem>,
}

/// Kind of invoice line item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum ItemType {
    /// Subject to tax (charge, recurring fee, ...)
    Taxable,
    /// Tax computed for a taxable item, linked to it
    Tax,
    /// Modifies the effective amount of the item it links to
    Adjustment,
    /// Anything the engine ignores
    Other,
}

/// Invoice line item as owned by the host, consumed read-only
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct InvoiceItem {
    pub id: String,
    pub item_type: ItemType,
    /// For Tax items: the taxable item taxed; for Adjustment items: the
    /// item (Taxable or Tax) being adjusted
    #[serde(default)]
    pub linked_item_id: Option<String>,
    /// Missing amounts count as zero in every summation
    #[serde(default)]
    #[schemars(with = "Option<f64>")]
    pub amount: Option<Decimal>,
    /// Plan/product reference used to look up candidate tax codes
    #[serde(default)]
    pub product: Option<String>,
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
}

/// Durable record linking an invoice item to the tax-code name(s) chosen
/// for it. Write-once: the choice of names is frozen, even if the catalog
/// entries behind those names are later edited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct AssignmentRecord {
    pub item_id: String,
    /// Comma-separated tax-code names, exactly the persisted wire form
    pub tax_codes: String,
}

/// A newly computed invoice item for the host to persist
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct NewItem {
    /// Invoice this item belongs on
    pub invoice_id: String,
    /// Tax or Adjustment, never any other kind
    pub item_type: ItemType,
    /// The taxable item taxed (Tax) or the tax item corrected (Adjustment)
    pub linked_item_id: String,
    #[schemars(with = "f64")]
    pub amount: Decimal,
    pub date: NaiveDate,
    pub description: String,
}

impl InvoiceItem {
    /// Date driving tax-code applicability: service end if present,
    /// else service start.
    pub fn taxation_date(&self) -> Option<NaiveDate> {
        self.end_date.or(self.start_date)
    }
}
