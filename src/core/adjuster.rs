use rust_decimal::Decimal;
use std::collections::HashMap;

use super::invoice::{Invoice, InvoiceItem, ItemType};

/// Index of adjustment amounts grouped by the item they adjust.
///
/// Built once per run over the whole account-wide invoice set. Adjustments
/// are not themselves further adjusted: the chain stops at one level.
#[derive(Debug, Default)]
pub struct AmountAdjuster {
    totals: HashMap<String, Decimal>,
}

impl AmountAdjuster {
    /// One linear pass over every item of every invoice.
    pub fn new(invoices: &[Invoice]) -> AmountAdjuster {
        let mut totals: HashMap<String, Decimal> = HashMap::new();
        for invoice in invoices {
            for item in &invoice.items {
                if item.item_type != ItemType::Adjustment {
                    continue;
                }
                let Some(linked_id) = &item.linked_item_id else {
                    log::warn!("adjustment item {} has no linked item, ignoring", item.id);
                    continue;
                };
                *totals.entry(linked_id.clone()).or_insert(Decimal::ZERO) +=
                    item.amount.unwrap_or(Decimal::ZERO);
            }
        }
        AmountAdjuster { totals }
    }

    /// The item's amount plus the sum of all adjustments linked to it.
    /// Missing amounts count as zero.
    pub fn adjusted_amount(&self, item: &InvoiceItem) -> Decimal {
        item.amount.unwrap_or(Decimal::ZERO)
            + self.totals.get(&item.id).copied().unwrap_or(Decimal::ZERO)
    }
}
