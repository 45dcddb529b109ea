use chrono::NaiveDate;
use rust_decimal::{Decimal, RoundingStrategy};
use std::collections::HashMap;

use super::adjuster::AmountAdjuster;
use super::assignment::{AssignmentStore, InMemoryAssignmentStore};
use super::catalog::{TaxCode, TaxCodeCatalog, DEFAULT_TAX_ITEM_DESCRIPTION};
use super::config::TaxConfig;
use super::invoice::{
    Account, AssignmentRecord, Invoice, InvoiceItem, ItemType, NewItem, ReconcileInput,
};
use super::resolver::{self, TaxCodeResolver};

/// A Tax item together with the invoice that carries it.
#[derive(Debug, Clone, Copy)]
struct TaxItemRef<'a> {
    item: &'a InvoiceItem,
    invoice_id: &'a str,
    invoice_date: NaiveDate,
}

/// Per-run immutable aggregate: resolved config, account, the full invoice
/// set, the adjusted-amount index, the tax-item index, and the resolver.
///
/// Constructed once per engine invocation and discarded afterwards; nothing
/// in here is shared across runs.
pub struct TaxComputationContext<'a> {
    config: TaxConfig,
    catalog: &'a TaxCodeCatalog,
    account: &'a Account,
    new_invoice_id: &'a str,
    invoices: &'a [Invoice],
    adjuster: AmountAdjuster,
    tax_items: HashMap<&'a str, Vec<TaxItemRef<'a>>>,
    resolver: Box<dyn TaxCodeResolver>,
}

impl<'a> TaxComputationContext<'a> {
    pub fn new(input: &'a ReconcileInput, catalog: &'a TaxCodeCatalog) -> Self {
        let config = TaxConfig::from_map(&input.config);
        let resolver = resolver::from_config(&config, &input.account);
        TaxComputationContext {
            config,
            catalog,
            account: &input.account,
            new_invoice_id: &input.new_invoice_id,
            invoices: &input.invoices,
            adjuster: AmountAdjuster::new(&input.invoices),
            tax_items: index_tax_items(&input.invoices),
            resolver,
        }
    }

    /// Diff expected vs. actual tax over every invoice of the account and
    /// emit the minimal set of new Tax / Adjustment items.
    ///
    /// Historical invoices are only ever adjusted: a taxable item there
    /// with no linked Tax item is left untouched. Re-running with the
    /// previous output applied yields an empty list.
    pub fn reconcile(&self, store: &mut dyn AssignmentStore) -> Vec<NewItem> {
        log::debug!(
            "reconciling account {} with resolver {:?}, precision {}",
            self.account.id,
            self.resolver.id(),
            self.config.precision
        );
        // Product lookups are memoized for the duration of the run only.
        let mut product_cache: HashMap<&'a str, Vec<&'a TaxCode>> = HashMap::new();
        let mut new_items = Vec::new();

        for invoice in self.invoices {
            let is_new = invoice.id == self.new_invoice_id;
            for item in &invoice.items {
                if item.item_type != ItemType::Taxable {
                    continue;
                }
                let linked = self
                    .tax_items
                    .get(item.id.as_str())
                    .map_or(&[][..], Vec::as_slice);
                // Retroactively inventing tax on a closed invoice is out of
                // scope: untaxed historical items stay untouched.
                if !is_new && linked.is_empty() {
                    continue;
                }

                let code = self.resolve_code(item, invoice, is_new, store, &mut product_cache);
                let adjusted = self.adjuster.adjusted_amount(item);
                let expected = match code {
                    Some(code) => round_half_up(adjusted * code.rate, self.config.precision),
                    None => Decimal::ZERO,
                };
                let current: Decimal = linked
                    .iter()
                    .map(|t| self.adjuster.adjusted_amount(t.item))
                    .sum();
                let missing = expected - current;
                log::debug!(
                    "item {}: adjusted={adjusted}, expected={expected}, current={current}",
                    item.id
                );
                if missing.is_zero() {
                    continue;
                }

                let description = code.map_or_else(
                    || DEFAULT_TAX_ITEM_DESCRIPTION.to_string(),
                    |c| c.tax_item_description.clone(),
                );
                if linked.is_empty() {
                    // Only reachable on the new invoice.
                    new_items.push(NewItem {
                        invoice_id: invoice.id.clone(),
                        item_type: ItemType::Tax,
                        linked_item_id: item.id.clone(),
                        amount: missing,
                        date: invoice.date,
                        description,
                    });
                } else {
                    let target = largest_tax_item(linked, &self.adjuster);
                    new_items.push(NewItem {
                        invoice_id: target.invoice_id.to_string(),
                        item_type: ItemType::Adjustment,
                        linked_item_id: target.item.id.clone(),
                        amount: missing,
                        date: target.invoice_date,
                        description,
                    });
                }
            }
        }
        new_items
    }

    /// Resolve the tax code for one taxable item.
    ///
    /// An existing assignment always wins (the choice of code name is
    /// frozen). Otherwise, only items of the new invoice get a code
    /// resolved and a new assignment persisted; a persistence failure
    /// leaves the item unresolved for the rest of the run.
    fn resolve_code(
        &self,
        item: &'a InvoiceItem,
        invoice: &'a Invoice,
        is_new: bool,
        store: &mut dyn AssignmentStore,
        product_cache: &mut HashMap<&'a str, Vec<&'a TaxCode>>,
    ) -> Option<&'a TaxCode> {
        if let Some(record) = store.find(&item.id) {
            let codes = self
                .catalog
                .find_by_names(&record.tax_codes, &format!("assignment of item {}", item.id));
            return codes.first().copied();
        }
        if !is_new {
            return None;
        }
        let product = item.product.as_deref()?;
        let catalog = self.catalog;
        let candidates = product_cache
            .entry(product)
            .or_insert_with(|| catalog.codes_for_product(product));
        if candidates.is_empty() {
            return None;
        }
        let code = self.resolver.applicable_code(candidates, item)?;
        match store.save(AssignmentRecord::new(&item.id, &[code.name.as_str()])) {
            Ok(()) => Some(code),
            Err(err) => {
                log::error!(
                    "cannot save tax code {} for item {} of invoice {}: {err}",
                    code.name,
                    item.id,
                    invoice.id
                );
                None
            }
        }
    }
}

/// Convenience entry point over an in-memory snapshot: runs the engine and
/// returns the emitted items plus the assignment records created.
pub fn reconcile_snapshot(input: &ReconcileInput) -> (Vec<NewItem>, Vec<AssignmentRecord>) {
    let catalog = TaxCodeCatalog::from_config(&input.config);
    let mut store = InMemoryAssignmentStore::new(input.assignments.clone());
    let ctx = TaxComputationContext::new(input, &catalog);
    let new_items = ctx.reconcile(&mut store);
    (new_items, store.created().to_vec())
}

/// Group every Tax item across all invoices by the taxable item it taxes.
fn index_tax_items(invoices: &[Invoice]) -> HashMap<&str, Vec<TaxItemRef<'_>>> {
    let mut index: HashMap<&str, Vec<TaxItemRef<'_>>> = HashMap::new();
    for invoice in invoices {
        for item in &invoice.items {
            if item.item_type != ItemType::Tax {
                continue;
            }
            let Some(linked_id) = item.linked_item_id.as_deref() else {
                log::warn!("tax item {} has no linked item, ignoring", item.id);
                continue;
            };
            index.entry(linked_id).or_default().push(TaxItemRef {
                item,
                invoice_id: &invoice.id,
                invoice_date: invoice.date,
            });
        }
    }
    index
}

/// The largest linked Tax item by adjusted amount; ties are broken by item
/// id, the greatest id winning.
fn largest_tax_item<'a, 'b>(
    tax_items: &'b [TaxItemRef<'a>],
    adjuster: &AmountAdjuster,
) -> &'b TaxItemRef<'a> {
    tax_items
        .iter()
        .max_by(|a, b| {
            adjuster
                .adjusted_amount(a.item)
                .cmp(&adjuster.adjusted_amount(b.item))
                .then_with(|| a.item.id.cmp(&b.item.id))
        })
        .expect("callers only pass non-empty tax item lists")
}

/// Half-up rounding (midpoints away from zero) at `precision` decimals.
fn round_half_up(value: Decimal, precision: u32) -> Decimal {
    value.round_dp_with_strategy(precision, RoundingStrategy::MidpointAwayFromZero)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::assignment::AssignmentStoreError;
    use rust_decimal_macros::dec;
    use std::collections::BTreeMap;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn taxable(id: &str, amount: Decimal) -> InvoiceItem {
        InvoiceItem {
            id: id.to_string(),
            item_type: ItemType::Taxable,
            linked_item_id: None,
            amount: Some(amount),
            product: Some("standard-plan".to_string()),
            start_date: Some(date("2024-06-01")),
            end_date: Some(date("2024-06-15")),
        }
    }

    fn taxable_on(id: &str, amount: Decimal, end: &str) -> InvoiceItem {
        InvoiceItem {
            end_date: Some(date(end)),
            ..taxable(id, amount)
        }
    }

    fn tax(id: &str, linked: &str, amount: Decimal) -> InvoiceItem {
        InvoiceItem {
            id: id.to_string(),
            item_type: ItemType::Tax,
            linked_item_id: Some(linked.to_string()),
            amount: Some(amount),
            product: None,
            start_date: None,
            end_date: None,
        }
    }

    fn adjustment(id: &str, linked: &str, amount: Decimal) -> InvoiceItem {
        InvoiceItem {
            id: id.to_string(),
            item_type: ItemType::Adjustment,
            linked_item_id: Some(linked.to_string()),
            amount: Some(amount),
            product: None,
            start_date: None,
            end_date: None,
        }
    }

    fn invoice(id: &str, on: &str, items: Vec<InvoiceItem>) -> Invoice {
        Invoice {
            id: id.to_string(),
            date: date(on),
            items,
        }
    }

    fn vat_config() -> BTreeMap<String, String> {
        [
            ("taxResolver", "endDate"),
            ("taxCodes.VAT.rate", "0.20"),
            ("taxCodes.VAT.taxItem.description", "VAT 20%"),
            ("products.standard-plan", "VAT"),
        ]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    fn input(
        invoices: Vec<Invoice>,
        new_invoice_id: &str,
        config: BTreeMap<String, String>,
        assignments: Vec<AssignmentRecord>,
    ) -> ReconcileInput {
        ReconcileInput {
            account: Account {
                id: "acc-1".to_string(),
                time_zone: None,
            },
            new_invoice_id: new_invoice_id.to_string(),
            invoices,
            config,
            assignments,
        }
    }

    /// Merge a run's output back into the snapshot, the way the host would
    /// persist it before the next finalization.
    fn apply_output(
        input: &mut ReconcileInput,
        new_items: &[NewItem],
        created: &[AssignmentRecord],
    ) {
        for (n, emitted) in new_items.iter().enumerate() {
            let invoice = input
                .invoices
                .iter_mut()
                .find(|inv| inv.id == emitted.invoice_id)
                .unwrap();
            invoice.items.push(InvoiceItem {
                id: format!("applied-{n}"),
                item_type: emitted.item_type,
                linked_item_id: Some(emitted.linked_item_id.clone()),
                amount: Some(emitted.amount),
                product: None,
                start_date: None,
                end_date: None,
            });
        }
        input.assignments.extend_from_slice(created);
    }

    #[test]
    fn new_taxable_item_gets_one_tax_item() {
        let input = input(
            vec![invoice("inv-1", "2024-07-01", vec![taxable("i1", dec!(10.00))])],
            "inv-1",
            vat_config(),
            Vec::new(),
        );
        let (items, created) = reconcile_snapshot(&input);

        assert_eq!(
            items,
            vec![NewItem {
                invoice_id: "inv-1".to_string(),
                item_type: ItemType::Tax,
                linked_item_id: "i1".to_string(),
                amount: dec!(2.00),
                date: date("2024-07-01"),
                description: "VAT 20%".to_string(),
            }]
        );
        assert_eq!(created, vec![AssignmentRecord::new("i1", &["VAT"])]);
    }

    #[test]
    fn historical_untaxed_item_is_left_untouched() {
        // Even with an assignment on record: no linked tax item, no change.
        let input = input(
            vec![
                invoice("inv-1", "2024-01-01", vec![taxable("i1", dec!(10.00))]),
                invoice("inv-2", "2024-07-01", vec![]),
            ],
            "inv-2",
            vat_config(),
            vec![AssignmentRecord::new("i1", &["VAT"])],
        );
        let (items, created) = reconcile_snapshot(&input);
        assert!(items.is_empty());
        assert!(created.is_empty());
    }

    #[test]
    fn matching_tax_emits_nothing() {
        let input = input(
            vec![invoice(
                "inv-1",
                "2024-07-01",
                vec![taxable("i1", dec!(10.00)), tax("t1", "i1", dec!(2.00))],
            )],
            "inv-1",
            vat_config(),
            vec![AssignmentRecord::new("i1", &["VAT"])],
        );
        let (items, _) = reconcile_snapshot(&input);
        assert!(items.is_empty());
    }

    #[test]
    fn taxable_item_adjusted_after_taxation_gets_negative_adjustment() {
        // The taxable item sits on a historical invoice, already taxed 2.00;
        // a -1.00 adjustment on the new invoice brings it down to 9.00.
        let input = input(
            vec![
                invoice(
                    "inv-1",
                    "2024-01-01",
                    vec![taxable("i1", dec!(10.00)), tax("t1", "i1", dec!(2.00))],
                ),
                invoice(
                    "inv-2",
                    "2024-07-01",
                    vec![adjustment("a1", "i1", dec!(-1.00))],
                ),
            ],
            "inv-2",
            vat_config(),
            vec![AssignmentRecord::new("i1", &["VAT"])],
        );
        let (items, _) = reconcile_snapshot(&input);

        assert_eq!(
            items,
            vec![NewItem {
                invoice_id: "inv-1".to_string(),
                item_type: ItemType::Adjustment,
                linked_item_id: "t1".to_string(),
                amount: dec!(-0.20),
                date: date("2024-01-01"),
                description: "VAT 20%".to_string(),
            }]
        );
    }

    #[test]
    fn taxable_item_adjusted_upwards_gets_positive_adjustment() {
        // 10.00 taxed 2.00, later adjusted +6.00: expected 16.00 * 0.20 = 3.20.
        let input = input(
            vec![
                invoice(
                    "inv-1",
                    "2024-01-01",
                    vec![taxable("i1", dec!(10.00)), tax("t1", "i1", dec!(2.00))],
                ),
                invoice(
                    "inv-2",
                    "2024-07-01",
                    vec![adjustment("a1", "i1", dec!(6.00))],
                ),
            ],
            "inv-2",
            vat_config(),
            vec![AssignmentRecord::new("i1", &["VAT"])],
        );
        let (items, _) = reconcile_snapshot(&input);

        assert_eq!(items.len(), 1);
        assert_eq!(items[0].amount, dec!(1.20));
        assert_eq!(items[0].linked_item_id, "t1");
        assert_eq!(items[0].date, date("2024-01-01"));
    }

    #[test]
    fn undertaxed_item_on_new_invoice_gets_adjustment_not_second_tax_item() {
        let input = input(
            vec![invoice(
                "inv-1",
                "2024-07-01",
                vec![taxable("i1", dec!(10.00)), tax("t1", "i1", dec!(1.50))],
            )],
            "inv-1",
            vat_config(),
            Vec::new(),
        );
        let (items, created) = reconcile_snapshot(&input);

        assert_eq!(items.len(), 1);
        assert_eq!(items[0].item_type, ItemType::Adjustment);
        assert_eq!(items[0].linked_item_id, "t1");
        assert_eq!(items[0].amount, dec!(0.50));
        assert_eq!(items[0].date, date("2024-07-01"));
        // The code choice is still recorded for the item.
        assert_eq!(created, vec![AssignmentRecord::new("i1", &["VAT"])]);
    }

    #[test]
    fn overtaxed_item_on_new_invoice_gets_negative_adjustment() {
        let input = input(
            vec![invoice(
                "inv-1",
                "2024-07-01",
                vec![taxable("i1", dec!(10.00)), tax("t1", "i1", dec!(2.75))],
            )],
            "inv-1",
            vat_config(),
            vec![AssignmentRecord::new("i1", &["VAT"])],
        );
        let (items, _) = reconcile_snapshot(&input);

        assert_eq!(items.len(), 1);
        assert_eq!(items[0].amount, dec!(-0.75));
        assert_eq!(items[0].linked_item_id, "t1");
    }

    #[test]
    fn adjustment_lands_on_the_largest_tax_item() {
        let input = input(
            vec![invoice(
                "inv-1",
                "2024-07-01",
                vec![
                    taxable("i1", dec!(10.00)),
                    tax("t1", "i1", dec!(1.50)),
                    tax("t2", "i1", dec!(0.60)),
                ],
            )],
            "inv-1",
            vat_config(),
            vec![AssignmentRecord::new("i1", &["VAT"])],
        );
        let (items, _) = reconcile_snapshot(&input);

        // current 2.10, expected 2.00
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].linked_item_id, "t1");
        assert_eq!(items[0].amount, dec!(-0.10));
    }

    #[test]
    fn largest_tax_item_is_judged_by_adjusted_amount() {
        // t2 starts smaller but an adjustment lifts it above t1.
        let input = input(
            vec![invoice(
                "inv-1",
                "2024-07-01",
                vec![
                    taxable("i1", dec!(10.00)),
                    tax("t1", "i1", dec!(1.50)),
                    tax("t2", "i1", dec!(0.60)),
                    adjustment("a1", "t2", dec!(1.00)),
                ],
            )],
            "inv-1",
            vat_config(),
            vec![AssignmentRecord::new("i1", &["VAT"])],
        );
        let (items, _) = reconcile_snapshot(&input);

        // current 1.50 + 1.60 = 3.10, expected 2.00
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].linked_item_id, "t2");
        assert_eq!(items[0].amount, dec!(-1.10));
    }

    #[test]
    fn tied_tax_items_break_on_item_id() {
        // Both linked tax items have adjusted amount 1.00; the greatest
        // item id wins the tie.
        let input = input(
            vec![invoice(
                "inv-1",
                "2024-07-01",
                vec![
                    taxable("i1", dec!(12.00)),
                    tax("t-a", "i1", dec!(1.00)),
                    tax("t-b", "i1", dec!(1.00)),
                ],
            )],
            "inv-1",
            vat_config(),
            vec![AssignmentRecord::new("i1", &["VAT"])],
        );
        let (items, _) = reconcile_snapshot(&input);

        // current 2.00, expected 2.40
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].amount, dec!(0.40));
        assert_eq!(items[0].linked_item_id, "t-b");
    }

    #[test]
    fn rounding_is_half_up_at_configured_precision() {
        let mut config = vat_config();
        config.insert("taxCodes.VAT.rate".to_string(), "0.05".to_string());
        let input = input(
            vec![invoice("inv-1", "2024-07-01", vec![taxable("i1", dec!(2.50))])],
            "inv-1",
            config,
            Vec::new(),
        );
        let (items, _) = reconcile_snapshot(&input);

        // 2.50 * 0.05 = 0.125, half-up to 0.13
        assert_eq!(items[0].amount, dec!(0.13));
    }

    #[test]
    fn precision_is_configurable() {
        let mut config = vat_config();
        config.insert("taxCodes.VAT.rate".to_string(), "0.196".to_string());
        config.insert("taxItem.amount.precision".to_string(), "0".to_string());
        let input = input(
            vec![invoice("inv-1", "2024-07-01", vec![taxable("i1", dec!(10.00))])],
            "inv-1",
            config,
            Vec::new(),
        );
        let (items, _) = reconcile_snapshot(&input);

        // 10.00 * 0.196 = 1.96, rounded to integer precision
        assert_eq!(items[0].amount, dec!(2));
    }

    #[test]
    fn negative_taxable_amount_yields_negative_tax_item() {
        let mut config = vat_config();
        config.insert("taxCodes.VAT.rate".to_string(), "0.05".to_string());
        let input = input(
            vec![invoice("inv-1", "2024-07-01", vec![taxable("i1", dec!(-2.50))])],
            "inv-1",
            config,
            Vec::new(),
        );
        let (items, _) = reconcile_snapshot(&input);

        // -0.125 rounds away from zero to -0.13
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].item_type, ItemType::Tax);
        assert_eq!(items[0].amount, dec!(-0.13));
    }

    #[test]
    fn stored_assignment_is_frozen_against_catalog_remapping() {
        let mut config = vat_config();
        config.insert("taxCodes.VAT_OLD.rate".to_string(), "0.10".to_string());
        // The product now maps to VAT, but the item was assigned VAT_OLD.
        let input = input(
            vec![invoice("inv-1", "2024-07-01", vec![taxable("i1", dec!(10.00))])],
            "inv-1",
            config,
            vec![AssignmentRecord::new("i1", &["VAT_OLD"])],
        );
        let (items, created) = reconcile_snapshot(&input);

        assert_eq!(items.len(), 1);
        assert_eq!(items[0].amount, dec!(1.00));
        assert!(created.is_empty());
    }

    #[test]
    fn assignment_naming_an_undefined_code_counts_as_no_code() {
        let input = input(
            vec![invoice(
                "inv-1",
                "2024-07-01",
                vec![taxable("i1", dec!(10.00)), tax("t1", "i1", dec!(2.00))],
            )],
            "inv-1",
            vat_config(),
            vec![AssignmentRecord::new("i1", &["GHOST"])],
        );
        let (items, _) = reconcile_snapshot(&input);

        // expected tax is zero, so the existing tax is adjusted away
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].amount, dec!(-2.00));
        assert_eq!(items[0].linked_item_id, "t1");
    }

    #[test]
    fn assignment_with_several_names_uses_the_first_defined_one() {
        let input = input(
            vec![invoice("inv-1", "2024-07-01", vec![taxable("i1", dec!(10.00))])],
            "inv-1",
            vat_config(),
            vec![AssignmentRecord::new("i1", &["GHOST", "VAT"])],
        );
        let (items, _) = reconcile_snapshot(&input);

        assert_eq!(items.len(), 1);
        assert_eq!(items[0].amount, dec!(2.00));
    }

    #[test]
    fn historical_tax_without_assignment_is_reconciled_to_zero() {
        let input = input(
            vec![
                invoice(
                    "inv-1",
                    "2024-01-01",
                    vec![taxable("i1", dec!(10.00)), tax("t1", "i1", dec!(2.00))],
                ),
                invoice("inv-2", "2024-07-01", vec![]),
            ],
            "inv-2",
            vat_config(),
            Vec::new(),
        );
        let (items, created) = reconcile_snapshot(&input);

        // No decision memory for i1 and it is not on the new invoice, so no
        // code applies and its recorded tax no longer has a basis.
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].amount, dec!(-2.00));
        assert_eq!(items[0].invoice_id, "inv-1");
        assert!(created.is_empty());
    }

    #[test]
    fn default_resolver_is_null_and_taxes_nothing() {
        let mut config = vat_config();
        config.remove("taxResolver");
        let input = input(
            vec![invoice("inv-1", "2024-07-01", vec![taxable("i1", dec!(10.00))])],
            "inv-1",
            config,
            Vec::new(),
        );
        let (items, created) = reconcile_snapshot(&input);
        assert!(items.is_empty());
        assert!(created.is_empty());
    }

    #[test]
    fn unmapped_product_is_skipped() {
        let input = input(
            vec![invoice(
                "inv-1",
                "2024-07-01",
                vec![InvoiceItem {
                    product: Some("mystery-plan".to_string()),
                    ..taxable("i1", dec!(10.00))
                }],
            )],
            "inv-1",
            vat_config(),
            Vec::new(),
        );
        let (items, created) = reconcile_snapshot(&input);
        assert!(items.is_empty());
        assert!(created.is_empty());
    }

    #[test]
    fn item_without_product_reference_is_skipped() {
        let input = input(
            vec![invoice(
                "inv-1",
                "2024-07-01",
                vec![InvoiceItem {
                    product: None,
                    ..taxable("i1", dec!(10.00))
                }],
            )],
            "inv-1",
            vat_config(),
            Vec::new(),
        );
        let (items, _) = reconcile_snapshot(&input);
        assert!(items.is_empty());
    }

    #[test]
    fn time_bounded_codes_are_picked_by_taxation_date() {
        let config: BTreeMap<String, String> = [
            ("taxResolver", "endDate"),
            ("taxCodes.VAT_OLD.rate", "0.196"),
            ("taxCodes.VAT_OLD.stoppingOn", "2020-01-01"),
            ("taxCodes.VAT_NEW.rate", "0.20"),
            ("taxCodes.VAT_NEW.startingOn", "2020-01-01"),
            ("products.standard-plan", "VAT_OLD, VAT_NEW"),
        ]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let input = input(
            vec![invoice(
                "inv-1",
                "2024-07-01",
                vec![
                    taxable_on("i1", dec!(10.00), "2019-06-15"),
                    taxable_on("i2", dec!(10.00), "2024-06-15"),
                ],
            )],
            "inv-1",
            config,
            Vec::new(),
        );
        let (items, created) = reconcile_snapshot(&input);

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].amount, dec!(1.96));
        assert_eq!(items[1].amount, dec!(2.00));
        assert_eq!(
            created,
            vec![
                AssignmentRecord::new("i1", &["VAT_OLD"]),
                AssignmentRecord::new("i2", &["VAT_NEW"]),
            ]
        );
    }

    #[test]
    fn persistence_failure_leaves_the_item_untaxed() {
        struct FailingStore;
        impl AssignmentStore for FailingStore {
            fn find(&self, _item_id: &str) -> Option<&AssignmentRecord> {
                None
            }
            fn save(&mut self, _record: AssignmentRecord) -> Result<(), AssignmentStoreError> {
                Err(AssignmentStoreError::WriteFailed("store offline".to_string()))
            }
        }

        let input = input(
            vec![invoice("inv-1", "2024-07-01", vec![taxable("i1", dec!(10.00))])],
            "inv-1",
            vat_config(),
            Vec::new(),
        );
        let catalog = TaxCodeCatalog::from_config(&input.config);
        let ctx = TaxComputationContext::new(&input, &catalog);
        let items = ctx.reconcile(&mut FailingStore);

        assert!(items.is_empty());
    }

    #[test]
    fn output_follows_invoice_and_item_order() {
        let input = input(
            vec![
                invoice(
                    "inv-1",
                    "2024-01-01",
                    vec![taxable("h1", dec!(10.00)), tax("t1", "h1", dec!(1.00))],
                ),
                invoice(
                    "inv-2",
                    "2024-07-01",
                    vec![taxable("n1", dec!(10.00)), taxable("n2", dec!(5.00))],
                ),
            ],
            "inv-2",
            vat_config(),
            vec![AssignmentRecord::new("h1", &["VAT"])],
        );
        let (items, _) = reconcile_snapshot(&input);

        let linked: Vec<&str> = items.iter().map(|i| i.linked_item_id.as_str()).collect();
        assert_eq!(linked, vec!["t1", "n1", "n2"]);
    }

    #[test]
    fn rerunning_after_applying_the_output_emits_nothing() {
        let mut input = input(
            vec![
                invoice(
                    "inv-1",
                    "2024-01-01",
                    vec![taxable("h1", dec!(10.00)), tax("t1", "h1", dec!(2.00))],
                ),
                invoice(
                    "inv-2",
                    "2024-07-01",
                    vec![
                        taxable("n1", dec!(25.00)),
                        adjustment("a1", "h1", dec!(-4.00)),
                    ],
                ),
            ],
            "inv-2",
            vat_config(),
            vec![AssignmentRecord::new("h1", &["VAT"])],
        );

        let (first, created) = reconcile_snapshot(&input);
        // one adjustment for h1 (now 6.00 * 0.20 = 1.20) and one tax item for n1
        assert_eq!(first.len(), 2);
        apply_output(&mut input, &first, &created);

        let (second, second_created) = reconcile_snapshot(&input);
        assert!(second.is_empty(), "second run should be empty: {second:?}");
        assert!(second_created.is_empty());
    }
}

