use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::collections::BTreeMap;

use super::config::TAX_RESOLVER_KEY;
use super::resolver;

/// Key prefix of tax code definitions in the tenant configuration
pub const TAX_CODES_PREFIX: &str = "taxCodes.";
/// Key prefix of product-to-tax-code mappings
pub const PRODUCTS_PREFIX: &str = "products.";

/// Description used for emitted tax items when a code does not define one
pub const DEFAULT_TAX_ITEM_DESCRIPTION: &str = "tax";

/// A named, time-bounded rate definition.
///
/// Immutable once built from configuration; the whole catalog is recreated
/// wholesale whenever the configuration reloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaxCode {
    pub name: String,
    pub rate: Decimal,
    pub tax_item_description: String,
    pub starting_on: Option<NaiveDate>,
    pub stopping_on: Option<NaiveDate>,
}

impl TaxCode {
    /// Whether `date` falls inside the half-open validity window
    /// `[starting_on, stopping_on)`. An absent bound is unbounded.
    pub fn is_applicable_on(&self, date: NaiveDate) -> bool {
        self.starting_on.is_none_or(|start| start <= date)
            && self.stopping_on.is_none_or(|stop| date < stop)
    }
}

/// Catalog of tax codes and product mappings for one tenant.
#[derive(Debug, Clone, Default)]
pub struct TaxCodeCatalog {
    codes: BTreeMap<String, TaxCode>,
    /// Raw comma/whitespace-separated code name lists, keyed by product
    products: BTreeMap<String, String>,
}

/// Accumulated raw fields for one code name before defaults are applied
#[derive(Debug, Default)]
struct RawCode {
    rate: Option<String>,
    description: Option<String>,
    starting_on: Option<String>,
    stopping_on: Option<String>,
}

impl TaxCodeCatalog {
    /// Scan the flat configuration map and build one `TaxCode` per distinct
    /// name found under the `taxCodes.` prefix.
    ///
    /// Nothing here is fatal: invalid field values fall back to defaults,
    /// product mappings referencing undefined codes and unloadable resolver
    /// identifiers are logged, and the catalog still initializes.
    pub fn from_config(config: &BTreeMap<String, String>) -> TaxCodeCatalog {
        let mut raw: BTreeMap<String, RawCode> = BTreeMap::new();
        let mut products: BTreeMap<String, String> = BTreeMap::new();

        for (key, value) in config {
            if let Some(rest) = key.strip_prefix(TAX_CODES_PREFIX) {
                let (name, field) = match split_code_key(rest) {
                    Some(parts) => parts,
                    None => {
                        log::warn!("unrecognized tax code property: {key}");
                        continue;
                    }
                };
                let entry = raw.entry(name.to_string()).or_default();
                match field {
                    CodeField::Rate => entry.rate = Some(value.clone()),
                    CodeField::Description => entry.description = Some(value.clone()),
                    CodeField::StartingOn => entry.starting_on = Some(value.clone()),
                    CodeField::StoppingOn => entry.stopping_on = Some(value.clone()),
                }
            } else if let Some(product) = key.strip_prefix(PRODUCTS_PREFIX) {
                if product.is_empty() {
                    log::warn!("product mapping with empty product name: {key}");
                    continue;
                }
                products.insert(product.to_string(), value.clone());
            }
        }

        let codes: BTreeMap<String, TaxCode> = raw
            .into_iter()
            .map(|(name, fields)| {
                let code = build_code(name.clone(), fields);
                (name, code)
            })
            .collect();

        let catalog = TaxCodeCatalog { codes, products };
        catalog.check_consistency(config);
        catalog
    }

    /// Log-only consistency checks run once at construction.
    fn check_consistency(&self, config: &BTreeMap<String, String>) {
        for (product, names) in &self.products {
            for name in split_names(names) {
                if !self.codes.contains_key(name) {
                    log::error!(
                        "product {product:?} references undefined tax code {name:?}, \
                         it will be skipped"
                    );
                }
            }
        }
        if let Some(id) = config.get(TAX_RESOLVER_KEY) {
            if !resolver::is_registered(id.trim()) {
                log::error!(
                    "unknown tax resolver {id:?}, the null resolver will be used instead"
                );
            }
        }
    }

    pub fn find_by_name(&self, name: &str) -> Option<&TaxCode> {
        self.codes.get(name)
    }

    /// All defined codes, in name order.
    pub fn codes(&self) -> impl Iterator<Item = &TaxCode> {
        self.codes.values()
    }

    /// Product mappings as configured, in product-name order.
    pub fn product_mappings(&self) -> impl Iterator<Item = (&str, &str)> {
        self.products
            .iter()
            .map(|(product, names)| (product.as_str(), names.as_str()))
    }

    /// Candidate codes configured for a product, in the order they are
    /// listed in the mapping. Unknown names are logged and skipped.
    pub fn codes_for_product(&self, product: &str) -> Vec<&TaxCode> {
        match self.products.get(product) {
            Some(names) => self.find_by_names(names, &format!("product {product:?}")),
            None => Vec::new(),
        }
    }

    /// Resolve a comma/whitespace-separated list of code names, preserving
    /// listed order. Unknown names are logged against `error_context` and
    /// skipped; the remaining names are still considered.
    pub fn find_by_names(&self, names: &str, error_context: &str) -> Vec<&TaxCode> {
        split_names(names)
            .filter_map(|name| {
                let found = self.codes.get(name);
                if found.is_none() {
                    log::error!("unknown tax code {name:?} referenced by {error_context}");
                }
                found
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy)]
enum CodeField {
    Rate,
    Description,
    StartingOn,
    StoppingOn,
}

/// Split the remainder of a `taxCodes.` key into (code name, field).
fn split_code_key(rest: &str) -> Option<(&str, CodeField)> {
    // The description field itself contains a dot, so match known suffixes
    // rather than splitting on the last one.
    const FIELDS: &[(&str, CodeField)] = &[
        (".rate", CodeField::Rate),
        (".taxItem.description", CodeField::Description),
        (".startingOn", CodeField::StartingOn),
        (".stoppingOn", CodeField::StoppingOn),
    ];
    for (suffix, field) in FIELDS {
        if let Some(name) = rest.strip_suffix(suffix) {
            if name.is_empty() {
                return None;
            }
            return Some((name, *field));
        }
    }
    None
}

/// Split a comma/whitespace-separated name list into non-empty tokens.
pub fn split_names(names: &str) -> impl Iterator<Item = &str> {
    names
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|token| !token.is_empty())
}

fn build_code(name: String, fields: RawCode) -> TaxCode {
    let rate = match fields.rate {
        None => Decimal::ZERO,
        Some(raw) => match raw.trim().parse::<Decimal>() {
            Ok(rate) if rate >= Decimal::ZERO => rate,
            Ok(rate) => {
                log::warn!("negative rate {rate} for tax code {name:?}, using 0");
                Decimal::ZERO
            }
            Err(_) => {
                log::warn!("invalid rate {raw:?} for tax code {name:?}, using 0");
                Decimal::ZERO
            }
        },
    };

    let starting_on = parse_bound(fields.starting_on, &name, "startingOn");
    let stopping_on = parse_bound(fields.stopping_on, &name, "stoppingOn");
    if let (Some(start), Some(stop)) = (starting_on, stopping_on) {
        if start > stop {
            log::warn!(
                "tax code {name:?} has startingOn {start} after stoppingOn {stop}, \
                 its validity window is empty"
            );
        }
    }

    TaxCode {
        name,
        rate,
        tax_item_description: fields
            .description
            .unwrap_or_else(|| DEFAULT_TAX_ITEM_DESCRIPTION.to_string()),
        starting_on,
        stopping_on,
    }
}

fn parse_bound(raw: Option<String>, name: &str, field: &str) -> Option<NaiveDate> {
    let raw = raw?;
    match NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d") {
        Ok(date) => Some(date),
        Err(_) => {
            log::warn!("invalid {field} date {raw:?} for tax code {name:?}, ignoring");
            None
        }
    }
}
