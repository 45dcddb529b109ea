use super::catalog::TaxCode;
use super::config::{TaxConfig, TimeZoneSpec};
use super::invoice::{Account, InvoiceItem};

/// Identifier of the resolver that never taxes anything
pub const NULL_RESOLVER_ID: &str = "null";
/// Identifier of the end-date-based resolver
pub const END_DATE_RESOLVER_ID: &str = "endDate";

/// Strategy picking at most one applicable tax code for an item.
///
/// Implementations must be deterministic for the same inputs and must not
/// mutate anything; one instance lives for exactly one computation run.
pub trait TaxCodeResolver {
    /// Registry identifier of this strategy
    fn id(&self) -> &'static str;

    /// Pick the applicable code among `candidates`, in supplier order.
    fn applicable_code<'a>(
        &self,
        candidates: &[&'a TaxCode],
        item: &InvoiceItem,
    ) -> Option<&'a TaxCode>;
}

/// Disables new taxation entirely; the safe fallback.
pub struct NullResolver;

impl TaxCodeResolver for NullResolver {
    fn id(&self) -> &'static str {
        NULL_RESOLVER_ID
    }

    fn applicable_code<'a>(
        &self,
        _candidates: &[&'a TaxCode],
        _item: &InvoiceItem,
    ) -> Option<&'a TaxCode> {
        None
    }
}

/// Picks the first candidate whose validity window contains the item's
/// taxation date (service end date, else start date).
pub struct EndDateResolver {
    account_zone: TimeZoneSpec,
    taxation_zone: Option<TimeZoneSpec>,
}

impl EndDateResolver {
    pub fn new(config: &TaxConfig, account: &Account) -> EndDateResolver {
        let account_zone = TimeZoneSpec::parse_or_utc(
            account.time_zone.as_deref(),
            &format!("account {}", account.id),
        );
        EndDateResolver {
            account_zone,
            taxation_zone: config.taxation_time_zone,
        }
    }
}

impl TaxCodeResolver for EndDateResolver {
    fn id(&self) -> &'static str {
        END_DATE_RESOLVER_ID
    }

    fn applicable_code<'a>(
        &self,
        candidates: &[&'a TaxCode],
        item: &InvoiceItem,
    ) -> Option<&'a TaxCode> {
        // Items without any date cannot be taxed; callers are expected to
        // keep such items away from the resolver.
        let Some(date) = item.taxation_date() else {
            log::error!(
                "item {} has neither end date nor start date, no tax code can apply",
                item.id
            );
            return None;
        };
        let date = match &self.taxation_zone {
            Some(zone) => zone.convert_date_from(date, &self.account_zone),
            None => date,
        };
        candidates
            .iter()
            .find(|code| code.is_applicable_on(date))
            .copied()
    }
}

/// Whether `id` names a registered resolver strategy.
pub fn is_registered(id: &str) -> bool {
    matches!(id, NULL_RESOLVER_ID | END_DATE_RESOLVER_ID)
}

/// Build the configured resolver for one computation run.
///
/// Construction never fails: an unknown identifier is logged and the null
/// resolver is used, so an anomaly here can never abort the run.
pub fn from_config(config: &TaxConfig, account: &Account) -> Box<dyn TaxCodeResolver> {
    match config.resolver.as_str() {
        NULL_RESOLVER_ID => Box::new(NullResolver),
        END_DATE_RESOLVER_ID => Box::new(EndDateResolver::new(config, account)),
        other => {
            log::error!(
                "cannot instantiate tax resolver {other:?} (not registered), \
                 falling back to the null resolver"
            );
            Box::new(NullResolver)
        }
    }
}
