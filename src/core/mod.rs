pub mod adjuster;
pub mod assignment;
pub mod catalog;
pub mod config;
pub mod engine;
pub mod invoice;
pub mod resolver;

// Flat public surface for domain types and functions.
pub use adjuster::AmountAdjuster;
pub use assignment::{AssignmentStore, AssignmentStoreError, InMemoryAssignmentStore};
pub use catalog::{TaxCode, TaxCodeCatalog, DEFAULT_TAX_ITEM_DESCRIPTION};
pub use config::{TaxConfig, TimeZoneSpec};
pub use engine::{reconcile_snapshot, TaxComputationContext};
pub use invoice::{
    Account, AssignmentRecord, Invoice, InvoiceItem, ItemType, NewItem, ReconcileInput,
};
pub use resolver::{EndDateResolver, NullResolver, TaxCodeResolver};
