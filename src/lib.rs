//! Search and recommendation engine over a catalog of medicine records.
//!
//! Load a catalog with [`load_catalog`], build a [`MedicineIndex`] once, then run any
//! number of read-only queries against it. [`CatalogHandle`] shares the current index
//! between concurrent readers and swaps in rebuilt ones.

pub mod composition;
pub mod config;
pub mod data;
pub mod error;
pub mod format;
pub mod index;
pub mod loader;
pub mod query;
pub mod report;
pub mod similarity;

#[cfg(feature = "web")]
pub mod web;

pub use composition::{Ingredient, ingredient_names, parse_composition};
pub use config::SearchConfig;
pub use data::{Prescription, Record};
pub use error::{CatalogError, NoMatch};
pub use format::{FormattedMedicine, PriceTier};
pub use index::{CatalogHandle, MedicineIndex, RecordId};
pub use loader::{load_catalog, load_catalog_or_empty};
pub use query::{PageQuery, PriceComparison};
pub use report::CatalogStatistics;
pub use similarity::{jaccard, name_similarity};
