use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Failure to read a catalog file.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to read catalog {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse catalog {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("catalog {path} must be a JSON array of records")]
    NotAnArray { path: PathBuf },
}

/// A query that produced no result.
///
/// These are ordinary outcomes, not faults: the message is meant to be shown to the
/// caller as-is.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum NoMatch {
    #[error("Medicine named '{name}' not found.")]
    MedicineNotFound { name: String },
    #[error("Medicine '{name}' not found.")]
    ReferenceNotFound { name: String },
    #[error("No medicines found containing '{query}'.")]
    NoTextMatches { query: String },
    #[error("Please provide at least 3 characters for fuzzy search.")]
    QueryTooShort,
    #[error("No medicines found with names similar to '{query}'.")]
    NoSimilarNames { query: String },
    #[error("No medicines found containing ingredient '{ingredient}'.")]
    NoIngredientMatches { ingredient: String },
    #[error("No medicines found in price range ₹{min:.2} - ₹{max:.2}.")]
    NoPriceMatches { min: f64, max: f64 },
    #[error("No medicines found from manufacturer '{manufacturer}'.")]
    NoManufacturerMatches { manufacturer: String },
    #[error("No {} medicines found.", prescription_kind(.required))]
    NoPrescriptionMatches { required: bool },
    #[error("Cannot {action} - no composition data for '{name}'.")]
    MissingComposition { action: &'static str, name: String },
    #[error("Cannot {action} - unable to parse ingredients for '{name}'.")]
    UnparseableIngredients { action: &'static str, name: String },
    #[error("Cannot suggest alternatives - no price data for '{name}'.")]
    MissingPrice { name: String },
    #[error("Cannot suggest alternatives - invalid price data for '{name}'.")]
    InvalidPrice { name: String },
    #[error("Please provide a composition string to analyze.")]
    EmptyComposition,
    #[error("No medicines found with the exact composition: '{composition}'.")]
    NoExactComposition { composition: String },
    #[error("No medicines found containing: '{composition}'.")]
    NoPartialComposition { composition: String },
    #[error("No medicine names start with '{prefix}'.")]
    NoPrefixMatches { prefix: String },
}

impl NoMatch {
    /// True when the request itself was unusable rather than merely unmatched.
    pub fn is_invalid_input(&self) -> bool {
        matches!(self, NoMatch::QueryTooShort | NoMatch::EmptyComposition)
    }
}

fn prescription_kind(required: &bool) -> &'static str {
    if *required {
        "prescription"
    } else {
        "non-prescription"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_render_for_callers() {
        assert_eq!(
            NoMatch::NoPriceMatches { min: 0.0, max: 25.0 }.to_string(),
            "No medicines found in price range ₹0.00 - ₹25.00."
        );
        assert_eq!(
            NoMatch::NoPrescriptionMatches { required: false }.to_string(),
            "No non-prescription medicines found."
        );
        assert_eq!(
            NoMatch::MissingComposition {
                action: "find similar medicines",
                name: "X".into()
            }
            .to_string(),
            "Cannot find similar medicines - no composition data for 'X'."
        );
        assert!(NoMatch::QueryTooShort.is_invalid_input());
        assert!(!NoMatch::MedicineNotFound { name: "X".into() }.is_invalid_input());
    }
}
