/// Default thresholds and result limits for query operations.
///
/// Callers pass explicit values per request; these are the fallbacks used by the CLI
/// and web handlers when a parameter is omitted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchConfig {
    pub fuzzy_threshold: f64,
    pub search_limit: usize,
    pub fuzzy_limit: usize,
    pub composition_limit: usize,
    pub price_limit: usize,
    pub manufacturer_limit: usize,
    pub prescription_limit: usize,
    pub similar_limit: usize,
    pub suggestion_limit: usize,
    pub page_size: usize,
    pub max_categories: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            fuzzy_threshold: 0.6,
            search_limit: 10,
            fuzzy_limit: 10,
            composition_limit: 10,
            price_limit: 20,
            manufacturer_limit: 20,
            prescription_limit: 20,
            similar_limit: 5,
            suggestion_limit: 5,
            page_size: 10,
            max_categories: 10,
        }
    }
}
