//! Whole-catalog reports: composition analysis and counts, categories, the
//! manufacturer directory and summary statistics.

use crate::composition::{Ingredient, ingredient_names, parse_composition};
use crate::data::Prescription;
use crate::error::NoMatch;
use crate::format::{FormattedMedicine, rupees};
use crate::index::{MedicineIndex, RecordId};
use serde::{Serialize, Serializer};
use std::collections::HashMap;

const MAX_SAME_COMPOSITION: usize = 5;
const MAX_CATEGORY_EXAMPLES: usize = 3;
const TOP_COUNTS: usize = 10;
const UNKNOWN_MANUFACTURER: &str = "Unknown";

#[derive(Debug, Clone, Serialize)]
pub struct CompositionAnalysis<'a> {
    pub raw_composition: String,
    pub ingredients: Vec<Ingredient>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub medicines_with_this_composition: Option<Vec<FormattedMedicine<'a>>>,
}

/// Min/max/average over the records with a parseable price. Serialises as `{}` when
/// no record had one.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PriceSummary {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_price: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_price: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_price: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_medicines_with_price: Option<usize>,
}

impl PriceSummary {
    fn from_prices(prices: &[f64]) -> Self {
        let Some(range) = PriceRange::of(prices) else {
            return Self::default();
        };
        Self {
            min_price: Some(rupees(range.min)),
            max_price: Some(rupees(range.max)),
            avg_price: Some(rupees(range.avg)),
            total_medicines_with_price: Some(prices.len()),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct PriceRange {
    min: f64,
    max: f64,
    avg: f64,
}

impl PriceRange {
    fn of(prices: &[f64]) -> Option<Self> {
        if prices.is_empty() {
            return None;
        }
        let min = prices.iter().copied().fold(f64::INFINITY, f64::min);
        let max = prices.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let avg = prices.iter().sum::<f64>() / prices.len() as f64;
        Some(Self { min, max, avg })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ManufacturerGroup<'a> {
    #[serde(skip)]
    pub name: String,
    pub count: usize,
    pub medicines: Vec<FormattedMedicine<'a>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CompositionCount<'a> {
    pub query: String,
    pub exact_match: bool,
    pub total_medicines_found: usize,
    pub total_manufacturers: usize,
    pub price_statistics: PriceSummary,
    /// Cheapest first; unpriced records last.
    pub medicines: Vec<FormattedMedicine<'a>>,
    /// Keyed by manufacturer, in order of first appearance among the matches.
    #[serde(serialize_with = "groups_by_name")]
    pub by_manufacturer: Vec<ManufacturerGroup<'a>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Category<'a> {
    pub category: String,
    pub medicine_count: usize,
    pub example_medicines: Vec<FormattedMedicine<'a>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManufacturerCount {
    pub name: String,
    pub medicine_count: usize,
}

/// One 100-wide price band of the statistics histogram.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceBand {
    pub bucket: i64,
    pub count: usize,
}

impl PriceBand {
    pub fn label(&self) -> String {
        format!("₹{} - ₹{}", self.bucket, self.bucket as f64 + 99.99)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PriceDistribution {
    pub min_price: Option<String>,
    pub max_price: Option<String>,
    pub avg_price: Option<String>,
    #[serde(serialize_with = "bands_by_label")]
    pub price_ranges: Vec<PriceBand>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CatalogStatistics {
    pub total_medicines: usize,
    pub prescription_count: usize,
    pub otc_count: usize,
    pub unknown_prescription_status: usize,
    #[serde(serialize_with = "ordered_counts")]
    pub manufacturer_counts: Vec<(String, usize)>,
    pub price_distribution: PriceDistribution,
    #[serde(serialize_with = "ordered_counts")]
    pub common_ingredients: Vec<(String, usize)>,
}

impl MedicineIndex {
    /// Parses `composition` and lists up to five records with exactly that composition.
    pub fn analyze_composition(&self, composition: &str) -> Result<CompositionAnalysis<'_>, NoMatch> {
        if composition.trim().is_empty() {
            return Err(NoMatch::EmptyComposition);
        }
        let same: Vec<_> = self
            .by_exact_composition(composition)
            .iter()
            .take(MAX_SAME_COMPOSITION)
            .map(|&id| FormattedMedicine::new(self.record(id)))
            .collect();
        Ok(CompositionAnalysis {
            raw_composition: composition.to_string(),
            ingredients: parse_composition(composition),
            medicines_with_this_composition: (!same.is_empty()).then_some(same),
        })
    }

    /// Every record whose composition equals (`exact_match`) or contains
    /// (case-insensitively) `composition`, with price and manufacturer breakdowns.
    pub fn count_medicines_by_composition(
        &self,
        composition: &str,
        exact_match: bool,
    ) -> Result<CompositionCount<'_>, NoMatch> {
        let matches: Vec<RecordId> = if exact_match {
            self.by_exact_composition(composition).to_vec()
        } else {
            let needle = composition.to_lowercase();
            self.records()
                .iter()
                .enumerate()
                .filter(|(_, record)| {
                    record
                        .composition
                        .as_deref()
                        .is_some_and(|value| value.to_lowercase().contains(&needle))
                })
                .map(|(id, _)| id)
                .collect()
        };
        if matches.is_empty() {
            let composition = composition.to_string();
            return Err(if exact_match {
                NoMatch::NoExactComposition { composition }
            } else {
                NoMatch::NoPartialComposition { composition }
            });
        }

        let mut slots: HashMap<&str, usize> = HashMap::new();
        let mut by_manufacturer: Vec<ManufacturerGroup<'_>> = Vec::new();
        for &id in &matches {
            let record = self.record(id);
            let name = record.manufacturer.as_deref().unwrap_or(UNKNOWN_MANUFACTURER);
            let slot = *slots.entry(name).or_insert_with(|| {
                by_manufacturer.push(ManufacturerGroup {
                    name: name.to_string(),
                    count: 0,
                    medicines: Vec::new(),
                });
                by_manufacturer.len() - 1
            });
            let group = &mut by_manufacturer[slot];
            group.count += 1;
            group.medicines.push(FormattedMedicine::new(record));
        }

        let prices: Vec<f64> = matches
            .iter()
            .filter_map(|&id| self.record(id).price())
            .collect();
        let mut sorted = matches.clone();
        sorted.sort_by(|&a, &b| {
            let a = self.record(a).price().unwrap_or(f64::INFINITY);
            let b = self.record(b).price().unwrap_or(f64::INFINITY);
            a.total_cmp(&b)
        });

        Ok(CompositionCount {
            query: composition.to_string(),
            exact_match,
            total_medicines_found: matches.len(),
            total_manufacturers: by_manufacturer.len(),
            price_statistics: PriceSummary::from_prices(&prices),
            medicines: sorted
                .into_iter()
                .map(|id| FormattedMedicine::new(self.record(id)))
                .collect(),
            by_manufacturer,
        })
    }

    /// Groups records by their first ingredient; largest groups first.
    pub fn categorize_medicines(&self, max_categories: usize) -> Vec<Category<'_>> {
        let mut slots: HashMap<String, usize> = HashMap::new();
        let mut groups: Vec<(String, Vec<RecordId>)> = Vec::new();
        for (id, record) in self.records().iter().enumerate() {
            let Some(primary) = record
                .composition
                .as_deref()
                .and_then(|composition| ingredient_names(composition).into_iter().next())
            else {
                continue;
            };
            match slots.get(&primary) {
                Some(&slot) => groups[slot].1.push(id),
                None => {
                    slots.insert(primary.clone(), groups.len());
                    groups.push((primary, vec![id]));
                }
            }
        }
        groups.sort_by(|a, b| b.1.len().cmp(&a.1.len()));
        groups.truncate(max_categories.max(1));
        groups
            .into_iter()
            .map(|(category, ids)| Category {
                category,
                medicine_count: ids.len(),
                example_medicines: ids
                    .iter()
                    .take(MAX_CATEGORY_EXAMPLES)
                    .map(|&id| FormattedMedicine::new(self.record(id)))
                    .collect(),
            })
            .collect()
    }

    pub fn get_all_manufacturers(&self) -> Vec<ManufacturerCount> {
        let mut counts: Vec<ManufacturerCount> = self
            .manufacturers()
            .map(|(name, ids)| ManufacturerCount {
                name: name.to_string(),
                medicine_count: ids.len(),
            })
            .collect();
        counts.sort_by(|a, b| b.medicine_count.cmp(&a.medicine_count));
        counts
    }

    pub fn get_medicine_statistics(&self) -> CatalogStatistics {
        let manufacturer_counts = top_counts(
            self.manufacturers()
                .map(|(name, ids)| (name.to_string(), ids.len()))
                .collect(),
        );

        let mut ingredient_slots: HashMap<String, usize> = HashMap::new();
        let mut ingredient_counts: Vec<(String, usize)> = Vec::new();
        for composition in self.records().iter().filter_map(|r| r.composition.as_deref()) {
            for ingredient in ingredient_names(composition) {
                match ingredient_slots.get(&ingredient) {
                    Some(&slot) => ingredient_counts[slot].1 += 1,
                    None => {
                        ingredient_slots.insert(ingredient.clone(), ingredient_counts.len());
                        ingredient_counts.push((ingredient, 1));
                    }
                }
            }
        }

        let prices: Vec<f64> = self.records().iter().filter_map(|r| r.price()).collect();
        let price_distribution = match PriceRange::of(&prices) {
            Some(range) => PriceDistribution {
                min_price: Some(rupees(range.min)),
                max_price: Some(rupees(range.max)),
                avg_price: Some(rupees(range.avg)),
                price_ranges: self
                    .price_buckets()
                    .map(|(bucket, ids)| PriceBand {
                        bucket,
                        count: ids.len(),
                    })
                    .collect(),
            },
            None => PriceDistribution::default(),
        };

        CatalogStatistics {
            total_medicines: self.len(),
            prescription_count: self.by_prescription(Prescription::Required).len(),
            otc_count: self.by_prescription(Prescription::NotRequired).len(),
            unknown_prescription_status: self.unknown_prescription_count(),
            manufacturer_counts,
            price_distribution,
            common_ingredients: top_counts(ingredient_counts),
        }
    }
}

// Highest counts first, first-seen order among equal counts.
fn top_counts(mut counts: Vec<(String, usize)>) -> Vec<(String, usize)> {
    counts.sort_by(|a, b| b.1.cmp(&a.1));
    counts.truncate(TOP_COUNTS);
    counts
}

fn ordered_counts<S: Serializer>(
    counts: &[(String, usize)],
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_map(counts.iter().map(|(key, count)| (key, count)))
}

fn bands_by_label<S: Serializer>(bands: &[PriceBand], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_map(bands.iter().map(|band| (band.label(), band.count)))
}

fn groups_by_name<S: Serializer>(
    groups: &[ManufacturerGroup<'_>],
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_map(groups.iter().map(|group| (&group.name, group)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Record;
    use serde_json::json;

    fn catalog() -> MedicineIndex {
        MedicineIndex::build(vec![
            Record::new("Paracet 500")
                .with_manufacturer("Acme")
                .with_composition("Paracetamol (500mg)")
                .with_mrp("20")
                .with_prescription("No"),
            Record::new("Paracet Plus")
                .with_manufacturer("Acme")
                .with_composition("Paracetamol (500mg)+Caffeine (30mg)")
                .with_mrp("35")
                .with_prescription("No"),
            Record::new("Calpol")
                .with_manufacturer("GSK")
                .with_composition("Paracetamol (500mg)")
                .with_mrp("not-a-number")
                .with_prescription("No"),
            Record::new("Azee 500")
                .with_manufacturer("Cipla")
                .with_composition("Azithromycin (500mg)")
                .with_mrp(119.25)
                .with_prescription("Yes"),
            Record::new("Mystery")
                .with_composition("Caffeine (50mg)")
                .with_mrp("1250")
                .with_prescription("Maybe"),
        ])
    }

    #[test]
    fn analysis_attaches_exact_composition_matches() {
        let index = catalog();
        let analysis = index.analyze_composition("Paracetamol (500mg)").unwrap();
        assert_eq!(analysis.ingredients.len(), 1);
        assert_eq!(analysis.ingredients[0].name, "Paracetamol");
        let same = analysis.medicines_with_this_composition.unwrap();
        let names: Vec<_> = same.iter().map(FormattedMedicine::name).collect();
        assert_eq!(names, vec!["Paracet 500", "Calpol"]);

        let novel = index.analyze_composition("Ibuprofen (400mg) + Famotidine (20mg)").unwrap();
        assert_eq!(novel.ingredients.len(), 2);
        assert!(novel.medicines_with_this_composition.is_none());
        let value = serde_json::to_value(&novel).unwrap();
        assert!(value.get("medicines_with_this_composition").is_none());
    }

    #[test]
    fn analysis_rejects_empty_input() {
        let err = catalog().analyze_composition("  ").unwrap_err();
        assert!(err.is_invalid_input());
        assert_eq!(err.to_string(), "Please provide a composition string to analyze.");
    }

    #[test]
    fn partial_count_groups_and_sorts() {
        let index = catalog();
        let count = index.count_medicines_by_composition("paracetamol", false).unwrap();
        assert_eq!(count.total_medicines_found, 3);
        assert_eq!(count.total_manufacturers, 2);
        let names: Vec<_> = count.medicines.iter().map(FormattedMedicine::name).collect();
        assert_eq!(names, vec!["Paracet 500", "Paracet Plus", "Calpol"]);
        assert_eq!(
            count.price_statistics,
            PriceSummary {
                min_price: Some("₹20.00".into()),
                max_price: Some("₹35.00".into()),
                avg_price: Some("₹27.50".into()),
                total_medicines_with_price: Some(2),
            }
        );
        let groups: Vec<_> = count
            .by_manufacturer
            .iter()
            .map(|group| (group.name.as_str(), group.count))
            .collect();
        assert_eq!(groups, vec![("Acme", 2), ("GSK", 1)]);

        let value = serde_json::to_value(&count).unwrap();
        assert_eq!(value["by_manufacturer"]["Acme"]["count"], json!(2));
        assert!(value["by_manufacturer"]["Acme"].get("name").is_none());
    }

    #[test]
    fn exact_count_and_missing_manufacturer() {
        let index = catalog();
        let count = index.count_medicines_by_composition("Caffeine (50mg)", true).unwrap();
        assert_eq!(count.total_medicines_found, 1);
        assert_eq!(count.by_manufacturer[0].name, "Unknown");

        assert_eq!(
            index.count_medicines_by_composition("Caffeine", true).unwrap_err(),
            NoMatch::NoExactComposition {
                composition: "Caffeine".into()
            }
        );
        assert_eq!(
            index
                .count_medicines_by_composition("Insulin", false)
                .unwrap_err()
                .to_string(),
            "No medicines found containing: 'Insulin'."
        );
    }

    #[test]
    fn count_without_prices_has_empty_statistics() {
        let index = MedicineIndex::build(vec![
            Record::new("A").with_composition("Zinc (10mg)"),
        ]);
        let count = index.count_medicines_by_composition("zinc", false).unwrap();
        let value = serde_json::to_value(&count).unwrap();
        assert_eq!(value["price_statistics"], json!({}));
    }

    #[test]
    fn categories_use_first_ingredient() {
        let index = catalog();
        let categories = index.categorize_medicines(10);
        let summary: Vec<_> = categories
            .iter()
            .map(|c| (c.category.as_str(), c.medicine_count))
            .collect();
        assert_eq!(
            summary,
            vec![("Paracetamol", 3), ("Azithromycin", 1), ("Caffeine", 1)]
        );
        assert_eq!(categories[0].example_medicines.len(), 3);
        assert_eq!(index.categorize_medicines(1).len(), 1);
        assert_eq!(index.categorize_medicines(0).len(), 1);
    }

    #[test]
    fn manufacturer_directory_sorted_by_count() {
        let directory = catalog().get_all_manufacturers();
        assert_eq!(
            directory,
            vec![
                ManufacturerCount {
                    name: "Acme".into(),
                    medicine_count: 2
                },
                ManufacturerCount {
                    name: "GSK".into(),
                    medicine_count: 1
                },
                ManufacturerCount {
                    name: "Cipla".into(),
                    medicine_count: 1
                },
            ]
        );
    }

    #[test]
    fn statistics_summarise_catalog() {
        let stats = catalog().get_medicine_statistics();
        assert_eq!(stats.total_medicines, 5);
        assert_eq!(stats.prescription_count, 1);
        assert_eq!(stats.otc_count, 3);
        assert_eq!(stats.unknown_prescription_status, 1);
        assert_eq!(stats.manufacturer_counts[0], ("Acme".to_string(), 2));
        assert_eq!(
            stats.common_ingredients,
            vec![
                ("Paracetamol".to_string(), 3),
                ("Caffeine".to_string(), 2),
                ("Azithromycin".to_string(), 1),
            ]
        );
        let distribution = &stats.price_distribution;
        assert_eq!(distribution.min_price.as_deref(), Some("₹20.00"));
        assert_eq!(distribution.max_price.as_deref(), Some("₹1250.00"));
        assert_eq!(distribution.avg_price.as_deref(), Some("₹356.06"));
        let labels: Vec<_> = distribution
            .price_ranges
            .iter()
            .map(|band| (band.label(), band.count))
            .collect();
        assert_eq!(
            labels,
            vec![
                ("₹0 - ₹99.99".to_string(), 2),
                ("₹100 - ₹199.99".to_string(), 1),
                ("₹1200 - ₹1299.99".to_string(), 1),
            ]
        );
    }

    #[test]
    fn histogram_serialises_in_numeric_bucket_order() {
        let stats = catalog().get_medicine_statistics();
        let text = serde_json::to_string(&stats.price_distribution).unwrap();
        let low = text.find("₹0 - ").unwrap();
        let mid = text.find("₹100 - ").unwrap();
        let high = text.find("₹1200 - ").unwrap();
        assert!(low < mid && mid < high, "{text}");
    }

    #[test]
    fn empty_catalog_statistics() {
        let stats = MedicineIndex::empty().get_medicine_statistics();
        assert_eq!(stats.total_medicines, 0);
        assert_eq!(stats.price_distribution, PriceDistribution::default());
        let value = serde_json::to_value(&stats).unwrap();
        assert_eq!(value["price_distribution"]["min_price"], json!(null));
        assert_eq!(value["price_distribution"]["price_ranges"], json!({}));
    }
}
