//! Lookup, search, filter and substitute-ranking operations over a built index.
//!
//! Every operation is a read-only function of the index and its arguments. Bounded
//! lists are sorted first and truncated after, and ties keep catalog order.

use crate::composition::ingredient_names;
use crate::data::{Prescription, Record};
use crate::error::NoMatch;
use crate::format::{FormattedMedicine, as_percentage, as_rupees, two_decimals};
use crate::index::{MedicineIndex, RecordId, price_bucket};
use crate::similarity::{
    CLOSE_SUBSTITUTE_THRESHOLD, INGREDIENT_FALLBACK_THRESHOLD, LOOSE_SUBSTITUTE_THRESHOLD,
    NAME_FALLBACK_THRESHOLD, NameMatcher, SUGGESTION_THRESHOLD, jaccard,
};
use rayon::prelude::*;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashSet;
use tracing::debug;

const MIN_FUZZY_QUERY_CHARS: usize = 3;
const MAX_CLOSE_SUBSTITUTES: usize = 5;
const MAX_LOOSE_SUBSTITUTES: usize = 3;
// Loose substitutes are attached only when there are fewer close ones than this.
const CLOSE_SUBSTITUTES_WANTED: usize = 3;
const DEFAULT_PAGE_SIZE: usize = 10;

/// A medicine with the score that ranked it.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredMedicine<'a> {
    #[serde(rename = "similarity_score", serialize_with = "two_decimals")]
    pub score: f64,
    pub medicine: FormattedMedicine<'a>,
}

/// A cheaper record with overlapping ingredients.
#[derive(Debug, Clone, Serialize)]
pub struct CheaperAlternative<'a> {
    pub medicine: FormattedMedicine<'a>,
    #[serde(serialize_with = "as_rupees")]
    pub price_savings: f64,
    #[serde(serialize_with = "as_percentage")]
    pub savings_percentage: f64,
    #[serde(rename = "similarity_score", serialize_with = "two_decimals")]
    pub similarity: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MedicineLookup<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    pub medicine: FormattedMedicine<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cheaper_alternatives: Option<Vec<CheaperAlternative<'a>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similar_composition_alternatives: Option<Vec<CheaperAlternative<'a>>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CompositionSearch<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    pub matches: Vec<FormattedMedicine<'a>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SimilarMedicines<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    pub reference_medicine: FormattedMedicine<'a>,
    pub similar_medicines: Vec<ScoredMedicine<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize)]
pub enum PriceComparison {
    #[serde(rename = "cheaper")]
    Cheaper,
    #[serde(rename = "more expensive")]
    MoreExpensive,
    #[serde(rename = "same price")]
    SamePrice,
}

#[derive(Debug, Clone, Serialize)]
pub struct Alternative<'a> {
    pub medicine: FormattedMedicine<'a>,
    pub ingredient_similarity: f64,
    /// Relative to the reference price; absent when the reference costs nothing.
    pub price_difference_percentage: Option<f64>,
    pub price_comparison: PriceComparison,
    pub absolute_price_difference: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AlternativeSuggestions<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    pub reference_medicine: FormattedMedicine<'a>,
    pub alternatives: Vec<Alternative<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Filters for [`MedicineIndex::paginated_search`]. Empty strings and `None` disable
/// a filter; the price filter is active when `min_price > 0` or `max_price` is finite.
#[derive(Debug, Clone, PartialEq)]
pub struct PageQuery {
    pub query: String,
    pub manufacturer: String,
    pub min_price: f64,
    pub max_price: f64,
    pub prescription_required: Option<bool>,
    pub ingredient: String,
    pub page: usize,
    pub page_size: usize,
}

impl Default for PageQuery {
    fn default() -> Self {
        Self {
            query: String::new(),
            manufacturer: String::new(),
            min_price: 0.0,
            max_price: f64::INFINITY,
            prescription_required: None,
            ingredient: String::new(),
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize)]
pub struct PageMeta {
    pub total_results: usize,
    pub page: usize,
    pub page_size: usize,
    pub total_pages: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct Page<'a> {
    pub meta: PageMeta,
    pub results: Vec<FormattedMedicine<'a>>,
}

/// A name resolved either exactly or through the fuzzy fallback.
#[derive(Debug, Clone, Copy)]
struct Resolved<'a> {
    id: RecordId,
    name: &'a str,
    fuzzy: bool,
}

impl MedicineIndex {
    fn formatted(&self, ids: &[RecordId]) -> Vec<FormattedMedicine<'_>> {
        ids.iter()
            .map(|&id| FormattedMedicine::new(self.record(id)))
            .collect()
    }

    /// Exact name hit, else the single best-scoring name at or above the fallback
    /// threshold (earliest name wins ties).
    fn resolve_name<'a>(&'a self, name: &'a str) -> Option<Resolved<'a>> {
        if let Some(id) = self.by_name(name) {
            return Some(Resolved {
                id,
                name,
                fuzzy: false,
            });
        }
        let entries = self.name_entries();
        let matcher = NameMatcher::new(name);
        let (slot, score) = entries
            .par_iter()
            .enumerate()
            .filter_map(|(slot, (candidate, _))| {
                matcher
                    .score_at_least(candidate, NAME_FALLBACK_THRESHOLD)
                    .map(|score| (slot, score))
            })
            .reduce_with(earliest_best)?;
        let (matched, id) = &entries[slot];
        debug!(query = name, matched = %matched, score, "Resolved medicine name by similarity");
        Some(Resolved {
            id: *id,
            name: matched,
            fuzzy: true,
        })
    }

    /// Looks a medicine up by name, optionally attaching cheaper substitutes.
    pub fn get_medicine_by_name(
        &self,
        name: &str,
        include_alternatives: bool,
    ) -> Result<MedicineLookup<'_>, NoMatch> {
        let resolved = self
            .resolve_name(name)
            .ok_or_else(|| NoMatch::MedicineNotFound {
                name: name.to_string(),
            })?;
        let record = self.record(resolved.id);
        let mut lookup = MedicineLookup {
            note: resolved.fuzzy.then(|| {
                format!(
                    "Exact medicine not found. Showing closest match: '{}'",
                    resolved.name
                )
            }),
            medicine: FormattedMedicine::new(record),
            cheaper_alternatives: None,
            similar_composition_alternatives: None,
        };
        if include_alternatives {
            if let Some(price) = record.price() {
                let (close, loose) = self.cheaper_substitutes(record, price);
                if close.len() < CLOSE_SUBSTITUTES_WANTED {
                    lookup.similar_composition_alternatives =
                        Some(loose.into_iter().take(MAX_LOOSE_SUBSTITUTES).collect());
                }
                lookup.cheaper_alternatives =
                    Some(close.into_iter().take(MAX_CLOSE_SUBSTITUTES).collect());
            }
        }
        Ok(lookup)
    }

    /// Close (sorted by savings) and loose (sorted by similarity) cheaper substitutes.
    fn cheaper_substitutes<'a>(
        &'a self,
        reference: &Record,
        price: f64,
    ) -> (Vec<CheaperAlternative<'a>>, Vec<CheaperAlternative<'a>>) {
        let reference_set = ingredient_set(reference);
        let mut close = Vec::new();
        let mut loose = Vec::new();
        if reference_set.is_empty() {
            return (close, loose);
        }
        for candidate in self.records() {
            if same_name(reference, candidate) {
                continue;
            }
            let Some(candidate_price) = candidate.price() else {
                continue;
            };
            if candidate_price >= price {
                continue;
            }
            let candidate_set = ingredient_set(candidate);
            let Some(similarity) = jaccard(&reference_set, &candidate_set) else {
                continue;
            };
            let savings = price - candidate_price;
            let alternative = CheaperAlternative {
                medicine: FormattedMedicine::new(candidate),
                price_savings: savings,
                savings_percentage: if price != 0.0 {
                    savings / price * 100.0
                } else {
                    0.0
                },
                similarity,
            };
            if similarity >= CLOSE_SUBSTITUTE_THRESHOLD {
                close.push(alternative);
            } else if similarity >= LOOSE_SUBSTITUTE_THRESHOLD {
                loose.push(alternative);
            }
        }
        close.sort_by(|a, b| descending(a.savings_percentage, b.savings_percentage));
        loose.sort_by(|a, b| descending(hundredths(a.similarity), hundredths(b.similarity)));
        (close, loose)
    }

    /// Case-insensitive substring search over every field of every record.
    pub fn search_medicines(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<FormattedMedicine<'_>>, NoMatch> {
        let needle = query.to_lowercase();
        let results: Vec<_> = (0..self.len())
            .filter(|&id| self.search_text(id).contains(&needle))
            .take(limit.max(1))
            .map(|id| FormattedMedicine::new(self.record(id)))
            .collect();
        if results.is_empty() {
            return Err(NoMatch::NoTextMatches {
                query: query.to_string(),
            });
        }
        Ok(results)
    }

    /// Every name scoring at least `threshold` against `partial_name`, best first.
    pub fn fuzzy_search_by_name(
        &self,
        partial_name: &str,
        threshold: f64,
        limit: usize,
    ) -> Result<Vec<ScoredMedicine<'_>>, NoMatch> {
        if partial_name.chars().count() < MIN_FUZZY_QUERY_CHARS {
            return Err(NoMatch::QueryTooShort);
        }
        let matcher = NameMatcher::new(partial_name);
        let mut scored: Vec<(f64, RecordId)> = self
            .name_entries()
            .par_iter()
            .filter_map(|(candidate, id)| {
                matcher
                    .score_at_least(candidate, threshold)
                    .map(|score| (score, *id))
            })
            .collect();
        scored.sort_by(|a, b| descending(a.0, b.0));
        scored.truncate(limit.max(1));
        if scored.is_empty() {
            return Err(NoMatch::NoSimilarNames {
                query: partial_name.to_string(),
            });
        }
        Ok(scored
            .into_iter()
            .map(|(score, id)| ScoredMedicine {
                score,
                medicine: FormattedMedicine::new(self.record(id)),
            })
            .collect())
    }

    /// Composition or ingredient search: exact key, then substring over composition
    /// strings, then the closest known ingredient.
    pub fn search_by_composition(
        &self,
        ingredient: &str,
        limit: usize,
    ) -> Result<CompositionSearch<'_>, NoMatch> {
        let limit = limit.max(1);
        if let Some(ids) = self.by_composition_key(ingredient) {
            return Ok(CompositionSearch {
                note: None,
                matches: self.formatted(&ids[..ids.len().min(limit)]),
            });
        }

        let needle = ingredient.to_lowercase();
        let ids: Vec<RecordId> = self
            .records()
            .iter()
            .enumerate()
            .filter(|(_, record)| {
                record
                    .composition
                    .as_deref()
                    .is_some_and(|composition| composition.to_lowercase().contains(&needle))
            })
            .map(|(id, _)| id)
            .take(limit)
            .collect();
        if !ids.is_empty() {
            return Ok(CompositionSearch {
                note: None,
                matches: self.formatted(&ids),
            });
        }

        let known = self.known_ingredients();
        let matcher = NameMatcher::new(ingredient);
        let best = known
            .par_iter()
            .enumerate()
            .filter_map(|(slot, candidate)| {
                matcher
                    .score_at_least(candidate, INGREDIENT_FALLBACK_THRESHOLD)
                    .map(|score| (slot, score))
            })
            .reduce_with(earliest_best);
        if let Some((slot, score)) = best {
            let matched = &known[slot];
            if let Some(ids) = self.by_composition_key(matched) {
                debug!(query = ingredient, matched = %matched, score, "Resolved ingredient by similarity");
                return Ok(CompositionSearch {
                    note: Some(format!(
                        "No exact match found. Showing results for similar ingredient: '{matched}'"
                    )),
                    matches: self.formatted(&ids[..ids.len().min(limit)]),
                });
            }
        }
        Err(NoMatch::NoIngredientMatches {
            ingredient: ingredient.to_string(),
        })
    }

    /// Records with a parseable price in `[min_price, max_price]`, cheapest first.
    pub fn filter_by_price_range(
        &self,
        min_price: f64,
        max_price: f64,
        limit: usize,
    ) -> Result<Vec<FormattedMedicine<'_>>, NoMatch> {
        let mut priced: Vec<(f64, RecordId)> = Vec::new();
        for (bucket, ids) in self.price_buckets_from(price_bucket(min_price)) {
            if bucket as f64 > max_price {
                break;
            }
            for &id in ids {
                if let Some(price) = self.record(id).price() {
                    if min_price <= price && price <= max_price {
                        priced.push((price, id));
                    }
                }
            }
        }
        priced.sort_by(|a, b| a.0.total_cmp(&b.0));
        priced.truncate(limit.max(1));
        if priced.is_empty() {
            return Err(NoMatch::NoPriceMatches {
                min: min_price,
                max: max_price,
            });
        }
        Ok(priced
            .into_iter()
            .map(|(_, id)| FormattedMedicine::new(self.record(id)))
            .collect())
    }

    /// Exact manufacturer hit, else every manufacturer containing the text.
    pub fn filter_by_manufacturer(
        &self,
        manufacturer: &str,
        limit: usize,
    ) -> Result<Vec<FormattedMedicine<'_>>, NoMatch> {
        let limit = limit.max(1);
        let ids: Vec<RecordId> = match self.by_manufacturer(manufacturer) {
            Some(ids) => ids.iter().copied().take(limit).collect(),
            None => {
                let needle = manufacturer.to_lowercase();
                self.manufacturers()
                    .filter(|(name, _)| name.to_lowercase().contains(&needle))
                    .flat_map(|(_, ids)| ids.iter().copied())
                    .take(limit)
                    .collect()
            }
        };
        if ids.is_empty() {
            return Err(NoMatch::NoManufacturerMatches {
                manufacturer: manufacturer.to_string(),
            });
        }
        Ok(self.formatted(&ids))
    }

    pub fn filter_by_prescription_requirement(
        &self,
        prescription_required: bool,
        limit: usize,
    ) -> Result<Vec<FormattedMedicine<'_>>, NoMatch> {
        let ids = self.by_prescription(Prescription::from_required(prescription_required));
        if ids.is_empty() {
            return Err(NoMatch::NoPrescriptionMatches {
                required: prescription_required,
            });
        }
        Ok(self.formatted(&ids[..ids.len().min(limit.max(1))]))
    }

    /// Other records sharing at least one ingredient with the named medicine, ranked
    /// by ingredient overlap.
    pub fn find_similar_medicines(
        &self,
        medicine_name: &str,
        limit: usize,
    ) -> Result<SimilarMedicines<'_>, NoMatch> {
        const ACTION: &str = "find similar medicines";
        let resolved = self.resolve_reference(medicine_name)?;
        let reference = self.record(resolved.id);
        let reference_set = self.reference_ingredients(reference, resolved.name, ACTION)?;

        let mut scored: Vec<(f64, RecordId)> = self
            .records()
            .par_iter()
            .enumerate()
            .filter(|(_, candidate)| candidate.name.as_deref() != Some(resolved.name))
            .filter_map(|(id, candidate)| {
                let candidate_set = ingredient_set(candidate);
                jaccard(&reference_set, &candidate_set)
                    .filter(|&score| score > 0.0)
                    .map(|score| (score, id))
            })
            .collect();
        scored.sort_by(|a, b| descending(a.0, b.0));
        let message = scored.is_empty().then(|| {
            format!(
                "No medicines with similar composition to '{}' found.",
                resolved.name
            )
        });
        scored.truncate(limit.max(1));

        Ok(SimilarMedicines {
            note: fuzzy_note(resolved),
            reference_medicine: FormattedMedicine::new(reference),
            similar_medicines: scored
                .into_iter()
                .map(|(score, id)| ScoredMedicine {
                    score,
                    medicine: FormattedMedicine::new(self.record(id)),
                })
                .collect(),
            message,
        })
    }

    /// Priced records with at least half the ingredients in common, ranked by
    /// overlap and then by closeness in price.
    pub fn suggest_alternatives(
        &self,
        medicine_name: &str,
        limit: usize,
    ) -> Result<AlternativeSuggestions<'_>, NoMatch> {
        const ACTION: &str = "suggest alternatives";
        let resolved = self.resolve_reference(medicine_name)?;
        let reference = self.record(resolved.id);
        if reference.composition.is_none() {
            return Err(NoMatch::MissingComposition {
                action: ACTION,
                name: resolved.name.to_string(),
            });
        }
        if reference.mrp.is_none() {
            return Err(NoMatch::MissingPrice {
                name: resolved.name.to_string(),
            });
        }
        let reference_price = reference.price().ok_or_else(|| NoMatch::InvalidPrice {
            name: resolved.name.to_string(),
        })?;
        let reference_set = self.reference_ingredients(reference, resolved.name, ACTION)?;

        let mut alternatives: Vec<Alternative<'_>> = self
            .records()
            .par_iter()
            .filter(|candidate| candidate.name.as_deref() != Some(resolved.name))
            .filter_map(|candidate| {
                let price = candidate.price()?;
                let candidate_set = ingredient_set(candidate);
                let similarity = jaccard(&reference_set, &candidate_set)?;
                if similarity < SUGGESTION_THRESHOLD {
                    return None;
                }
                let difference = price - reference_price;
                Some(Alternative {
                    medicine: FormattedMedicine::new(candidate),
                    ingredient_similarity: similarity,
                    price_difference_percentage: (reference_price != 0.0)
                        .then(|| difference / reference_price * 100.0),
                    price_comparison: match difference.partial_cmp(&0.0) {
                        Some(Ordering::Less) => PriceComparison::Cheaper,
                        Some(Ordering::Greater) => PriceComparison::MoreExpensive,
                        _ => PriceComparison::SamePrice,
                    },
                    absolute_price_difference: difference.abs(),
                })
            })
            .collect();
        alternatives.sort_by(|a, b| {
            descending(a.ingredient_similarity, b.ingredient_similarity)
                .then_with(|| a.absolute_price_difference.total_cmp(&b.absolute_price_difference))
        });
        let message = alternatives
            .is_empty()
            .then(|| format!("No suitable alternatives found for '{}'.", resolved.name));
        alternatives.truncate(limit.max(1));

        Ok(AlternativeSuggestions {
            note: fuzzy_note(resolved),
            reference_medicine: FormattedMedicine::new(reference),
            alternatives,
            message,
        })
    }

    fn resolve_reference<'a>(&'a self, medicine_name: &'a str) -> Result<Resolved<'a>, NoMatch> {
        self.resolve_name(medicine_name)
            .ok_or_else(|| NoMatch::ReferenceNotFound {
                name: medicine_name.to_string(),
            })
    }

    fn reference_ingredients(
        &self,
        reference: &Record,
        name: &str,
        action: &'static str,
    ) -> Result<HashSet<String>, NoMatch> {
        let Some(composition) = reference.composition.as_deref() else {
            return Err(NoMatch::MissingComposition {
                action,
                name: name.to_string(),
            });
        };
        let names: HashSet<String> = ingredient_names(composition).into_iter().collect();
        if names.is_empty() {
            return Err(NoMatch::UnparseableIngredients {
                action,
                name: name.to_string(),
            });
        }
        Ok(names)
    }

    /// Narrowing filters (text, manufacturer, price, prescription, ingredient) and one
    /// page of the result. Out-of-range pages clamp to the last page.
    pub fn paginated_search(&self, request: &PageQuery) -> Page<'_> {
        let page_size = if request.page_size == 0 {
            DEFAULT_PAGE_SIZE
        } else {
            request.page_size
        };
        let query = request.query.to_lowercase();
        let manufacturer = request.manufacturer.to_lowercase();
        let ingredient = request.ingredient.to_lowercase();
        let price_filtered = request.min_price > 0.0 || request.max_price < f64::INFINITY;
        let prescription = request.prescription_required.map(Prescription::from_required);

        let matches: Vec<RecordId> = (0..self.len())
            .filter(|&id| query.is_empty() || self.search_text(id).contains(&query))
            .filter(|&id| {
                manufacturer.is_empty()
                    || self
                        .record(id)
                        .manufacturer
                        .as_deref()
                        .is_some_and(|name| name.to_lowercase().contains(&manufacturer))
            })
            .filter(|&id| {
                !price_filtered
                    || self.record(id).price().is_some_and(|price| {
                        request.min_price <= price && price <= request.max_price
                    })
            })
            .filter(|&id| {
                prescription.is_none() || self.record(id).prescription_flag() == prescription
            })
            .filter(|&id| {
                ingredient.is_empty()
                    || self
                        .record(id)
                        .composition
                        .as_deref()
                        .is_some_and(|composition| composition.to_lowercase().contains(&ingredient))
            })
            .collect();

        let total_results = matches.len();
        let total_pages = total_results.div_ceil(page_size);
        let mut page = request.page.max(1);
        if total_pages > 0 && page > total_pages {
            page = total_pages;
        }
        let start = page
            .saturating_sub(1)
            .saturating_mul(page_size)
            .min(total_results);
        let end = start.saturating_add(page_size).min(total_results);

        Page {
            meta: PageMeta {
                total_results,
                page,
                page_size,
                total_pages,
            },
            results: self.formatted(&matches[start..end]),
        }
    }

    /// Type-ahead listing of names that start with `prefix` (case-sensitive).
    pub fn medicines_with_prefix(
        &self,
        prefix: &str,
        limit: usize,
    ) -> Result<Vec<FormattedMedicine<'_>>, NoMatch> {
        let ids = self.names_with_prefix(prefix, limit.max(1));
        if ids.is_empty() {
            return Err(NoMatch::NoPrefixMatches {
                prefix: prefix.to_string(),
            });
        }
        Ok(self.formatted(&ids))
    }
}

fn ingredient_set(record: &Record) -> HashSet<String> {
    record
        .composition
        .as_deref()
        .map(|composition| ingredient_names(composition).into_iter().collect())
        .unwrap_or_default()
}

fn same_name(a: &Record, b: &Record) -> bool {
    a.name.is_some() && a.name == b.name
}

fn fuzzy_note(resolved: Resolved<'_>) -> Option<String> {
    resolved.fuzzy.then(|| {
        format!(
            "Exact medicine not found. Using closest match: '{}'",
            resolved.name
        )
    })
}

fn descending(a: f64, b: f64) -> Ordering {
    b.total_cmp(&a)
}

// Ranks on the value as displayed, so near-equal similarities keep catalog order.
fn hundredths(value: f64) -> f64 {
    (value * 100.0).round()
}

// Higher score wins; equal scores keep the earlier slot.
fn earliest_best(a: (usize, f64), b: (usize, f64)) -> (usize, f64) {
    match b.1.total_cmp(&a.1) {
        Ordering::Greater => b,
        Ordering::Less => a,
        Ordering::Equal if b.0 < a.0 => b,
        Ordering::Equal => a,
    }
}
