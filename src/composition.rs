//! Composition strings: `"Ambroxol (30mg/5ml) + Levosalbutamol (1mg/5ml)"`.
//!
//! Each `+`-separated clause names one active ingredient, optionally followed by a
//! parenthesised dosage. Parsing is pure and recomputed on demand; nothing is cached
//! on the record.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

static NAME_BEFORE_PAREN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([\w\s-]+)\s*\(").expect("valid ingredient name pattern"));
static DOSAGE_AMOUNT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\d+(?:\.\d+)?)\s*([A-Za-z]+)?").expect("valid dosage amount pattern")
});

/// Structured view of one composition clause.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Ingredient {
    pub raw_text: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dosage: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dosage_value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dosage_unit: Option<String>,
}

/// Splits a composition into ingredients, in clause order.
///
/// Clauses that trim to nothing (`"A (1mg) + "`) are dropped.
pub fn parse_composition(composition: &str) -> Vec<Ingredient> {
    composition
        .split('+')
        .map(str::trim)
        .filter(|clause| !clause.is_empty())
        .map(parse_clause)
        .collect()
}

/// Ingredient names only, in clause order. Duplicates are kept.
pub fn ingredient_names(composition: &str) -> Vec<String> {
    composition
        .split('+')
        .map(str::trim)
        .filter(|clause| !clause.is_empty())
        .map(|clause| clause_name(clause).0.to_string())
        .filter(|name| !name.is_empty())
        .collect()
}

fn parse_clause(clause: &str) -> Ingredient {
    let (name, paren_at) = clause_name(clause);
    let dosage = paren_at.and_then(|open| dosage_text(&clause[open + 1..]));
    let (dosage_value, dosage_unit) = match dosage.as_deref() {
        Some(text) => dosage_amount(text),
        None => (None, None),
    };
    Ingredient {
        raw_text: clause.to_string(),
        name: name.to_string(),
        dosage,
        dosage_value,
        dosage_unit,
    }
}

/// Returns the ingredient name and the byte offset of the opening parenthesis that
/// ends it, if the clause has one.
fn clause_name(clause: &str) -> (&str, Option<usize>) {
    match NAME_BEFORE_PAREN.captures(clause) {
        Some(caps) => {
            let whole = caps.get(0).map(|m| m.end() - 1);
            let name = caps.get(1).map(|m| m.as_str().trim()).unwrap_or(clause);
            (name, whole)
        }
        None => (clause, None),
    }
}

fn dosage_text(after_paren: &str) -> Option<String> {
    let inner = match after_paren.find(')') {
        Some(close) => &after_paren[..close],
        None => after_paren,
    };
    let inner = inner.trim();
    (!inner.is_empty()).then(|| inner.to_string())
}

fn dosage_amount(dosage: &str) -> (Option<f64>, Option<String>) {
    match DOSAGE_AMOUNT.captures(dosage) {
        Some(caps) => {
            let value = caps.get(1).and_then(|m| m.as_str().parse::<f64>().ok());
            let unit = caps.get(2).map(|m| m.as_str().to_string());
            (value, unit)
        }
        None => (None, None),
    }
}
