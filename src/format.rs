use crate::composition::ingredient_names;
use crate::data::Record;
use serde::{Serialize, Serializer};
use std::fmt;

/// Price band shown next to a medicine.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize)]
pub enum PriceTier {
    Low,
    Medium,
    High,
    Premium,
}

impl PriceTier {
    pub fn for_price(price: f64) -> Self {
        if price < 50.0 {
            PriceTier::Low
        } else if price < 200.0 {
            PriceTier::Medium
        } else if price < 500.0 {
            PriceTier::High
        } else {
            PriceTier::Premium
        }
    }
}

impl fmt::Display for PriceTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PriceTier::Low => write!(f, "Low"),
            PriceTier::Medium => write!(f, "Medium"),
            PriceTier::High => write!(f, "High"),
            PriceTier::Premium => write!(f, "Premium"),
        }
    }
}

/// A record together with its display-only derived fields.
///
/// Serialises as the record's own fields followed by the derived ones; a derived
/// field is omitted whenever its source field is.
#[derive(Debug, Clone, Serialize)]
pub struct FormattedMedicine<'a> {
    #[serde(flatten)]
    pub record: &'a Record,
    #[serde(rename = "Price_INR", skip_serializing_if = "Option::is_none")]
    pub price_inr: Option<String>,
    #[serde(rename = "Price_Category", skip_serializing_if = "Option::is_none")]
    pub price_category: Option<PriceTier>,
    #[serde(rename = "Active_Ingredients", skip_serializing_if = "Option::is_none")]
    pub active_ingredients: Option<Vec<String>>,
    #[serde(rename = "Ingredient_Count", skip_serializing_if = "Option::is_none")]
    pub ingredient_count: Option<usize>,
    #[serde(rename = "Is_Combination", skip_serializing_if = "Option::is_none")]
    pub is_combination: Option<bool>,
    #[serde(rename = "Requires_Prescription", skip_serializing_if = "Option::is_none")]
    pub requires_prescription: Option<bool>,
    #[serde(rename = "Prescription_Type", skip_serializing_if = "Option::is_none")]
    pub prescription_type: Option<&'static str>,
}

impl<'a> FormattedMedicine<'a> {
    pub fn new(record: &'a Record) -> Self {
        let price = record.price();
        let active_ingredients = record.composition.as_deref().map(ingredient_names);
        let ingredient_count = active_ingredients.as_ref().map(Vec::len);
        let requires_prescription = record.prescription.as_deref().map(|value| value == "Yes");
        Self {
            record,
            price_inr: price.map(rupees),
            price_category: price.map(PriceTier::for_price),
            active_ingredients,
            ingredient_count,
            is_combination: ingredient_count.map(|count| count > 1),
            requires_prescription,
            prescription_type: requires_prescription.map(|required| {
                if required {
                    "Prescription Required"
                } else {
                    "Over-the-Counter"
                }
            }),
        }
    }

    pub fn name(&self) -> &'a str {
        self.record.name.as_deref().unwrap_or("")
    }
}

/// `₹` amount with two decimals.
pub fn rupees(amount: f64) -> String {
    format!("₹{amount:.2}")
}

pub(crate) fn two_decimals<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(&format_args!("{value:.2}"))
}

pub(crate) fn as_rupees<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(&format_args!("₹{value:.2}"))
}

pub(crate) fn as_percentage<S: Serializer>(
    value: &f64,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_str(&format_args!("{value:.1}%"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tiers_follow_price_bands() {
        assert_eq!(PriceTier::for_price(49.99), PriceTier::Low);
        assert_eq!(PriceTier::for_price(50.0), PriceTier::Medium);
        assert_eq!(PriceTier::for_price(199.0), PriceTier::Medium);
        assert_eq!(PriceTier::for_price(200.0), PriceTier::High);
        assert_eq!(PriceTier::for_price(500.0), PriceTier::Premium);
    }

    #[test]
    fn derives_display_fields() {
        let record = Record::new("Paracet Plus")
            .with_composition("Paracetamol (500mg)+Caffeine (30mg)")
            .with_mrp("35")
            .with_prescription("No");
        let value = serde_json::to_value(FormattedMedicine::new(&record)).unwrap();
        assert_eq!(value["Name"], json!("Paracet Plus"));
        assert_eq!(value["MRP"], json!("35"));
        assert_eq!(value["Price_INR"], json!("₹35.00"));
        assert_eq!(value["Price_Category"], json!("Low"));
        assert_eq!(value["Active_Ingredients"], json!(["Paracetamol", "Caffeine"]));
        assert_eq!(value["Ingredient_Count"], json!(2));
        assert_eq!(value["Is_Combination"], json!(true));
        assert_eq!(value["Requires_Prescription"], json!(false));
        assert_eq!(value["Prescription_Type"], json!("Over-the-Counter"));
    }

    #[test]
    fn absent_fields_stay_absent() {
        let mut record = Record::new("Bare").with_mrp("n/a");
        record.extra.insert("Pack".into(), json!("1 tube"));
        let value = serde_json::to_value(FormattedMedicine::new(&record)).unwrap();
        let object = value.as_object().unwrap();
        assert_eq!(object.get("Pack"), Some(&json!("1 tube")));
        for derived in [
            "Price_INR",
            "Price_Category",
            "Active_Ingredients",
            "Ingredient_Count",
            "Is_Combination",
            "Requires_Prescription",
            "Prescription_Type",
        ] {
            assert!(!object.contains_key(derived), "{derived} should be absent");
        }
    }

    #[test]
    fn formatting_leaves_record_untouched() {
        let record = Record::new("Azee").with_mrp(120).with_prescription("Yes");
        let before = record.clone();
        let formatted = FormattedMedicine::new(&record);
        assert_eq!(formatted.prescription_type, Some("Prescription Required"));
        assert_eq!(formatted.price_category, Some(PriceTier::Medium));
        assert_eq!(record, before);
    }
}
