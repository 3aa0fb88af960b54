use serde::{Deserialize, Serialize};
use serde_json::ser::{Formatter, Serializer};
use serde_json::{Map, Value};
use std::io;

pub const FIELD_NAME: &str = "Name";
pub const FIELD_MANUFACTURER: &str = "Manufacturer";
pub const FIELD_COMPOSITION: &str = "Composition";
pub const FIELD_MRP: &str = "MRP";
pub const FIELD_PRESCRIPTION: &str = "Prescription";

/// One catalog entry.
///
/// The well-known attributes are typed; everything else the source carried lands in
/// `extra` and is written back out untouched. A known attribute whose source value is
/// not a string is not coerced: it stays in `extra` and the typed field is `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Map<String, Value>")]
pub struct Record {
    #[serde(rename = "Name", skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "Manufacturer", skip_serializing_if = "Option::is_none")]
    pub manufacturer: Option<String>,
    #[serde(rename = "Composition", skip_serializing_if = "Option::is_none")]
    pub composition: Option<String>,
    /// Kept as the raw JSON value; may be a number, a numeric string, empty or junk.
    #[serde(rename = "MRP", skip_serializing_if = "Option::is_none")]
    pub mrp: Option<Value>,
    #[serde(rename = "Prescription", skip_serializing_if = "Option::is_none")]
    pub prescription: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Parsed value of the `Prescription` field.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum Prescription {
    Required,
    NotRequired,
}

impl Prescription {
    pub fn from_field(value: &str) -> Option<Self> {
        match value {
            "Yes" => Some(Prescription::Required),
            "No" => Some(Prescription::NotRequired),
            _ => None,
        }
    }

    pub fn from_required(required: bool) -> Self {
        if required {
            Prescription::Required
        } else {
            Prescription::NotRequired
        }
    }

    pub fn field_value(self) -> &'static str {
        match self {
            Prescription::Required => "Yes",
            Prescription::NotRequired => "No",
        }
    }
}

impl Record {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn with_manufacturer(mut self, manufacturer: impl Into<String>) -> Self {
        self.manufacturer = Some(manufacturer.into());
        self
    }

    pub fn with_composition(mut self, composition: impl Into<String>) -> Self {
        self.composition = Some(composition.into());
        self
    }

    pub fn with_mrp(mut self, mrp: impl Into<Value>) -> Self {
        self.mrp = Some(mrp.into());
        self
    }

    pub fn with_prescription(mut self, prescription: impl Into<String>) -> Self {
        self.prescription = Some(prescription.into());
        self
    }

    /// The MRP as a finite number, if it parses.
    pub fn price(&self) -> Option<f64> {
        let price = match self.mrp.as_ref()? {
            Value::Number(number) => number.as_f64()?,
            Value::String(text) => text.trim().parse::<f64>().ok()?,
            _ => return None,
        };
        price.is_finite().then_some(price)
    }

    pub fn prescription_flag(&self) -> Option<Prescription> {
        self.prescription.as_deref().and_then(Prescription::from_field)
    }

    /// Lowercased JSON rendering of every field, used for full-text matching.
    ///
    /// Separators are `", "` and `": "`, so a query may span a key and its value.
    pub fn search_text(&self) -> String {
        let mut out = Vec::new();
        let mut serializer = Serializer::with_formatter(&mut out, SpacedFormatter);
        if self.serialize(&mut serializer).is_err() {
            return String::new();
        }
        String::from_utf8(out)
            .map(|json| json.to_lowercase())
            .unwrap_or_default()
    }
}

struct SpacedFormatter;

impl Formatter for SpacedFormatter {
    fn begin_array_value<W: ?Sized + io::Write>(
        &mut self,
        writer: &mut W,
        first: bool,
    ) -> io::Result<()> {
        if first { Ok(()) } else { writer.write_all(b", ") }
    }

    fn begin_object_key<W: ?Sized + io::Write>(
        &mut self,
        writer: &mut W,
        first: bool,
    ) -> io::Result<()> {
        if first { Ok(()) } else { writer.write_all(b", ") }
    }

    fn begin_object_value<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        writer.write_all(b": ")
    }
}

impl From<Map<String, Value>> for Record {
    fn from(mut fields: Map<String, Value>) -> Self {
        Self {
            name: take_string(&mut fields, FIELD_NAME),
            manufacturer: take_string(&mut fields, FIELD_MANUFACTURER),
            composition: take_string(&mut fields, FIELD_COMPOSITION),
            mrp: fields.remove(FIELD_MRP),
            prescription: take_string(&mut fields, FIELD_PRESCRIPTION),
            extra: fields,
        }
    }
}

fn take_string(fields: &mut Map<String, Value>, key: &str) -> Option<String> {
    match fields.get(key) {
        Some(Value::String(_)) => match fields.remove(key) {
            Some(Value::String(text)) => Some(text),
            _ => None,
        },
        _ => None,
    }
}
