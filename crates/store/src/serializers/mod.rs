//! Wire representations and inbound validation.
//!
//! Outbound, each resource has a `*Data` struct built from the model
//! (decimals serialize as strings with two places). Inbound, a [`Payload`]
//! walks a JSON object field by field and records every problem in
//! [`ValidationErrors`] before anything is persisted. Error wording follows
//! the messages REST clients of the store already parse.

pub mod collections;
pub mod orders;
pub mod products;

use std::collections::BTreeMap;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::db::RepositoryError;

pub use collections::CollectionData;
pub use orders::{OrderData, OrderItemData};
pub use products::ProductData;

/// Key used for errors that are not tied to a field.
pub const NON_FIELD_ERRORS: &str = "non_field_errors";

/// Per-field validation messages.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ValidationErrors(BTreeMap<String, Vec<String>>);

impl ValidationErrors {
    /// No errors yet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a message for `field`.
    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        self.0
            .entry(field.to_owned())
            .or_default()
            .push(message.into());
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Messages recorded for `field`.
    #[must_use]
    pub fn field(&self, field: &str) -> &[String] {
        self.0.get(field).map_or(&[], Vec::as_slice)
    }

    /// Names of the fields with errors.
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Merge errors of a nested object under `prefix`, e.g. `items[0].quantity`.
    pub fn extend_nested(&mut self, prefix: &str, nested: Self) {
        for (field, messages) in nested.0 {
            let key = format!("{prefix}.{field}");
            self.0.entry(key).or_default().extend(messages);
        }
    }
}

/// Inbound data could not be turned into a write.
#[derive(Debug, Error)]
pub enum SerializerError {
    #[error("invalid input: {0:?}")]
    Invalid(ValidationErrors),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl From<ValidationErrors> for SerializerError {
    fn from(errors: ValidationErrors) -> Self {
        Self::Invalid(errors)
    }
}

/// Limits for a text field.
#[derive(Debug, Clone, Copy)]
pub struct Text {
    pub max_length: usize,
    pub allow_blank: bool,
}

impl Text {
    pub const fn max(max_length: usize) -> Self {
        Self {
            max_length,
            allow_blank: false,
        }
    }
}

/// Limits for a decimal field.
#[derive(Debug, Clone, Copy)]
pub struct DecimalRules {
    pub max_digits: u32,
    pub decimal_places: u32,
    pub min_value: Option<Decimal>,
}

/// Field-by-field reader over a JSON object.
///
/// Every accessor returns `None` exactly when it recorded an error, so a
/// caller can destructure all results with `let ... else` and fall back to
/// [`Payload::into_errors`].
#[derive(Debug)]
pub struct Payload<'a> {
    data: &'a Map<String, Value>,
    errors: ValidationErrors,
}

impl<'a> Payload<'a> {
    /// Start reading `body`.
    ///
    /// # Errors
    ///
    /// Returns a `non_field_errors` entry when `body` is not an object.
    pub fn new(body: &'a Value) -> Result<Self, ValidationErrors> {
        match body {
            Value::Object(data) => Ok(Self {
                data,
                errors: ValidationErrors::new(),
            }),
            other => {
                let mut errors = ValidationErrors::new();
                errors.add(
                    NON_FIELD_ERRORS,
                    format!(
                        "Invalid data. Expected a dictionary, but got {}.",
                        json_type(other)
                    ),
                );
                Err(errors)
            }
        }
    }

    /// Errors recorded so far.
    #[must_use]
    pub const fn errors(&self) -> &ValidationErrors {
        &self.errors
    }

    #[must_use]
    pub fn into_errors(self) -> ValidationErrors {
        self.errors
    }

    /// Record an error that is not produced by one of the accessors.
    pub fn reject(&mut self, field: &str, message: impl Into<String>) {
        self.errors.add(field, message);
    }

    /// Record the errors of a nested object under `prefix`.
    pub fn reject_nested(&mut self, prefix: &str, nested: ValidationErrors) {
        self.errors.extend_nested(prefix, nested);
    }

    /// A present, non-null value. Missing and `null` are errors.
    fn required(&mut self, name: &str) -> Option<&'a Value> {
        match self.data.get(name) {
            None => {
                self.errors.add(name, "This field is required.");
                None
            }
            Some(Value::Null) => {
                self.errors.add(name, "This field may not be null.");
                None
            }
            Some(value) => Some(value),
        }
    }

    /// `Some(None)` when the field is missing or `null`.
    fn optional(&self, name: &str) -> Option<&'a Value> {
        match self.data.get(name) {
            None | Some(Value::Null) => None,
            Some(value) => Some(value),
        }
    }

    /// Required text field. Surrounding whitespace is trimmed.
    pub fn text(&mut self, name: &str, rules: Text) -> Option<String> {
        let value = self.required(name)?;
        self.check_text(name, value, rules)
    }

    /// Optional text field; `null`, missing and blank all read as `None`.
    pub fn optional_text(&mut self, name: &str, max_length: usize) -> Option<Option<String>> {
        let Some(value) = self.optional(name) else {
            return Some(None);
        };
        let text = self.check_text(
            name,
            value,
            Text {
                max_length,
                allow_blank: true,
            },
        )?;
        Some(Some(text).filter(|text| !text.is_empty()))
    }

    fn check_text(&mut self, name: &str, value: &Value, rules: Text) -> Option<String> {
        let text = match value {
            Value::String(s) => s.trim().to_owned(),
            Value::Number(n) => n.to_string(),
            _ => {
                self.errors.add(name, "Not a valid string.");
                return None;
            }
        };
        if text.is_empty() && !rules.allow_blank {
            self.errors.add(name, "This field may not be blank.");
            return None;
        }
        if text.chars().count() > rules.max_length {
            self.errors.add(
                name,
                format!(
                    "Ensure this field has no more than {} characters.",
                    rules.max_length
                ),
            );
            return None;
        }
        Some(text)
    }

    /// Required slug: letters, numbers, underscores or hyphens.
    pub fn slug(&mut self, name: &str, max_length: usize) -> Option<String> {
        let slug = self.text(name, Text::max(max_length))?;
        if slug
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            Some(slug)
        } else {
            self.errors.add(
                name,
                "Enter a valid \"slug\" consisting of letters, numbers, underscores or hyphens.",
            );
            None
        }
    }

    /// Slug that falls back to [`slugify`]ing `source` when the field is
    /// missing or `null`. Pass `source: None` when the field it derives from
    /// failed validation.
    pub fn slug_or(
        &mut self,
        name: &str,
        max_length: usize,
        source: Option<&str>,
    ) -> Option<String> {
        if self.optional(name).is_some() {
            return self.slug(name, max_length);
        }
        let Some(source) = source else {
            self.errors.add(name, "This field is required.");
            return None;
        };
        let slug: String = slugify(source).chars().take(max_length).collect();
        let slug = slug.trim_end_matches('-');
        if slug.is_empty() {
            self.errors.add(name, "This field may not be blank.");
            return None;
        }
        Some(slug.to_owned())
    }

    /// Required choice, given by its wire name.
    pub fn choice<T: DeserializeOwned>(&mut self, name: &str) -> Option<T> {
        let value = self.required(name)?;
        if let Ok(choice) = serde_json::from_value(value.clone()) {
            return Some(choice);
        }
        let shown = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        self.errors.add(name, format!("\"{shown}\" is not a valid choice."));
        None
    }

    /// Required decimal number, given as a JSON number or numeric string.
    pub fn decimal(&mut self, name: &str, rules: DecimalRules) -> Option<Decimal> {
        let value = self.required(name)?;
        let parsed = match value {
            Value::Number(n) => Decimal::from_str(&n.to_string())
                .or_else(|_| Decimal::from_scientific(&n.to_string()))
                .ok(),
            Value::String(s) => Decimal::from_str(s.trim()).ok(),
            _ => None,
        };
        let Some(decimal) = parsed else {
            self.errors.add(name, "A valid number is required.");
            return None;
        };

        let places = decimal.scale();
        let mut digits = u32::try_from(decimal.mantissa().unsigned_abs().to_string().len())
            .unwrap_or(u32::MAX);
        digits = digits.max(places);
        let whole = digits - places;
        let max_whole = rules.max_digits.saturating_sub(rules.decimal_places);
        let message = if digits > rules.max_digits {
            Some(format!(
                "Ensure that there are no more than {} digits in total.",
                rules.max_digits
            ))
        } else if places > rules.decimal_places {
            Some(format!(
                "Ensure that there are no more than {} decimal places.",
                rules.decimal_places
            ))
        } else if whole > max_whole {
            Some(format!(
                "Ensure that there are no more than {max_whole} digits before the decimal point."
            ))
        } else {
            None
        };
        if let Some(message) = message {
            self.errors.add(name, message);
            return None;
        }

        if let Some(min) = rules.min_value
            && decimal < min
        {
            self.errors.add(
                name,
                format!("Ensure this value is greater than or equal to {min}."),
            );
            return None;
        }
        Some(decimal)
    }

    /// Required integer, given as a JSON integer or an integer string.
    pub fn integer(&mut self, name: &str, min_value: Option<i32>) -> Option<i32> {
        let value = self.required(name)?;
        let Some(number) = parse_integer(value) else {
            self.errors.add(name, "A valid integer is required.");
            return None;
        };
        if let Some(min) = min_value
            && number < min
        {
            self.errors.add(
                name,
                format!("Ensure this value is greater than or equal to {min}."),
            );
            return None;
        }
        Some(number)
    }

    /// Required primary key of a related object.
    pub fn pk(&mut self, name: &str) -> Option<i32> {
        let value = self.required(name)?;
        self.check_pk(name, value)
    }

    /// Optional primary key; `null` or missing reads as `None`.
    pub fn optional_pk(&mut self, name: &str) -> Option<Option<i32>> {
        let Some(value) = self.optional(name) else {
            return Some(None);
        };
        self.check_pk(name, value).map(Some)
    }

    fn check_pk(&mut self, name: &str, value: &Value) -> Option<i32> {
        if let Some(pk) = parse_integer(value) {
            return Some(pk);
        }
        self.errors.add(
            name,
            format!(
                "Incorrect type. Expected pk value, received {}.",
                json_type(value)
            ),
        );
        None
    }

    /// Keep `pk` only if the related object exists.
    pub fn existing(&mut self, name: &str, pk: i32, exists: bool) -> Option<i32> {
        if exists {
            Some(pk)
        } else {
            self.errors.add(
                name,
                format!("Invalid pk \"{pk}\" - object does not exist."),
            );
            None
        }
    }

    /// Required list with a bounded number of elements.
    pub fn list(&mut self, name: &str, min: usize, max: usize) -> Option<&'a Vec<Value>> {
        let value = self.required(name)?;
        let Value::Array(items) = value else {
            self.errors.add(
                name,
                format!(
                    "Expected a list of items but got type \"{}\".",
                    json_type(value)
                ),
            );
            return None;
        };
        if items.len() < min {
            self.errors.add(
                name,
                format!("Ensure this field has at least {min} elements."),
            );
            return None;
        }
        if items.len() > max {
            self.errors.add(
                name,
                format!("Ensure this field has no more than {max} elements."),
            );
            return None;
        }
        Some(items)
    }
}

/// Lower-case ASCII slug of `text`: letters, digits and underscores are
/// kept, runs of whitespace and hyphens become one hyphen, everything else
/// is dropped.
#[must_use]
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut dash = false;
    for c in text.chars() {
        if c.is_ascii_alphanumeric() || c == '_' {
            if dash && !slug.is_empty() {
                slug.push('-');
            }
            dash = false;
            slug.push(c.to_ascii_lowercase());
        } else if c.is_whitespace() || c == '-' {
            dash = true;
        }
    }
    slug
}

fn parse_integer(value: &Value) -> Option<i32> {
    match value {
        Value::Number(n) => n.as_i64().and_then(|n| i32::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

const fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "NoneType",
        Value::Bool(_) => "bool",
        Value::Number(_) => "int",
        Value::String(_) => "str",
        Value::Array(_) => "list",
        Value::Object(_) => "dict",
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    const PRICE: DecimalRules = DecimalRules {
        max_digits: 6,
        decimal_places: 2,
        min_value: Some(Decimal::ONE),
    };

    #[test]
    fn test_non_object_body() {
        let body = json!([1, 2]);
        let errors = Payload::new(&body).unwrap_err();
        assert_eq!(
            errors.field(NON_FIELD_ERRORS),
            ["Invalid data. Expected a dictionary, but got list."]
        );
    }

    #[test]
    fn test_required_null_and_blank() {
        let body = json!({"title": "  ", "slug": null});
        let mut payload = Payload::new(&body).unwrap();
        assert_eq!(payload.text("title", Text::max(255)), None);
        assert_eq!(payload.text("slug", Text::max(50)), None);
        assert_eq!(payload.text("missing", Text::max(50)), None);

        let errors = payload.into_errors();
        assert_eq!(errors.field("title"), ["This field may not be blank."]);
        assert_eq!(errors.field("slug"), ["This field may not be null."]);
        assert_eq!(errors.field("missing"), ["This field is required."]);
    }

    #[test]
    fn test_text_length() {
        let long = "x".repeat(256);
        let body = json!({ "title": long });
        let mut payload = Payload::new(&body).unwrap();
        assert_eq!(payload.text("title", Text::max(255)), None);
        assert_eq!(
            payload.errors().field("title"),
            ["Ensure this field has no more than 255 characters."]
        );
    }

    #[test]
    fn test_decimal_rules() {
        let body = json!({
            "a": "12.345",
            "b": 1_234_567,
            "c": "0.50",
            "d": "abc",
            "e": 19.99,
            "f": "12345.1",
        });
        let mut payload = Payload::new(&body).unwrap();
        assert_eq!(payload.decimal("a", PRICE), None);
        assert_eq!(payload.decimal("b", PRICE), None);
        assert_eq!(payload.decimal("c", PRICE), None);
        assert_eq!(payload.decimal("d", PRICE), None);
        assert_eq!(payload.decimal("e", PRICE), Some(Decimal::new(1999, 2)));
        assert_eq!(payload.decimal("f", PRICE), None);

        let errors = payload.into_errors();
        assert_eq!(
            errors.field("a"),
            ["Ensure that there are no more than 2 decimal places."]
        );
        assert_eq!(
            errors.field("b"),
            ["Ensure that there are no more than 6 digits in total."]
        );
        assert_eq!(
            errors.field("c"),
            ["Ensure this value is greater than or equal to 1."]
        );
        assert_eq!(errors.field("d"), ["A valid number is required."]);
        assert_eq!(
            errors.field("f"),
            ["Ensure that there are no more than 4 digits before the decimal point."]
        );
    }

    #[test]
    fn test_integer_and_pk() {
        let body = json!({"inventory": -1, "count": "12", "collection": true, "other": "7"});
        let mut payload = Payload::new(&body).unwrap();
        assert_eq!(payload.integer("inventory", Some(0)), None);
        assert_eq!(payload.integer("count", None), Some(12));
        assert_eq!(payload.pk("collection"), None);
        assert_eq!(payload.pk("other"), Some(7));
        assert_eq!(payload.optional_pk("featured"), Some(None));
        assert_eq!(payload.existing("other", 7, false), None);

        let errors = payload.into_errors();
        assert_eq!(
            errors.field("collection"),
            ["Incorrect type. Expected pk value, received bool."]
        );
        assert_eq!(
            errors.field("other"),
            ["Invalid pk \"7\" - object does not exist."]
        );
        assert_eq!(errors.fields().count(), 3);
    }

    #[test]
    fn test_optional_text_blank_is_none() {
        let body = json!({"description": ""});
        let mut payload = Payload::new(&body).unwrap();
        assert_eq!(payload.optional_text("description", 1000), Some(None));
        assert!(payload.errors().is_empty());
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("  Lavender Soap "), "lavender-soap");
        assert_eq!(slugify("Rock & Roll -- Live!"), "rock-roll-live");
        assert_eq!(slugify("Crème brûlée"), "crme-brle");
        assert_eq!(slugify("!!!"), "");
    }

    #[test]
    fn test_slug_falls_back_to_source() {
        let body = json!({"explicit": "given-slug", "empty": null});
        let mut payload = Payload::new(&body).unwrap();
        assert_eq!(
            payload.slug_or("explicit", 50, Some("Ignored")),
            Some("given-slug".to_owned())
        );
        assert_eq!(
            payload.slug_or("missing", 50, Some("Oak Spoon")),
            Some("oak-spoon".to_owned())
        );
        assert_eq!(
            payload.slug_or("short", 4, Some("Oak Spoon")),
            Some("oak".to_owned())
        );
        assert_eq!(payload.slug_or("empty", 50, Some("???")), None);
        assert_eq!(payload.slug_or("orphan", 50, None), None);

        let errors = payload.into_errors();
        assert_eq!(errors.field("empty"), ["This field may not be blank."]);
        assert_eq!(errors.field("orphan"), ["This field is required."]);
    }

    #[test]
    fn test_choice() {
        let body = json!({"tier": "gold", "bad": "platinum", "number": 3});
        let mut payload = Payload::new(&body).unwrap();
        assert_eq!(
            payload.choice::<storefront_core::Membership>("tier"),
            Some(storefront_core::Membership::Gold)
        );
        assert_eq!(payload.choice::<storefront_core::Membership>("bad"), None);
        assert_eq!(payload.choice::<storefront_core::Membership>("number"), None);

        let errors = payload.into_errors();
        assert_eq!(errors.field("bad"), ["\"platinum\" is not a valid choice."]);
        assert_eq!(errors.field("number"), ["\"3\" is not a valid choice."]);
    }

    #[test]
    fn test_slug_characters() {
        let body = json!({"slug": "not a slug"});
        let mut payload = Payload::new(&body).unwrap();
        assert_eq!(payload.slug("slug", 50), None);
    }
}
