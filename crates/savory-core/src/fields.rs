//! # Field Alias Extraction
//!
//! Data-driven accessors for the "custom" provider, whose HTTP API has no
//! fixed schema. Each logical field is described by an ordered list of
//! accepted key aliases; the first key present in the payload wins.
//!
//! ## Why Alias Tables?
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  One tenant's API:   {"total": 42.5,        "items": [...]}             │
//! │  Another tenant's:   {"total_amount": 42.5, "line_items": [...]}        │
//! │  A third:            {"grand_total": "42.50", "lines": [...]}           │
//! │                                                                         │
//! │  pick_money(order, aliases::ORDER_TOTAL) resolves all three.            │
//! │                                                                         │
//! │  The tables are const data: adding a tenant dialect is a one-line       │
//! │  change, and every alias is exercised by tests.                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use serde_json::Value;

use crate::money::Money;

// =============================================================================
// Alias Tables
// =============================================================================

/// Accepted key spellings per logical field, first present wins.
pub mod aliases {
    pub const ORDER_LIST: &[&str] = &["orders", "data", "results"];
    pub const ORDER_ID: &[&str] = &["id", "order_id", "reference"];
    pub const ORDER_TOTAL: &[&str] = &["total", "total_amount", "grand_total"];
    pub const ORDER_TIP: &[&str] = &["tip", "tip_amount", "gratuity"];
    pub const ORDER_ITEMS: &[&str] = &["items", "line_items", "lines"];
    pub const ORDER_CREATED: &[&str] = &["created_at", "date", "timestamp"];
    pub const ORDER_PAID: &[&str] = &["paid", "is_paid", "completed"];

    pub const ITEM_NAME: &[&str] = &["name", "item", "title"];
    pub const ITEM_QUANTITY: &[&str] = &["qty", "quantity", "count"];
    pub const ITEM_PRICE: &[&str] = &["price", "unit_price", "amount"];

    pub const MENU_LIST: &[&str] = &["items", "menu_items", "products"];
    pub const MENU_ID: &[&str] = &["id", "item_id", "sku"];
    pub const MENU_NAME: &[&str] = &["name", "title"];
    pub const MENU_PRICE: &[&str] = &["price", "unit_price", "cost"];
    pub const MENU_AVAILABLE: &[&str] = &["available", "is_available", "active"];
    pub const MENU_DESCRIPTION: &[&str] = &["description", "details"];
}

// =============================================================================
// Accessors
// =============================================================================

/// Returns the first alias present (and non-null) in `obj` as a raw value.
pub fn pick<'a>(obj: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    let map = obj.as_object()?;
    // A null value falls through to the next alias.
    keys.iter().find_map(|k| map.get(*k).filter(|v| !v.is_null()))
}

/// First alias present, as a string.
pub fn pick_str<'a>(obj: &'a Value, keys: &[&str]) -> Option<&'a str> {
    pick(obj, keys)?.as_str()
}

/// First alias present, as a string — accepting numbers too.
///
/// Remote ids arrive both as `"id": "R1"` and `"id": 17`.
pub fn pick_id(obj: &Value, keys: &[&str]) -> Option<String> {
    match pick(obj, keys)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// First alias present, as an integer — accepting numeric strings.
pub fn pick_i64(obj: &Value, keys: &[&str]) -> Option<i64> {
    match pick(obj, keys)? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.round() as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// First alias present, as a boolean — accepting common truthy spellings.
pub fn pick_bool(obj: &Value, keys: &[&str]) -> Option<bool> {
    match pick(obj, keys)? {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.to_ascii_lowercase().as_str() {
            "true" | "yes" | "1" | "paid" | "completed" => Some(true),
            "false" | "no" | "0" => Some(false),
            _ => None,
        },
        Value::Number(n) => Some(n.as_i64().unwrap_or(0) != 0),
        _ => None,
    }
}

/// First alias present, as an array slice.
pub fn pick_array<'a>(obj: &'a Value, keys: &[&str]) -> Option<&'a Vec<Value>> {
    pick(obj, keys)?.as_array()
}

/// First alias present, normalized to [`Money`].
///
/// The custom provider ships decimal major units as JSON numbers or decimal
/// strings (`42.5`, `"42.50"`); both normalize to cents here.
pub fn pick_money(obj: &Value, keys: &[&str]) -> Option<Money> {
    match pick(obj, keys)? {
        Value::Number(n) => n.as_f64().map(Money::from_major_units),
        Value::String(s) => s.trim().parse::<f64>().ok().map(Money::from_major_units),
        _ => None,
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_first_present_wins() {
        // Both "total" and "grand_total" present: the earlier alias wins.
        let obj = json!({"total": 10.0, "grand_total": 99.0});
        assert_eq!(
            pick_money(&obj, aliases::ORDER_TOTAL).unwrap().cents(),
            1000
        );
    }

    #[test]
    fn test_alias_fallback_order() {
        let obj = json!({"grand_total": 42.5});
        assert_eq!(
            pick_money(&obj, aliases::ORDER_TOTAL).unwrap().cents(),
            4250
        );

        let obj = json!({"total_amount": "15.25"});
        assert_eq!(
            pick_money(&obj, aliases::ORDER_TOTAL).unwrap().cents(),
            1525
        );
    }

    #[test]
    fn test_pick_id_accepts_numbers() {
        assert_eq!(
            pick_id(&json!({"order_id": 17}), aliases::ORDER_ID).as_deref(),
            Some("17")
        );
        assert_eq!(
            pick_id(&json!({"id": "R1"}), aliases::ORDER_ID).as_deref(),
            Some("R1")
        );
        assert_eq!(pick_id(&json!({"id": ""}), aliases::ORDER_ID), None);
    }

    #[test]
    fn test_pick_i64_accepts_strings() {
        assert_eq!(pick_i64(&json!({"qty": "3"}), aliases::ITEM_QUANTITY), Some(3));
        assert_eq!(pick_i64(&json!({"count": 2}), aliases::ITEM_QUANTITY), Some(2));
    }

    #[test]
    fn test_pick_bool_spellings() {
        assert_eq!(pick_bool(&json!({"paid": true}), aliases::ORDER_PAID), Some(true));
        assert_eq!(pick_bool(&json!({"is_paid": "yes"}), aliases::ORDER_PAID), Some(true));
        assert_eq!(pick_bool(&json!({"completed": 1}), aliases::ORDER_PAID), Some(true));
        assert_eq!(pick_bool(&json!({"paid": "no"}), aliases::ORDER_PAID), Some(false));
    }

    #[test]
    fn test_null_values_skipped() {
        // "total": null must fall through to the next alias.
        let obj = json!({"total": null, "total_amount": 5.0});
        assert_eq!(pick_money(&obj, aliases::ORDER_TOTAL).unwrap().cents(), 500);
    }

    #[test]
    fn test_absent_returns_none() {
        let obj = json!({"unrelated": 1});
        assert!(pick(&obj, aliases::ORDER_TOTAL).is_none());
        assert!(pick_money(&json!([1, 2]), aliases::ORDER_TOTAL).is_none());
    }
}
