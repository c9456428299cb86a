//! The filterql value model.
//!
//! A hand-rolled enum rather than `serde_json::Value`: object key order is a
//! hard invariant here (`BTreeMap` keeps it sorted for free), and the total
//! order over values (§3) needs a home that `serde_json::Value` has no
//! reason to provide.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

#[derive(Clone, Debug)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Vec<Value>),
    Object(BTreeMap<String, Value>),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
        }
    }

    /// Only `null` and `false` are falsey; everything else, including `0`
    /// and `""`, is truthy.
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Null | Value::Bool(false))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// A rank used to order values of different types; see §3's total
    /// order `Null < Bool < Number < String < Array < Object`.
    fn type_rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            Value::Array(_) => 4,
            Value::Object(_) => 5,
        }
    }

    /// The total order used by comparators, `sort`, `min`/`max`, and
    /// descending-path ordering in the assignment engine. Distinct from
    /// [`PartialEq`], under which `NaN != NaN`; here every value —
    /// including every NaN bit pattern — has a definite place via
    /// `f64::total_cmp`, so sorting never panics or stalls on
    /// incomparable numbers.
    pub fn total_cmp(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Number(a), Value::Number(b)) => a.total_cmp(b),
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (Value::Array(a), Value::Array(b)) => {
                for (x, y) in a.iter().zip(b.iter()) {
                    let ord = x.total_cmp(y);
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                a.len().cmp(&b.len())
            }
            (Value::Object(a), Value::Object(b)) => {
                let mut ak: Vec<_> = a.keys().collect();
                let mut bk: Vec<_> = b.keys().collect();
                ak.sort();
                bk.sort();
                let key_ord = ak.cmp(&bk);
                if key_ord != Ordering::Equal {
                    return key_ord;
                }
                for k in ak {
                    let ord = a[k].total_cmp(&b[k]);
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                Ordering::Equal
            }
            _ => self.type_rank().cmp(&other.type_rank()),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            // Structural equality, not total order: NaN != NaN here.
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    /// Canonical form: compact JSON with object keys in sorted order, the
    /// same rendering `tostring` produces.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(n) => write!(f, "{}", format_number(*n)),
            Value::String(s) => write!(f, "{}", format_json_string(s)),
            Value::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Value::Object(entries) => {
                write!(f, "{{")?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{}:{v}", format_json_string(k))?;
                }
                write!(f, "}}")
            }
        }
    }
}

fn format_number(n: f64) -> String {
    if n.is_nan() {
        return "null".to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "1.7976931348623157e+308" } else { "-1.7976931348623157e+308" }.to_string();
    }
    if n.fract() == 0.0 && n.abs() < 1e17 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

fn format_json_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::Array(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => {
                Value::Object(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl From<Value> for serde_json::Value {
    fn from(v: Value) -> Self {
        match v {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(b),
            Value::Number(n) => serde_json::Number::from_f64(n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s),
            Value::Array(items) => {
                serde_json::Value::Array(items.into_iter().map(Into::into).collect())
            }
            Value::Object(entries) => serde_json::Value::Object(
                entries.into_iter().map(|(k, v)| (k, v.into())).collect(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_is_structural_not_total_order() {
        let nan = Value::Number(f64::NAN);
        assert_ne!(nan, nan.clone());
        assert_eq!(nan.total_cmp(&nan), Ordering::Equal);
    }

    #[test]
    fn type_rank_orders_across_types() {
        assert_eq!(Value::Null.total_cmp(&Value::Bool(false)), Ordering::Less);
        assert_eq!(
            Value::Bool(true).total_cmp(&Value::Number(0.0)),
            Ordering::Less
        );
        assert_eq!(
            Value::Array(vec![]).total_cmp(&Value::Object(BTreeMap::new())),
            Ordering::Less
        );
    }

    #[test]
    fn display_sorts_object_keys() {
        let mut m = BTreeMap::new();
        m.insert("b".to_string(), Value::Number(2.0));
        m.insert("a".to_string(), Value::Number(1.0));
        assert_eq!(Value::Object(m).to_string(), r#"{"a":1,"b":2}"#);
    }

    #[test]
    fn display_integers_without_fraction() {
        assert_eq!(Value::Number(3.0).to_string(), "3");
        assert_eq!(Value::Number(3.5).to_string(), "3.5");
    }

    // ------------------------------------------------------------------
    // property-based tests over the total order (§3)
    // ------------------------------------------------------------------

    fn arb_scalar() -> impl proptest::strategy::Strategy<Value = Value> {
        use proptest::prelude::*;
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<f64>().prop_map(Value::Number),
            ".{0,8}".prop_map(Value::String),
        ]
    }

    proptest::proptest! {
        #[test]
        fn property_total_cmp_is_antisymmetric(a in arb_scalar(), b in arb_scalar()) {
            let ab = a.total_cmp(&b);
            let ba = b.total_cmp(&a);
            proptest::prop_assert_eq!(ab, ba.reverse());
        }

        #[test]
        fn property_total_cmp_is_reflexive(a in arb_scalar()) {
            proptest::prop_assert_eq!(a.total_cmp(&a), Ordering::Equal);
        }

        #[test]
        fn property_total_cmp_is_transitive(a in arb_scalar(), b in arb_scalar(), c in arb_scalar()) {
            let ab = a.total_cmp(&b);
            let bc = b.total_cmp(&c);
            if ab != Ordering::Greater && bc != Ordering::Greater {
                proptest::prop_assert_ne!(a.total_cmp(&c), Ordering::Greater);
            }
        }

        #[test]
        fn property_sorting_by_total_cmp_is_idempotent(mut values in proptest::collection::vec(arb_scalar(), 0..12)) {
            values.sort_by(Value::total_cmp);
            let once = values.clone();
            values.sort_by(Value::total_cmp);
            proptest::prop_assert_eq!(once, values);
        }
    }
}
