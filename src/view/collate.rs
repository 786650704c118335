//! CouchDB collation over dynamic JSON values.
//!
//! The total order: null < false < true < numbers < strings < arrays <
//! objects. Numbers order numerically, strings by unicode code-point,
//! arrays lexicographically on elements, objects lexicographically on
//! their key-sorted (key, value) pairs. Range selection and reduce
//! grouping both lean on this order being total.

use serde_json::Value;

use std::cmp::Ordering;

/// Compare two JSON values under CouchDB collation.
pub fn collate_json(a: &Value, b: &Value) -> Ordering {
    let (ra, rb) = (type_rank(a), type_rank(b));
    if ra != rb {
        return ra.cmp(&rb);
    }

    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64().unwrap_or(f64::NAN);
            let y = y.as_f64().unwrap_or(f64::NAN);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        // UTF-8 byte order is unicode code-point order.
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Array(xs), Value::Array(ys)) => {
            for (x, y) in xs.iter().zip(ys.iter()) {
                match collate_json(x, y) {
                    Ordering::Equal => (),
                    ord => return ord,
                }
            }
            xs.len().cmp(&ys.len())
        }
        (Value::Object(xs), Value::Object(ys)) => {
            let mut xs: Vec<(&String, &Value)> = xs.iter().collect();
            let mut ys: Vec<(&String, &Value)> = ys.iter().collect();
            xs.sort_by(|p, q| p.0.cmp(q.0));
            ys.sort_by(|p, q| p.0.cmp(q.0));

            for ((xk, xv), (yk, yv)) in xs.iter().zip(ys.iter()) {
                match xk.cmp(yk) {
                    Ordering::Equal => (),
                    ord => return ord,
                }
                match collate_json(xv, yv) {
                    Ordering::Equal => (),
                    ord => return ord,
                }
            }
            xs.len().cmp(&ys.len())
        }
        _ => unreachable!(),
    }
}

fn type_rank(v: &Value) -> u8 {
    match v {
        Value::Null => 0,
        Value::Bool(false) => 1,
        Value::Bool(true) => 2,
        Value::Number(_) => 3,
        Value::String(_) => 4,
        Value::Array(_) => 5,
        Value::Object(_) => 6,
    }
}

#[cfg(test)]
#[path = "collate_test.rs"]
mod collate_test;
