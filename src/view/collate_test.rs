use rand::{prelude::random, rngs::SmallRng, Rng, SeedableRng};
use serde_json::{json, Value};

use super::*;

// fixtures in strictly increasing collation order.
fn ordered_fixtures() -> Vec<Value> {
    vec![
        json!(null),
        json!(false),
        json!(true),
        json!(-10),
        json!(0),
        json!(2.5),
        json!(3),
        json!(10),
        json!(""),
        json!("a"),
        json!("aa"),
        json!("b"),
        json!("ba"),
        json!([]),
        json!([1]),
        json!([1, 2]),
        json!([1, 3]),
        json!([2]),
        json!(["a"]),
        json!({}),
        json!({"a": 1}),
        json!({"a": 2}),
        json!({"b": 1}),
        json!({"b": 1, "c": 2}),
    ]
}

#[test]
fn test_collate_order() {
    use std::cmp::Ordering;

    let fixtures = ordered_fixtures();
    for (i, x) in fixtures.iter().enumerate() {
        for (j, y) in fixtures.iter().enumerate() {
            let expect = i.cmp(&j);
            let got = collate_json(x, y);
            assert_eq!(got, expect, "{:?} vs {:?}", x, y);
        }
    }

    // numbers compare numerically across integer/float forms.
    assert_eq!(collate_json(&json!(2), &json!(2.0)), Ordering::Equal);
    assert_eq!(collate_json(&json!(10), &json!(9.5)), Ordering::Greater);
}

#[test]
fn test_collate_totality() {
    use std::cmp::Ordering;

    let seed: u64 = random();
    println!("test_collate_totality {}", seed);
    let mut rng = SmallRng::seed_from_u64(seed);

    let fixtures = ordered_fixtures();
    let pick = |rng: &mut SmallRng| -> Value {
        fixtures[rng.gen::<usize>() % fixtures.len()].clone()
    };

    for _i in 0..1000 {
        let (x, y, z) = (pick(&mut rng), pick(&mut rng), pick(&mut rng));

        // antisymmetry
        assert_eq!(collate_json(&x, &y), collate_json(&y, &x).reverse());

        // transitivity
        if collate_json(&x, &y) != Ordering::Greater
            && collate_json(&y, &z) != Ordering::Greater
        {
            assert_ne!(
                collate_json(&x, &z),
                Ordering::Greater,
                "{:?} {:?} {:?}",
                x,
                y,
                z
            );
        }
    }
}
