use std::collections::{BTreeMap, BTreeSet};

use matrix_bench::core::{ParamValue, ParameterSpace, Permutation};

fn space() -> ParameterSpace {
    ParameterSpace::default()
        .with_dimension("threads", [1i64, 2, 4])
        .with_dimension("size", [64i64, 128])
        .with_dimension("workload", ["alloc", "free"])
}

#[test]
fn count_is_product_of_dimension_sizes() {
    let space = space();
    let perms: Vec<Permutation> = space.iter().collect();
    assert_eq!(perms.len(), 3 * 2 * 2);
    assert_eq!(space.len(), perms.len());

    let distinct: BTreeSet<_> = perms.iter().cloned().collect();
    assert_eq!(distinct.len(), perms.len());

    // every combination appears
    for t in [1i64, 2, 4] {
        for s in [64i64, 128] {
            for w in ["alloc", "free"] {
                assert!(perms.iter().any(|p| {
                    p.get("threads") == Some(&ParamValue::Int(t))
                        && p.get("size") == Some(&ParamValue::Int(s))
                        && p.get("workload") == Some(&ParamValue::from(w))
                }));
            }
        }
    }
}

#[test]
fn zero_dimensions_yield_one_empty_permutation() {
    let space = ParameterSpace::default();
    let perms: Vec<_> = space.iter().collect();
    assert_eq!(perms, vec![Permutation::empty()]);
    assert_eq!(perms[0].joined(), "");
}

#[test]
fn enumeration_is_repeatable() {
    let space = space();
    let first: Vec<_> = space.iter().collect();
    let second: Vec<_> = (&space).into_iter().collect();
    assert_eq!(first, second);
    assert_eq!(first[0].joined(), "64-1-alloc");
    assert_eq!(first[1].joined(), "64-1-free");
}

#[test]
fn fixing_dimensions_keeps_order_and_count() {
    let space = space();
    let mut fixed = BTreeMap::new();
    fixed.insert("size".to_string(), ParamValue::Int(128));

    let filtered: Vec<_> = space.iter_fixed(&fixed).collect();
    assert_eq!(filtered.len(), 3 * 2);
    assert!(filtered.iter().all(|p| p.get("size") == Some(&ParamValue::Int(128))));

    let expected: Vec<_> = space
        .iter()
        .filter(|p| p.get("size") == Some(&ParamValue::Int(128)))
        .collect();
    assert_eq!(filtered, expected);

    fixed.insert("workload".to_string(), ParamValue::from("free"));
    assert_eq!(space.iter_fixed(&fixed).count(), 3);
}

#[test]
fn flattened_keys_rebuild_equal_permutations() {
    let space = space();
    for perm in space.iter() {
        assert_eq!(space.permutation(&perm.to_map()).unwrap(), perm);
    }
}
