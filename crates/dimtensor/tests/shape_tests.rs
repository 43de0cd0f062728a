// Integration tests for the shape algebra
//
// Merge, filter and only are checked over every pair drawn from a pool of
// shapes that mixes kinds, labels, symbolic sizes and differing orders.

use dimtensor::prelude::*;

fn pool() -> Vec<Shape> {
    let sym = |name: &str, kind| {
        Shape::new(vec![Dimension::new(name, kind, Size::Symbolic)]).unwrap()
    };
    vec![
        Shape::empty(),
        spatial([("x", 5), ("y", 4)]).unwrap(),
        spatial([("y", 4), ("x", 5)]).unwrap(),
        spatial([("y", 4)]).unwrap(),
        spatial([("z", 3)]).unwrap(),
        channel([("vector", "x,y")]).unwrap(),
        channel([("vector", 2)]).unwrap(),
        batch([("batch", 8)]).unwrap(),
        instance([("points", 10)]).unwrap(),
        sym("x", DimKind::Spatial),
        sym("points", DimKind::Instance),
        batch([("batch", 8)])
            .unwrap()
            .merge(&spatial([("x", 5)]).unwrap())
            .unwrap()
            .merge(&channel([("vector", "x,y")]).unwrap())
            .unwrap(),
    ]
}

#[test]
fn test_merge_is_commutative_and_idempotent() {
    let shapes = pool();
    let mut checked = 0;
    for a in &shapes {
        for b in &shapes {
            let Ok(ab) = a.merge(b) else {
                assert!(b.merge(a).is_err(), "merge({a}, {b}) fails one way only");
                continue;
            };
            assert_eq!(ab, b.merge(a).unwrap(), "merge({a}, {b})");
            assert_eq!(ab.merge(b).unwrap(), ab, "merge(merge({a}, {b}), {b})");
            checked += 1;
        }
    }
    assert!(checked > 100);
}

#[test]
fn test_filter_then_without_is_empty() {
    for s in pool() {
        for kind in DimKind::ALL {
            let part = s.filter(&[kind]);
            assert!(part.without(&part.names()).is_empty());
        }
        assert_eq!(s.only(&s.names()), s);
    }
}

#[test]
fn test_merge_is_canonical() {
    let a = spatial([("x", 5)]).unwrap();
    let b = batch([("batch", 2)])
        .unwrap()
        .merge(&channel([("vector", 3)]).unwrap())
        .unwrap();
    let m = a.merge(&b).unwrap();
    assert_eq!(m.names(), vec!["batch", "vector", "x"]);
    assert_eq!(m.to_string(), "(batch:b=2, vector:c=3, x:s=5)");
}

#[test]
fn test_batch_conflict_follows_policy() {
    let a = batch([("batch", 4)]).unwrap();
    let b = batch([("batch", 1)]).unwrap();
    assert!(matches!(a.merge(&b), Err(Error::IncompatibleShapes { .. })));
    let m = a.merge_with(&b, BatchMergePolicy::BroadcastUnit).unwrap();
    assert_eq!(m.get_size("batch").unwrap(), &Size::Fixed(4));
}
