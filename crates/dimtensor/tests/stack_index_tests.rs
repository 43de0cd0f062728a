// Integration tests for indexing, unstacking and non-uniform stacking
//
// Run on both engines: every case builds its inputs inside a scope for the
// engine under test.

use dimtensor::prelude::*;

fn engines() -> Vec<BackendRef> {
    dimtensor::available_backends()
}

fn ramp(shape: Shape) -> Result<Tensor> {
    let n = shape.volume().unwrap_or(0);
    let values: Vec<f64> = (0..n).map(|i| i as f64).collect();
    Tensor::from_f64_slice(&values, shape, DType::FLOAT64)
}

#[test]
fn test_index_then_slice_drops_dimension() {
    for engine in engines() {
        let t = with_backend(engine, || ramp(spatial([("x", 10), ("y", 10)])?)).unwrap();
        let r = t
            .dim("x")
            .unwrap()
            .index(0)
            .unwrap()
            .index("y", Slice::from(1i64..9))
            .unwrap();
        assert_eq!(r.shape(), &spatial([("y", 8)]).unwrap());
        assert_eq!(r.volume(), Some(8));
        assert_eq!(r.to_f64_vec().unwrap()[0], 1.0);
    }
}

#[test]
fn test_unstack_divides_volume() {
    let t = ramp(
        spatial([("x", 3), ("y", 4)])
            .unwrap()
            .merge(&channel([("vector", "x,y")]).unwrap())
            .unwrap(),
    )
    .unwrap();
    let parts = t.unstack("y").unwrap();
    assert_eq!(parts.len(), 4);
    for part in parts.clone() {
        let part = part.unwrap();
        assert!(!part.shape().contains("y"));
        assert_eq!(part.volume(), Some(24 / 4));
    }
    // restartable: a second pass sees the same values
    let first: Vec<f64> = parts.clone().flat_map(|p| p.unwrap().to_f64_vec().unwrap()).collect();
    let second: Vec<f64> = parts.flat_map(|p| p.unwrap().to_f64_vec().unwrap()).collect();
    assert_eq!(first, second);
}

#[test]
fn test_select_mapping_and_labels() {
    let t = ramp(
        channel([("vector", "x,y,z")])
            .unwrap()
            .merge(&instance([("points", 4)]).unwrap())
            .unwrap(),
    )
    .unwrap();
    let r = t
        .select(&[
            ("vector", IndexSpec::Items(vec!["z".into(), "x".into()])),
            ("points", IndexSpec::Index(1)),
        ])
        .unwrap();
    assert_eq!(r.shape(), &channel([("vector", "z,x")]).unwrap());
    // points is the outer axis: row 1 holds 3, 4, 5
    assert_eq!(r.to_f64_vec().unwrap(), vec![5.0, 3.0]);
    assert!(matches!(
        t.index("vector", "w"),
        Err(Error::InvalidSlice(_))
    ));
    assert!(matches!(
        t.index("points", Slice::new(-2, None, 1)),
        Err(Error::InvalidSlice(_))
    ));
}

#[test]
fn test_non_uniform_stack_round_trip() {
    for engine in engines() {
        let inputs: Vec<Tensor> = [4usize, 5]
            .iter()
            .map(|&a| with_backend(engine.clone(), || ramp(spatial([("a", a), ("b", 2)])?)))
            .collect::<Result<_>>()
            .unwrap();
        let s = stack(&inputs, Dimension::new("c", DimKind::Channel, 2)).unwrap();

        assert!(!s.is_uniform());
        assert!(!s.shape().is_uniform());
        assert_eq!(s.volume(), None);
        match s.shape().get_size("a").unwrap() {
            Size::NonUniform { along, sizes } => {
                assert_eq!(along, "c");
                assert_eq!(sizes, &vec![4, 5]);
            }
            other => panic!("expected a per-slice size, got {other}"),
        }
        assert_eq!(s.shape().get_size("b").unwrap(), &Size::Fixed(2));
        let sizes = s.dim("a").unwrap().size_tensor().unwrap();
        assert_eq!(sizes.to_f64_vec().unwrap(), vec![4.0, 5.0]);

        let parts: Vec<Tensor> = s.unstack("c").unwrap().collect::<Result<_>>().unwrap();
        for (part, input) in parts.iter().zip(&inputs) {
            assert_eq!(part.shape(), input.shape());
            assert_eq!(part.to_f64_vec().unwrap(), input.to_f64_vec().unwrap());
        }
        assert!(matches!(s.unstack("a"), Err(Error::InvalidShape(_))));
    }
}

fn ragged(engine: &BackendRef) -> Tensor {
    with_backend(engine.clone(), || {
        let inputs = [
            full(spatial([("a", 4), ("b", 2)])?, 1.0, DType::FLOAT64)?,
            full(spatial([("a", 5), ("b", 2)])?, 2.0, DType::FLOAT64)?,
        ];
        stack(&inputs, Dimension::new("c", DimKind::Channel, 2))
    })
    .unwrap()
}

fn slices(t: &Tensor, along: &str) -> Vec<Tensor> {
    t.unstack(along).unwrap().collect::<Result<_>>().unwrap()
}

#[test]
fn test_join_spatial_with_non_uniform_operand() {
    for engine in engines() {
        let s = ragged(&engine);
        let grid = with_backend(engine.clone(), || {
            full(spatial([("x", 3)])?, 10.0, DType::FLOAT64)
        })
        .unwrap();

        let joined = join_spatial(&[s.clone(), grid]).unwrap();
        assert_eq!(joined[0].shape(), joined[1].shape());
        assert!(joined[1].is_stacked());
        assert!(joined[0].shape().contains("x"));

        let r = spatial_binary(BinaryOp::Add, &joined[0], &joined[1]).unwrap();
        let parts = slices(&r, "c");
        assert_eq!(
            parts[1].shape(),
            &spatial([("a", 5), ("b", 2), ("x", 3)]).unwrap()
        );
        assert_eq!(parts[0].to_f64_vec().unwrap(), vec![11.0; 24]);
        assert_eq!(parts[1].to_f64_vec().unwrap(), vec![12.0; 30]);
    }
}

#[test]
fn test_nested_non_uniform_stack_round_trip() {
    for engine in engines() {
        let s = ragged(&engine);
        let outer = Dimension::new("run", DimKind::Batch, 2);
        let twice = stack(&[s.clone(), s.add_scalar(1.0).unwrap()], outer).unwrap();
        assert!(!twice.shape().is_uniform());
        assert_eq!(twice.shape().names(), vec!["run", "c", "a", "b"]);

        let runs = slices(&twice, "run");
        assert_eq!(runs[0].shape(), s.shape());
        assert_eq!(slices(&runs[1], "c")[1].to_f64_vec().unwrap(), vec![3.0; 10]);
        assert_eq!(twice.expand(twice.shape()).unwrap().shape(), twice.shape());
    }
}

#[test]
fn test_malformed_per_slice_size_rejected() {
    let dims = |sizes: Vec<usize>| {
        vec![
            Dimension::new("c", DimKind::Channel, 2),
            Dimension::new(
                "a",
                DimKind::Spatial,
                Size::NonUniform {
                    along: "c".into(),
                    sizes,
                },
            ),
        ]
    };
    assert!(matches!(Shape::new(dims(vec![4])), Err(Error::InvalidShape(_))));
    let ok = Shape::new(dims(vec![4, 5])).unwrap();
    assert!(ok.slice_component("c", 2).is_err());
    assert!(matches!(
        ok.without(&["c"]).concat(&Shape::empty()),
        Err(Error::InvalidShape(_))
    ));
}

#[test]
fn test_non_uniform_ops_and_reductions() {
    let inputs: Vec<Tensor> = [2usize, 3]
        .iter()
        .map(|&n| full([("points", n)], n as f64, DType::FLOAT64))
        .collect::<Result<_>>()
        .unwrap();
    let s = stack(&inputs, Dimension::new("batch", DimKind::Batch, 2)).unwrap();
    let doubled = s.mul_scalar(2.0).unwrap();
    assert!(doubled.is_stacked());

    // per component: 2 * (2 + 2) and 2 * (3 + 3 + 3)
    let per_batch = doubled.sum(&["points"]).unwrap();
    assert!(per_batch.shape().is_uniform());
    assert_eq!(per_batch.to_f64_vec().unwrap(), vec![8.0, 18.0]);

    // element-weighted mean across both components: (4 + 9) / 5
    let mean = s.mean(&["points", "batch"]).unwrap();
    assert!((mean.to_scalar_f64().unwrap() - 13.0 / 5.0).abs() < 1e-12);

    // slicing the stacking dimension picks components
    let second = s.dim("batch").unwrap().slice(1i64..).unwrap();
    assert_eq!(second.shape().get_size("points").unwrap(), &Size::Fixed(3));
}

#[test]
fn test_concat_keeps_position_and_labels() {
    let a = ramp(
        channel([("vector", "x,y")])
            .unwrap()
            .merge(&spatial([("x", 2)]).unwrap())
            .unwrap(),
    )
    .unwrap();
    let b = ramp(
        channel([("vector", "z")])
            .unwrap()
            .merge(&spatial([("x", 2)]).unwrap())
            .unwrap(),
    )
    .unwrap();
    let c = concat(&[a, b], "vector").unwrap();
    assert_eq!(c.shape().names(), vec!["vector", "x"]);
    assert_eq!(
        c.shape().dim("vector").unwrap().item_names().unwrap(),
        &["x".to_string(), "y".to_string(), "z".to_string()]
    );
    assert_eq!(c.to_f64_vec().unwrap(), vec![0.0, 1.0, 2.0, 3.0, 0.0, 1.0]);
}
