use std::collections::HashMap;

use rand::{rngs::StdRng, Rng, SeedableRng};

use vela_core::{
    calculate_max_window, execute_window_loop, intersect_valid_regions,
    update_window_and_padding, AccessWindow, BorderSize, Coordinates, DataType, ErrorKind, Steps,
    Tensor, TensorAccess, TensorInfo, TensorShape, ValidRegion, Window, WindowDimension,
};

fn random_window(rng: &mut StdRng) -> Window {
    let mut window = Window::new();
    for d in 0..4 {
        let start = rng.random_range::<i32, _>(-3..4) as isize;
        let len = rng.random_range::<i32, _>(0..12) as isize;
        let step = rng.random_range(1..5);
        window.set(d, WindowDimension::new(start, start + len, step));
    }
    window
}

fn visited(window: &Window) -> Vec<Vec<isize>> {
    let mut out = Vec::new();
    execute_window_loop(window, |c| out.push(c.as_array().to_vec()));
    out
}

#[test]
fn max_window_floors_to_step_when_border_undefined() -> Result<(), Box<dyn std::error::Error>> {
    let mut rng = StdRng::seed_from_u64(7);
    for _ in 0..500 {
        let width = rng.random_range(0..200);
        let height = rng.random_range(1..20);
        let step = rng.random_range(1..17);
        let info = TensorInfo::new(TensorShape::new(&[width, height]), DataType::U8)?;
        let window = calculate_max_window(&info, &Steps::new(&[step]), true, BorderSize::default());
        assert!(window.validate().is_ok());
        assert_eq!(window[0].start(), 0);
        assert_eq!(window[0].end() as usize, (width / step) * step);
        assert_eq!(window[0].step(), step);
        assert_eq!(window[1], WindowDimension::new(0, height as isize, 1));
    }
    Ok(())
}

#[test]
fn scenario_13x11_step_8() -> Result<(), Box<dyn std::error::Error>> {
    let info = TensorInfo::new(TensorShape::new(&[13, 11]), DataType::U8)?;
    let window = calculate_max_window(&info, &Steps::new(&[8]), true, BorderSize::default());
    assert_eq!(window[0], WindowDimension::new(0, 8, 8));
    assert_eq!(window[1], WindowDimension::new(0, 11, 1));
    Ok(())
}

#[test]
fn slices_of_legal_sub_windows_visit_each_position_once() {
    let mut rng = StdRng::seed_from_u64(11);
    for _ in 0..300 {
        let full = random_window(&mut rng);
        let axis = rng.random_range(0..4);
        let total = rng.random_range(1..5);
        let id = rng.random_range(0..total);
        let sub = full.split_window(axis, id, total);
        assert!(sub.is_sub_window_of(&full).is_ok());

        let expected = visited(&sub);
        for rank in 1..=4 {
            let mut counts: HashMap<Vec<isize>, usize> = HashMap::new();
            for slice in sub.slices(rank) {
                assert!(slice.is_sub_window_of(&sub).is_ok());
                for coords in visited(&slice) {
                    *counts.entry(coords).or_default() += 1;
                }
            }
            assert_eq!(counts.len(), expected.len());
            assert!(counts.values().all(|&c| c == 1));
            assert!(expected.iter().all(|c| counts.contains_key(c)));
        }
    }
}

#[test]
fn split_windows_partition_the_axis() {
    let mut rng = StdRng::seed_from_u64(3);
    for _ in 0..300 {
        let full = random_window(&mut rng);
        let axis = rng.random_range(0..4);
        let total = rng.random_range(1..9);
        let mut covered: Vec<Vec<isize>> = (0..total)
            .flat_map(|id| visited(&full.split_window(axis, id, total)))
            .collect();
        let mut expected = visited(&full);
        covered.sort();
        expected.sort();
        assert_eq!(covered, expected);
    }
}

#[test]
fn misaligned_sub_window_is_rejected() {
    let full = Window::from_dimensions(&[
        WindowDimension::new(0, 16, 4),
        WindowDimension::new(0, 4, 1),
    ]);
    let sub = Window::from_dimensions(&[
        WindowDimension::new(2, 10, 4),
        WindowDimension::new(0, 4, 1),
    ]);
    let err = sub.is_sub_window_of(&full).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Precondition);
}

fn random_region(rng: &mut StdRng) -> ValidRegion {
    let x = rng.random_range::<i32, _>(0..10) as isize;
    let y = rng.random_range::<i32, _>(0..10) as isize;
    let w = rng.random_range(0..10);
    let h = rng.random_range(0..10);
    ValidRegion::new(Coordinates::from([x, y, 0]), TensorShape::new(&[w, h, 3]))
}

#[test]
fn intersection_is_commutative_associative_and_idempotent() -> Result<(), Box<dyn std::error::Error>> {
    let mut rng = StdRng::seed_from_u64(5);
    for _ in 0..500 {
        let (a, b, c) = (
            random_region(&mut rng),
            random_region(&mut rng),
            random_region(&mut rng),
        );
        let ab = intersect_valid_regions(&[a, b], 2)?;
        let ba = intersect_valid_regions(&[b, a], 2)?;
        assert_eq!(ab, ba);

        let ab_c = intersect_valid_regions(&[ab, c], 2)?;
        let bc = intersect_valid_regions(&[b, c], 2)?;
        let a_bc = intersect_valid_regions(&[a, bc], 2)?;
        assert_eq!(ab_c, a_bc);
        assert_eq!(ab_c, intersect_valid_regions(&[a, b, c], 2)?);

        assert_eq!(intersect_valid_regions(&[a, a], 2)?, a);
    }
    Ok(())
}

#[test]
fn scenario_intersection_10x10_and_8x8() -> Result<(), Box<dyn std::error::Error>> {
    let a = ValidRegion::new(Coordinates::from([0, 0]), TensorShape::new(&[10, 10]));
    let b = ValidRegion::new(Coordinates::from([1, 1]), TensorShape::new(&[8, 8]));
    let out = intersect_valid_regions(&[a, b], 2)?;
    assert_eq!((out.start(0), out.start(1)), (1, 1));
    assert_eq!(out.shape.as_slice(), &[8, 8]);
    Ok(())
}

fn random_access(rng: &mut StdRng) -> AccessWindow {
    match rng.random_range(0..3) {
        0 => AccessWindow::horizontal(rng.random_range::<i32, _>(-2..3) as isize, rng.random_range(1..9)),
        1 => AccessWindow::rectangle(
            rng.random_range::<i32, _>(-2..3) as isize,
            rng.random_range::<i32, _>(-2..3) as isize,
            rng.random_range(1..9),
            rng.random_range(1..4),
        ),
        _ => AccessWindow::static_region(
            rng.random_range::<i32, _>(-2..1) as isize,
            rng.random_range::<i32, _>(-2..1) as isize,
            rng.random_range::<i32, _>(8..20) as isize,
            rng.random_range::<i32, _>(4..10) as isize,
        ),
    }
}

#[test]
fn update_window_and_padding_is_idempotent() -> Result<(), Box<dyn std::error::Error>> {
    let mut rng = StdRng::seed_from_u64(13);
    for _ in 0..300 {
        let shape = TensorShape::new(&[rng.random_range(1..40), rng.random_range(1..10)]);
        let step = rng.random_range(1..9);
        let border_undefined = rng.random_bool(0.5);

        let fresh = TensorInfo::new(shape, DataType::U8)?;
        let mut input = if rng.random_bool(0.5) {
            Tensor::allocate(fresh.clone())?.info().clone()
        } else {
            fresh.clone()
        };
        let mut output = fresh;
        let (in_access, out_access) = (random_access(&mut rng), random_access(&mut rng));

        let mut window = calculate_max_window(
            &input,
            &Steps::new(&[step]),
            border_undefined,
            BorderSize::uniform(1),
        );
        update_window_and_padding(
            &mut window,
            &mut [
                TensorAccess::new(&mut input, in_access),
                TensorAccess::new(&mut output, out_access),
            ],
        )?;
        let (window_once, input_once, output_once) = (window, input.clone(), output.clone());

        let changed = update_window_and_padding(
            &mut window,
            &mut [
                TensorAccess::new(&mut input, in_access),
                TensorAccess::new(&mut output, out_access),
            ],
        )?;
        assert!(!changed);
        assert_eq!(window, window_once);
        assert_eq!(input, input_once);
        assert_eq!(output, output_once);

        for (info, access) in [(&input, in_access), (&output, out_access)] {
            assert!(info.padding().covers(&access.needed_padding(&window, info)));
        }
    }
    Ok(())
}

#[test]
fn scaled_window_covers_every_mapped_position() {
    let mut rng = StdRng::seed_from_u64(17);
    for _ in 0..1000 {
        let start = rng.random_range::<i32, _>(0..20) as isize;
        let len = rng.random_range::<i32, _>(0..50) as isize;
        let step = rng.random_range(1..6);
        let factor = [0.25f32, 0.5, 1.0, 1.5, 2.0, 3.0][rng.random_range(0..6)];

        let mut window = Window::new();
        window.set(0, WindowDimension::new(start, start + len, step));
        let original = window;
        window.scale(0, factor);
        let scaled = window[0];

        assert!(scaled.start() <= scaled.end());
        assert_eq!((scaled.end() - scaled.start()) as usize % scaled.step(), 0);
        execute_window_loop(&original, |c| {
            let mapped = (c.get(0) as f64 * f64::from(factor)).floor() as isize;
            assert!(mapped >= scaled.start() && mapped < scaled.end());
        });
    }
}
