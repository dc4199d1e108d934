use crate::{
    border::BorderSize,
    dimensions::{Coordinates, Steps, MAX_DIMS},
    info::TensorInfo,
    valid_region::ValidRegion,
    window::{Window, WindowDimension},
};

/// Rounds `value` up to the next multiple of `multiple`.
#[inline]
pub fn ceil_to_multiple(value: usize, multiple: usize) -> usize {
    value.div_ceil(multiple) * multiple
}

/// Rounds `value` down to the previous multiple of `multiple`.
#[inline]
pub fn floor_to_multiple(value: usize, multiple: usize) -> usize {
    (value / multiple) * multiple
}

fn round_extent(extent: isize, step: usize, border_undefined: bool) -> isize {
    let extent = extent.max(0) as usize;
    let step = step.max(1);
    let rounded = if border_undefined {
        floor_to_multiple(extent, step)
    } else {
        ceil_to_multiple(extent, step)
    };
    rounded as isize
}

fn outer_dimensions(window: &mut Window, region: &ValidRegion, steps: &Steps, border_undefined: bool) {
    for d in 2..MAX_DIMS {
        let start = region.start(d);
        let extent = region.shape.get(d) as isize;
        window.set(
            d,
            WindowDimension::new(
                start,
                start + round_extent(extent, steps.get(d), border_undefined),
                steps.get(d).max(1),
            ),
        );
    }
}

/// Largest window a kernel can run over the valid region of `info`.
///
/// See [`calculate_max_window_for_region`].
pub fn calculate_max_window(
    info: &TensorInfo,
    steps: &Steps,
    border_undefined: bool,
    border: BorderSize,
) -> Window {
    calculate_max_window_for_region(info.valid_region(), steps, border_undefined, border)
}

/// Largest window a kernel processing `steps` elements per iteration can run over `region`.
///
/// When `border_undefined` is set, nothing outside the region may be read: the x and
/// y ranges skip `border` and are rounded down to a multiple of the step, leaving the
/// remainder to a border pass. Otherwise the border is ignored and every range is
/// rounded up, relying on padding for the overshoot.
pub fn calculate_max_window_for_region(
    region: &ValidRegion,
    steps: &Steps,
    border_undefined: bool,
    border: BorderSize,
) -> Window {
    let border = if border_undefined {
        border
    } else {
        BorderSize::default()
    };

    let mut window = Window::new();
    let x_start = region.start(0) + border.left as isize;
    let x_extent = region.shape.get(0) as isize - (border.left + border.right) as isize;
    window.set(
        0,
        WindowDimension::new(
            x_start,
            x_start + round_extent(x_extent, steps.get(0), border_undefined),
            steps.get(0).max(1),
        ),
    );

    let y_start = region.start(1) + border.top as isize;
    let y_extent = region.shape.get(1) as isize - (border.top + border.bottom) as isize;
    window.set(
        1,
        WindowDimension::new(
            y_start,
            y_start + round_extent(y_extent, steps.get(1), border_undefined),
            steps.get(1).max(1),
        ),
    );

    outer_dimensions(&mut window, region, steps, border_undefined);
    window
}

/// Largest window of a kernel that only has a horizontal halo.
///
/// With `border_undefined` the x range skips the left and right border. Otherwise x
/// spans the whole region and y is extended by the top and bottom border, so the
/// kernel also produces the rows a following vertical pass reads.
pub fn calculate_max_window_horizontal(
    region: &ValidRegion,
    steps: &Steps,
    border_undefined: bool,
    border: BorderSize,
) -> Window {
    let (left, right, top, bottom) = if border_undefined {
        (border.left, border.right, 0, 0)
    } else {
        (0, 0, border.top, border.bottom)
    };

    let mut window = Window::new();
    let x_start = region.start(0) + left as isize;
    let x_extent = region.shape.get(0) as isize - (left + right) as isize;
    window.set(
        0,
        WindowDimension::new(
            x_start,
            x_start + round_extent(x_extent, steps.get(0), border_undefined),
            steps.get(0).max(1),
        ),
    );
    window.set(
        1,
        WindowDimension::new(
            region.start(1) - top as isize,
            region.end(1) + bottom as isize,
            1,
        ),
    );

    outer_dimensions(&mut window, region, steps, border_undefined);
    window
}

/// Window covering the region enlarged by `border` on x and y.
///
/// Used by kernels that write the border itself, such as border fills.
pub fn calculate_max_enlarged_window(
    region: &ValidRegion,
    steps: &Steps,
    border: BorderSize,
) -> Window {
    let mut window = Window::new();
    let enlarged = |start: isize, extent: usize, before: usize, after: usize, step: usize| {
        let start = start - before as isize;
        let end = start + ceil_to_multiple(extent + before + after, step.max(1)) as isize;
        WindowDimension::new(start, end, step.max(1))
    };
    window.set(
        0,
        enlarged(
            region.start(0),
            region.shape.get(0),
            border.left,
            border.right,
            steps.get(0),
        ),
    );
    window.set(
        1,
        enlarged(
            region.start(1),
            region.shape.get(1),
            border.top,
            border.bottom,
            steps.get(1),
        ),
    );
    outer_dimensions(&mut window, region, steps, false);
    window
}

/// Calls `f` for every position the window visits, innermost axis fastest.
///
/// Nothing is visited if any axis is empty.
pub fn execute_window_loop<F>(window: &Window, mut f: F)
where
    F: FnMut(&Coordinates),
{
    if window.is_empty() {
        return;
    }
    let mut coords = Coordinates::default();
    for d in 0..MAX_DIMS {
        coords.set(d, window[d].start());
    }
    loop {
        f(&coords);
        let mut d = 0;
        loop {
            let next = coords.get(d) + window[d].step() as isize;
            if next < window[d].end() {
                coords.set(d, next);
                break;
            }
            coords.set(d, window[d].start());
            d += 1;
            if d == MAX_DIMS {
                return;
            }
        }
    }
}
