use std::ops::Index;

use crate::{
    dimensions::{Coordinates, TensorShape, MAX_DIMS},
    error::{ensure, Status},
    helpers::ceil_to_multiple,
};

/// Iteration range of one axis: `[start, end)` advancing by `step`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct WindowDimension {
    start: isize,
    end: isize,
    step: usize,
}

impl Default for WindowDimension {
    fn default() -> Self {
        Self::new(0, 1, 1)
    }
}

impl WindowDimension {
    /// Creates a dimension iterating `[start, end)` by `step`.
    pub const fn new(start: isize, end: isize, step: usize) -> Self {
        Self { start, end, step }
    }

    /// First position.
    #[inline]
    pub fn start(&self) -> isize {
        self.start
    }

    /// One past the last position.
    #[inline]
    pub fn end(&self) -> isize {
        self.end
    }

    /// Distance between two iterated positions.
    #[inline]
    pub fn step(&self) -> usize {
        self.step
    }

    /// Changes the end of the range.
    pub fn set_end(&mut self, end: isize) {
        self.end = end;
    }

    /// Number of positions visited: `ceil((end - start) / step)`, 0 if empty.
    #[inline]
    pub fn num_iterations(&self) -> usize {
        if self.end <= self.start || self.step == 0 {
            return 0;
        }
        ((self.end - self.start) as usize).div_ceil(self.step)
    }

    /// Returns true if no position is visited.
    pub fn is_empty(&self) -> bool {
        self.num_iterations() == 0
    }
}

impl std::fmt::Display for WindowDimension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {}) step {}", self.start, self.end, self.step)
    }
}

/// Iteration domain of a kernel: one [`WindowDimension`] per axis.
///
/// Axes that are never set iterate the single position 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Window {
    dims: [WindowDimension; MAX_DIMS],
}

/// Axis of the x coordinate.
pub const DIM_X: usize = 0;
/// Axis of the y coordinate.
pub const DIM_Y: usize = 1;
/// Axis of the z coordinate.
pub const DIM_Z: usize = 2;

impl Window {
    /// A window iterating a single position on every axis.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a window from the leading dimensions.
    pub fn from_dimensions(dims: &[WindowDimension]) -> Self {
        let mut window = Self::new();
        for (d, dim) in dims.iter().take(MAX_DIMS).enumerate() {
            window.dims[d] = *dim;
        }
        window
    }

    /// Dimension of axis `d`.
    #[inline]
    pub fn get(&self, d: usize) -> WindowDimension {
        self.dims[d]
    }

    /// Replaces the dimension of axis `d`.
    pub fn set(&mut self, d: usize, dim: WindowDimension) -> &mut Self {
        self.dims[d] = dim;
        self
    }

    /// Changes the step of axis `d`, keeping its range.
    pub fn set_dimension_step(&mut self, d: usize, step: usize) -> &mut Self {
        self.dims[d].step = step;
        self
    }

    /// Checks that every axis has `start <= end` and a positive step.
    #[track_caller]
    pub fn validate(&self) -> Status {
        for (d, dim) in self.dims.iter().enumerate() {
            ensure(dim.start <= dim.end, || {
                format!("window axis {d} has start > end: {dim}")
            })?;
            ensure(dim.step > 0, || format!("window axis {d} has a zero step"))?;
        }
        Ok(())
    }

    /// Returns true if some axis visits no position.
    pub fn is_empty(&self) -> bool {
        self.dims.iter().any(WindowDimension::is_empty)
    }

    /// Number of positions visited on axis `d`.
    #[inline]
    pub fn num_iterations(&self, d: usize) -> usize {
        self.dims[d].num_iterations()
    }

    /// Number of positions visited over all axes.
    pub fn num_iterations_total(&self) -> usize {
        self.dims
            .iter()
            .fold(1usize, |acc, d| acc.saturating_mul(d.num_iterations()))
    }

    /// Extent `end - start` of every axis.
    pub fn shape(&self) -> TensorShape {
        let extents: Vec<usize> = self
            .dims
            .iter()
            .map(|d| (d.end - d.start).max(0) as usize)
            .collect();
        TensorShape::new(&extents)
    }

    /// Sets every axis from `first_dim` upward to `[0, shape[d])` with step 1.
    pub fn use_tensor_dimensions(&mut self, shape: &TensorShape, first_dim: usize) -> &mut Self {
        for d in first_dim..MAX_DIMS {
            self.dims[d] = WindowDimension::new(0, shape.get(d).max(1) as isize, 1);
        }
        self
    }

    /// Moves the start (`at_start`) or the end of axis `d` by `delta`.
    pub fn adjust(&mut self, d: usize, delta: isize, at_start: bool) -> &mut Self {
        let dim = &mut self.dims[d];
        if at_start {
            dim.start += delta;
        } else {
            dim.end += delta;
        }
        self
    }

    /// Translates axis `d` by `delta`.
    pub fn shift(&mut self, d: usize, delta: isize) -> &mut Self {
        let dim = &mut self.dims[d];
        dim.start += delta;
        dim.end += delta;
        self
    }

    /// Scales axis `d` by `factor`, e.g. to derive an output window of a resampling kernel.
    ///
    /// The scaled axis is `start' = floor(start * f)`, `step' = max(1, floor(step * f))`
    /// and an end rounded up so that `end' - start'` is a multiple of `step'` and
    /// `end' >= ceil(end * f)`. Every visited position `x` therefore maps to
    /// `floor(x * f)` inside the scaled range, whatever the parity of the extent.
    pub fn scale(&mut self, d: usize, factor: f32) -> &mut Self {
        let f = f64::from(factor);
        let dim = self.dims[d];
        let start = (dim.start as f64 * f).floor() as isize;
        let step = ((dim.step as f64 * f).floor() as usize).max(1);
        let end = if dim.end <= dim.start {
            start
        } else {
            let covered = ((dim.end as f64 * f).ceil() as isize - start).max(0) as usize;
            start + ceil_to_multiple(covered, step) as isize
        };
        self.dims[d] = WindowDimension::new(start, end, step);
        self
    }

    /// Portion of axis `d` processed by worker `id` out of `total`.
    ///
    /// Iterations are shared as evenly as possible, the first workers taking one
    /// extra iteration each when the count does not divide. Every part starts on a
    /// step boundary and the parts are disjoint and cover the axis.
    pub fn split_window(&self, d: usize, id: usize, total: usize) -> Window {
        let mut out = *self;
        let dim = self.dims[d];
        let total = total.max(1);
        let num_it = dim.num_iterations();
        let rem = num_it % total;
        let mut work = num_it / total;
        let mut it_start = work * id;
        if id < rem {
            work += 1;
            it_start += id;
        } else {
            it_start += rem;
        }
        if work == 0 {
            out.dims[d] = WindowDimension::new(dim.start, dim.start, dim.step);
            return out;
        }
        let start = dim.start + (it_start * dim.step) as isize;
        let end = dim.end.min(start + (work * dim.step) as isize);
        out.dims[d] = WindowDimension::new(start, end, dim.step);
        out
    }

    /// Checks that this window may be executed by a kernel configured with `full`.
    ///
    /// On every axis the range must lie inside `full`, use the same step and start
    /// on one of `full`'s step boundaries.
    #[track_caller]
    pub fn is_sub_window_of(&self, full: &Window) -> Status {
        full.validate()?;
        for d in 0..MAX_DIMS {
            let (sub, full) = (self.dims[d], full.dims[d]);
            ensure(sub.start >= full.start && sub.end <= full.end, || {
                format!("window axis {d} {sub} is not inside {full}")
            })?;
            ensure(sub.step == full.step, || {
                format!(
                    "window axis {d} step {} differs from the configured step {}",
                    sub.step, full.step
                )
            })?;
            ensure((sub.start - full.start) % full.step as isize == 0, || {
                format!(
                    "window axis {d} start {} is not aligned to step {} from {}",
                    sub.start, full.step, full.start
                )
            })?;
        }
        Ok(())
    }

    /// Merges axis `first` with every axis above it when they span the whole of `full`.
    ///
    /// The merged axis becomes `[0, end * product of higher ends)` with step 1 and the
    /// higher axes become single positions. Returns the window and whether it was
    /// collapsed; when it cannot be collapsed the window is returned unchanged.
    pub fn collapse_if_possible(&self, full: &Window, first: usize) -> (Window, bool) {
        if first + 1 >= MAX_DIMS {
            return (*self, false);
        }
        let spans_full = |d: usize| {
            let (dim, full) = (self.dims[d], full.dims[d]);
            dim.start == 0 && full.start == 0 && dim.step == 1 && dim.end == full.end
        };
        if !(first + 1..MAX_DIMS).all(spans_full) {
            return (*self, false);
        }
        let higher: isize = self.dims[first + 1..].iter().map(|d| d.end).product();
        if higher > 1 && !spans_full(first) {
            return (*self, false);
        }

        let mut collapsed = *self;
        collapsed.dims[first].end *= higher;
        for d in first + 1..MAX_DIMS {
            collapsed.dims[d] = WindowDimension::default();
        }
        (collapsed, true)
    }

    /// Like [`Window::collapse_if_possible`] but only returns the window.
    pub fn collapse(&self, full: &Window, first: usize) -> Window {
        self.collapse_if_possible(full, first).0
    }

    /// First slice of rank `rank`: axes below `rank` are kept whole, higher axes
    /// cover their first step only.
    pub fn first_slice_window(&self, rank: usize) -> Window {
        let mut slice = *self;
        for d in rank..MAX_DIMS {
            slice.dims[d] = self.outer_slice_at(d, self.dims[d].start);
        }
        slice
    }

    /// Advances `slice` to the next slice of rank `rank`.
    ///
    /// Returns false once every slice has been produced; `slice` is then reset to
    /// the first slice.
    pub fn slide_window_slice(&self, rank: usize, slice: &mut Window) -> bool {
        for d in rank..MAX_DIMS {
            let next = slice.dims[d].start + self.dims[d].step as isize;
            if next < self.dims[d].end {
                slice.dims[d] = self.outer_slice_at(d, next);
                return true;
            }
            slice.dims[d] = self.outer_slice_at(d, self.dims[d].start);
        }
        false
    }

    fn outer_slice_at(&self, d: usize, position: isize) -> WindowDimension {
        let dim = self.dims[d];
        let end = (position + dim.step as isize).min(dim.end).max(position);
        WindowDimension::new(position, end, dim.step)
    }

    /// First 1D slice.
    pub fn first_slice_window_1d(&self) -> Window {
        self.first_slice_window(1)
    }

    /// First 2D slice.
    pub fn first_slice_window_2d(&self) -> Window {
        self.first_slice_window(2)
    }

    /// First 3D slice.
    pub fn first_slice_window_3d(&self) -> Window {
        self.first_slice_window(3)
    }

    /// First 4D slice.
    pub fn first_slice_window_4d(&self) -> Window {
        self.first_slice_window(4)
    }

    /// Next 1D slice.
    pub fn slide_window_slice_1d(&self, slice: &mut Window) -> bool {
        self.slide_window_slice(1, slice)
    }

    /// Next 2D slice.
    pub fn slide_window_slice_2d(&self, slice: &mut Window) -> bool {
        self.slide_window_slice(2, slice)
    }

    /// Next 3D slice.
    pub fn slide_window_slice_3d(&self, slice: &mut Window) -> bool {
        self.slide_window_slice(3, slice)
    }

    /// Next 4D slice.
    pub fn slide_window_slice_4d(&self, slice: &mut Window) -> bool {
        self.slide_window_slice(4, slice)
    }

    /// Iterates every slice of rank `rank`. Nothing is produced for an empty window.
    pub fn slices(&self, rank: usize) -> WindowSlices<'_> {
        WindowSlices {
            window: self,
            rank,
            next: (!self.is_empty()).then(|| self.first_slice_window(rank)),
        }
    }
}

impl Index<usize> for Window {
    type Output = WindowDimension;

    fn index(&self, index: usize) -> &Self::Output {
        &self.dims[index]
    }
}

impl std::fmt::Display for Window {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let last = self
            .dims
            .iter()
            .rposition(|d| *d != WindowDimension::default())
            .map_or(1, |p| p + 1);
        write!(f, "{{")?;
        for (d, dim) in self.dims[..last].iter().enumerate() {
            if d > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{dim}")?;
        }
        write!(f, "}}")
    }
}

/// Iterator over the fixed-rank slices of a window.
pub struct WindowSlices<'a> {
    window: &'a Window,
    rank: usize,
    next: Option<Window>,
}

impl Iterator for WindowSlices<'_> {
    type Item = Window;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        let mut following = current;
        self.next = self
            .window
            .slide_window_slice(self.rank, &mut following)
            .then_some(following);
        Some(current)
    }
}

/// Position read from a broadcast input of `shape` when the output is at `coords`.
///
/// Axes where the input has extent 1 always read index 0.
pub fn broadcast_coordinates(coords: &Coordinates, shape: &TensorShape) -> Coordinates {
    let mut out = *coords;
    for d in 0..MAX_DIMS {
        if shape.get(d) == 1 {
            out.set(d, 0);
        }
    }
    out.set_num_dimensions(coords.num_dimensions());
    out
}
