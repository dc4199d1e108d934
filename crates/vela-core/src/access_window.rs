use log::warn;

use crate::{
    border::{BorderSize, PaddingInfo},
    dimensions::{Coordinates, TensorShape, MAX_DIMS},
    error::KernelError,
    info::TensorInfo,
    valid_region::ValidRegion,
    window::{Window, WindowDimension},
};

/// How a kernel touches one tensor per iteration of its window.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AccessWindow {
    /// `width` elements of a single row starting at `x` relative to the iterated position.
    Horizontal {
        /// Offset on x.
        x: isize,
        /// Elements accessed on x.
        width: usize,
        /// Factor applied to the window position on x.
        scale_x: f32,
    },
    /// A `width` x `height` rectangle at offset (`x`, `y`) relative to the iterated position.
    Rectangle {
        /// Offset on x.
        x: isize,
        /// Offset on y.
        y: isize,
        /// Elements accessed on x.
        width: usize,
        /// Rows accessed on y.
        height: usize,
        /// Factor applied to the window position on x.
        scale_x: f32,
        /// Factor applied to the window position on y.
        scale_y: f32,
    },
    /// A fixed region `[start_x, end_x) x [start_y, end_y)` independent of the window.
    Static {
        /// First column.
        start_x: isize,
        /// First row.
        start_y: isize,
        /// One past the last column.
        end_x: isize,
        /// One past the last row.
        end_y: isize,
    },
}

/// Range `[lo, hi)` touched on one axis when the window visits position `p`.
#[derive(Debug, Clone, Copy)]
struct AxisAccess {
    offset: isize,
    extent: usize,
    scale: f64,
}

impl AxisAccess {
    #[inline]
    fn lo(&self, p: isize) -> isize {
        (p as f64 * self.scale).floor() as isize + self.offset
    }

    #[inline]
    fn hi(&self, p: isize) -> isize {
        self.lo(p) + self.extent as isize
    }

    /// Range touched over every position `dim` visits, or `None` if it visits nothing.
    fn span(&self, dim: &WindowDimension) -> Option<(isize, isize)> {
        let n = dim.num_iterations();
        if n == 0 {
            return None;
        }
        let last = dim.start() + ((n - 1) * dim.step()) as isize;
        Some((self.lo(dim.start()), self.hi(last)))
    }

    /// Narrows `dim` to the positions whose access stays inside `[lo, hi)`.
    fn shrink(&self, dim: &WindowDimension, lo: isize, hi: isize) -> WindowDimension {
        let n = dim.num_iterations();
        let step = dim.step() as isize;
        let position = |k: usize| dim.start() + k as isize * step;

        let mut first = if self.scale > 0.0 {
            let bound = (lo - self.offset) as f64 / self.scale;
            (((bound - dim.start() as f64) / step as f64).ceil().max(0.0) as usize).min(n)
        } else {
            0
        };
        while first > 0 && self.lo(position(first - 1)) >= lo {
            first -= 1;
        }
        while first < n && self.lo(position(first)) < lo {
            first += 1;
        }

        let mut count = n;
        while count > first && self.hi(position(count - 1)) > hi {
            count -= 1;
        }

        if count <= first {
            let start = position(first.min(n)).min(dim.end());
            return WindowDimension::new(start, start, dim.step());
        }
        let start = position(first);
        let end = dim.end().min(position(count));
        WindowDimension::new(start, end, dim.step())
    }
}

impl AccessWindow {
    /// A single row of `width` elements at offset `x`.
    pub fn horizontal(x: isize, width: usize) -> Self {
        Self::Horizontal {
            x,
            width,
            scale_x: 1.0,
        }
    }

    /// A `width` x `height` rectangle at offset (`x`, `y`).
    pub fn rectangle(x: isize, y: isize, width: usize, height: usize) -> Self {
        Self::Rectangle {
            x,
            y,
            width,
            height,
            scale_x: 1.0,
            scale_y: 1.0,
        }
    }

    /// A fixed region independent of the window.
    pub fn static_region(start_x: isize, start_y: isize, end_x: isize, end_y: isize) -> Self {
        Self::Static {
            start_x,
            start_y,
            end_x,
            end_y,
        }
    }

    /// Sets the factors applied to the window position, for sub-sampling kernels.
    ///
    /// Has no effect on [`AccessWindow::Static`].
    pub fn with_scale(self, sx: f32, sy: f32) -> Self {
        match self {
            Self::Horizontal { x, width, .. } => Self::Horizontal {
                x,
                width,
                scale_x: sx,
            },
            Self::Rectangle {
                x, y, width, height, ..
            } => Self::Rectangle {
                x,
                y,
                width,
                height,
                scale_x: sx,
                scale_y: sy,
            },
            static_region => static_region,
        }
    }

    fn axes(&self) -> Option<(AxisAccess, AxisAccess)> {
        match *self {
            Self::Horizontal { x, width, scale_x } => Some((
                AxisAccess {
                    offset: x,
                    extent: width,
                    scale: f64::from(scale_x),
                },
                AxisAccess {
                    offset: 0,
                    extent: 1,
                    scale: 1.0,
                },
            )),
            Self::Rectangle {
                x,
                y,
                width,
                height,
                scale_x,
                scale_y,
            } => Some((
                AxisAccess {
                    offset: x,
                    extent: width,
                    scale: f64::from(scale_x),
                },
                AxisAccess {
                    offset: y,
                    extent: height,
                    scale: f64::from(scale_y),
                },
            )),
            Self::Static { .. } => None,
        }
    }

    /// Range touched on x and y while iterating `window`, or `None` if nothing is touched.
    fn touched(&self, window: &Window) -> Option<[(isize, isize); 2]> {
        if window.is_empty() {
            return None;
        }
        match (*self, self.axes()) {
            (_, Some((ax, ay))) => Some([ax.span(&window[0])?, ay.span(&window[1])?]),
            (
                Self::Static {
                    start_x,
                    start_y,
                    end_x,
                    end_y,
                },
                None,
            ) => Some([(start_x, end_x), (start_y, end_y)]),
            _ => None,
        }
    }

    /// Padding `info` needs so that iterating `window` stays inside its buffer.
    pub fn needed_padding(&self, window: &Window, info: &TensorInfo) -> PaddingInfo {
        let Some([(x0, x1), (y0, y1)]) = self.touched(window) else {
            return PaddingInfo::default();
        };
        let shape = info.shape();
        let before = |lo: isize| (-lo).max(0) as usize;
        let after = |hi: isize, extent: usize| (hi - extent as isize).max(0) as usize;
        PaddingInfo::new(
            before(y0),
            after(y1, shape.get(1)),
            before(x0),
            after(x1, shape.get(0)),
        )
    }

    /// Shrinks `window` if `info` is allocated and its padding is too small.
    ///
    /// Resizable descriptors never shrink the window: their padding grows instead.
    /// Returns whether the window changed.
    pub fn update_window_if_needed(&self, window: &mut Window, info: &TensorInfo) -> bool {
        if info.is_resizable() || info.padding().covers(&self.needed_padding(window, info)) {
            return false;
        }
        let padding = info.padding();
        let shape = info.shape();
        let bounds = |axis: usize| {
            (
                -(padding.before(axis) as isize),
                (shape.get(axis) + padding.after(axis)) as isize,
            )
        };

        let before = *window;
        match self.axes() {
            Some((ax, ay)) => {
                let (lo, hi) = bounds(0);
                window.set(0, ax.shrink(&window[0], lo, hi));
                let (lo, hi) = bounds(1);
                window.set(1, ay.shrink(&window[1], lo, hi));
            }
            None => {
                let x = window[0];
                window.set(0, WindowDimension::new(x.start(), x.start(), x.step()));
            }
        }

        let changed = *window != before;
        if changed {
            warn!(
                "window shrunk from {before} to {window}: tensor {} has padding {:?}, access {:?} needs more",
                info.shape(),
                info.padding(),
                self
            );
        }
        changed
    }

    /// Grows the padding of a resizable `info` to what iterating `window` needs.
    ///
    /// Returns whether the padding changed. Allocated descriptors are left untouched.
    pub fn update_padding_if_needed(
        &self,
        window: &Window,
        info: &mut TensorInfo,
    ) -> Result<bool, KernelError> {
        if !info.is_resizable() {
            return Ok(false);
        }
        let needed = self.needed_padding(window, info);
        info.extend_padding(&needed)
    }

    /// Region written when iterating `window`, limited to `input_region`.
    ///
    /// With `border_undefined` the input region is first shrunk by `border`, since the
    /// values computed there read undefined data.
    pub fn compute_valid_region(
        &self,
        window: &Window,
        input_region: &ValidRegion,
        border_undefined: bool,
        border: BorderSize,
    ) -> ValidRegion {
        let input = if border_undefined {
            input_region.shrink(&border)
        } else {
            *input_region
        };

        let mut anchor = Coordinates::default();
        let mut shape = TensorShape::new(&[1]);
        let mut set_axis = |d: usize, lo: isize, hi: isize| {
            let start = lo.max(input.start(d));
            let end = hi.min(input.end(d)).max(start);
            anchor.set(d, start);
            shape.set(d, (end - start) as usize);
        };

        match self.touched(window) {
            Some([(x0, x1), (y0, y1)]) => {
                set_axis(0, x0, x1);
                set_axis(1, y0, y1);
            }
            None => {
                set_axis(0, input.start(0), input.start(0));
                set_axis(1, input.start(1), input.end(1));
            }
        }
        for d in 2..MAX_DIMS {
            set_axis(d, window[d].start(), window[d].end());
        }
        anchor.set_num_dimensions(input_region.anchor.num_dimensions());
        ValidRegion::new(anchor, shape)
    }

    /// Stores the region computed by [`AccessWindow::compute_valid_region`] in `info`.
    pub fn set_valid_region(
        &self,
        info: &mut TensorInfo,
        window: &Window,
        input_region: &ValidRegion,
        border_undefined: bool,
        border: BorderSize,
    ) {
        let region = self.compute_valid_region(window, input_region, border_undefined, border);
        info.set_valid_region(region);
    }
}

/// A tensor descriptor paired with the way a kernel accesses it.
#[derive(Debug)]
pub struct TensorAccess<'a> {
    /// Descriptor whose padding may grow.
    pub info: &'a mut TensorInfo,
    /// How the kernel touches the tensor.
    pub access: AccessWindow,
}

impl<'a> TensorAccess<'a> {
    /// Pairs `info` with `access`.
    pub fn new(info: &'a mut TensorInfo, access: AccessWindow) -> Self {
        Self { info, access }
    }
}

/// Reconciles `window` with every access of a kernel.
///
/// First every allocated tensor whose padding is too small shrinks the window, then
/// the padding of every resizable tensor grows to cover the final window. Returns
/// `Ok(true)` when the window shrank; the caller decides whether that is an
/// [`ErrorKind::InsufficientPadding`](crate::ErrorKind::InsufficientPadding) failure.
/// Calling it again with the same accesses reports no change.
///
/// # Errors
///
/// Fails when an allocated tensor still lacks padding after the window shrank,
/// e.g. for a static access the window cannot absorb.
pub fn update_window_and_padding(
    window: &mut Window,
    accesses: &mut [TensorAccess<'_>],
) -> Result<bool, KernelError> {
    let mut window_changed = false;
    for access in accesses.iter() {
        window_changed |= access.access.update_window_if_needed(window, access.info);
    }
    for access in accesses.iter_mut() {
        access.access.update_padding_if_needed(window, access.info)?;
    }
    Ok(window_changed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{dimensions::Steps, helpers::calculate_max_window, tensor::Tensor, types::DataType};

    fn info(shape: &[usize]) -> Result<TensorInfo, Box<dyn std::error::Error>> {
        Ok(TensorInfo::new(TensorShape::new(shape), DataType::U8)?)
    }

    #[test]
    fn test_padding_grows_for_resizable() -> Result<(), Box<dyn std::error::Error>> {
        let mut input = info(&[13, 4])?;
        let mut output = info(&[13, 4])?;
        let mut window =
            calculate_max_window(&input, &Steps::new(&[8]), false, BorderSize::default());

        let changed = update_window_and_padding(
            &mut window,
            &mut [
                TensorAccess::new(&mut input, AccessWindow::rectangle(-1, -1, 10, 3)),
                TensorAccess::new(&mut output, AccessWindow::horizontal(0, 8)),
            ],
        )?;
        assert!(!changed);
        assert_eq!(*input.padding(), PaddingInfo::new(1, 1, 1, 4));
        assert_eq!(*output.padding(), PaddingInfo::new(0, 0, 0, 3));
        Ok(())
    }

    #[test]
    fn test_window_shrinks_for_allocated() -> Result<(), Box<dyn std::error::Error>> {
        let tensor = Tensor::allocate(info(&[13, 4])?)?;
        let mut input = tensor.info().clone();
        let mut window =
            calculate_max_window(&input, &Steps::new(&[4]), false, BorderSize::default());
        assert_eq!(window[0], WindowDimension::new(0, 16, 4));

        let access = AccessWindow::horizontal(0, 4);
        let changed = update_window_and_padding(
            &mut window,
            &mut [TensorAccess::new(&mut input, access)],
        )?;
        assert!(changed);
        assert_eq!(window[0], WindowDimension::new(0, 12, 4));
        assert!(input.padding().covers(&access.needed_padding(&window, &input)));

        let again = update_window_and_padding(
            &mut window,
            &mut [TensorAccess::new(&mut input, access)],
        )?;
        assert!(!again);
        Ok(())
    }

    #[test]
    fn test_window_shrinks_at_the_start() -> Result<(), Box<dyn std::error::Error>> {
        let tensor = Tensor::allocate(info(&[8, 8])?)?;
        let allocated = tensor.info();
        let mut window = calculate_max_window(allocated, &Steps::default(), false, BorderSize::default());
        let access = AccessWindow::rectangle(-1, -1, 3, 3);
        assert!(access.update_window_if_needed(&mut window, allocated));
        assert_eq!(window[0], WindowDimension::new(1, 7, 1));
        assert_eq!(window[1], WindowDimension::new(1, 7, 1));
        assert!(!access.update_window_if_needed(&mut window, allocated));
        Ok(())
    }

    #[test]
    fn test_static_access() -> Result<(), Box<dyn std::error::Error>> {
        let tensor = Tensor::allocate(info(&[4, 4])?)?;
        let allocated = tensor.info();
        let mut window = calculate_max_window(allocated, &Steps::default(), false, BorderSize::default());
        let inside = AccessWindow::static_region(0, 0, 4, 4);
        assert!(!inside.update_window_if_needed(&mut window, allocated));

        let outside = AccessWindow::static_region(0, 0, 6, 4);
        assert_eq!(outside.needed_padding(&window, allocated), PaddingInfo::new(0, 0, 0, 2));
        assert!(outside.update_window_if_needed(&mut window, allocated));
        assert!(window.is_empty());
        assert!(!outside.update_window_if_needed(&mut window, allocated));
        Ok(())
    }

    #[test]
    fn test_compute_valid_region() -> Result<(), Box<dyn std::error::Error>> {
        let input = info(&[10, 8, 2])?;
        let window = calculate_max_window(&input, &Steps::new(&[4]), true, BorderSize::uniform(1));
        let region = AccessWindow::horizontal(0, 4).compute_valid_region(
            &window,
            input.valid_region(),
            true,
            BorderSize::uniform(1),
        );
        assert_eq!((region.start(0), region.end(0)), (1, 9));
        assert_eq!((region.start(1), region.end(1)), (1, 7));
        assert_eq!((region.start(2), region.end(2)), (0, 2));

        let ceil_window =
            calculate_max_window(&input, &Steps::new(&[4]), false, BorderSize::default());
        let region = AccessWindow::horizontal(0, 4).compute_valid_region(
            &ceil_window,
            input.valid_region(),
            false,
            BorderSize::default(),
        );
        assert_eq!((region.start(0), region.end(0)), (0, 10));
        Ok(())
    }

    #[test]
    fn test_scaled_access_padding() -> Result<(), Box<dyn std::error::Error>> {
        let input = info(&[8, 8])?;
        let mut window = Window::new();
        window.set(0, WindowDimension::new(0, 8, 1));
        window.set(1, WindowDimension::new(0, 8, 1));
        let access = AccessWindow::rectangle(0, 0, 2, 2).with_scale(2.0, 2.0);
        let padding = access.needed_padding(&window, &input);
        assert_eq!(padding, PaddingInfo::new(0, 8, 0, 8));
        Ok(())
    }
}
