use std::ops::Index;

/// Maximum number of axes supported by shapes, coordinates, strides and windows.
pub const MAX_DIMS: usize = 6;

/// A fixed-capacity ordered sequence of per-axis values.
///
/// Axis 0 is the innermost (fastest varying) axis. Values past
/// [`Dimensions::num_dimensions`] keep the fill value they were created with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Dimensions<T> {
    values: [T; MAX_DIMS],
    num_dimensions: usize,
}

impl<T: Copy> Dimensions<T> {
    /// Creates an empty sequence where every axis holds `fill`.
    pub fn filled(fill: T) -> Self {
        Self {
            values: [fill; MAX_DIMS],
            num_dimensions: 0,
        }
    }

    /// Creates a sequence from `values`, filling the remaining axes with `fill`.
    ///
    /// # Panics
    ///
    /// Panics if more than [`MAX_DIMS`] values are given.
    pub fn from_slice(values: &[T], fill: T) -> Self {
        assert!(
            values.len() <= MAX_DIMS,
            "at most {MAX_DIMS} dimensions are supported, got {}",
            values.len()
        );
        let mut dims = Self::filled(fill);
        dims.values[..values.len()].copy_from_slice(values);
        dims.num_dimensions = values.len();
        dims
    }

    /// Returns the value stored for axis `dim`.
    #[inline]
    pub fn get(&self, dim: usize) -> T {
        self.values[dim]
    }

    /// Sets the value of axis `dim`, growing the number of dimensions if needed.
    pub fn set(&mut self, dim: usize, value: T) -> &mut Self {
        self.values[dim] = value;
        self.num_dimensions = self.num_dimensions.max(dim + 1);
        self
    }

    /// Number of axes explicitly set.
    #[inline]
    pub fn num_dimensions(&self) -> usize {
        self.num_dimensions
    }

    /// Overrides the number of dimensions.
    pub fn set_num_dimensions(&mut self, num_dimensions: usize) {
        self.num_dimensions = num_dimensions.min(MAX_DIMS);
    }

    /// The explicitly set axes as a slice.
    pub fn as_slice(&self) -> &[T] {
        &self.values[..self.num_dimensions]
    }

    /// All [`MAX_DIMS`] values including the filled ones.
    pub fn as_array(&self) -> &[T; MAX_DIMS] {
        &self.values
    }

    /// Iterates the explicitly set axes.
    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.as_slice().iter()
    }
}

impl<T: Copy + Default> Default for Dimensions<T> {
    fn default() -> Self {
        Self::filled(T::default())
    }
}

impl<T> Index<usize> for Dimensions<T> {
    type Output = T;

    fn index(&self, index: usize) -> &Self::Output {
        &self.values[index]
    }
}

/// Per-axis signed positions.
pub type Coordinates = Dimensions<isize>;

/// Per-axis distances in bytes between consecutive elements.
pub type Strides = Dimensions<usize>;

impl Coordinates {
    /// Creates coordinates from signed positions; unset axes are 0.
    pub fn new(values: &[isize]) -> Self {
        Self::from_slice(values, 0)
    }
}

impl<const N: usize> From<[isize; N]> for Coordinates {
    fn from(values: [isize; N]) -> Self {
        Self::new(&values)
    }
}

/// Number of elements a kernel processes per iteration on each axis.
///
/// Axes that are not specified step by 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Steps(Dimensions<usize>);

impl Steps {
    /// Creates steps for the leading axes.
    pub fn new(steps: &[usize]) -> Self {
        Self(Dimensions::from_slice(steps, 1))
    }

    /// Step of axis `dim`.
    #[inline]
    pub fn get(&self, dim: usize) -> usize {
        self.0.get(dim)
    }
}

impl Default for Steps {
    fn default() -> Self {
        Self(Dimensions::filled(1))
    }
}

impl<const N: usize> From<[usize; N]> for Steps {
    fn from(steps: [usize; N]) -> Self {
        Self::new(&steps)
    }
}

/// Shape of a tensor: one extent per axis.
///
/// Trailing extents of 1 do not count toward [`TensorShape::num_dimensions`].
/// An unset shape (`TensorShape::default()`) has zero dimensions and zero elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TensorShape(Dimensions<usize>);

impl Default for TensorShape {
    fn default() -> Self {
        Self(Dimensions::filled(0))
    }
}

impl TensorShape {
    /// Creates a shape from per-axis extents, innermost axis first.
    pub fn new(extents: &[usize]) -> Self {
        if extents.is_empty() {
            return Self::default();
        }
        let mut shape = Self(Dimensions::from_slice(extents, 1));
        shape.apply_dimension_correction();
        shape
    }

    fn apply_dimension_correction(&mut self) {
        let mut n = self.0.num_dimensions();
        while n > 0 && self.0.get(n - 1) == 1 {
            n -= 1;
        }
        self.0.set_num_dimensions(n);
    }

    /// Extent of axis `dim`.
    #[inline]
    pub fn get(&self, dim: usize) -> usize {
        self.0.get(dim)
    }

    /// Sets the extent of axis `dim`.
    ///
    /// Setting an axis of an unset shape turns every other axis into 1.
    pub fn set(&mut self, dim: usize, extent: usize) -> &mut Self {
        if self.is_unset() {
            self.0 = Dimensions::filled(1);
        }
        self.0.set(dim, extent);
        self.apply_dimension_correction();
        self
    }

    fn is_unset(&self) -> bool {
        self.0.as_array().iter().all(|&v| v == 0)
    }

    /// Number of significant axes.
    #[inline]
    pub fn num_dimensions(&self) -> usize {
        self.0.num_dimensions()
    }

    /// Extents of the significant axes.
    pub fn as_slice(&self) -> &[usize] {
        self.0.as_slice()
    }

    /// Iterates the extents of the significant axes.
    pub fn iter(&self) -> std::slice::Iter<'_, usize> {
        self.0.iter()
    }

    /// Total number of elements, or `None` if the product overflows.
    pub fn try_total_size(&self) -> Option<usize> {
        self.0
            .as_array()
            .iter()
            .try_fold(1usize, |acc, &e| acc.checked_mul(e))
    }

    /// Total number of elements (saturating).
    pub fn total_size(&self) -> usize {
        self.0
            .as_array()
            .iter()
            .fold(1usize, |acc, &e| acc.saturating_mul(e))
    }

    /// Number of elements spanned by the axes from `dim` upward.
    pub fn total_size_upper(&self, dim: usize) -> usize {
        self.0.as_array()[dim..]
            .iter()
            .fold(1usize, |acc, &e| acc.saturating_mul(e))
    }

    /// Number of elements spanned by the axes below `dim`.
    pub fn total_size_lower(&self, dim: usize) -> usize {
        self.0.as_array()[..dim]
            .iter()
            .fold(1usize, |acc, &e| acc.saturating_mul(e))
    }

    /// Merges `n` axes starting at `first` into a single axis.
    pub fn collapse(&mut self, n: usize, first: usize) {
        let num_dims = self.num_dimensions();
        let last = num_dims.min(first + n);
        if last <= first + 1 {
            return;
        }
        let values = *self.0.as_array();
        let merged: usize = values[first..last].iter().product();
        let mut collapsed = Dimensions::filled(1);
        let mut out = 0;
        for (d, &v) in values.iter().enumerate().take(num_dims) {
            if d == first {
                collapsed.set(out, merged);
                out += 1;
            } else if d < first || d >= last {
                collapsed.set(out, v);
                out += 1;
            }
        }
        self.0 = collapsed;
        self.apply_dimension_correction();
    }

    /// Returns a copy with every axis from `dim` upward merged into axis `dim`.
    pub fn collapsed_from(&self, dim: usize) -> Self {
        let mut shape = *self;
        let n = self.num_dimensions().saturating_sub(dim);
        shape.collapse(n, dim);
        shape
    }

    /// Removes axis `dim`, shifting the higher axes down.
    pub fn remove_dimension(&mut self, dim: usize) {
        let num_dims = self.num_dimensions();
        if dim >= num_dims {
            return;
        }
        let values = *self.0.as_array();
        let mut out = Dimensions::filled(1);
        values
            .iter()
            .take(num_dims)
            .enumerate()
            .filter(|&(d, _)| d != dim)
            .enumerate()
            .for_each(|(i, (_, &v))| {
                out.set(i, v);
            });
        self.0 = out;
        self.apply_dimension_correction();
    }

    /// Computes the broadcast shape of `shapes`.
    ///
    /// Per axis the extents must be equal or 1; any other mismatch yields `None`.
    pub fn broadcast_shape(shapes: &[&TensorShape]) -> Option<TensorShape> {
        let (first, rest) = shapes.split_first()?;
        let mut out = **first;
        for shape in rest {
            if shape.is_unset() || out.is_unset() {
                return None;
            }
            for d in 0..MAX_DIMS {
                let (a, b) = (out.get(d), shape.get(d));
                let extent = match (a, b) {
                    (a, b) if a == b => a,
                    (1, b) => b,
                    (a, 1) => a,
                    _ => return None,
                };
                out.set(d, extent);
            }
        }
        Some(out)
    }

    /// Returns true if `other` can be broadcast against this shape.
    pub fn is_broadcast_compatible(&self, other: &TensorShape) -> bool {
        Self::broadcast_shape(&[self, other]).is_some()
    }
}

impl Index<usize> for TensorShape {
    type Output = usize;

    fn index(&self, index: usize) -> &Self::Output {
        &self.0[index]
    }
}

impl<const N: usize> From<[usize; N]> for TensorShape {
    fn from(extents: [usize; N]) -> Self {
        Self::new(&extents)
    }
}

impl std::fmt::Display for TensorShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self.as_slice())
    }
}

/// Converts a linear element index into coordinates of `shape` (axis 0 fastest).
pub fn index2coords(shape: &TensorShape, index: usize) -> Coordinates {
    let mut coords = Coordinates::default();
    let mut remaining = index;
    for d in 0..shape.num_dimensions().max(1) {
        let extent = shape.get(d).max(1);
        coords.set(d, (remaining % extent) as isize);
        remaining /= extent;
    }
    coords
}

/// Converts coordinates of `shape` into a linear element index (axis 0 fastest).
pub fn coords2index(shape: &TensorShape, coords: &Coordinates) -> usize {
    let mut index = 0usize;
    let mut stride = 1usize;
    for d in 0..MAX_DIMS {
        index += coords.get(d).max(0) as usize * stride;
        stride *= shape.get(d).max(1);
    }
    index
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_dimension_correction() {
        let shape = TensorShape::new(&[4, 3, 1, 1]);
        assert_eq!(shape.num_dimensions(), 2);
        assert_eq!(shape.get(5), 1);
        assert_eq!(shape.total_size(), 12);

        let unset = TensorShape::default();
        assert_eq!(unset.num_dimensions(), 0);
        assert_eq!(unset.total_size(), 0);
    }

    #[test]
    fn test_shape_set_on_unset() {
        let mut shape = TensorShape::default();
        shape.set(1, 5);
        assert_eq!(shape.as_slice(), &[1, 5]);
        assert_eq!(shape.total_size(), 5);
    }

    #[test]
    fn test_shape_overflow() {
        let shape = TensorShape::new(&[usize::MAX, 2]);
        assert_eq!(shape.try_total_size(), None);
        assert_eq!(shape.total_size(), usize::MAX);
    }

    #[test]
    fn test_shape_collapse() {
        let mut shape = TensorShape::new(&[2, 3, 4, 5]);
        shape.collapse(2, 1);
        assert_eq!(shape.as_slice(), &[2, 12, 5]);

        let collapsed = TensorShape::new(&[2, 3, 4, 5]).collapsed_from(2);
        assert_eq!(collapsed.as_slice(), &[2, 3, 20]);
    }

    #[test]
    fn test_shape_remove_dimension() {
        let mut shape = TensorShape::new(&[2, 3, 4]);
        shape.remove_dimension(1);
        assert_eq!(shape.as_slice(), &[2, 4]);
    }

    #[test]
    fn test_broadcast_shape() {
        let a = TensorShape::new(&[8, 1, 3]);
        let b = TensorShape::new(&[8, 5]);
        let out = TensorShape::broadcast_shape(&[&a, &b]);
        assert_eq!(out, Some(TensorShape::new(&[8, 5, 3])));

        let c = TensorShape::new(&[7, 5]);
        assert_eq!(TensorShape::broadcast_shape(&[&a, &c]), None);
        assert!(!a.is_broadcast_compatible(&c));
    }

    #[test]
    fn test_index_coords_roundtrip() {
        let shape = TensorShape::new(&[3, 4, 2]);
        let coords = index2coords(&shape, 17);
        assert_eq!(coords.as_slice(), &[2, 1, 1]);
        assert_eq!(coords2index(&shape, &coords), 17);
    }

    #[test]
    fn test_steps_default() {
        let steps = Steps::new(&[8]);
        assert_eq!(steps.get(0), 8);
        assert_eq!(steps.get(1), 1);
        assert_eq!(Steps::default().get(4), 1);
    }
}
