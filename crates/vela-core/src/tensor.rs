use num_traits::NumCast;
use thiserror::Error;

use crate::{
    dimensions::{index2coords, Coordinates, MAX_DIMS},
    info::TensorInfo,
    types::{DataType, QuantizationInfo},
    valid_region::ValidRegion,
};

/// Error type for tensor construction and element access.
#[derive(Error, Debug, PartialEq)]
pub enum TensorError {
    /// The element count of a shape does not fit in `usize`.
    ///
    /// # Recommended Actions
    /// - Split the computation into smaller tensors
    /// - Check the shape for a misplaced extent
    #[error("Shape {0} overflows the element count")]
    ShapeOverflow(String),

    /// The descriptor has no data type, so no storage can be allocated.
    #[error("Cannot allocate a tensor with an unknown data type")]
    UnknownDataType,

    /// The Rust element type does not match the tensor data type.
    ///
    /// This occurs when viewing a tensor with a type it does not hold,
    /// e.g. a `f32` view of a `u8` tensor.
    #[error("Data type mismatch: tensor holds {actual}, requested {requested}")]
    DataTypeMismatch {
        /// Data type stored in the tensor
        actual: DataType,
        /// Data type of the requested element type
        requested: DataType,
    },

    /// The number of values does not match the shape.
    #[error("Shape mismatch: expected {expected} elements for shape, but got {actual} elements in data")]
    InvalidShape {
        /// Expected number of elements based on shape
        expected: usize,
        /// Actual number of elements in the data
        actual: usize,
    },

    /// A split along the innermost axis was requested.
    ///
    /// Rows must stay contiguous, so tensors are only split along axes >= 1.
    #[error("Cannot split a tensor along axis {0}")]
    InvalidSplitAxis(usize),
}

/// Storage of a CPU tensor, padding included.
#[derive(Debug, Clone, PartialEq)]
pub enum TensorData {
    /// `U8` and `QAsymm8` elements.
    U8(Vec<u8>),
    /// `S16` elements.
    S16(Vec<i16>),
    /// `S32` elements.
    S32(Vec<i32>),
    /// `F32` elements.
    F32(Vec<f32>),
}

impl TensorData {
    /// Zero-initialized storage of `len` elements of `data_type`.
    pub fn zeros(data_type: DataType, len: usize) -> Result<Self, TensorError> {
        Ok(match data_type {
            DataType::U8 | DataType::QAsymm8 => Self::U8(vec![0; len]),
            DataType::S16 => Self::S16(vec![0; len]),
            DataType::S32 => Self::S32(vec![0; len]),
            DataType::F32 => Self::F32(vec![0.0; len]),
            DataType::Unknown => return Err(TensorError::UnknownDataType),
        })
    }

    /// Number of stored elements.
    pub fn len(&self) -> usize {
        match self {
            Self::U8(v) => v.len(),
            Self::S16(v) => v.len(),
            Self::S32(v) => v.len(),
            Self::F32(v) => v.len(),
        }
    }

    /// Returns true if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A Rust type that can be stored in a [`Tensor`].
pub trait Element:
    Copy + Default + Send + Sync + PartialOrd + NumCast + std::fmt::Debug + 'static
{
    /// The data type this element maps to.
    const DATA_TYPE: DataType;

    /// Returns true if tensors of `data_type` are stored as `Self`.
    fn is_compatible(data_type: DataType) -> bool {
        data_type == Self::DATA_TYPE
    }

    /// Borrows the storage as a slice of `Self`.
    fn slice(data: &TensorData) -> Option<&[Self]>;

    /// Borrows the storage as a mutable slice of `Self`.
    fn slice_mut(data: &mut TensorData) -> Option<&mut [Self]>;

    /// Wraps a typed view into the type-erased form.
    fn erase(view: TensorViewMut<'_, Self>) -> TensorSliceMut<'_>;

    /// Borrows the typed view inside a type-erased slice.
    fn downcast<'s, 'a>(
        slice: &'s mut TensorSliceMut<'a>,
    ) -> Option<&'s mut TensorViewMut<'a, Self>>;
}

macro_rules! impl_element {
    ($ty:ty, $variant:ident, $data_type:expr $(, $extra:expr)?) => {
        impl Element for $ty {
            const DATA_TYPE: DataType = $data_type;

            fn is_compatible(data_type: DataType) -> bool {
                data_type == $data_type $(|| data_type == $extra)?
            }

            fn slice(data: &TensorData) -> Option<&[Self]> {
                match data {
                    TensorData::$variant(v) => Some(v.as_slice()),
                    _ => None,
                }
            }

            fn slice_mut(data: &mut TensorData) -> Option<&mut [Self]> {
                match data {
                    TensorData::$variant(v) => Some(v.as_mut_slice()),
                    _ => None,
                }
            }

            fn erase(view: TensorViewMut<'_, Self>) -> TensorSliceMut<'_> {
                TensorSliceMut::$variant(view)
            }

            fn downcast<'s, 'a>(
                slice: &'s mut TensorSliceMut<'a>,
            ) -> Option<&'s mut TensorViewMut<'a, Self>> {
                match slice {
                    TensorSliceMut::$variant(v) => Some(v),
                    _ => None,
                }
            }
        }
    };
}

impl_element!(u8, U8, DataType::U8, DataType::QAsymm8);
impl_element!(i16, S16, DataType::S16);
impl_element!(i32, S32, DataType::S32);
impl_element!(f32, F32, DataType::F32);

/// Element addressing of a padded tensor buffer.
///
/// Positions are kept relative to the start of the padded extent of each axis.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Layout {
    strides: [usize; MAX_DIMS],
    before: [usize; MAX_DIMS],
    padded: [usize; MAX_DIMS],
}

impl Layout {
    fn new(info: &TensorInfo) -> Self {
        let strides = info.strides_in_elements();
        let padding = info.padding();
        let mut layout = Self {
            strides: [0; MAX_DIMS],
            before: [0; MAX_DIMS],
            padded: [0; MAX_DIMS],
        };
        for d in 0..MAX_DIMS {
            layout.strides[d] = strides.get(d);
            layout.before[d] = padding.before(d);
            layout.padded[d] = info.padded_extent(d);
        }
        layout
    }

    /// Padded position of `coord` on `axis`, if it lies inside shape + padding.
    #[inline]
    fn position(&self, axis: usize, coord: isize) -> Option<usize> {
        let pos = coord + self.before[axis] as isize;
        (pos >= 0 && (pos as usize) < self.padded[axis]).then_some(pos as usize)
    }

    #[inline]
    fn offset(&self, coords: &Coordinates) -> Option<usize> {
        (0..MAX_DIMS).try_fold(0usize, |acc, d| {
            Some(acc + self.position(d, coords.get(d))? * self.strides[d])
        })
    }

    /// Offset of a row of `len` elements starting at `coords`, if it stays on one row.
    #[inline]
    fn row_offset(&self, coords: &Coordinates, len: usize) -> Option<usize> {
        let offset = self.offset(coords)?;
        let x = self.position(0, coords.get(0))?;
        (x + len <= self.padded[0]).then_some(offset)
    }
}

/// Read-only typed access to a tensor, padding included.
///
/// Coordinates are logical: `(0, 0)` is the first element of the shape and
/// negative positions address the padding before it.
#[derive(Debug, Clone, Copy)]
pub struct TensorView<'a, T> {
    info: &'a TensorInfo,
    data: &'a [T],
    layout: Layout,
}

impl<'a, T: Element> TensorView<'a, T> {
    /// Descriptor of the viewed tensor.
    pub fn info(&self) -> &'a TensorInfo {
        self.info
    }

    /// Element at `coords`, or `None` outside of shape + padding.
    #[inline]
    pub fn get(&self, coords: &Coordinates) -> Option<T> {
        self.layout.offset(coords).map(|o| self.data[o])
    }

    /// `len` consecutive elements along x starting at `coords`.
    #[inline]
    pub fn row(&self, coords: &Coordinates, len: usize) -> Option<&'a [T]> {
        let offset = self.layout.row_offset(coords, len)?;
        Some(&self.data[offset..offset + len])
    }
}

/// Mutable typed access to a band of a tensor along one axis.
///
/// A view obtained from [`Tensor::view_mut`] covers the whole buffer; views from
/// [`Tensor::split_mut`] cover disjoint bands and may be moved to different threads.
#[derive(Debug)]
pub struct TensorViewMut<'a, T> {
    info: &'a TensorInfo,
    layout: Layout,
    axis: usize,
    range: (usize, usize),
    block_len: usize,
    chunks: Vec<&'a mut [T]>,
}

impl<'a, T: Element> TensorViewMut<'a, T> {
    /// Descriptor of the viewed tensor.
    pub fn info(&self) -> &'a TensorInfo {
        self.info
    }

    /// Logical range `[start, end)` this view owns on its split axis.
    pub fn owned_range(&self) -> (usize, isize, isize) {
        let before = self.layout.before[self.axis] as isize;
        (
            self.axis,
            self.range.0 as isize - before,
            self.range.1 as isize - before,
        )
    }

    fn locate(&self, offset: usize) -> Option<(usize, usize)> {
        if self.block_len == 0 {
            return None;
        }
        let block = offset / self.block_len;
        let rem = offset % self.block_len;
        let stride = self.layout.strides[self.axis];
        let pos = rem / stride;
        if pos < self.range.0 || pos >= self.range.1 {
            return None;
        }
        Some((block, rem - self.range.0 * stride))
    }

    /// Returns true if `coords` is inside shape + padding and owned by this view.
    pub fn contains(&self, coords: &Coordinates) -> bool {
        self.layout
            .offset(coords)
            .and_then(|o| self.locate(o))
            .is_some()
    }

    /// Element at `coords`, or `None` if it is not owned by this view.
    #[inline]
    pub fn get(&self, coords: &Coordinates) -> Option<T> {
        let (block, offset) = self.locate(self.layout.offset(coords)?)?;
        Some(self.chunks[block][offset])
    }

    /// Mutable element at `coords`, or `None` if it is not owned by this view.
    #[inline]
    pub fn get_mut(&mut self, coords: &Coordinates) -> Option<&mut T> {
        let (block, offset) = self.locate(self.layout.offset(coords)?)?;
        Some(&mut self.chunks[block][offset])
    }

    /// Mutable row of `len` elements along x starting at `coords`.
    #[inline]
    pub fn row_mut(&mut self, coords: &Coordinates, len: usize) -> Option<&mut [T]> {
        let (block, offset) = self.locate(self.layout.row_offset(coords, len)?)?;
        self.chunks[block].get_mut(offset..offset + len)
    }
}

/// A [`TensorViewMut`] with the element type erased.
#[derive(Debug)]
pub enum TensorSliceMut<'a> {
    /// `U8` or `QAsymm8` elements.
    U8(TensorViewMut<'a, u8>),
    /// `S16` elements.
    S16(TensorViewMut<'a, i16>),
    /// `S32` elements.
    S32(TensorViewMut<'a, i32>),
    /// `F32` elements.
    F32(TensorViewMut<'a, f32>),
}

impl<'a> TensorSliceMut<'a> {
    /// Descriptor of the viewed tensor.
    pub fn info(&self) -> &'a TensorInfo {
        match self {
            Self::U8(v) => v.info(),
            Self::S16(v) => v.info(),
            Self::S32(v) => v.info(),
            Self::F32(v) => v.info(),
        }
    }

    /// Typed access, or `None` if `T` is not the stored element type.
    pub fn typed<T: Element>(&mut self) -> Option<&mut TensorViewMut<'a, T>> {
        T::downcast(self)
    }
}

/// A CPU tensor: a descriptor plus its padded storage.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    info: TensorInfo,
    data: TensorData,
}

impl Tensor {
    /// Allocates zeroed storage for `info`, shape and padding included.
    ///
    /// The descriptor stops being resizable: its padding is frozen from now on.
    pub fn allocate(mut info: TensorInfo) -> Result<Self, TensorError> {
        if info.shape().try_total_size().is_none() {
            return Err(TensorError::ShapeOverflow(info.shape().to_string()));
        }
        info.set_is_resizable(false);
        let data = TensorData::zeros(info.data_type(), info.total_elements_allocated())?;
        Ok(Self { info, data })
    }

    /// Allocates a tensor and fills its shape with `values` (axis 0 fastest).
    ///
    /// The padding is zeroed.
    pub fn from_vec<T: Element>(info: TensorInfo, values: Vec<T>) -> Result<Self, TensorError> {
        check_type::<T>(info.data_type())?;
        let expected = info.shape().total_size();
        if values.len() != expected {
            return Err(TensorError::InvalidShape {
                expected,
                actual: values.len(),
            });
        }
        let mut tensor = Self::allocate(info)?;
        let row_len = tensor.info.dimension(0);
        if row_len > 0 {
            let mut view = tensor.view_mut::<T>()?;
            let shape = *view.info().shape();
            for (i, row) in values.chunks_exact(row_len).enumerate() {
                let coords = index2coords(&shape, i * row_len);
                if let Some(dst) = view.row_mut(&coords, row_len) {
                    dst.copy_from_slice(row);
                }
            }
        }
        Ok(tensor)
    }

    /// Reads the shape area back into a dense vector (axis 0 fastest).
    pub fn to_vec<T: Element>(&self) -> Result<Vec<T>, TensorError> {
        let view = self.view::<T>()?;
        let shape = self.info.shape();
        let row_len = shape.get(0);
        let total = shape.total_size();
        let mut out = Vec::with_capacity(total);
        if row_len == 0 {
            return Ok(out);
        }
        for start in (0..total).step_by(row_len) {
            let coords = index2coords(shape, start);
            if let Some(row) = view.row(&coords, row_len) {
                out.extend_from_slice(row);
            }
        }
        Ok(out)
    }

    /// The tensor descriptor.
    pub fn info(&self) -> &TensorInfo {
        &self.info
    }

    /// Element data type.
    pub fn data_type(&self) -> DataType {
        self.info.data_type()
    }

    /// The raw storage, padding included.
    pub fn data(&self) -> &TensorData {
        &self.data
    }

    /// Replaces the valid region of the allocated tensor.
    pub fn set_valid_region(&mut self, region: ValidRegion) {
        self.info.set_valid_region(region);
    }

    /// Replaces the quantization parameters; the stored values are reinterpreted.
    pub fn set_quantization(&mut self, quantization: QuantizationInfo) {
        self.info.set_quantization(quantization);
    }

    /// Typed read-only view.
    pub fn view<T: Element>(&self) -> Result<TensorView<'_, T>, TensorError> {
        check_type::<T>(self.info.data_type())?;
        let data = T::slice(&self.data).ok_or(TensorError::DataTypeMismatch {
            actual: self.info.data_type(),
            requested: T::DATA_TYPE,
        })?;
        Ok(TensorView {
            info: &self.info,
            data,
            layout: Layout::new(&self.info),
        })
    }

    /// Typed mutable view over the whole buffer.
    pub fn view_mut<T: Element>(&mut self) -> Result<TensorViewMut<'_, T>, TensorError> {
        let mut views = self.split_typed::<T>(MAX_DIMS - 1, &[])?;
        Ok(views.remove(0))
    }

    /// Type-erased mutable view over the whole buffer.
    pub fn slice_mut(&mut self) -> TensorSliceMut<'_> {
        let layout = Layout::new(&self.info);
        let Self { info, data } = self;
        let mut views = match data {
            TensorData::U8(v) => wrap_all(split_views(info, layout, v, MAX_DIMS - 1, &[])),
            TensorData::S16(v) => wrap_all(split_views(info, layout, v, MAX_DIMS - 1, &[])),
            TensorData::S32(v) => wrap_all(split_views(info, layout, v, MAX_DIMS - 1, &[])),
            TensorData::F32(v) => wrap_all(split_views(info, layout, v, MAX_DIMS - 1, &[])),
        };
        views.remove(0)
    }

    /// Splits the buffer along `axis` into `cuts.len() + 1` disjoint mutable views.
    ///
    /// `cuts` are logical positions in ascending order. The first view also owns the
    /// padding before the shape and the last view the padding after it.
    pub fn split_mut(
        &mut self,
        axis: usize,
        cuts: &[isize],
    ) -> Result<Vec<TensorSliceMut<'_>>, TensorError> {
        if (axis == 0 && !cuts.is_empty()) || axis >= MAX_DIMS {
            return Err(TensorError::InvalidSplitAxis(axis));
        }
        let layout = Layout::new(&self.info);
        let Self { info, data } = self;
        Ok(match data {
            TensorData::U8(v) => wrap_all(split_views(info, layout, v, axis, cuts)),
            TensorData::S16(v) => wrap_all(split_views(info, layout, v, axis, cuts)),
            TensorData::S32(v) => wrap_all(split_views(info, layout, v, axis, cuts)),
            TensorData::F32(v) => wrap_all(split_views(info, layout, v, axis, cuts)),
        })
    }

    fn split_typed<T: Element>(
        &mut self,
        axis: usize,
        cuts: &[isize],
    ) -> Result<Vec<TensorViewMut<'_, T>>, TensorError> {
        check_type::<T>(self.info.data_type())?;
        let layout = Layout::new(&self.info);
        let Self { info, data } = self;
        let requested = T::DATA_TYPE;
        let actual = info.data_type();
        let values =
            T::slice_mut(data).ok_or(TensorError::DataTypeMismatch { actual, requested })?;
        Ok(split_views(info, layout, values, axis, cuts))
    }
}

fn check_type<T: Element>(data_type: DataType) -> Result<(), TensorError> {
    if T::is_compatible(data_type) {
        Ok(())
    } else {
        Err(TensorError::DataTypeMismatch {
            actual: data_type,
            requested: T::DATA_TYPE,
        })
    }
}

fn wrap_all<T: Element>(views: Vec<TensorViewMut<'_, T>>) -> Vec<TensorSliceMut<'_>> {
    views.into_iter().map(T::erase).collect()
}

fn split_views<'a, T: Element>(
    info: &'a TensorInfo,
    layout: Layout,
    data: &'a mut [T],
    axis: usize,
    cuts: &[isize],
) -> Vec<TensorViewMut<'a, T>> {
    let stride = layout.strides[axis];
    let padded = layout.padded[axis];
    let before = layout.before[axis] as isize;
    let block_len = stride * padded;

    let mut bounds = Vec::with_capacity(cuts.len() + 2);
    bounds.push(0usize);
    for &cut in cuts {
        let pos = (cut + before).clamp(0, padded as isize) as usize;
        let prev = bounds.last().copied().unwrap_or(0);
        bounds.push(pos.max(prev));
    }
    bounds.push(padded);

    let mut chunks: Vec<Vec<&'a mut [T]>> = (0..bounds.len() - 1).map(|_| Vec::new()).collect();
    if block_len > 0 {
        for block in data.chunks_mut(block_len) {
            let mut rest = block;
            for (i, w) in bounds.windows(2).enumerate() {
                let (head, tail) = std::mem::take(&mut rest).split_at_mut((w[1] - w[0]) * stride);
                chunks[i].push(head);
                rest = tail;
            }
        }
    }

    chunks
        .into_iter()
        .zip(bounds.windows(2))
        .map(|(chunks, w)| TensorViewMut {
            info,
            layout,
            axis,
            range: (w[0], w[1]),
            block_len,
            chunks,
        })
        .collect()
}
