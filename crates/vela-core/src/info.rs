use crate::{
    border::PaddingInfo,
    dimensions::{Coordinates, Strides, TensorShape, MAX_DIMS},
    error::KernelError,
    tensor::TensorError,
    types::{DataLayout, DataType, QuantizationInfo},
    valid_region::ValidRegion,
};

/// Descriptor of a tensor: everything the windowing core needs without the data.
///
/// A descriptor stays *resizable* until the tensor backing it is allocated. Padding
/// may only grow while it is resizable; afterwards it is frozen.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TensorInfo {
    shape: TensorShape,
    data_type: DataType,
    layout: DataLayout,
    quantization: QuantizationInfo,
    padding: PaddingInfo,
    valid_region: ValidRegion,
    is_resizable: bool,
}

impl Default for TensorInfo {
    fn default() -> Self {
        Self::empty()
    }
}

impl TensorInfo {
    /// Creates a descriptor with the given shape and data type and no padding.
    ///
    /// # Errors
    ///
    /// Returns [`TensorError::ShapeOverflow`] if the element count does not fit in `usize`.
    pub fn new(shape: TensorShape, data_type: DataType) -> Result<Self, TensorError> {
        if shape.try_total_size().is_none() {
            return Err(TensorError::ShapeOverflow(shape.to_string()));
        }
        Ok(Self {
            shape,
            data_type,
            layout: DataLayout::Nchw,
            quantization: QuantizationInfo::default(),
            padding: PaddingInfo::default(),
            valid_region: ValidRegion::full(&shape),
            is_resizable: true,
        })
    }

    /// An uninitialized descriptor waiting for auto-initialization.
    pub fn empty() -> Self {
        Self {
            shape: TensorShape::default(),
            data_type: DataType::Unknown,
            layout: DataLayout::Unknown,
            quantization: QuantizationInfo::default(),
            padding: PaddingInfo::default(),
            valid_region: ValidRegion::default(),
            is_resizable: true,
        }
    }

    /// Sets the data layout.
    pub fn with_layout(mut self, layout: DataLayout) -> Self {
        self.layout = layout;
        self
    }

    /// Sets the quantization parameters.
    pub fn with_quantization(mut self, quantization: QuantizationInfo) -> Self {
        self.quantization = quantization;
        self
    }

    /// Sets the initial padding.
    pub fn with_padding(mut self, padding: PaddingInfo) -> Self {
        self.padding = padding;
        self
    }

    /// The tensor shape.
    #[inline]
    pub fn shape(&self) -> &TensorShape {
        &self.shape
    }

    /// Extent of axis `dim`.
    #[inline]
    pub fn dimension(&self, dim: usize) -> usize {
        self.shape.get(dim)
    }

    /// Number of significant axes.
    pub fn num_dimensions(&self) -> usize {
        self.shape.num_dimensions()
    }

    /// Element data type.
    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    /// Size of one element in bytes.
    pub fn element_size(&self) -> usize {
        self.data_type.element_size()
    }

    /// Data layout.
    pub fn layout(&self) -> DataLayout {
        self.layout
    }

    /// Quantization parameters.
    pub fn quantization(&self) -> QuantizationInfo {
        self.quantization
    }

    /// Physical padding around the shape.
    pub fn padding(&self) -> &PaddingInfo {
        &self.padding
    }

    /// Region holding meaningful values.
    pub fn valid_region(&self) -> &ValidRegion {
        &self.valid_region
    }

    /// Returns true until the backing memory is allocated.
    pub fn is_resizable(&self) -> bool {
        self.is_resizable
    }

    /// Marks the descriptor as (non-)resizable.
    pub(crate) fn set_is_resizable(&mut self, is_resizable: bool) {
        self.is_resizable = is_resizable;
    }

    /// Returns true if shape or data type have not been initialized yet.
    pub fn is_empty(&self) -> bool {
        self.data_type == DataType::Unknown || self.shape.total_size() == 0
    }

    /// Number of elements reserved on `axis` including padding.
    pub fn padded_extent(&self, axis: usize) -> usize {
        self.padding.before(axis) + self.shape.get(axis) + self.padding.after(axis)
    }

    /// Per-axis distance in elements, accounting for padding.
    pub fn strides_in_elements(&self) -> Strides {
        let mut strides = Strides::filled(0);
        let mut stride = 1usize;
        for d in 0..MAX_DIMS {
            strides.set(d, stride);
            stride = stride.saturating_mul(self.padded_extent(d));
        }
        strides.set_num_dimensions(self.num_dimensions().max(1));
        strides
    }

    /// Per-axis distance in bytes, accounting for padding.
    pub fn strides_in_bytes(&self) -> Strides {
        let elements = self.strides_in_elements();
        let mut strides = Strides::filled(0);
        for d in 0..MAX_DIMS {
            strides.set(d, elements.get(d) * self.element_size());
        }
        strides.set_num_dimensions(elements.num_dimensions());
        strides
    }

    /// Offset in elements of coordinate (0, 0, ...) from the start of the buffer.
    pub fn offset_first_element(&self) -> usize {
        let strides = self.strides_in_elements();
        self.padding.left * strides.get(0) + self.padding.top * strides.get(1)
    }

    /// Offset in bytes of coordinate (0, 0, ...) from the start of the buffer.
    pub fn offset_first_element_in_bytes(&self) -> usize {
        self.offset_first_element() * self.element_size()
    }

    /// Offset in bytes of `coords`, relative to the start of the buffer.
    pub fn offset_element_in_bytes(&self, coords: &Coordinates) -> isize {
        let strides = self.strides_in_bytes();
        (0..MAX_DIMS).fold(self.offset_first_element_in_bytes() as isize, |acc, d| {
            acc + coords.get(d) * strides.get(d) as isize
        })
    }

    /// Number of elements the backing buffer holds, padding included.
    pub fn total_elements_allocated(&self) -> usize {
        if self.shape.total_size() == 0 {
            return 0;
        }
        (0..MAX_DIMS).fold(1usize, |acc, d| acc.saturating_mul(self.padded_extent(d)))
    }

    /// Size of the backing buffer in bytes, padding included.
    pub fn total_size(&self) -> usize {
        self.total_elements_allocated() * self.element_size()
    }

    /// Grows the padding to at least `needed`.
    ///
    /// Returns whether the padding changed.
    ///
    /// # Errors
    ///
    /// Returns a precondition error if more padding is needed but the descriptor is
    /// no longer resizable.
    pub fn extend_padding(&mut self, needed: &PaddingInfo) -> Result<bool, KernelError> {
        if self.padding.covers(needed) {
            return Ok(false);
        }
        if !self.is_resizable {
            return Err(KernelError::precondition(format!(
                "cannot extend padding of an allocated tensor from {:?} to {:?}",
                self.padding, needed
            )));
        }
        Ok(self.padding.extend(needed))
    }

    /// Replaces the valid region, clamped to the tensor shape.
    pub fn set_valid_region(&mut self, region: ValidRegion) {
        self.valid_region = region.clamped_to(&self.shape);
    }

    /// Replaces the shape and resets the valid region to the full tensor.
    ///
    /// # Errors
    ///
    /// Fails if the descriptor is no longer resizable or the shape overflows.
    pub fn set_shape(&mut self, shape: TensorShape) -> Result<(), KernelError> {
        if !self.is_resizable {
            return Err(KernelError::precondition(
                "cannot change the shape of an allocated tensor",
            ));
        }
        if shape.try_total_size().is_none() {
            return Err(KernelError::precondition(format!(
                "shape {shape} overflows the element count"
            )));
        }
        self.shape = shape;
        self.valid_region = ValidRegion::full(&shape);
        Ok(())
    }

    /// Replaces the data type.
    ///
    /// # Errors
    ///
    /// Fails once the descriptor is no longer resizable.
    pub fn set_data_type(&mut self, data_type: DataType) -> Result<(), KernelError> {
        if !self.is_resizable && data_type != self.data_type {
            return Err(KernelError::precondition(
                "cannot change the data type of an allocated tensor",
            ));
        }
        self.data_type = data_type;
        Ok(())
    }

    /// Replaces the data layout.
    pub fn set_layout(&mut self, layout: DataLayout) {
        self.layout = layout;
    }

    /// Replaces the quantization parameters.
    pub fn set_quantization(&mut self, quantization: QuantizationInfo) {
        self.quantization = quantization;
    }

    /// Initializes shape, data type and quantization if the descriptor is empty.
    ///
    /// Returns true if the descriptor was initialized.
    pub fn auto_init_if_empty(
        &mut self,
        shape: TensorShape,
        data_type: DataType,
        quantization: QuantizationInfo,
    ) -> Result<bool, KernelError> {
        if self.shape.total_size() != 0 {
            return Ok(false);
        }
        self.set_shape(shape)?;
        self.data_type = data_type;
        if self.layout == DataLayout::Unknown {
            self.layout = DataLayout::Nchw;
        }
        if self.quantization.is_empty() {
            self.quantization = quantization;
        }
        Ok(true)
    }

    /// Sets the shape if none is set yet. Returns true if it was set.
    pub fn set_shape_if_empty(&mut self, shape: TensorShape) -> Result<bool, KernelError> {
        if self.shape.total_size() != 0 {
            return Ok(false);
        }
        self.set_shape(shape)?;
        Ok(true)
    }

    /// Sets the data type if it is unknown. Returns true if it was set.
    pub fn set_data_type_if_unknown(&mut self, data_type: DataType) -> bool {
        if self.data_type != DataType::Unknown {
            return false;
        }
        self.data_type = data_type;
        true
    }
}

/// Output shape and valid region of an n-ary broadcasting operation.
///
/// Axes where an input has extent 1 are broadcast and do not restrict the region;
/// every other axis is intersected.
pub fn broadcast_shape_and_valid_region(
    infos: &[&TensorInfo],
) -> Result<(TensorShape, ValidRegion), KernelError> {
    let shapes: Vec<&TensorShape> = infos.iter().map(|info| info.shape()).collect();
    let shape = TensorShape::broadcast_shape(&shapes).ok_or_else(|| {
        KernelError::precondition(format!(
            "shapes are not broadcast compatible: {}",
            shapes
                .iter()
                .map(|s| s.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    })?;

    let mut region = ValidRegion::full(&shape);
    for info in infos {
        let input = info.valid_region();
        for d in 0..MAX_DIMS {
            let is_broadcast = info.dimension(d) == 1 && shape.get(d) != 1;
            if is_broadcast && input.shape.get(d) != 0 {
                continue;
            }
            let start = region.start(d).max(input.start(d));
            let end = region.end(d).min(input.end(d)).max(start);
            if start != region.start(d) || end != region.end(d) {
                region.set(d, start, (end - start) as usize);
            }
        }
    }
    Ok((shape, region))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dimensions::Coordinates;

    #[test]
    fn test_strides_with_padding() -> Result<(), TensorError> {
        let info = TensorInfo::new(TensorShape::new(&[4, 3, 2]), DataType::F32)?
            .with_padding(PaddingInfo::new(1, 1, 2, 2));
        let strides = info.strides_in_elements();
        assert_eq!(strides.get(0), 1);
        assert_eq!(strides.get(1), 8);
        assert_eq!(strides.get(2), 40);
        assert_eq!(info.strides_in_bytes().get(1), 32);
        assert_eq!(info.offset_first_element(), 8 + 2);
        assert_eq!(info.total_elements_allocated(), 80);
        assert_eq!(info.total_size(), 320);
        assert_eq!(
            info.offset_element_in_bytes(&Coordinates::from([-2, -1])),
            0
        );
        Ok(())
    }

    #[test]
    fn test_extend_padding_after_allocation() -> Result<(), Box<dyn std::error::Error>> {
        let mut info = TensorInfo::new(TensorShape::new(&[4, 4]), DataType::U8)?;
        assert!(info.extend_padding(&PaddingInfo::uniform(1))?);
        assert!(!info.extend_padding(&PaddingInfo::uniform(1))?);
        info.set_is_resizable(false);
        assert!(!info.extend_padding(&PaddingInfo::uniform(1))?);
        assert!(info.extend_padding(&PaddingInfo::uniform(2)).is_err());
        Ok(())
    }

    #[test]
    fn test_auto_init() -> Result<(), KernelError> {
        let mut info = TensorInfo::empty();
        assert!(info.is_empty());
        let initialized = info.auto_init_if_empty(
            TensorShape::new(&[5, 5]),
            DataType::S16,
            QuantizationInfo::default(),
        )?;
        assert!(initialized);
        assert_eq!(info.data_type(), DataType::S16);
        assert_eq!(info.valid_region().shape.as_slice(), &[5, 5]);

        let again =
            info.auto_init_if_empty(TensorShape::new(&[2]), DataType::F32, QuantizationInfo::default())?;
        assert!(!again);
        assert_eq!(info.data_type(), DataType::S16);
        Ok(())
    }

    #[test]
    fn test_set_valid_region_is_clamped() -> Result<(), TensorError> {
        let mut info = TensorInfo::new(TensorShape::new(&[4, 4]), DataType::U8)?;
        info.set_valid_region(ValidRegion::new(
            Coordinates::from([-1, 1]),
            TensorShape::new(&[10, 2]),
        ));
        assert_eq!(info.valid_region().start(0), 0);
        assert_eq!(info.valid_region().end(0), 4);
        assert_eq!(info.valid_region().end(1), 3);
        Ok(())
    }

    #[test]
    fn test_broadcast_valid_region() -> Result<(), Box<dyn std::error::Error>> {
        let mut a = TensorInfo::new(TensorShape::new(&[8, 4]), DataType::F32)?;
        a.set_valid_region(ValidRegion::new(
            Coordinates::from([1, 0]),
            TensorShape::new(&[6, 4]),
        ));
        let b = TensorInfo::new(TensorShape::new(&[8, 1]), DataType::F32)?;
        let (shape, region) = broadcast_shape_and_valid_region(&[&a, &b])?;
        assert_eq!(shape.as_slice(), &[8, 4]);
        assert_eq!((region.start(0), region.end(0)), (1, 7));
        assert_eq!((region.start(1), region.end(1)), (0, 4));

        let c = TensorInfo::new(TensorShape::new(&[3, 4]), DataType::F32)?;
        assert!(broadcast_shape_and_valid_region(&[&a, &c]).is_err());
        Ok(())
    }
}
