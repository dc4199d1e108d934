use crate::dimensions::TensorShape;

/// How reads outside of a tensor's valid region are resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BorderMode {
    /// Nothing beyond the valid region is ever read; the border holds garbage.
    ///
    /// Example: ...d c b a | ? ? ? ?...
    #[default]
    Undefined,

    /// The border is filled with a single constant value.
    ///
    /// Example: ...d c b a | v v v v...
    Constant,

    /// The outermost row or column of the valid region is repeated into the border.
    ///
    /// Example: ...d c b a | a a a a...
    Replicate,
}

impl BorderMode {
    /// Returns true if reads outside the valid region are not allowed.
    pub fn is_undefined(&self) -> bool {
        matches!(self, BorderMode::Undefined)
    }
}

/// Constant used to fill the border in [`BorderMode::Constant`].
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PixelValue(pub f64);

impl PixelValue {
    /// Converts the value to an element type, or `None` if it is not representable.
    pub fn to<T: num_traits::NumCast>(&self) -> Option<T> {
        <T as num_traits::NumCast>::from(self.0)
    }
}

/// Halo, in elements, a kernel reads or writes around the valid region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BorderSize {
    /// Rows above the region.
    pub top: usize,
    /// Columns right of the region.
    pub right: usize,
    /// Rows below the region.
    pub bottom: usize,
    /// Columns left of the region.
    pub left: usize,
}

impl BorderSize {
    /// Creates a border with explicit edges.
    pub fn new(top: usize, right: usize, bottom: usize, left: usize) -> Self {
        Self {
            top,
            right,
            bottom,
            left,
        }
    }

    /// Same border on every edge.
    pub fn uniform(size: usize) -> Self {
        Self::new(size, size, size, size)
    }

    /// `top_bottom` rows above and below, `left_right` columns on each side.
    pub fn symmetric(top_bottom: usize, left_right: usize) -> Self {
        Self::new(top_bottom, left_right, top_bottom, left_right)
    }

    /// Returns true if every edge is 0.
    pub fn is_zero(&self) -> bool {
        *self == Self::default()
    }

    /// Returns true if every edge has the same size.
    pub fn is_uniform(&self) -> bool {
        self.top == self.right && self.top == self.bottom && self.top == self.left
    }

    /// Clamps every edge to the corresponding edge of `limit`.
    ///
    /// Used to restrict a requested border to the padding actually allocated.
    pub fn limit(&self, limit: &BorderSize) -> Self {
        Self::new(
            self.top.min(limit.top),
            self.right.min(limit.right),
            self.bottom.min(limit.bottom),
            self.left.min(limit.left),
        )
    }

    /// Per-edge maximum.
    pub fn max(&self, other: &BorderSize) -> Self {
        Self::new(
            self.top.max(other.top),
            self.right.max(other.right),
            self.bottom.max(other.bottom),
            self.left.max(other.left),
        )
    }
}

impl std::ops::Mul<usize> for BorderSize {
    type Output = BorderSize;

    fn mul(self, scale: usize) -> Self::Output {
        Self::new(
            self.top * scale,
            self.right * scale,
            self.bottom * scale,
            self.left * scale,
        )
    }
}

impl std::ops::Add for BorderSize {
    type Output = BorderSize;

    fn add(self, other: BorderSize) -> Self::Output {
        Self::new(
            self.top + other.top,
            self.right + other.right,
            self.bottom + other.bottom,
            self.left + other.left,
        )
    }
}

/// Elements physically reserved around a tensor's declared shape.
///
/// Only the two innermost axes are padded: x (left/right) and y (top/bottom).
/// Higher axes never carry padding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PaddingInfo {
    /// Rows reserved above the data.
    pub top: usize,
    /// Rows reserved below the data.
    pub bottom: usize,
    /// Columns reserved left of the data.
    pub left: usize,
    /// Columns reserved right of the data.
    pub right: usize,
}

impl PaddingInfo {
    /// Creates padding with explicit edges.
    pub fn new(top: usize, bottom: usize, left: usize, right: usize) -> Self {
        Self {
            top,
            bottom,
            left,
            right,
        }
    }

    /// Same padding on every edge.
    pub fn uniform(size: usize) -> Self {
        Self::new(size, size, size, size)
    }

    /// Elements reserved before the data on `axis`.
    pub fn before(&self, axis: usize) -> usize {
        match axis {
            0 => self.left,
            1 => self.top,
            _ => 0,
        }
    }

    /// Elements reserved after the data on `axis`.
    pub fn after(&self, axis: usize) -> usize {
        match axis {
            0 => self.right,
            1 => self.bottom,
            _ => 0,
        }
    }

    /// Returns true if no padding is reserved.
    pub fn is_zero(&self) -> bool {
        *self == Self::default()
    }

    /// Returns true if every edge is at least as large as the edge of `needed`.
    pub fn covers(&self, needed: &PaddingInfo) -> bool {
        self.top >= needed.top
            && self.bottom >= needed.bottom
            && self.left >= needed.left
            && self.right >= needed.right
    }

    /// Grows every edge to at least the edge of `needed`.
    ///
    /// Returns true if any edge changed.
    pub fn extend(&mut self, needed: &PaddingInfo) -> bool {
        let extended = Self::new(
            self.top.max(needed.top),
            self.bottom.max(needed.bottom),
            self.left.max(needed.left),
            self.right.max(needed.right),
        );
        let changed = extended != *self;
        *self = extended;
        changed
    }

    /// Validates that `padded` is `shape` grown by this padding on x and y.
    pub fn validate_size(&self, shape: &TensorShape, padded: &TensorShape) -> bool {
        padded.get(0) == shape.get(0) + self.left + self.right
            && padded.get(1) == shape.get(1) + self.top + self.bottom
    }
}

impl From<BorderSize> for PaddingInfo {
    fn from(border: BorderSize) -> Self {
        Self::new(border.top, border.bottom, border.left, border.right)
    }
}

impl From<PaddingInfo> for BorderSize {
    fn from(padding: PaddingInfo) -> Self {
        Self::new(padding.top, padding.right, padding.bottom, padding.left)
    }
}
