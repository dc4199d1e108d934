/// Element data type of a tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DataType {
    /// Not yet known; a descriptor with this type is waiting for auto-initialization.
    #[default]
    Unknown,
    /// Unsigned 8-bit integer.
    U8,
    /// Signed 16-bit integer.
    S16,
    /// Signed 32-bit integer.
    S32,
    /// 32-bit floating point.
    F32,
    /// Asymmetric quantized unsigned 8-bit integer.
    QAsymm8,
}

impl DataType {
    /// Size of one element in bytes (0 for [`DataType::Unknown`]).
    pub fn element_size(&self) -> usize {
        match self {
            DataType::Unknown => 0,
            DataType::U8 | DataType::QAsymm8 => 1,
            DataType::S16 => 2,
            DataType::S32 | DataType::F32 => 4,
        }
    }

    /// Returns true for quantized data types.
    pub fn is_quantized(&self) -> bool {
        matches!(self, DataType::QAsymm8)
    }

    /// Returns true for floating point data types.
    pub fn is_float(&self) -> bool {
        matches!(self, DataType::F32)
    }

    /// Short lowercase name.
    pub fn name(&self) -> &'static str {
        match self {
            DataType::Unknown => "unknown",
            DataType::U8 => "u8",
            DataType::S16 => "s16",
            DataType::S32 => "s32",
            DataType::F32 => "f32",
            DataType::QAsymm8 => "qasymm8",
        }
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Memory layout of the channel/spatial axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DataLayout {
    /// Layout not specified.
    #[default]
    Unknown,
    /// Width innermost, then height, then channels.
    Nchw,
    /// Channels innermost, then width, then height.
    Nhwc,
}

impl std::fmt::Display for DataLayout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataLayout::Unknown => write!(f, "unknown"),
            DataLayout::Nchw => write!(f, "nchw"),
            DataLayout::Nhwc => write!(f, "nhwc"),
        }
    }
}

/// Uniform quantization parameters: `real = scale * (quantized - offset)`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct QuantizationInfo {
    /// Scale factor.
    pub scale: f32,
    /// Zero point.
    pub offset: i32,
}

impl QuantizationInfo {
    /// Creates new quantization parameters.
    pub fn new(scale: f32, offset: i32) -> Self {
        Self { scale, offset }
    }

    /// Returns true if no quantization parameters were set.
    pub fn is_empty(&self) -> bool {
        self.scale == 0.0 && self.offset == 0
    }
}
