#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]

/// access windows and padding propagation module.
pub mod access_window;

/// border sizes, padding and border modes.
pub mod border;

/// fixed-capacity shapes, coordinates and steps.
pub mod dimensions;

/// kernel errors and the status type.
pub mod error;

/// window computation helpers.
pub mod helpers;

/// tensor descriptor module.
pub mod info;

/// cpu tensor storage and views.
pub mod tensor;

/// data types, layouts and quantization.
pub mod types;

/// valid region module.
pub mod valid_region;

/// iteration windows module.
pub mod window;

pub use crate::access_window::{update_window_and_padding, AccessWindow, TensorAccess};
pub use crate::border::{BorderMode, BorderSize, PaddingInfo, PixelValue};
pub use crate::dimensions::{Coordinates, Steps, Strides, TensorShape, MAX_DIMS};
pub use crate::error::{ErrorKind, KernelError, Status, StatusExt};
pub use crate::helpers::{
    calculate_max_enlarged_window, calculate_max_window, calculate_max_window_for_region,
    calculate_max_window_horizontal, execute_window_loop,
};
pub use crate::info::{broadcast_shape_and_valid_region, TensorInfo};
pub use crate::tensor::{Element, Tensor, TensorError, TensorSliceMut, TensorView, TensorViewMut};
pub use crate::types::{DataLayout, DataType, QuantizationInfo};
pub use crate::valid_region::{intersect_valid_regions, ValidRegion};
pub use crate::window::{Window, WindowDimension};
