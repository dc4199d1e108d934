#![doc = include_str!(concat!("../", env!("CARGO_PKG_README")))]

#[doc(inline)]
pub use vela_core as core;

#[doc(inline)]
pub use vela_runtime as runtime;
