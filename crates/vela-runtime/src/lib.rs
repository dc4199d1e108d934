#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]

/// kernel dispatch tables.
pub mod dispatch;

/// gpu command queue, device buffers and the host backend.
pub mod gpu;

/// kernel lifecycle and tensor packs.
pub mod kernel;

/// kernels built on the windowing core.
pub mod kernels;

/// cpu scheduler module.
pub mod scheduler;

pub use crate::dispatch::{DispatchKey, DispatchTable, ShapeClass};
pub use crate::gpu::{
    BufferId, BuildOptions, CommandQueue, DeviceMemory, Dispatch, GpuContext, GpuContextConfig,
    GpuError, GpuTensor, HostLibrary, HostQueue, KernelArg, KernelEntry, KernelHandle,
    KernelLibrary, NdRange, RunId,
};
pub use crate::kernel::{
    CpuKernel, CpuSlicePack, CpuTensorPack, ExecutionContext, GpuKernel, GpuTensorPack, Kernel,
    KernelBase, TensorSlot, ThreadInfo,
};
pub use crate::kernels::{
    box3x3::CpuBox3x3Kernel,
    elementwise::{ArithmeticOp, CpuElementwiseKernel, GpuElementwiseKernel},
    fill_border::{CpuFillBorderKernel, GpuFillBorderKernel},
};
pub use crate::scheduler::{
    CpuScheduler, ExecutionStrategy, ScheduleHints, SchedulerConfig, SchedulerError,
};
