use log::debug;

use vela_core::{
    BorderSize, Element, KernelError, Status, Tensor, TensorSliceMut, TensorViewMut, Window,
};

use crate::{
    gpu::{CommandQueue, GpuContext, GpuTensor},
    scheduler::{CpuScheduler, ScheduleHints},
};

/// Identifies a tensor argument of a kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TensorSlot {
    /// The n-th source tensor.
    Src(u8),
    /// The n-th destination tensor.
    Dst(u8),
}

impl std::fmt::Display for TensorSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Src(n) => write!(f, "src{n}"),
            Self::Dst(n) => write!(f, "dst{n}"),
        }
    }
}

/// Worker that executes a sub-window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadInfo {
    /// Index of the worker, in `0..num_threads`.
    pub thread_id: usize,
    /// Number of workers sharing the window.
    pub num_threads: usize,
}

impl ThreadInfo {
    /// Info of a window executed on the caller thread.
    pub fn single() -> Self {
        Self {
            thread_id: 0,
            num_threads: 1,
        }
    }
}

/// State shared by every kernel: its name, configured window and border.
///
/// A kernel is unconfigured until [`KernelBase::configure`] succeeds; every other
/// operation fails with a precondition error before that.
#[derive(Debug, Clone)]
pub struct KernelBase {
    name: &'static str,
    window: Option<Window>,
    border_size: BorderSize,
    parallelisable: bool,
}

impl KernelBase {
    /// An unconfigured, parallelisable kernel with no border.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            window: None,
            border_size: BorderSize::default(),
            parallelisable: true,
        }
    }

    /// Name used in logs and error messages.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Stores the maximal window of the kernel.
    pub fn configure(&mut self, window: Window) -> Status {
        window.validate()?;
        debug!("{}: configured with window {window}", self.name);
        self.window = Some(window);
        Ok(())
    }

    /// Returns true once a window has been configured.
    pub fn is_configured(&self) -> bool {
        self.window.is_some()
    }

    /// The configured window.
    #[track_caller]
    pub fn window(&self) -> Result<&Window, KernelError> {
        self.window
            .as_ref()
            .ok_or_else(|| KernelError::precondition(format!("kernel {} is not configured", self.name)))
    }

    /// Border the kernel reads around the valid region of its inputs.
    pub fn border_size(&self) -> BorderSize {
        self.border_size
    }

    /// Sets the border the kernel reads.
    pub fn set_border_size(&mut self, border: BorderSize) {
        self.border_size = border;
    }

    /// Returns false if the window must run as a single piece.
    pub fn is_parallelisable(&self) -> bool {
        self.parallelisable
    }

    /// Marks whether the window may be split between workers.
    pub fn set_parallelisable(&mut self, parallelisable: bool) {
        self.parallelisable = parallelisable;
    }

    /// Checks that `window` may be executed: the kernel is configured and `window`
    /// is a sub-window of its configured window.
    #[track_caller]
    pub fn validate_run_window(&self, window: &Window) -> Status {
        let full = self.window()?;
        window.validate()?;
        window.is_sub_window_of(full)
    }
}

/// Tensors of a CPU kernel invocation, keyed by slot.
///
/// Outputs are borrowed mutably so the scheduler can hand disjoint bands to workers.
#[derive(Debug, Default)]
pub struct CpuTensorPack<'a> {
    inputs: Vec<(TensorSlot, &'a Tensor)>,
    outputs: Vec<(TensorSlot, &'a mut Tensor)>,
}

impl<'a> CpuTensorPack<'a> {
    /// An empty pack.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a read-only tensor.
    pub fn with_input(mut self, slot: TensorSlot, tensor: &'a Tensor) -> Self {
        self.inputs.push((slot, tensor));
        self
    }

    /// Adds a written tensor.
    pub fn with_output(mut self, slot: TensorSlot, tensor: &'a mut Tensor) -> Self {
        self.outputs.push((slot, tensor));
        self
    }

    /// Splits every output along `axis` at `cuts`, one pack per band.
    pub(crate) fn split(
        &mut self,
        axis: usize,
        cuts: &[isize],
    ) -> Result<Vec<CpuSlicePack<'_>>, KernelError> {
        let Self { inputs, outputs } = self;
        let mut packs: Vec<CpuSlicePack<'_>> = (0..=cuts.len())
            .map(|_| CpuSlicePack {
                inputs: inputs.iter().map(|(slot, tensor)| (*slot, &**tensor)).collect(),
                outputs: Vec::with_capacity(outputs.len()),
            })
            .collect();

        for (slot, tensor) in outputs.iter_mut() {
            let views = tensor.split_mut(axis, cuts).map_err(|e| {
                KernelError::precondition(format!("cannot split output {slot} on axis {axis}: {e}"))
            })?;
            for (pack, view) in packs.iter_mut().zip(views) {
                pack.outputs.push((*slot, view));
            }
        }
        Ok(packs)
    }
}

/// The part of a [`CpuTensorPack`] one worker sees.
///
/// Inputs are shared; each output is a view of the band the worker owns.
#[derive(Debug)]
pub struct CpuSlicePack<'a> {
    inputs: Vec<(TensorSlot, &'a Tensor)>,
    outputs: Vec<(TensorSlot, TensorSliceMut<'a>)>,
}

impl<'a> CpuSlicePack<'a> {
    /// The input tensor in `slot`.
    #[track_caller]
    pub fn input(&self, slot: TensorSlot) -> Result<&'a Tensor, KernelError> {
        self.inputs
            .iter()
            .find(|(s, _)| *s == slot)
            .map(|(_, tensor)| *tensor)
            .ok_or_else(|| KernelError::precondition(format!("missing input tensor {slot}")))
    }

    /// The output view in `slot`.
    #[track_caller]
    pub fn output(&mut self, slot: TensorSlot) -> Result<&mut TensorSliceMut<'a>, KernelError> {
        self.outputs
            .iter_mut()
            .find(|(s, _)| *s == slot)
            .map(|(_, view)| view)
            .ok_or_else(|| KernelError::precondition(format!("missing output tensor {slot}")))
    }

    /// The output view in `slot` with element type `T`.
    #[track_caller]
    pub fn output_typed<T: Element>(
        &mut self,
        slot: TensorSlot,
    ) -> Result<&mut TensorViewMut<'a, T>, KernelError> {
        let view = self.output(slot)?;
        let data_type = view.info().data_type();
        view.typed::<T>().ok_or_else(|| {
            KernelError::precondition(format!(
                "output {slot} holds {data_type}, not {}",
                T::DATA_TYPE
            ))
        })
    }
}

/// Device tensors of a GPU kernel invocation, keyed by slot.
#[derive(Debug, Clone, Default)]
pub struct GpuTensorPack {
    tensors: Vec<(TensorSlot, GpuTensor)>,
}

impl GpuTensorPack {
    /// An empty pack.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a tensor.
    pub fn with(mut self, slot: TensorSlot, tensor: GpuTensor) -> Self {
        self.tensors.push((slot, tensor));
        self
    }

    /// The tensor in `slot`.
    #[track_caller]
    pub fn get(&self, slot: TensorSlot) -> Result<&GpuTensor, KernelError> {
        self.tensors
            .iter()
            .find(|(s, _)| *s == slot)
            .map(|(_, tensor)| tensor)
            .ok_or_else(|| KernelError::precondition(format!("missing tensor {slot}")))
    }
}

/// A kernel executed on the host by the [`CpuScheduler`].
pub trait CpuKernel: Send + Sync {
    /// Shared kernel state.
    fn base(&self) -> &KernelBase;

    /// Processes `window`, a sub-window of the configured window.
    ///
    /// Outputs only expose the band owned by this worker.
    fn run_op(&self, pack: &mut CpuSlicePack<'_>, window: &Window, info: &ThreadInfo) -> Status;
}

/// A kernel recorded into a device [`CommandQueue`].
pub trait GpuKernel: Send + Sync {
    /// Shared kernel state.
    fn base(&self) -> &KernelBase;

    /// Enqueues the dispatches covering `window`.
    fn enqueue(&self, pack: &GpuTensorPack, window: &Window, queue: &mut dyn CommandQueue)
        -> Status;
}

/// A configured kernel of either backend.
pub enum Kernel {
    /// Host kernel.
    Cpu(Box<dyn CpuKernel>),
    /// Device kernel.
    Gpu(Box<dyn GpuKernel>),
}

/// Where a [`Kernel`] runs, with the tensors it runs on.
pub enum ExecutionContext<'c, 'p> {
    /// Run on the scheduler's workers.
    Cpu {
        /// Scheduler splitting the window.
        scheduler: &'c CpuScheduler,
        /// Tensors of the invocation.
        pack: &'c mut CpuTensorPack<'p>,
    },
    /// Record into the context's command queue.
    Gpu {
        /// Device context.
        context: &'c mut GpuContext,
        /// Device tensors of the invocation.
        pack: &'c GpuTensorPack,
    },
}

impl ExecutionContext<'_, '_> {
    fn backend(&self) -> &'static str {
        match self {
            Self::Cpu { .. } => "cpu",
            Self::Gpu { .. } => "gpu",
        }
    }
}

impl Kernel {
    fn base(&self) -> &KernelBase {
        match self {
            Self::Cpu(kernel) => kernel.base(),
            Self::Gpu(kernel) => kernel.base(),
        }
    }

    /// Name of the kernel.
    pub fn name(&self) -> &'static str {
        self.base().name()
    }

    /// The configured window.
    pub fn window(&self) -> Result<&Window, KernelError> {
        self.base().window()
    }

    /// Border the kernel reads.
    pub fn border_size(&self) -> BorderSize {
        self.base().border_size()
    }

    /// Returns false if the window must run as a single piece.
    pub fn is_parallelisable(&self) -> bool {
        self.base().is_parallelisable()
    }

    /// Runs the whole configured window.
    pub fn run(&self, context: ExecutionContext<'_, '_>) -> Status {
        let window = *self.window()?;
        self.run_window(&window, context)
    }

    /// Runs `window`, which must be a sub-window of the configured one.
    pub fn run_window(&self, window: &Window, context: ExecutionContext<'_, '_>) -> Status {
        match (self, context) {
            (Self::Cpu(kernel), ExecutionContext::Cpu { scheduler, pack }) => {
                scheduler.schedule_window(kernel.as_ref(), pack, window, ScheduleHints::default())
            }
            (Self::Gpu(kernel), ExecutionContext::Gpu { context, pack }) => {
                kernel.base().validate_run_window(window)?;
                kernel.enqueue(pack, window, context.queue_mut())
            }
            (kernel, context) => Err(KernelError::precondition(format!(
                "kernel {} cannot run on a {} context",
                kernel.name(),
                context.backend()
            ))),
        }
    }
}
