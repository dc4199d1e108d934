use std::collections::{BTreeMap, HashMap, VecDeque};

use log::{debug, trace};
use thiserror::Error;

use vela_core::{
    dimensions::index2coords, Coordinates, DataType, Element, KernelError, Tensor, TensorError,
    TensorInfo, ValidRegion, Window,
};

/// Errors raised by a command queue, its buffers or its kernel library.
#[derive(Error, Debug, PartialEq)]
pub enum GpuError {
    /// A dispatch reads a buffer written by an earlier dispatch with no barrier in between.
    #[error("dispatch of {kernel} reads buffer {buffer} written since the last barrier")]
    MissingBarrier {
        /// Kernel of the offending dispatch.
        kernel: String,
        /// Buffer read too early.
        buffer: BufferId,
    },

    /// The buffer was never allocated on this queue, or was released.
    #[error("unknown buffer {0}")]
    UnknownBuffer(BufferId),

    /// The library has no kernel with this name.
    #[error("kernel {0} is not in the library")]
    KernelNotFound(String),

    /// A kernel argument is missing or has the wrong kind.
    #[error("kernel {kernel}: invalid argument {index}")]
    InvalidArgument {
        /// Kernel reading the argument.
        kernel: String,
        /// Position of the argument.
        index: usize,
    },

    /// A kernel failed while executing.
    #[error("kernel {kernel} failed: {message}")]
    ExecutionFailed {
        /// Kernel that failed.
        kernel: String,
        /// What went wrong.
        message: String,
    },

    /// An upload does not match the descriptor of the buffer.
    #[error("buffer {buffer} holds {expected}, cannot write {actual}")]
    DescriptorMismatch {
        /// Destination buffer.
        buffer: BufferId,
        /// Shape and type of the buffer.
        expected: String,
        /// Shape and type of the uploaded tensor.
        actual: String,
    },

    /// Host storage could not be created or viewed.
    #[error(transparent)]
    Tensor(#[from] TensorError),
}

impl From<GpuError> for KernelError {
    #[track_caller]
    fn from(err: GpuError) -> Self {
        let message = err.to_string();
        match err {
            GpuError::KernelNotFound(_) => KernelError::unsupported(message),
            _ => KernelError::precondition(message),
        }
    }
}

/// Handle of a device buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(u64);

impl std::fmt::Display for BufferId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Identifies one kernel run on a queue; every dispatch recorded by the run shares it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RunId(u64);

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "run {}", self.0)
    }
}

/// A tensor living in device memory: a buffer plus its frozen descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct GpuTensor {
    buffer: BufferId,
    info: TensorInfo,
}

impl GpuTensor {
    /// The device buffer.
    pub fn buffer(&self) -> BufferId {
        self.buffer
    }

    /// The descriptor the buffer was allocated with.
    pub fn info(&self) -> &TensorInfo {
        &self.info
    }

    /// Records the region of the buffer holding defined values.
    pub fn set_valid_region(&mut self, region: ValidRegion) {
        self.info.set_valid_region(region);
    }
}

/// Preprocessor-style definitions a kernel is built with.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct BuildOptions(BTreeMap<String, String>);

impl BuildOptions {
    /// No definitions.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `-D<name>=<value>`.
    pub fn define(mut self, name: &str, value: impl ToString) -> Self {
        self.0.insert(name.to_string(), value.to_string());
        self
    }

    /// Value of `name`, if defined.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }
}

impl std::fmt::Display for BuildOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut first = true;
        for (name, value) in &self.0 {
            if !first {
                f.write_str(" ")?;
            }
            write!(f, "-D{name}={value}")?;
            first = false;
        }
        Ok(())
    }
}

/// Entry point of a built kernel: executes one dispatch against device memory.
pub type KernelEntry = fn(&Dispatch, &mut DeviceMemory) -> Result<(), GpuError>;

/// A built kernel returned by a [`KernelLibrary`].
#[derive(Debug, Clone)]
pub struct KernelHandle {
    name: String,
    options: BuildOptions,
    entry: KernelEntry,
}

impl KernelHandle {
    /// Name of the kernel.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Options the kernel was built with.
    pub fn options(&self) -> &BuildOptions {
        &self.options
    }
}

/// A scalar or buffer argument of a dispatch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum KernelArg {
    /// A device buffer.
    Buffer(BufferId),
    /// An integer scalar.
    Int(i64),
    /// A floating point scalar.
    Float(f64),
}

/// Work items of a dispatch: a 3D grid derived from a window slice.
///
/// Work item `(i, j, k)` processes the window position
/// `offset + (i * step_x, j * step_y, k * step_z)`; axes above z are fixed by `offset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NdRange {
    /// Position of work item (0, 0, 0), on every axis.
    pub offset: Coordinates,
    /// Number of work items on x, y and z.
    pub global: [usize; 3],
    /// Window step on x, y and z.
    pub step: [usize; 3],
}

impl NdRange {
    /// Grid covering a window slice of rank 3 or less.
    pub fn from_window(window: &Window) -> Self {
        let mut offset = Coordinates::default();
        for d in 0..vela_core::MAX_DIMS {
            offset.set(d, window[d].start());
        }
        Self {
            offset,
            global: [0, 1, 2].map(|d| window.num_iterations(d)),
            step: [0, 1, 2].map(|d| window[d].step()),
        }
    }

    /// Total number of work items.
    pub fn num_work_items(&self) -> usize {
        self.global.iter().product()
    }

    /// Calls `f` with the window position of every work item, x fastest.
    pub fn for_each_position<F>(&self, mut f: F) -> Result<(), GpuError>
    where
        F: FnMut(&Coordinates) -> Result<(), GpuError>,
    {
        let mut coords = self.offset;
        for k in 0..self.global[2] {
            coords.set(2, self.offset.get(2) + (k * self.step[2]) as isize);
            for j in 0..self.global[1] {
                coords.set(1, self.offset.get(1) + (j * self.step[1]) as isize);
                for i in 0..self.global[0] {
                    coords.set(0, self.offset.get(0) + (i * self.step[0]) as isize);
                    f(&coords)?;
                }
            }
        }
        Ok(())
    }
}

impl std::fmt::Display for NdRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:?} items at {:?}",
            self.global,
            &self.offset.as_slice()
        )
    }
}

/// One kernel invocation recorded into a [`CommandQueue`].
///
/// `reads` and `writes` declare the buffers the invocation touches; they drive the
/// barrier checks of the queue. Dispatches of one run write disjoint parts of their
/// buffers and may read each other's buffers without a barrier.
#[derive(Debug, Clone)]
pub struct Dispatch {
    /// Kernel to run.
    pub kernel: KernelHandle,
    /// Work items.
    pub range: NdRange,
    /// Arguments in kernel order.
    pub args: Vec<KernelArg>,
    /// Buffers read.
    pub reads: Vec<BufferId>,
    /// Buffers written.
    pub writes: Vec<BufferId>,
    /// Run the dispatch belongs to; `None` for a standalone dispatch.
    pub run: Option<RunId>,
}

impl Dispatch {
    /// A dispatch of `kernel` over `range` with no arguments.
    pub fn new(kernel: KernelHandle, range: NdRange) -> Self {
        Self {
            kernel,
            range,
            args: Vec::new(),
            reads: Vec::new(),
            writes: Vec::new(),
            run: None,
        }
    }

    /// Tags the dispatch with the run recording it.
    pub fn in_run(mut self, run: RunId) -> Self {
        self.run = Some(run);
        self
    }

    /// Appends an argument.
    pub fn arg(mut self, arg: KernelArg) -> Self {
        self.args.push(arg);
        self
    }

    /// Appends a buffer argument the kernel reads.
    pub fn read(mut self, buffer: BufferId) -> Self {
        self.args.push(KernelArg::Buffer(buffer));
        self.reads.push(buffer);
        self
    }

    /// Appends a buffer argument the kernel writes.
    pub fn write(mut self, buffer: BufferId) -> Self {
        self.args.push(KernelArg::Buffer(buffer));
        self.writes.push(buffer);
        self
    }

    /// Appends a buffer argument the kernel reads and writes.
    pub fn read_write(mut self, buffer: BufferId) -> Self {
        self.args.push(KernelArg::Buffer(buffer));
        self.reads.push(buffer);
        self.writes.push(buffer);
        self
    }

    fn invalid(&self, index: usize) -> GpuError {
        GpuError::InvalidArgument {
            kernel: self.kernel.name.clone(),
            index,
        }
    }

    /// Buffer argument at `index`.
    pub fn buffer_arg(&self, index: usize) -> Result<BufferId, GpuError> {
        match self.args.get(index) {
            Some(KernelArg::Buffer(id)) => Ok(*id),
            _ => Err(self.invalid(index)),
        }
    }

    /// Integer argument at `index`.
    pub fn int_arg(&self, index: usize) -> Result<i64, GpuError> {
        match self.args.get(index) {
            Some(KernelArg::Int(v)) => Ok(*v),
            _ => Err(self.invalid(index)),
        }
    }

    /// Floating point argument at `index`.
    pub fn float_arg(&self, index: usize) -> Result<f64, GpuError> {
        match self.args.get(index) {
            Some(KernelArg::Float(v)) => Ok(*v),
            _ => Err(self.invalid(index)),
        }
    }

    /// Error of this dispatch with `message`.
    pub fn failure(&self, message: impl Into<String>) -> GpuError {
        GpuError::ExecutionFailed {
            kernel: self.kernel.name.clone(),
            message: message.into(),
        }
    }
}

/// Buffers of a host device.
#[derive(Debug, Default)]
pub struct DeviceMemory {
    buffers: HashMap<BufferId, Tensor>,
    next_id: u64,
}

impl DeviceMemory {
    /// Allocates a zeroed buffer for `info`.
    pub fn allocate(&mut self, info: &TensorInfo) -> Result<GpuTensor, GpuError> {
        let tensor = Tensor::allocate(info.clone())?;
        let buffer = BufferId(self.next_id);
        self.next_id += 1;
        let info = tensor.info().clone();
        self.buffers.insert(buffer, tensor);
        Ok(GpuTensor { buffer, info })
    }

    /// Frees a buffer.
    pub fn release(&mut self, buffer: BufferId) -> Result<(), GpuError> {
        self.buffers
            .remove(&buffer)
            .map(|_| ())
            .ok_or(GpuError::UnknownBuffer(buffer))
    }

    /// Returns true if `buffer` is allocated.
    pub fn contains(&self, buffer: BufferId) -> bool {
        self.buffers.contains_key(&buffer)
    }

    /// Storage of `buffer`.
    pub fn get(&self, buffer: BufferId) -> Result<&Tensor, GpuError> {
        self.buffers
            .get(&buffer)
            .ok_or(GpuError::UnknownBuffer(buffer))
    }

    /// Mutable storage of `buffer`.
    pub fn get_mut(&mut self, buffer: BufferId) -> Result<&mut Tensor, GpuError> {
        self.buffers
            .get_mut(&buffer)
            .ok_or(GpuError::UnknownBuffer(buffer))
    }

    /// Runs `f` with `buffer` borrowed mutably and every other buffer readable.
    ///
    /// `buffer` itself is not visible through the memory passed to `f`.
    pub fn with_buffer_mut<R, F>(&mut self, buffer: BufferId, f: F) -> Result<R, GpuError>
    where
        F: FnOnce(&mut Tensor, &DeviceMemory) -> Result<R, GpuError>,
    {
        let mut tensor = self
            .buffers
            .remove(&buffer)
            .ok_or(GpuError::UnknownBuffer(buffer))?;
        let result = f(&mut tensor, self);
        self.buffers.insert(buffer, tensor);
        result
    }
}

/// An in-order device command queue.
pub trait CommandQueue: Send {
    /// Allocates a buffer for `info`; its padding is frozen from now on.
    fn allocate(&mut self, info: &TensorInfo) -> Result<GpuTensor, GpuError>;

    /// Uploads `tensor` into `buffer`. Blocks until prior work is done.
    fn write(&mut self, buffer: BufferId, tensor: &Tensor) -> Result<(), GpuError>;

    /// Downloads `buffer`. Blocks until prior work is done.
    fn read(&mut self, buffer: BufferId) -> Result<Tensor, GpuError>;

    /// Records a dispatch.
    fn enqueue(&mut self, dispatch: Dispatch) -> Result<(), GpuError>;

    /// Starts a kernel run and returns its id.
    fn begin_run(&mut self) -> RunId;

    /// Makes the writes of every earlier dispatch visible to later ones.
    fn barrier(&mut self);

    /// Waits for every recorded dispatch.
    fn finish(&mut self) -> Result<(), GpuError>;
}

/// Compiles and caches kernels by name and build options.
pub trait KernelLibrary: Send {
    /// Built kernel `name` for `options`.
    fn kernel(&mut self, name: &str, options: &BuildOptions) -> Result<KernelHandle, GpuError>;
}

/// Command queue settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct GpuContextConfig {
    /// Dispatches recorded before the queue is flushed implicitly.
    pub max_pending_dispatches: usize,
    /// Reject dispatches that read a buffer written since the last barrier.
    pub check_hazards: bool,
}

impl Default for GpuContextConfig {
    fn default() -> Self {
        Self {
            max_pending_dispatches: 64,
            check_hazards: true,
        }
    }
}

/// A [`CommandQueue`] executing dispatches on the host, in recording order.
///
/// Work is deferred until [`CommandQueue::finish`], a blocking read or write, or the
/// pending limit is reached. A dispatch may read a buffer written since the last
/// barrier only when the writer belongs to the same run.
#[derive(Debug, Default)]
pub struct HostQueue {
    config: GpuContextConfig,
    memory: DeviceMemory,
    pending: VecDeque<Dispatch>,
    written: HashMap<BufferId, Option<RunId>>,
    next_run: u64,
    executed: usize,
}

impl HostQueue {
    /// An empty queue.
    pub fn new(config: GpuContextConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    /// Number of dispatches recorded but not executed yet.
    pub fn num_pending(&self) -> usize {
        self.pending.len()
    }

    /// Number of dispatches executed so far.
    pub fn num_executed(&self) -> usize {
        self.executed
    }

    fn flush(&mut self) -> Result<(), GpuError> {
        while let Some(dispatch) = self.pending.pop_front() {
            trace!("execute {} over {}", dispatch.kernel.name, dispatch.range);
            (dispatch.kernel.entry)(&dispatch, &mut self.memory)?;
            self.executed += 1;
        }
        Ok(())
    }
}

impl CommandQueue for HostQueue {
    fn allocate(&mut self, info: &TensorInfo) -> Result<GpuTensor, GpuError> {
        self.memory.allocate(info)
    }

    fn write(&mut self, buffer: BufferId, tensor: &Tensor) -> Result<(), GpuError> {
        self.flush()?;
        let dst = self.memory.get_mut(buffer)?;
        let (src_info, dst_info) = (tensor.info(), dst.info());
        if src_info.shape() != dst_info.shape() || src_info.data_type() != dst_info.data_type() {
            return Err(GpuError::DescriptorMismatch {
                buffer,
                expected: format!("{} {}", dst_info.shape(), dst_info.data_type()),
                actual: format!("{} {}", src_info.shape(), src_info.data_type()),
            });
        }
        match src_info.data_type() {
            DataType::U8 | DataType::QAsymm8 => copy_shape_area::<u8>(tensor, dst)?,
            DataType::S16 => copy_shape_area::<i16>(tensor, dst)?,
            DataType::S32 => copy_shape_area::<i32>(tensor, dst)?,
            DataType::F32 => copy_shape_area::<f32>(tensor, dst)?,
            DataType::Unknown => return Err(TensorError::UnknownDataType.into()),
        }
        dst.set_valid_region(*tensor.info().valid_region());
        Ok(())
    }

    fn read(&mut self, buffer: BufferId) -> Result<Tensor, GpuError> {
        self.flush()?;
        self.memory.get(buffer).cloned()
    }

    fn enqueue(&mut self, dispatch: Dispatch) -> Result<(), GpuError> {
        if let Some(buffer) = dispatch
            .reads
            .iter()
            .chain(&dispatch.writes)
            .find(|b| !self.memory.contains(**b))
        {
            return Err(GpuError::UnknownBuffer(*buffer));
        }
        if self.config.check_hazards {
            let hazard = |writer: &Option<RunId>| writer.is_none() || *writer != dispatch.run;
            if let Some(buffer) = dispatch
                .reads
                .iter()
                .find(|b| self.written.get(*b).is_some_and(hazard))
            {
                return Err(GpuError::MissingBarrier {
                    kernel: dispatch.kernel.name.clone(),
                    buffer: *buffer,
                });
            }
        }
        trace!(
            "enqueue {} [{}] over {}",
            dispatch.kernel.name,
            dispatch.kernel.options,
            dispatch.range
        );
        for buffer in &dispatch.writes {
            self.written.insert(*buffer, dispatch.run);
        }
        self.pending.push_back(dispatch);
        if self.pending.len() >= self.config.max_pending_dispatches.max(1) {
            self.flush()?;
        }
        Ok(())
    }

    fn begin_run(&mut self) -> RunId {
        self.next_run += 1;
        RunId(self.next_run)
    }

    fn barrier(&mut self) {
        trace!("barrier after {} pending dispatches", self.pending.len());
        self.written.clear();
    }

    fn finish(&mut self) -> Result<(), GpuError> {
        self.flush()?;
        self.written.clear();
        Ok(())
    }
}

fn copy_shape_area<T: Element>(src: &Tensor, dst: &mut Tensor) -> Result<(), TensorError> {
    let shape = *src.info().shape();
    let row_len = shape.get(0);
    if row_len == 0 {
        return Ok(());
    }
    let view = src.view::<T>()?;
    let mut out = dst.view_mut::<T>()?;
    for start in (0..shape.total_size()).step_by(row_len) {
        let coords = index2coords(&shape, start);
        if let (Some(row), Some(dst_row)) = (view.row(&coords, row_len), out.row_mut(&coords, row_len)) {
            dst_row.copy_from_slice(row);
        }
    }
    Ok(())
}

/// A [`KernelLibrary`] of host entry points.
#[derive(Debug, Default)]
pub struct HostLibrary {
    programs: HashMap<String, KernelEntry>,
    cache: HashMap<(String, BuildOptions), KernelHandle>,
}

impl HostLibrary {
    /// An empty library.
    pub fn new() -> Self {
        Self::default()
    }

    /// A library holding every kernel shipped with this crate.
    pub fn with_builtin_kernels() -> Self {
        let mut library = Self::new();
        crate::kernels::register_host_kernels(&mut library);
        library
    }

    /// Adds the entry point of kernel `name`.
    pub fn register(&mut self, name: &str, entry: KernelEntry) {
        self.programs.insert(name.to_string(), entry);
    }

    /// Number of kernels built so far.
    pub fn num_built(&self) -> usize {
        self.cache.len()
    }
}

impl KernelLibrary for HostLibrary {
    fn kernel(&mut self, name: &str, options: &BuildOptions) -> Result<KernelHandle, GpuError> {
        let key = (name.to_string(), options.clone());
        if let Some(handle) = self.cache.get(&key) {
            return Ok(handle.clone());
        }
        let entry = *self
            .programs
            .get(name)
            .ok_or_else(|| GpuError::KernelNotFound(name.to_string()))?;
        debug!("building kernel {name} with [{options}]");
        let handle = KernelHandle {
            name: name.to_string(),
            options: options.clone(),
            entry,
        };
        self.cache.insert(key, handle.clone());
        Ok(handle)
    }
}

/// A device queue with its kernel library.
pub struct GpuContext {
    queue: Box<dyn CommandQueue>,
    library: Box<dyn KernelLibrary>,
}

impl GpuContext {
    /// A host-backed context with the built-in kernels.
    pub fn new(config: GpuContextConfig) -> Self {
        Self::with_backend(
            Box::new(HostQueue::new(config)),
            Box::new(HostLibrary::with_builtin_kernels()),
        )
    }

    /// A context over an existing queue and library.
    pub fn with_backend(queue: Box<dyn CommandQueue>, library: Box<dyn KernelLibrary>) -> Self {
        Self { queue, library }
    }

    /// The command queue.
    pub fn queue_mut(&mut self) -> &mut dyn CommandQueue {
        self.queue.as_mut()
    }

    /// The kernel library.
    pub fn library_mut(&mut self) -> &mut dyn KernelLibrary {
        self.library.as_mut()
    }

    /// Allocates a device tensor for `info`.
    pub fn create_tensor(&mut self, info: &TensorInfo) -> Result<GpuTensor, GpuError> {
        self.queue.allocate(info)
    }

    /// Uploads `tensor` to `dst`.
    pub fn write(&mut self, dst: &GpuTensor, tensor: &Tensor) -> Result<(), GpuError> {
        self.queue.write(dst.buffer, tensor)
    }

    /// Downloads `src`, waiting for every recorded dispatch first.
    pub fn map(&mut self, src: &GpuTensor) -> Result<Tensor, GpuError> {
        self.queue.read(src.buffer)
    }

    /// Makes earlier writes visible to later dispatches.
    pub fn barrier(&mut self) {
        self.queue.barrier();
    }

    /// Waits for every recorded dispatch.
    pub fn finish(&mut self) -> Result<(), GpuError> {
        self.queue.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vela_core::{TensorShape, WindowDimension};

    fn add_constant(dispatch: &Dispatch, memory: &mut DeviceMemory) -> Result<(), GpuError> {
        let src = dispatch.buffer_arg(0)?;
        let dst = dispatch.buffer_arg(1)?;
        let value = dispatch.float_arg(2)? as f32;
        memory.with_buffer_mut(dst, |out, memory| {
            let input = memory.get(src)?.view::<f32>()?;
            let mut view = out.view_mut::<f32>()?;
            dispatch.range.for_each_position(|c| {
                let v = input.get(c).ok_or_else(|| dispatch.failure("read out of bounds"))?;
                let o = view.get_mut(c).ok_or_else(|| dispatch.failure("write out of bounds"))?;
                *o = v + value;
                Ok(())
            })
        })
    }

    fn context(config: GpuContextConfig) -> GpuContext {
        let mut library = HostLibrary::new();
        library.register("add_constant", add_constant);
        library.register("add_constant_twice", add_constant);
        GpuContext::with_backend(Box::new(HostQueue::new(config)), Box::new(library))
    }

    fn record(
        ctx: &mut GpuContext,
        name: &str,
        src: &GpuTensor,
        dst: &GpuTensor,
        value: f64,
        run: Option<RunId>,
    ) -> Result<(), GpuError> {
        let kernel = ctx.library_mut().kernel(name, &BuildOptions::new())?;
        let window = Window::from_dimensions(&[
            WindowDimension::new(0, 4, 1),
            WindowDimension::new(0, 2, 1),
        ]);
        let mut d = Dispatch::new(kernel, NdRange::from_window(&window))
            .read(src.buffer())
            .write(dst.buffer())
            .arg(KernelArg::Float(value));
        d.run = run;
        ctx.queue_mut().enqueue(d)
    }

    fn dispatch(
        ctx: &mut GpuContext,
        name: &str,
        src: &GpuTensor,
        dst: &GpuTensor,
        value: f64,
    ) -> Result<(), GpuError> {
        let run = ctx.queue_mut().begin_run();
        record(ctx, name, src, dst, value, Some(run))
    }

    #[test]
    fn test_deferred_execution_and_map() -> Result<(), Box<dyn std::error::Error>> {
        let mut ctx = context(GpuContextConfig::default());
        let info = TensorInfo::new(TensorShape::new(&[4, 2]), DataType::F32)?;
        let a = ctx.create_tensor(&info)?;
        let b = ctx.create_tensor(&info)?;
        let c = ctx.create_tensor(&info)?;
        ctx.write(&a, &Tensor::from_vec(info.clone(), vec![1.0f32; 8])?)?;

        dispatch(&mut ctx, "add_constant", &a, &b, 1.0)?;
        ctx.barrier();
        dispatch(&mut ctx, "add_constant_twice", &b, &c, 2.0)?;

        let out = ctx.map(&c)?;
        assert_eq!(out.to_vec::<f32>()?, vec![4.0f32; 8]);
        Ok(())
    }

    #[test]
    fn test_missing_barrier() -> Result<(), Box<dyn std::error::Error>> {
        let mut ctx = context(GpuContextConfig::default());
        let info = TensorInfo::new(TensorShape::new(&[4, 2]), DataType::F32)?;
        let a = ctx.create_tensor(&info)?;
        let b = ctx.create_tensor(&info)?;
        let c = ctx.create_tensor(&info)?;

        dispatch(&mut ctx, "add_constant", &a, &b, 1.0)?;
        let err = dispatch(&mut ctx, "add_constant_twice", &b, &c, 1.0).unwrap_err();
        assert_eq!(
            err,
            GpuError::MissingBarrier {
                kernel: "add_constant_twice".to_string(),
                buffer: b.buffer(),
            }
        );

        // unrelated reads need no barrier
        dispatch(&mut ctx, "add_constant_twice", &a, &c, 1.0)?;
        ctx.barrier();
        dispatch(&mut ctx, "add_constant_twice", &c, &b, 1.0)?;
        Ok(())
    }

    #[test]
    fn test_chained_runs_of_one_kernel_need_a_barrier() -> Result<(), Box<dyn std::error::Error>> {
        let mut ctx = context(GpuContextConfig::default());
        let info = TensorInfo::new(TensorShape::new(&[4, 2]), DataType::F32)?;
        let a = ctx.create_tensor(&info)?;
        let b = ctx.create_tensor(&info)?;
        let c = ctx.create_tensor(&info)?;

        dispatch(&mut ctx, "add_constant", &a, &b, 1.0)?;
        let err = dispatch(&mut ctx, "add_constant", &b, &c, 1.0).unwrap_err();
        assert_eq!(
            err,
            GpuError::MissingBarrier {
                kernel: "add_constant".to_string(),
                buffer: b.buffer(),
            }
        );

        // standalone dispatches never share a run
        ctx.barrier();
        record(&mut ctx, "add_constant", &a, &b, 1.0, None)?;
        assert!(record(&mut ctx, "add_constant", &b, &c, 1.0, None).is_err());
        Ok(())
    }

    #[test]
    fn test_dispatches_of_one_run_share_buffers() -> Result<(), Box<dyn std::error::Error>> {
        let mut ctx = context(GpuContextConfig::default());
        let info = TensorInfo::new(TensorShape::new(&[4, 2]), DataType::F32)?;
        let a = ctx.create_tensor(&info)?;
        let b = ctx.create_tensor(&info)?;
        let c = ctx.create_tensor(&info)?;
        ctx.write(&a, &Tensor::from_vec(info.clone(), vec![1.0f32; 8])?)?;

        let run = ctx.queue_mut().begin_run();
        record(&mut ctx, "add_constant", &a, &b, 1.0, Some(run))?;
        record(&mut ctx, "add_constant", &b, &c, 1.0, Some(run))?;
        assert_eq!(ctx.map(&c)?.to_vec::<f32>()?, vec![3.0f32; 8]);

        // a later run does not inherit the permission
        let other = ctx.queue_mut().begin_run();
        assert_ne!(run, other);
        record(&mut ctx, "add_constant", &c, &b, 1.0, Some(run))?;
        assert!(record(&mut ctx, "add_constant", &b, &a, 1.0, Some(other)).is_err());
        Ok(())
    }

    #[test]
    fn test_gpu_tensor_region_update() -> Result<(), Box<dyn std::error::Error>> {
        let mut ctx = context(GpuContextConfig::default());
        let info = TensorInfo::new(TensorShape::new(&[4, 2]), DataType::F32)?;
        let mut a = ctx.create_tensor(&info)?;
        let mut region = *a.info().valid_region();
        region.set(0, 1, 10);
        a.set_valid_region(region);
        assert_eq!((a.info().valid_region().start(0), a.info().valid_region().end(0)), (1, 4));
        assert_eq!(a.info().shape(), info.shape());
        Ok(())
    }

    #[test]
    fn test_hazard_check_disabled() -> Result<(), Box<dyn std::error::Error>> {
        let mut ctx = context(GpuContextConfig {
            check_hazards: false,
            ..Default::default()
        });
        let info = TensorInfo::new(TensorShape::new(&[4, 2]), DataType::F32)?;
        let a = ctx.create_tensor(&info)?;
        let b = ctx.create_tensor(&info)?;
        dispatch(&mut ctx, "add_constant", &a, &b, 1.0)?;
        dispatch(&mut ctx, "add_constant_twice", &b, &a, 1.0)?;
        assert_eq!(ctx.map(&a)?.to_vec::<f32>()?, vec![2.0f32; 8]);
        Ok(())
    }

    #[test]
    fn test_pending_limit_flushes() -> Result<(), Box<dyn std::error::Error>> {
        let mut queue = HostQueue::new(GpuContextConfig {
            max_pending_dispatches: 2,
            check_hazards: true,
        });
        let mut library = HostLibrary::new();
        library.register("add_constant", add_constant);
        let info = TensorInfo::new(TensorShape::new(&[4, 2]), DataType::F32)?;
        let a = queue.allocate(&info)?;
        let b = queue.allocate(&info)?;
        let kernel = library.kernel("add_constant", &BuildOptions::new())?;
        let range = NdRange::from_window(&Window::from_dimensions(&[
            WindowDimension::new(0, 4, 1),
            WindowDimension::new(0, 2, 1),
        ]));

        let d = Dispatch::new(kernel, range)
            .read(a.buffer())
            .write(b.buffer())
            .arg(KernelArg::Float(1.0));
        queue.enqueue(d.clone())?;
        assert_eq!((queue.num_pending(), queue.num_executed()), (1, 0));
        queue.enqueue(d)?;
        assert_eq!((queue.num_pending(), queue.num_executed()), (0, 2));
        assert_eq!(library.num_built(), 1);
        Ok(())
    }

    #[test]
    fn test_unknown_kernel_and_buffer() -> Result<(), Box<dyn std::error::Error>> {
        let mut ctx = context(GpuContextConfig::default());
        let err = ctx
            .library_mut()
            .kernel("missing", &BuildOptions::new())
            .unwrap_err();
        assert_eq!(err, GpuError::KernelNotFound("missing".to_string()));
        assert_eq!(
            KernelError::from(err).kind(),
            vela_core::ErrorKind::Unsupported
        );

        let info = TensorInfo::new(TensorShape::new(&[4, 2]), DataType::F32)?;
        let wrong = TensorInfo::new(TensorShape::new(&[2, 2]), DataType::F32)?;
        let a = ctx.create_tensor(&info)?;
        let res = ctx.write(&a, &Tensor::from_vec(wrong, vec![0.0f32; 4])?);
        assert!(matches!(res, Err(GpuError::DescriptorMismatch { .. })));
        Ok(())
    }

    #[test]
    fn test_build_options_display() {
        let options = BuildOptions::new()
            .define("DATA_TYPE", "float")
            .define("BORDER", 1);
        assert_eq!(options.to_string(), "-DBORDER=1 -DDATA_TYPE=float");
        assert_eq!(options.get("BORDER"), Some("1"));
    }
}
