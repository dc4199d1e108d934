use num_traits::{Bounded, ToPrimitive};

use vela_core::{
    broadcast_shape_and_valid_region, calculate_max_window_for_region,
    dimensions::index2coords, error::ensure, execute_window_loop, update_window_and_padding,
    window::{broadcast_coordinates, DIM_X, DIM_Z},
    AccessWindow, BorderSize, Coordinates, DataType, Element, KernelError, Status, Steps, Tensor,
    TensorAccess, TensorInfo, TensorShape, TensorSliceMut, TensorView, Window, MAX_DIMS,
};

use crate::{
    dispatch::{DispatchKey, DispatchTable, ShapeClass},
    gpu::{
        BufferId, BuildOptions, CommandQueue, DeviceMemory, Dispatch, GpuError, KernelArg,
        KernelHandle, KernelLibrary, NdRange,
    },
    kernel::{CpuKernel, CpuSlicePack, GpuKernel, GpuTensorPack, KernelBase, TensorSlot, ThreadInfo},
};

use super::{elements_per_iteration, out_of_bounds, saturate};

pub(crate) const ELEMENTWISE_KERNEL: &str = "elementwise";

/// Binary operation applied by the elementwise kernels.
///
/// Integer results saturate to the range of the output type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ArithmeticOp {
    /// `a + b`
    Add,
    /// `a - b`
    Sub,
    /// `max(a, b)`
    Max,
    /// `min(a, b)`
    Min,
}

impl ArithmeticOp {
    /// Upper case name used as a kernel build option.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Add => "ADD",
            Self::Sub => "SUB",
            Self::Max => "MAX",
            Self::Min => "MIN",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        [Self::Add, Self::Sub, Self::Max, Self::Min]
            .into_iter()
            .find(|op| op.name() == name)
    }

    fn eval(&self, a: f64, b: f64) -> f64 {
        match self {
            Self::Add => a + b,
            Self::Sub => a - b,
            Self::Max => a.max(b),
            Self::Min => a.min(b),
        }
    }

    #[inline]
    fn apply<T: Element + Bounded>(&self, a: T, b: T) -> T {
        let (a, b) = (a.to_f64().unwrap_or_default(), b.to_f64().unwrap_or_default());
        saturate(self.eval(a, b))
    }
}

impl std::fmt::Display for ArithmeticOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Inputs of one window iteration.
struct Operands<'a> {
    lhs: &'a Tensor,
    rhs: &'a Tensor,
    op: ArithmeticOp,
    step: usize,
}

/// Computes the `step` outputs of the iteration at `id`.
type ElementwiseFn = fn(&Operands<'_>, &mut TensorSliceMut<'_>, &Coordinates) -> Status;

fn elementwise_table() -> DispatchTable<ElementwiseFn> {
    let same = |dt| DispatchKey::data_type(dt).with_shape_class(ShapeClass::Same);
    DispatchTable::<ElementwiseFn>::new("Elementwise")
        .with(same(DataType::U8), same_shape::<u8>)
        .with(same(DataType::S16), same_shape::<i16>)
        .with(same(DataType::S32), same_shape::<i32>)
        .with(same(DataType::F32), same_shape::<f32>)
        .with(DispatchKey::data_type(DataType::U8), broadcast::<u8>)
        .with(DispatchKey::data_type(DataType::S16), broadcast::<i16>)
        .with(DispatchKey::data_type(DataType::S32), broadcast::<i32>)
        .with(DispatchKey::data_type(DataType::F32), broadcast::<f32>)
        .with(DispatchKey::data_type(DataType::QAsymm8), quantized)
}

#[track_caller]
fn resolve(lhs: &TensorInfo, rhs: &TensorInfo) -> Result<ElementwiseFn, KernelError> {
    elementwise_table().resolve(&DispatchKey {
        data_type: lhs.data_type(),
        layout: lhs.layout(),
        shape_class: ShapeClass::of(&[lhs, rhs]),
    })
}

fn typed<'t, T: Element>(tensor: &'t Tensor, what: &str) -> Result<TensorView<'t, T>, KernelError> {
    tensor
        .view::<T>()
        .map_err(|e| KernelError::precondition(format!("{what}: {e}")))
}

fn same_shape<T: Element + Bounded>(
    ops: &Operands<'_>,
    out: &mut TensorSliceMut<'_>,
    id: &Coordinates,
) -> Status {
    let lhs = typed::<T>(ops.lhs, "lhs")?;
    let rhs = typed::<T>(ops.rhs, "rhs")?;
    let a = lhs.row(id, ops.step).ok_or_else(|| out_of_bounds(id))?;
    let b = rhs.row(id, ops.step).ok_or_else(|| out_of_bounds(id))?;
    let dst = out
        .typed::<T>()
        .ok_or_else(|| KernelError::precondition(format!("output is not {}", T::DATA_TYPE)))?;
    let row = dst.row_mut(id, ops.step).ok_or_else(|| out_of_bounds(id))?;
    for ((o, &x), &y) in row.iter_mut().zip(a).zip(b) {
        *o = ops.op.apply(x, y);
    }
    Ok(())
}

/// Visits the lanes of `id`, reading each input at its broadcast position.
fn for_each_broadcast_lane<T, F>(
    ops: &Operands<'_>,
    out: &mut TensorSliceMut<'_>,
    id: &Coordinates,
    f: F,
) -> Status
where
    T: Element,
    F: Fn(T, T) -> T,
{
    let lhs = typed::<T>(ops.lhs, "lhs")?;
    let rhs = typed::<T>(ops.rhs, "rhs")?;
    let dst = out
        .typed::<T>()
        .ok_or_else(|| KernelError::precondition(format!("output is not {}", T::DATA_TYPE)))?;
    let (lhs_shape, rhs_shape) = (ops.lhs.info().shape(), ops.rhs.info().shape());

    let mut coords = *id;
    for lane in 0..ops.step as isize {
        coords.set(DIM_X, id.get(DIM_X) + lane);
        let a = lhs
            .get(&broadcast_coordinates(&coords, lhs_shape))
            .ok_or_else(|| out_of_bounds(&coords))?;
        let b = rhs
            .get(&broadcast_coordinates(&coords, rhs_shape))
            .ok_or_else(|| out_of_bounds(&coords))?;
        *dst.get_mut(&coords).ok_or_else(|| out_of_bounds(&coords))? = f(a, b);
    }
    Ok(())
}

fn broadcast<T: Element + Bounded>(
    ops: &Operands<'_>,
    out: &mut TensorSliceMut<'_>,
    id: &Coordinates,
) -> Status {
    for_each_broadcast_lane(ops, out, id, |a: T, b: T| ops.op.apply(a, b))
}

fn quantized(ops: &Operands<'_>, out: &mut TensorSliceMut<'_>, id: &Coordinates) -> Status {
    let (qa, qb) = (ops.lhs.info().quantization(), ops.rhs.info().quantization());
    let qo = out.info().quantization();
    let dequantize = |v: u8, scale: f32, offset: i32| scale as f64 * (v as f64 - offset as f64);
    for_each_broadcast_lane(ops, out, id, |a: u8, b: u8| {
        let real = ops
            .op
            .eval(dequantize(a, qa.scale, qa.offset), dequantize(b, qb.scale, qb.offset));
        saturate((real / qo.scale as f64).round() + qo.offset as f64)
    })
}

fn validate_arguments(lhs: &TensorInfo, rhs: &TensorInfo, out: &TensorInfo) -> Status {
    let data_type = lhs.data_type();
    ensure(data_type != DataType::Unknown, || "input data type is unknown".to_string())?;
    ensure(rhs.data_type() == data_type, || {
        format!("input data types differ: {data_type} and {}", rhs.data_type())
    })?;
    resolve(lhs, rhs)?;
    let (shape, _) = broadcast_shape_and_valid_region(&[lhs, rhs])?;

    if data_type.is_quantized() {
        ensure(lhs.quantization() == rhs.quantization(), || {
            format!(
                "input quantization differs: {:?} and {:?}",
                lhs.quantization(),
                rhs.quantization()
            )
        })?;
        ensure(lhs.quantization().scale > 0.0, || {
            format!("quantization scale {} is not positive", lhs.quantization().scale)
        })?;
    }

    if out.shape().total_size() != 0 {
        ensure(out.data_type() == data_type, || {
            format!("output is {}, inputs are {data_type}", out.data_type())
        })?;
        ensure(*out.shape() == shape, || {
            format!("output shape {} differs from broadcast shape {shape}", out.shape())
        })?;
        if data_type.is_quantized() {
            ensure(out.quantization() == lhs.quantization(), || {
                format!(
                    "output quantization {:?} differs from {:?}",
                    out.quantization(),
                    lhs.quantization()
                )
            })?;
        }
    }
    Ok(())
}

/// Input access: broadcast axes read a single position.
fn input_access(input: &TensorInfo, shape: &TensorShape, step: usize) -> AccessWindow {
    let broadcast_x = input.dimension(DIM_X) == 1 && shape.get(DIM_X) != 1;
    let broadcast_y = input.dimension(1) == 1 && shape.get(1) != 1;
    AccessWindow::rectangle(0, 0, if broadcast_x { 1 } else { step }, 1).with_scale(
        if broadcast_x { 0.0 } else { 1.0 },
        if broadcast_y { 0.0 } else { 1.0 },
    )
}

fn validate_and_configure_window(
    lhs: &mut TensorInfo,
    rhs: &mut TensorInfo,
    out: &mut TensorInfo,
) -> Result<Window, KernelError> {
    let (shape, region) = broadcast_shape_and_valid_region(&[&*lhs, &*rhs])?;
    out.auto_init_if_empty(shape, lhs.data_type(), lhs.quantization())?;

    let step = elements_per_iteration(lhs.data_type());
    let mut window =
        calculate_max_window_for_region(&region, &Steps::new(&[step]), false, BorderSize::default());
    let lhs_access = input_access(lhs, &shape, step);
    let rhs_access = input_access(rhs, &shape, step);
    let out_access = AccessWindow::horizontal(0, step);

    let window_changed = update_window_and_padding(
        &mut window,
        &mut [
            TensorAccess::new(lhs, lhs_access),
            TensorAccess::new(rhs, rhs_access),
            TensorAccess::new(out, out_access),
        ],
    )?;
    if window_changed {
        return Err(KernelError::insufficient_padding(format!(
            "elementwise window shrunk to {window}"
        )));
    }
    out_access.set_valid_region(out, &window, &region, false, BorderSize::default());
    Ok(window)
}

fn configure_elementwise(
    lhs: &mut TensorInfo,
    rhs: &mut TensorInfo,
    out: &mut TensorInfo,
) -> Result<(ElementwiseFn, Window), KernelError> {
    validate_arguments(lhs, rhs, out)?;
    let run = resolve(lhs, rhs)?;
    let window = validate_and_configure_window(lhs, rhs, out)?;
    Ok((run, window))
}

fn validate_elementwise(lhs: &TensorInfo, rhs: &TensorInfo, out: &TensorInfo) -> Status {
    let (mut lhs, mut rhs, mut out) = (lhs.clone(), rhs.clone(), out.clone());
    configure_elementwise(&mut lhs, &mut rhs, &mut out).map(|_| ())
}

/// Binary arithmetic on CPU tensors with broadcasting.
///
/// Inputs are [`TensorSlot::Src`]`(0)` and `Src(1)`, the output is
/// [`TensorSlot::Dst`]`(0)`. An input of extent 1 on an axis is broadcast along it.
pub struct CpuElementwiseKernel {
    base: KernelBase,
    op: ArithmeticOp,
    run: Option<ElementwiseFn>,
}

impl Default for CpuElementwiseKernel {
    fn default() -> Self {
        Self::new()
    }
}

impl CpuElementwiseKernel {
    /// An unconfigured kernel.
    pub fn new() -> Self {
        Self {
            base: KernelBase::new("CpuElementwiseKernel"),
            op: ArithmeticOp::Add,
            run: None,
        }
    }

    /// Checks the descriptors without modifying them; every op accepts the same inputs.
    pub fn validate(lhs: &TensorInfo, rhs: &TensorInfo, out: &TensorInfo) -> Status {
        validate_elementwise(lhs, rhs, out)
    }

    /// Prepares `out = op(lhs, rhs)`.
    ///
    /// An empty `out` is initialized to the broadcast shape. The padding of
    /// resizable descriptors grows to what the window needs.
    pub fn configure(
        &mut self,
        lhs: &mut TensorInfo,
        rhs: &mut TensorInfo,
        out: &mut TensorInfo,
        op: ArithmeticOp,
    ) -> Status {
        let (run, window) = configure_elementwise(lhs, rhs, out)?;
        self.op = op;
        self.run = Some(run);
        self.base.configure(window)
    }
}

impl CpuKernel for CpuElementwiseKernel {
    fn base(&self) -> &KernelBase {
        &self.base
    }

    fn run_op(&self, pack: &mut CpuSlicePack<'_>, window: &Window, _: &ThreadInfo) -> Status {
        let run = self
            .run
            .ok_or_else(|| KernelError::precondition("CpuElementwiseKernel is not configured"))?;
        let ops = Operands {
            lhs: pack.input(TensorSlot::Src(0))?,
            rhs: pack.input(TensorSlot::Src(1))?,
            op: self.op,
            step: window[DIM_X].step(),
        };
        let out = pack.output(TensorSlot::Dst(0))?;

        let mut status = Ok(());
        execute_window_loop(window, |id| {
            if status.is_ok() {
                status = run(&ops, &mut *out, id);
            }
        });
        status
    }
}

/// Binary arithmetic on device tensors with broadcasting.
///
/// When no input is broadcast above y, the window is collapsed from z so that a
/// batch of planes becomes a single dispatch.
pub struct GpuElementwiseKernel {
    base: KernelBase,
    kernel: Option<KernelHandle>,
    collapsible: bool,
}

impl Default for GpuElementwiseKernel {
    fn default() -> Self {
        Self::new()
    }
}

impl GpuElementwiseKernel {
    /// An unconfigured kernel.
    pub fn new() -> Self {
        Self {
            base: KernelBase::new("GpuElementwiseKernel"),
            kernel: None,
            collapsible: false,
        }
    }

    /// Checks the descriptors without modifying them; every op accepts the same inputs.
    pub fn validate(lhs: &TensorInfo, rhs: &TensorInfo, out: &TensorInfo) -> Status {
        validate_elementwise(lhs, rhs, out)
    }

    /// Prepares `out = op(lhs, rhs)` and builds the device kernel.
    pub fn configure(
        &mut self,
        lhs: &mut TensorInfo,
        rhs: &mut TensorInfo,
        out: &mut TensorInfo,
        op: ArithmeticOp,
        library: &mut dyn KernelLibrary,
    ) -> Status {
        let (_, window) = configure_elementwise(lhs, rhs, out)?;
        let options = BuildOptions::new()
            .define("DATA_TYPE", lhs.data_type())
            .define("OP", op);
        self.kernel = Some(library.kernel(ELEMENTWISE_KERNEL, &options)?);
        self.collapsible = (DIM_Z..MAX_DIMS)
            .all(|d| lhs.dimension(d) == out.dimension(d) && rhs.dimension(d) == out.dimension(d));
        self.base.configure(window)
    }
}

impl GpuKernel for GpuElementwiseKernel {
    fn base(&self) -> &KernelBase {
        &self.base
    }

    fn enqueue(
        &self,
        pack: &GpuTensorPack,
        window: &Window,
        queue: &mut dyn CommandQueue,
    ) -> Status {
        let kernel = self
            .kernel
            .as_ref()
            .ok_or_else(|| KernelError::precondition("GpuElementwiseKernel is not configured"))?;
        let lhs = pack.get(TensorSlot::Src(0))?;
        let rhs = pack.get(TensorSlot::Src(1))?;
        let out = pack.get(TensorSlot::Dst(0))?;

        let (window, collapsed) = if self.collapsible {
            window.collapse_if_possible(self.base.window()?, DIM_Z)
        } else {
            (*window, false)
        };
        let run = queue.begin_run();
        for slice in window.slices(3) {
            let dispatch = Dispatch::new(kernel.clone(), NdRange::from_window(&slice))
                .in_run(run)
                .read(lhs.buffer())
                .read(rhs.buffer())
                .write(out.buffer())
                .arg(KernelArg::Int(collapsed as i64));
            queue.enqueue(dispatch)?;
        }
        Ok(())
    }
}

/// Position in the output of an iteration whose z indexes all planes above y.
fn expand_collapsed(id: &Coordinates, shape: &TensorShape) -> Coordinates {
    let upper = TensorShape::new(shape.as_slice().get(DIM_Z..).unwrap_or(&[]));
    let planes = index2coords(&upper, id.get(DIM_Z).max(0) as usize);
    let mut coords = *id;
    for d in DIM_Z..MAX_DIMS {
        coords.set(d, planes.get(d - DIM_Z));
    }
    coords
}

pub(crate) fn elementwise_entry(dispatch: &Dispatch, memory: &mut DeviceMemory) -> Result<(), GpuError> {
    let (lhs_id, rhs_id, out_id) = (
        dispatch.buffer_arg(0)?,
        dispatch.buffer_arg(1)?,
        dispatch.buffer_arg(2)?,
    );
    let collapsed = dispatch.int_arg(3)? != 0;
    let op = dispatch
        .kernel
        .options()
        .get("OP")
        .and_then(ArithmeticOp::from_name)
        .ok_or_else(|| dispatch.failure("missing OP build option"))?;

    memory.with_buffer_mut(out_id, |dst, memory| {
        // in-place operands read a snapshot of the output
        let snapshot = (lhs_id == out_id || rhs_id == out_id).then(|| dst.clone());
        let operand = |id: BufferId| match &snapshot {
            Some(copy) if id == out_id => Ok(copy),
            _ => memory.get(id),
        };
        let (lhs, rhs) = (operand(lhs_id)?, operand(rhs_id)?);
        let run = resolve(lhs.info(), rhs.info()).map_err(|e| dispatch.failure(e.to_string()))?;
        let ops = Operands {
            lhs,
            rhs,
            op,
            step: dispatch.range.step[0],
        };

        let shape = *dst.info().shape();
        let mut slice = dst.slice_mut();
        dispatch.range.for_each_position(|id| {
            let id = if collapsed {
                expand_collapsed(id, &shape)
            } else {
                *id
            };
            run(&ops, &mut slice, &id).map_err(|e| dispatch.failure(e.to_string()))
        })
    })
}
