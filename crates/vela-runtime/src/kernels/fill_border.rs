use num_traits::Bounded;

use vela_core::{
    error::ensure, execute_window_loop, BorderMode, BorderSize, Coordinates, DataType, Element,
    KernelError, PixelValue, Status, TensorInfo, TensorShape, TensorSliceMut, TensorViewMut,
    ValidRegion, Window, WindowDimension,
};

use crate::{
    dispatch::{DispatchKey, DispatchTable},
    gpu::{
        BuildOptions, CommandQueue, DeviceMemory, Dispatch, GpuError, KernelArg, KernelHandle,
        KernelLibrary, NdRange,
    },
    kernel::{CpuKernel, CpuSlicePack, GpuKernel, GpuTensorPack, KernelBase, TensorSlot, ThreadInfo},
};

pub(crate) const FILL_BORDER_KERNEL: &str = "fill_border";

#[derive(Debug, Clone, Copy)]
struct FillParams {
    region: ValidRegion,
    border: BorderSize,
    mode: BorderMode,
    constant: PixelValue,
}

type FillFn = fn(&mut TensorSliceMut<'_>, &Coordinates, &FillParams) -> Status;

#[derive(Clone, Copy)]
struct FillImpl {
    fill: FillFn,
    representable: fn(PixelValue) -> bool,
}

fn fill_impl<T: Element + Bounded>() -> FillImpl {
    FillImpl {
        fill: fill_slice::<T>,
        representable: |v| v.to::<T>().is_some(),
    }
}

fn fill_table() -> DispatchTable<FillImpl> {
    DispatchTable::new("FillBorder")
        .with(DispatchKey::data_type(DataType::U8), fill_impl::<u8>())
        .with(DispatchKey::data_type(DataType::QAsymm8), fill_impl::<u8>())
        .with(DispatchKey::data_type(DataType::S16), fill_impl::<i16>())
        .with(DispatchKey::data_type(DataType::S32), fill_impl::<i32>())
        .with(DispatchKey::data_type(DataType::F32), fill_impl::<f32>())
}

fn fill_slice<T: Element + Bounded>(
    slice: &mut TensorSliceMut<'_>,
    plane: &Coordinates,
    params: &FillParams,
) -> Status {
    let data_type = slice.info().data_type();
    let view = slice.typed::<T>().ok_or_else(|| {
        KernelError::precondition(format!("fill border on {data_type} with {} elements", T::DATA_TYPE))
    })?;
    let constant = params.constant.to::<T>().unwrap_or_default();
    fill_plane(view, plane, params, constant)
}

/// Writes the border around the x/y valid region of the plane at `plane`.
fn fill_plane<T: Element>(
    view: &mut TensorViewMut<'_, T>,
    plane: &Coordinates,
    params: &FillParams,
    constant: T,
) -> Status {
    let FillParams {
        region,
        border,
        mode,
        ..
    } = *params;
    let (x0, x1) = (region.start(0), region.end(0));
    let (y0, y1) = (region.start(1), region.end(1));
    if mode.is_undefined() || x0 >= x1 || y0 >= y1 {
        return Ok(());
    }
    let (left, right) = (border.left as isize, border.right as isize);
    let (top, bottom) = (border.top as isize, border.bottom as isize);

    let at = |x: isize, y: isize| {
        let mut c = *plane;
        c.set(0, x);
        c.set(1, y);
        c
    };
    let read = |view: &TensorViewMut<'_, T>, x: isize, y: isize| {
        let c = at(x, y);
        view.get(&c).ok_or_else(|| super::out_of_bounds(&c))
    };
    let write = |view: &mut TensorViewMut<'_, T>, x: isize, y: isize, value: T| {
        let c = at(x, y);
        *view.get_mut(&c).ok_or_else(|| super::out_of_bounds(&c))? = value;
        Ok::<(), KernelError>(())
    };

    for y in y0..y1 {
        let (lhs, rhs) = match mode {
            BorderMode::Replicate => (read(&*view, x0, y)?, read(&*view, x1 - 1, y)?),
            _ => (constant, constant),
        };
        for x in x0 - left..x0 {
            write(&mut *view, x, y, lhs)?;
        }
        for x in x1..x1 + right {
            write(&mut *view, x, y, rhs)?;
        }
    }

    for (rows, source) in [(y0 - top..y0, y0), (y1..y1 + bottom, y1 - 1)] {
        for y in rows {
            for x in x0 - left..x1 + right {
                let value = match mode {
                    BorderMode::Replicate => read(&*view, x, source)?,
                    _ => constant,
                };
                write(&mut *view, x, y, value)?;
            }
        }
    }
    Ok(())
}

/// Border and window shared by the CPU and GPU kernels.
fn configure_fill(
    info: &TensorInfo,
    border: BorderSize,
    mode: BorderMode,
    constant: PixelValue,
) -> Result<(FillImpl, BorderSize, Window), KernelError> {
    let imp = fill_table().resolve(&DispatchKey::data_type(info.data_type()))?;
    ensure(mode != BorderMode::Constant || (imp.representable)(constant), || {
        format!(
            "border constant {} is not representable as {}",
            constant.0,
            info.data_type()
        )
    })?;

    let border = border.limit(&BorderSize::from(*info.padding()));
    let mut window = Window::new();
    window.set(0, WindowDimension::new(0, 1, 1));
    window.set(1, WindowDimension::new(0, 1, 1));
    window.use_tensor_dimensions(info.shape(), 2);
    Ok((imp, border, window))
}

/// Fills the border around the valid region of a CPU tensor.
///
/// The tensor is passed as output [`TensorSlot::Dst`]`(0)`; the region is read when
/// the kernel runs. Every plane is filled by a single worker.
pub struct CpuFillBorderKernel {
    base: KernelBase,
    mode: BorderMode,
    constant: PixelValue,
    fill: Option<FillFn>,
}

impl Default for CpuFillBorderKernel {
    fn default() -> Self {
        Self::new()
    }
}

impl CpuFillBorderKernel {
    /// An unconfigured kernel.
    pub fn new() -> Self {
        Self {
            base: KernelBase::new("CpuFillBorderKernel"),
            mode: BorderMode::Undefined,
            constant: PixelValue::default(),
            fill: None,
        }
    }

    /// Checks that a border of `info` can be filled with `mode`.
    pub fn validate(info: &TensorInfo, mode: BorderMode, constant: PixelValue) -> Status {
        configure_fill(info, BorderSize::default(), mode, constant).map(|_| ())
    }

    /// Prepares to fill `border` around `info`, limited to its padding.
    pub fn configure(
        &mut self,
        info: &TensorInfo,
        border: BorderSize,
        mode: BorderMode,
        constant: PixelValue,
    ) -> Status {
        let (imp, border, window) = configure_fill(info, border, mode, constant)?;
        self.mode = mode;
        self.constant = constant;
        self.fill = Some(imp.fill);
        self.base.set_border_size(border);
        self.base.configure(window)
    }
}

impl CpuKernel for CpuFillBorderKernel {
    fn base(&self) -> &KernelBase {
        &self.base
    }

    fn run_op(&self, pack: &mut CpuSlicePack<'_>, window: &Window, _: &ThreadInfo) -> Status {
        let border = self.base.border_size();
        if self.mode.is_undefined() || border.is_zero() {
            return Ok(());
        }
        let fill = self
            .fill
            .ok_or_else(|| KernelError::precondition("CpuFillBorderKernel is not configured"))?;
        let slice = pack.output(TensorSlot::Dst(0))?;
        let params = FillParams {
            region: *slice.info().valid_region(),
            border,
            mode: self.mode,
            constant: self.constant,
        };

        let mut status = Ok(());
        execute_window_loop(window, |plane| {
            if status.is_ok() {
                status = fill(&mut *slice, plane, &params);
            }
        });
        status
    }
}

/// Fills the border around the valid region of a device tensor.
///
/// Enqueues one dispatch per 3D slice of the window; the tensor is
/// [`TensorSlot::Dst`]`(0)` and is both read and written.
pub struct GpuFillBorderKernel {
    base: KernelBase,
    constant: PixelValue,
    kernel: Option<KernelHandle>,
}

impl Default for GpuFillBorderKernel {
    fn default() -> Self {
        Self::new()
    }
}

impl GpuFillBorderKernel {
    /// An unconfigured kernel.
    pub fn new() -> Self {
        Self {
            base: KernelBase::new("GpuFillBorderKernel"),
            constant: PixelValue::default(),
            kernel: None,
        }
    }

    /// Prepares to fill `border` around `info` and builds the device kernel.
    pub fn configure(
        &mut self,
        info: &TensorInfo,
        border: BorderSize,
        mode: BorderMode,
        constant: PixelValue,
        library: &mut dyn KernelLibrary,
    ) -> Status {
        let (_, border, window) = configure_fill(info, border, mode, constant)?;
        self.kernel = match mode {
            BorderMode::Undefined => None,
            BorderMode::Constant | BorderMode::Replicate => {
                let options = BuildOptions::new()
                    .define("DATA_TYPE", info.data_type())
                    .define("BORDER_MODE", mode_name(mode));
                Some(library.kernel(FILL_BORDER_KERNEL, &options)?)
            }
        };
        self.constant = constant;
        self.base.set_border_size(border);
        self.base.configure(window)
    }
}

impl GpuKernel for GpuFillBorderKernel {
    fn base(&self) -> &KernelBase {
        &self.base
    }

    fn enqueue(
        &self,
        pack: &GpuTensorPack,
        window: &Window,
        queue: &mut dyn CommandQueue,
    ) -> Status {
        let border = self.base.border_size();
        let Some(kernel) = &self.kernel else {
            return Ok(());
        };
        if border.is_zero() {
            return Ok(());
        }
        let tensor = pack.get(TensorSlot::Dst(0))?;
        let region = tensor.info().valid_region();

        let run = queue.begin_run();
        for slice in window.slices(3) {
            let dispatch = Dispatch::new(kernel.clone(), NdRange::from_window(&slice))
                .in_run(run)
                .read_write(tensor.buffer())
                .arg(KernelArg::Int(region.start(0) as i64))
                .arg(KernelArg::Int(region.start(1) as i64))
                .arg(KernelArg::Int(region.shape.get(0) as i64))
                .arg(KernelArg::Int(region.shape.get(1) as i64))
                .arg(KernelArg::Int(border.top as i64))
                .arg(KernelArg::Int(border.right as i64))
                .arg(KernelArg::Int(border.bottom as i64))
                .arg(KernelArg::Int(border.left as i64))
                .arg(KernelArg::Float(self.constant.0));
            queue.enqueue(dispatch)?;
        }
        Ok(())
    }
}

fn mode_name(mode: BorderMode) -> &'static str {
    match mode {
        BorderMode::Undefined => "UNDEFINED",
        BorderMode::Constant => "CONSTANT",
        BorderMode::Replicate => "REPLICATE",
    }
}

pub(crate) fn fill_border_entry(dispatch: &Dispatch, memory: &mut DeviceMemory) -> Result<(), GpuError> {
    let buffer = dispatch.buffer_arg(0)?;
    let int = |i: usize| -> Result<usize, GpuError> {
        usize::try_from(dispatch.int_arg(i)?).map_err(|_| dispatch.failure(format!("negative argument {i}")))
    };
    let region = ValidRegion::new(
        Coordinates::from([dispatch.int_arg(1)? as isize, dispatch.int_arg(2)? as isize]),
        TensorShape::new(&[int(3)?, int(4)?]),
    );
    let border = BorderSize::new(int(5)?, int(6)?, int(7)?, int(8)?);
    let mode = match dispatch.kernel.options().get("BORDER_MODE") {
        Some("CONSTANT") => BorderMode::Constant,
        Some("REPLICATE") => BorderMode::Replicate,
        _ => BorderMode::Undefined,
    };
    let params = FillParams {
        region,
        border,
        mode,
        constant: PixelValue(dispatch.float_arg(9)?),
    };

    let tensor = memory.get_mut(buffer)?;
    let imp = fill_table()
        .resolve(&DispatchKey::data_type(tensor.data_type()))
        .map_err(|e| dispatch.failure(e.to_string()))?;
    let mut slice = tensor.slice_mut();
    dispatch.range.for_each_position(|plane| {
        (imp.fill)(&mut slice, plane, &params).map_err(|e| dispatch.failure(e.to_string()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        gpu::{GpuContext, GpuContextConfig},
        kernel::CpuTensorPack,
        scheduler::{CpuScheduler, ScheduleHints, SchedulerConfig},
    };
    use vela_core::{ErrorKind, PaddingInfo, Tensor};

    fn padded(shape: &[usize], pad: usize) -> Result<TensorInfo, Box<dyn std::error::Error>> {
        Ok(TensorInfo::new(TensorShape::new(shape), DataType::U8)?
            .with_padding(PaddingInfo::uniform(pad)))
    }

    fn read(tensor: &Tensor, x: isize, y: isize) -> Option<u8> {
        tensor.view::<u8>().ok()?.get(&Coordinates::from([x, y]))
    }

    #[test]
    fn test_constant_border() -> Result<(), Box<dyn std::error::Error>> {
        let info = padded(&[3, 2], 2)?;
        let mut tensor = Tensor::from_vec(info.clone(), vec![1u8, 2, 3, 4, 5, 6])?;
        let mut kernel = CpuFillBorderKernel::new();
        kernel.configure(&info, BorderSize::uniform(1), BorderMode::Constant, PixelValue(9.0))?;

        let scheduler = CpuScheduler::new(SchedulerConfig::default())?;
        let mut pack = CpuTensorPack::new().with_output(TensorSlot::Dst(0), &mut tensor);
        scheduler.schedule(&kernel, &mut pack, ScheduleHints::default())?;

        assert_eq!(read(&tensor, -1, -1), Some(9));
        assert_eq!(read(&tensor, 3, 1), Some(9));
        assert_eq!(read(&tensor, 1, 2), Some(9));
        assert_eq!(read(&tensor, 0, 0), Some(1));
        // outside the requested border stays untouched
        assert_eq!(read(&tensor, -2, 0), Some(0));
        Ok(())
    }

    #[test]
    fn test_replicate_border() -> Result<(), Box<dyn std::error::Error>> {
        let info = padded(&[3, 2], 1)?;
        let mut tensor = Tensor::from_vec(info.clone(), vec![1u8, 2, 3, 4, 5, 6])?;
        let mut kernel = CpuFillBorderKernel::new();
        kernel.configure(&info, BorderSize::uniform(1), BorderMode::Replicate, PixelValue(0.0))?;

        let scheduler = CpuScheduler::new(SchedulerConfig::default())?;
        let mut pack = CpuTensorPack::new().with_output(TensorSlot::Dst(0), &mut tensor);
        scheduler.schedule(&kernel, &mut pack, ScheduleHints::default())?;

        assert_eq!(read(&tensor, -1, -1), Some(1));
        assert_eq!(read(&tensor, 3, -1), Some(3));
        assert_eq!(read(&tensor, -1, 1), Some(4));
        assert_eq!(read(&tensor, 3, 2), Some(6));
        assert_eq!(read(&tensor, 1, 2), Some(5));
        Ok(())
    }

    #[test]
    fn test_border_limited_to_padding() -> Result<(), Box<dyn std::error::Error>> {
        let info = padded(&[3, 2], 1)?;
        let mut kernel = CpuFillBorderKernel::new();
        kernel.configure(&info, BorderSize::uniform(4), BorderMode::Constant, PixelValue(1.0))?;
        assert_eq!(kernel.base().border_size(), BorderSize::uniform(1));
        Ok(())
    }

    #[test]
    fn test_window_spans_planes() -> Result<(), Box<dyn std::error::Error>> {
        let info = padded(&[3, 2, 5], 1)?;
        let mut kernel = CpuFillBorderKernel::new();
        kernel.configure(&info, BorderSize::uniform(1), BorderMode::Constant, PixelValue(1.0))?;
        let window = kernel.base().window()?;
        assert_eq!(window.num_iterations(0), 1);
        assert_eq!(window.num_iterations(1), 1);
        assert_eq!(window.num_iterations(2), 5);
        Ok(())
    }

    #[test]
    fn test_unrepresentable_constant() -> Result<(), Box<dyn std::error::Error>> {
        let info = padded(&[3, 2], 1)?;
        let err =
            CpuFillBorderKernel::validate(&info, BorderMode::Constant, PixelValue(300.0)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Precondition);
        assert!(CpuFillBorderKernel::validate(&info, BorderMode::Replicate, PixelValue(300.0)).is_ok());
        Ok(())
    }

    #[test]
    fn test_gpu_matches_cpu() -> Result<(), Box<dyn std::error::Error>> {
        let info = padded(&[4, 3, 2], 2)?;
        let values: Vec<u8> = (1..=24).collect();
        let host = Tensor::from_vec(info.clone(), values)?;

        let mut cpu_tensor = host.clone();
        let mut cpu = CpuFillBorderKernel::new();
        cpu.configure(&info, BorderSize::uniform(2), BorderMode::Replicate, PixelValue(0.0))?;
        let scheduler = CpuScheduler::new(SchedulerConfig::default())?;
        let mut pack = CpuTensorPack::new().with_output(TensorSlot::Dst(0), &mut cpu_tensor);
        scheduler.schedule(&cpu, &mut pack, ScheduleHints::default())?;

        let mut ctx = GpuContext::new(GpuContextConfig::default());
        let device = ctx.create_tensor(&info)?;
        ctx.write(&device, &host)?;
        let mut gpu = GpuFillBorderKernel::new();
        gpu.configure(
            &info,
            BorderSize::uniform(2),
            BorderMode::Replicate,
            PixelValue(0.0),
            ctx.library_mut(),
        )?;
        let gpu_pack = GpuTensorPack::new().with(TensorSlot::Dst(0), device.clone());
        let window = *gpu.base().window()?;
        gpu.enqueue(&gpu_pack, &window, ctx.queue_mut())?;

        let mapped = ctx.map(&device)?;
        assert_eq!(mapped.data(), cpu_tensor.data());
        Ok(())
    }
}
