use num_traits::{Bounded, ToPrimitive};

use vela_core::{
    calculate_max_window, error::ensure, execute_window_loop, update_window_and_padding,
    window::DIM_X, AccessWindow, BorderSize, Coordinates, DataType, Element, KernelError, Status,
    Steps, Tensor, TensorAccess, TensorInfo, TensorSliceMut, Window,
};

use crate::{
    dispatch::{DispatchKey, DispatchTable},
    kernel::{CpuKernel, CpuSlicePack, KernelBase, TensorSlot, ThreadInfo},
};

use super::{elements_per_iteration, out_of_bounds, saturate};

type BoxFn = fn(&Tensor, &mut TensorSliceMut<'_>, &Coordinates, usize) -> Status;

fn box_table() -> DispatchTable<BoxFn> {
    DispatchTable::<BoxFn>::new("Box3x3")
        .with(DispatchKey::data_type(DataType::U8), box_mean::<u8>)
        .with(DispatchKey::data_type(DataType::F32), box_mean::<f32>)
}

/// Mean of the 3x3 neighbourhood for the `step` lanes at `id`.
fn box_mean<T: Element + Bounded>(
    input: &Tensor,
    out: &mut TensorSliceMut<'_>,
    id: &Coordinates,
    step: usize,
) -> Status {
    let src = input
        .view::<T>()
        .map_err(|e| KernelError::precondition(format!("input: {e}")))?;
    let dst = out
        .typed::<T>()
        .ok_or_else(|| KernelError::precondition(format!("output is not {}", T::DATA_TYPE)))?;

    let mut center = *id;
    for lane in 0..step as isize {
        center.set(DIM_X, id.get(DIM_X) + lane);
        let mut sum = 0.0f64;
        for dy in -1..=1 {
            // one row of three neighbours
            let mut at = center;
            at.set(0, center.get(0) - 1);
            at.set(1, center.get(1) + dy);
            let row = src.row(&at, 3).ok_or_else(|| out_of_bounds(&at))?;
            sum += row
                .iter()
                .map(|v| v.to_f64().unwrap_or_default())
                .sum::<f64>();
        }
        *dst.get_mut(&center).ok_or_else(|| out_of_bounds(&center))? = saturate(sum / 9.0);
    }
    Ok(())
}

/// 3x3 mean filter.
///
/// Reads one element around every output, so [`CpuKernel::base`] reports a border of
/// 1. With `border_undefined` the outermost ring of the input is not computed and
/// the output valid region shrinks accordingly; otherwise the input border must be
/// filled beforehand, e.g. by [`super::fill_border::CpuFillBorderKernel`].
pub struct CpuBox3x3Kernel {
    base: KernelBase,
    run: Option<BoxFn>,
}

impl Default for CpuBox3x3Kernel {
    fn default() -> Self {
        Self::new()
    }
}

fn configure_box(
    input: &mut TensorInfo,
    output: &mut TensorInfo,
    border_undefined: bool,
) -> Result<(BoxFn, Window), KernelError> {
    let run = box_table().resolve(&DispatchKey::data_type(input.data_type()))?;
    output.auto_init_if_empty(*input.shape(), input.data_type(), input.quantization())?;
    ensure(output.data_type() == input.data_type(), || {
        format!("output is {}, input is {}", output.data_type(), input.data_type())
    })?;
    ensure(output.shape() == input.shape(), || {
        format!("output shape {} differs from input {}", output.shape(), input.shape())
    })?;

    let border = BorderSize::uniform(1);
    let step = elements_per_iteration(input.data_type());
    let mut window = calculate_max_window(input, &Steps::new(&[step]), border_undefined, border);
    let input_region = *input.valid_region();
    let output_access = AccessWindow::horizontal(0, step);

    let window_changed = update_window_and_padding(
        &mut window,
        &mut [
            TensorAccess::new(input, AccessWindow::rectangle(-1, -1, step + 2, 3)),
            TensorAccess::new(output, output_access),
        ],
    )?;
    if window_changed {
        return Err(KernelError::insufficient_padding(format!(
            "box3x3 window shrunk to {window}"
        )));
    }
    output_access.set_valid_region(output, &window, &input_region, border_undefined, border);
    Ok((run, window))
}

impl CpuBox3x3Kernel {
    /// An unconfigured kernel.
    pub fn new() -> Self {
        Self {
            base: KernelBase::new("CpuBox3x3Kernel"),
            run: None,
        }
    }

    /// Checks the descriptors without modifying them.
    pub fn validate(input: &TensorInfo, output: &TensorInfo, border_undefined: bool) -> Status {
        let (mut input, mut output) = (input.clone(), output.clone());
        configure_box(&mut input, &mut output, border_undefined).map(|_| ())
    }

    /// Prepares to filter `input` into `output`, auto-initializing an empty output.
    pub fn configure(
        &mut self,
        input: &mut TensorInfo,
        output: &mut TensorInfo,
        border_undefined: bool,
    ) -> Status {
        let (run, window) = configure_box(input, output, border_undefined)?;
        self.run = Some(run);
        self.base.set_border_size(BorderSize::uniform(1));
        self.base.configure(window)
    }
}

impl CpuKernel for CpuBox3x3Kernel {
    fn base(&self) -> &KernelBase {
        &self.base
    }

    fn run_op(&self, pack: &mut CpuSlicePack<'_>, window: &Window, _: &ThreadInfo) -> Status {
        let run = self
            .run
            .ok_or_else(|| KernelError::precondition("CpuBox3x3Kernel is not configured"))?;
        let input = pack.input(TensorSlot::Src(0))?;
        let out = pack.output(TensorSlot::Dst(0))?;
        let step = window[DIM_X].step();

        let mut status = Ok(());
        execute_window_loop(window, |id| {
            if status.is_ok() {
                status = run(input, &mut *out, id, step);
            }
        });
        status
    }
}
