use num_traits::{Bounded, NumCast, ToPrimitive};

use vela_core::{
    execute_window_loop, Coordinates, DataType, Element, KernelError, Status, TensorView, Window,
};

use crate::{
    gpu::HostLibrary,
    kernel::{CpuSlicePack, TensorSlot},
};

/// 3x3 mean filter.
pub mod box3x3;

/// binary elementwise arithmetic with broadcasting.
pub mod elementwise;

/// border materialization.
pub mod fill_border;

pub(crate) fn register_host_kernels(library: &mut HostLibrary) {
    library.register(fill_border::FILL_BORDER_KERNEL, fill_border::fill_border_entry);
    library.register(elementwise::ELEMENTWISE_KERNEL, elementwise::elementwise_entry);
}

/// Elements of `data_type` processed per iteration: one 16-byte vector.
pub fn elements_per_iteration(data_type: DataType) -> usize {
    (16 / data_type.element_size().max(1)).max(1)
}

/// Converts `value` to `T`, clamping to its range. NaN becomes zero for integers.
pub(crate) fn saturate<T: Element + Bounded>(value: f64) -> T {
    let lo = T::min_value().to_f64().unwrap_or(f64::MIN);
    let hi = T::max_value().to_f64().unwrap_or(f64::MAX);
    <T as NumCast>::from(value.clamp(lo, hi)).unwrap_or_default()
}

/// Calls `f` for the `step` consecutive x positions of every window iteration.
pub(crate) fn for_each_lane<F>(window: &Window, step: usize, mut f: F) -> Status
where
    F: FnMut(&Coordinates) -> Status,
{
    let mut status = Ok(());
    execute_window_loop(window, |id| {
        if status.is_err() {
            return;
        }
        let mut coords = *id;
        for lane in 0..step as isize {
            coords.set(0, id.get(0) + lane);
            if let Err(e) = f(&coords) {
                status = Err(e);
                return;
            }
        }
    });
    status
}

/// Typed view of the input in `slot`.
#[track_caller]
pub(crate) fn input_view<'a, T: Element>(
    pack: &CpuSlicePack<'a>,
    slot: TensorSlot,
) -> Result<TensorView<'a, T>, KernelError> {
    pack.input(slot)?
        .view::<T>()
        .map_err(|e| KernelError::precondition(format!("input {slot}: {e}")))
}

#[track_caller]
pub(crate) fn out_of_bounds(coords: &Coordinates) -> KernelError {
    KernelError::precondition(format!(
        "element {:?} is outside the tensor or the owned band",
        coords.as_slice()
    ))
}
