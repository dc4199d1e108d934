use log::{debug, trace};
use rayon::prelude::*;
use thiserror::Error;

use vela_core::{Status, Window, MAX_DIMS};

use crate::kernel::{CpuKernel, CpuSlicePack, CpuTensorPack, ThreadInfo};

/// Errors that can occur while building a scheduler.
#[derive(Error, Debug, PartialEq)]
pub enum SchedulerError {
    /// The thread pool failed to build.
    #[error("failed to build thread pool: {0}")]
    BuildError(String),

    /// The requested thread count is invalid.
    #[error("thread count must be > 0, got {0}")]
    InvalidThreadCount(usize),
}

/// Controls how the windows of a kernel are executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ExecutionStrategy {
    /// Run every window on the scheduler's fixed-size thread pool.
    #[default]
    ThreadPool,

    /// Run the windows one after the other on the current thread.
    ///
    /// The window is partitioned exactly as with [`ExecutionStrategy::ThreadPool`],
    /// which is useful for debugging the partition itself.
    Serial,
}

/// Scheduler settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct SchedulerConfig {
    /// Number of workers. `None` uses the available parallelism of the machine.
    pub num_threads: Option<usize>,
    /// Axis the window is split along by default.
    pub split_dimension: usize,
    /// How the windows are executed.
    pub strategy: ExecutionStrategy,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            num_threads: None,
            split_dimension: 1,
            strategy: ExecutionStrategy::default(),
        }
    }
}

/// Per-call overrides of the scheduler defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ScheduleHints {
    /// Axis to split along instead of [`SchedulerConfig::split_dimension`].
    pub split_dimension: Option<usize>,
    /// Fewest iterations of the split axis a worker should receive.
    pub min_iterations_per_worker: usize,
}

/// Runs CPU kernels by partitioning their window between the workers of a pool.
pub struct CpuScheduler {
    config: SchedulerConfig,
    num_threads: usize,
    pool: Option<rayon::ThreadPool>,
}

impl std::fmt::Debug for CpuScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CpuScheduler")
            .field("config", &self.config)
            .field("num_threads", &self.num_threads)
            .finish()
    }
}

impl CpuScheduler {
    /// Creates a scheduler; the thread pool is built once, here.
    ///
    /// # Errors
    ///
    /// Returns an error if `num_threads` is zero or the pool cannot be built.
    pub fn new(config: SchedulerConfig) -> Result<Self, SchedulerError> {
        let num_threads = match config.num_threads {
            Some(0) => return Err(SchedulerError::InvalidThreadCount(0)),
            Some(n) => n,
            None => std::thread::available_parallelism().map_or(1, |n| n.get()),
        };

        let pool = match config.strategy {
            ExecutionStrategy::ThreadPool => Some(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(num_threads)
                    .thread_name(|i| format!("vela-worker-{i}"))
                    .build()
                    .map_err(|e| SchedulerError::BuildError(e.to_string()))?,
            ),
            ExecutionStrategy::Serial => None,
        };

        debug!(
            "cpu scheduler: {num_threads} threads, strategy {:?}, split axis {}",
            config.strategy, config.split_dimension
        );
        Ok(Self {
            config,
            num_threads,
            pool,
        })
    }

    /// Number of workers a window may be split into.
    pub fn num_threads(&self) -> usize {
        self.num_threads
    }

    /// The scheduler settings.
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Runs the whole configured window of `kernel`.
    pub fn schedule(
        &self,
        kernel: &dyn CpuKernel,
        pack: &mut CpuTensorPack<'_>,
        hints: ScheduleHints,
    ) -> Status {
        let window = *kernel.base().window()?;
        self.schedule_window(kernel, pack, &window, hints)
    }

    /// Runs `window`, a sub-window of the configured window of `kernel`.
    ///
    /// The window is split into disjoint step-aligned parts along one axis, the
    /// outputs are split at the same positions, and each worker runs one part.
    /// Returns once every worker finished, with the error of the first failing part.
    pub fn schedule_window(
        &self,
        kernel: &dyn CpuKernel,
        pack: &mut CpuTensorPack<'_>,
        window: &Window,
        hints: ScheduleHints,
    ) -> Status {
        let base = kernel.base();
        base.validate_run_window(window)?;
        if window.is_empty() {
            trace!("{}: empty window {window}, nothing to run", base.name());
            return Ok(());
        }

        let partition = if base.is_parallelisable() {
            self.partition(window, &hints)
        } else {
            None
        };

        let (axis, windows) = match partition {
            Some((axis, parts)) => (
                axis,
                (0..parts)
                    .map(|id| window.split_window(axis, id, parts))
                    .collect::<Vec<_>>(),
            ),
            None => (MAX_DIMS - 1, vec![*window]),
        };
        let cuts: Vec<isize> = windows[1..].iter().map(|w| w[axis].start()).collect();
        let packs = pack.split(axis, &cuts)?;

        let num_threads = windows.len();
        let jobs: Vec<(usize, Window, CpuSlicePack<'_>)> = windows
            .into_iter()
            .zip(packs)
            .enumerate()
            .map(|(id, (window, pack))| (id, window, pack))
            .collect();

        let run = |(thread_id, window, mut pack): (usize, Window, CpuSlicePack<'_>)| {
            trace!(
                "{}: worker {thread_id}/{num_threads} runs {window}",
                base.name()
            );
            let info = ThreadInfo {
                thread_id,
                num_threads,
            };
            kernel.run_op(&mut pack, &window, &info)
        };

        let results: Vec<Status> = match &self.pool {
            Some(pool) if num_threads > 1 => {
                pool.install(|| jobs.into_par_iter().map(run).collect())
            }
            _ => jobs.into_iter().map(run).collect(),
        };
        results.into_iter().collect()
    }

    /// Axis and number of parts for `window`, or `None` to run it in one piece.
    fn partition(&self, window: &Window, hints: &ScheduleHints) -> Option<(usize, usize)> {
        let preferred = hints.split_dimension.unwrap_or(self.config.split_dimension);
        let axis = if (1..MAX_DIMS).contains(&preferred) && window.num_iterations(preferred) > 1 {
            preferred
        } else {
            (1..MAX_DIMS).rev().find(|&d| window.num_iterations(d) > 1)?
        };

        let per_worker = hints.min_iterations_per_worker.max(1);
        let parts = self
            .num_threads
            .min(window.num_iterations(axis) / per_worker)
            .max(1);
        (parts > 1).then_some((axis, parts))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::kernel::{KernelBase, TensorSlot};
    use vela_core::{
        calculate_max_window, execute_window_loop, BorderSize, DataType, KernelError, Steps,
        Tensor, TensorInfo, TensorShape,
    };

    struct MarkKernel {
        base: KernelBase,
        seen: Mutex<Vec<(ThreadInfo, Window)>>,
        fail_from: Option<usize>,
    }

    impl MarkKernel {
        fn new(info: &TensorInfo, parallelisable: bool) -> Result<Self, KernelError> {
            let mut base = KernelBase::new("Mark");
            base.configure(calculate_max_window(
                info,
                &Steps::new(&[2]),
                false,
                BorderSize::default(),
            ))?;
            base.set_parallelisable(parallelisable);
            Ok(Self {
                base,
                seen: Mutex::new(Vec::new()),
                fail_from: None,
            })
        }

        fn windows(&self) -> Vec<(ThreadInfo, Window)> {
            let mut seen = self.seen.lock().map(|s| s.clone()).unwrap_or_default();
            seen.sort_by_key(|(info, _)| info.thread_id);
            seen
        }
    }

    impl CpuKernel for MarkKernel {
        fn base(&self) -> &KernelBase {
            &self.base
        }

        fn run_op(&self, pack: &mut CpuSlicePack<'_>, window: &Window, info: &ThreadInfo) -> Status {
            if let Ok(mut seen) = self.seen.lock() {
                seen.push((*info, *window));
            }
            if self.fail_from.is_some_and(|first| info.thread_id >= first) {
                return Err(KernelError::unsupported(format!("worker {}", info.thread_id)));
            }
            let dst = pack.output_typed::<u8>(TensorSlot::Dst(0))?;
            let mut status = Ok(());
            execute_window_loop(window, |id| {
                for lane in 0..window[0].step() as isize {
                    let mut c = *id;
                    c.set(0, id.get(0) + lane);
                    match dst.get_mut(&c) {
                        Some(v) => *v += info.thread_id as u8 + 1,
                        None => status = Err(KernelError::precondition("not owned")),
                    }
                }
            });
            status
        }
    }

    fn config(num_threads: usize, strategy: ExecutionStrategy) -> SchedulerConfig {
        SchedulerConfig {
            num_threads: Some(num_threads),
            strategy,
            ..Default::default()
        }
    }

    #[test]
    fn test_zero_threads() {
        let res = CpuScheduler::new(config(0, ExecutionStrategy::ThreadPool));
        assert!(matches!(res, Err(SchedulerError::InvalidThreadCount(0))));
    }

    #[test]
    fn test_split_along_y() -> Result<(), Box<dyn std::error::Error>> {
        let info = TensorInfo::new(TensorShape::new(&[8, 10]), DataType::U8)?;
        let kernel = MarkKernel::new(&info, true)?;
        let mut dst = Tensor::allocate(info)?;
        let scheduler = CpuScheduler::new(config(4, ExecutionStrategy::ThreadPool))?;

        let mut pack = CpuTensorPack::new().with_output(TensorSlot::Dst(0), &mut dst);
        scheduler.schedule(&kernel, &mut pack, ScheduleHints::default())?;

        let seen = kernel.windows();
        assert_eq!(seen.len(), 4);
        let rows: Vec<(isize, isize)> = seen.iter().map(|(_, w)| (w[1].start(), w[1].end())).collect();
        assert_eq!(rows, vec![(0, 3), (3, 6), (6, 8), (8, 10)]);
        assert!(seen.iter().all(|(info, _)| info.num_threads == 4));

        // every element written exactly once, by the worker owning its row
        let values = dst.to_vec::<u8>()?;
        for y in 0..10 {
            let owner = rows.iter().position(|&(s, e)| (s..e).contains(&y)).unwrap_or(99);
            for x in 0..8 {
                assert_eq!(values[y as usize * 8 + x], owner as u8 + 1);
            }
        }
        Ok(())
    }

    #[test]
    fn test_fallback_to_outer_axis() -> Result<(), Box<dyn std::error::Error>> {
        let info = TensorInfo::new(TensorShape::new(&[4, 1, 6]), DataType::U8)?;
        let kernel = MarkKernel::new(&info, true)?;
        let mut dst = Tensor::allocate(info)?;
        let scheduler = CpuScheduler::new(config(3, ExecutionStrategy::Serial))?;

        let mut pack = CpuTensorPack::new().with_output(TensorSlot::Dst(0), &mut dst);
        scheduler.schedule(&kernel, &mut pack, ScheduleHints::default())?;

        let seen = kernel.windows();
        assert_eq!(seen.len(), 3);
        assert!(seen.iter().all(|(_, w)| w[2].num_iterations() == 2));
        assert!(dst.to_vec::<u8>()?.iter().all(|&v| v > 0));
        Ok(())
    }

    #[test]
    fn test_never_splits_x() -> Result<(), Box<dyn std::error::Error>> {
        let info = TensorInfo::new(TensorShape::new(&[16]), DataType::U8)?;
        let kernel = MarkKernel::new(&info, true)?;
        let mut dst = Tensor::allocate(info)?;
        let scheduler = CpuScheduler::new(config(4, ExecutionStrategy::ThreadPool))?;

        let mut pack = CpuTensorPack::new().with_output(TensorSlot::Dst(0), &mut dst);
        let hints = ScheduleHints {
            split_dimension: Some(0),
            ..Default::default()
        };
        scheduler.schedule(&kernel, &mut pack, hints)?;
        assert_eq!(kernel.windows().len(), 1);
        Ok(())
    }

    #[test]
    fn test_not_parallelisable() -> Result<(), Box<dyn std::error::Error>> {
        let info = TensorInfo::new(TensorShape::new(&[8, 10]), DataType::U8)?;
        let kernel = MarkKernel::new(&info, false)?;
        let mut dst = Tensor::allocate(info)?;
        let scheduler = CpuScheduler::new(config(4, ExecutionStrategy::ThreadPool))?;

        let mut pack = CpuTensorPack::new().with_output(TensorSlot::Dst(0), &mut dst);
        scheduler.schedule(&kernel, &mut pack, ScheduleHints::default())?;
        let seen = kernel.windows();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, ThreadInfo::single());
        Ok(())
    }

    #[test]
    fn test_min_iterations_per_worker() -> Result<(), Box<dyn std::error::Error>> {
        let info = TensorInfo::new(TensorShape::new(&[8, 10]), DataType::U8)?;
        let kernel = MarkKernel::new(&info, true)?;
        let mut dst = Tensor::allocate(info)?;
        let scheduler = CpuScheduler::new(config(8, ExecutionStrategy::ThreadPool))?;

        let mut pack = CpuTensorPack::new().with_output(TensorSlot::Dst(0), &mut dst);
        let hints = ScheduleHints {
            min_iterations_per_worker: 4,
            ..Default::default()
        };
        scheduler.schedule(&kernel, &mut pack, hints)?;
        assert_eq!(kernel.windows().len(), 2);
        Ok(())
    }

    #[test]
    fn test_first_error_wins() -> Result<(), Box<dyn std::error::Error>> {
        let info = TensorInfo::new(TensorShape::new(&[8, 10]), DataType::U8)?;
        let mut kernel = MarkKernel::new(&info, true)?;
        kernel.fail_from = Some(1);
        let mut dst = Tensor::allocate(info)?;
        let scheduler = CpuScheduler::new(config(4, ExecutionStrategy::ThreadPool))?;

        let mut pack = CpuTensorPack::new().with_output(TensorSlot::Dst(0), &mut dst);
        let err = scheduler
            .schedule(&kernel, &mut pack, ScheduleHints::default())
            .unwrap_err();
        assert_eq!(err.message(), "worker 1");
        assert_eq!(kernel.windows().len(), 4);
        Ok(())
    }
}
