use std::hint::black_box;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};

use vela_core::{DataType, Tensor, TensorInfo, TensorShape};
use vela_runtime::{
    ArithmeticOp, CpuBox3x3Kernel, CpuElementwiseKernel, CpuScheduler, CpuTensorPack,
    ExecutionStrategy, ScheduleHints, SchedulerConfig, TensorSlot,
};

fn bench_scheduler(c: &mut Criterion) {
    let mut group = c.benchmark_group("Scheduler");

    for (width, height) in [(256, 224), (512, 448), (1024, 896)].iter() {
        let parameter_string = format!("{width}x{height}");
        group.throughput(criterion::Throughput::Elements((*width * *height) as u64));

        let mut a = TensorInfo::new(TensorShape::new(&[*width, *height]), DataType::F32)
            .expect("valid shape");
        let mut b = a.clone();
        let mut out = TensorInfo::empty();
        let mut add = CpuElementwiseKernel::new();
        add.configure(&mut a, &mut b, &mut out, ArithmeticOp::Add)
            .expect("configure add");

        let mut src = TensorInfo::new(TensorShape::new(&[*width, *height]), DataType::U8)
            .expect("valid shape");
        let mut dst = TensorInfo::empty();
        let mut filter = CpuBox3x3Kernel::new();
        filter
            .configure(&mut src, &mut dst, true)
            .expect("configure box3x3");

        let lhs = Tensor::allocate(a).expect("allocate");
        let rhs = Tensor::allocate(b).expect("allocate");
        let mut sum = Tensor::allocate(out).expect("allocate");
        let input = Tensor::allocate(src).expect("allocate");
        let mut filtered = Tensor::allocate(dst).expect("allocate");

        for strategy in [ExecutionStrategy::Serial, ExecutionStrategy::ThreadPool] {
            let scheduler = CpuScheduler::new(SchedulerConfig {
                strategy,
                ..Default::default()
            })
            .expect("scheduler");

            group.bench_with_input(
                BenchmarkId::new(format!("elementwise_add_{strategy:?}"), &parameter_string),
                &scheduler,
                |bencher, scheduler| {
                    bencher.iter(|| {
                        let mut pack = CpuTensorPack::new()
                            .with_input(TensorSlot::Src(0), &lhs)
                            .with_input(TensorSlot::Src(1), &rhs)
                            .with_output(TensorSlot::Dst(0), &mut sum);
                        black_box(scheduler.schedule(&add, &mut pack, ScheduleHints::default()))
                    })
                },
            );

            group.bench_with_input(
                BenchmarkId::new(format!("box3x3_{strategy:?}"), &parameter_string),
                &scheduler,
                |bencher, scheduler| {
                    bencher.iter(|| {
                        let mut pack = CpuTensorPack::new()
                            .with_input(TensorSlot::Src(0), &input)
                            .with_output(TensorSlot::Dst(0), &mut filtered);
                        black_box(scheduler.schedule(&filter, &mut pack, ScheduleHints::default()))
                    })
                },
            );
        }
    }

    group.finish();
}

criterion_group!(benches, bench_scheduler);
criterion_main!(benches);
