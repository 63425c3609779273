use anyhow::Context as _;
use clap::{Parser, ValueEnum};
use ratecounter::{
    AtomicCounter, Decrement, RateCounter, Scheduler, TokioScheduler, WheelScheduler,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SchedulerKind {
    Wheel,
    Tokio,
}

#[derive(Debug, Parser)]
#[clap(name = "ratecounter-bench")]
struct CommandLineArguments {
    /// Window length, e.g. "0s", "500ms", "30s"
    #[clap(long, default_value = "0s", value_parser = humantime::parse_duration)]
    interval: Duration,

    /// Number of incr()+rate() calls per thread
    #[clap(long, default_value_t = 1_000_000)]
    iterations: u64,

    #[clap(long, default_value_t = 1)]
    threads: u32,

    #[clap(long, value_enum, default_value_t = SchedulerKind::Wheel)]
    scheduler: SchedulerKind,

    /// Only time scheduling decrements, without touching a rate counter
    #[clap(long)]
    schedule_only: bool,

    #[clap(long)]
    log_file: Option<std::path::PathBuf>,
}

fn main() -> anyhow::Result<()> {
    let opt = CommandLineArguments::parse();
    ratecounter::logging::init_logging(opt.log_file.as_deref())?;

    // keep the runtime alive for as long as decrements may be pending on it
    let runtime = tokio::runtime::Runtime::new().context("Unable to start tokio runtime")?;
    let scheduler: Arc<dyn Scheduler> = match opt.scheduler {
        SchedulerKind::Wheel => Arc::new(WheelScheduler::new()?),
        SchedulerKind::Tokio => Arc::new(TokioScheduler::new(runtime.handle().clone())),
    };
    debug!("Running with {:?}", opt);

    let total = total_calls(&opt);
    if opt.schedule_only {
        schedule_only(&opt, scheduler, total)
    } else {
        incr_and_rate(&opt, scheduler, total)
    }
}

fn run_threads<F>(threads: u32, work: F) -> anyhow::Result<Duration>
where
    F: Fn() + Send + Sync + 'static,
{
    let work = Arc::new(work);
    let start = Instant::now();
    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let work = work.clone();
            std::thread::spawn(move || work())
        })
        .collect();
    for h in handles {
        h.join()
            .map_err(|_| anyhow::anyhow!("Benchmark thread panicked"))?;
    }
    Ok(start.elapsed())
}

fn total_calls(opt: &CommandLineArguments) -> u64 {
    opt.iterations.saturating_mul(opt.threads as u64)
}

fn per_op(elapsed: Duration, total: u64) -> f64 {
    elapsed.as_nanos() as f64 / total.max(1) as f64
}

fn incr_and_rate(
    opt: &CommandLineArguments,
    scheduler: Arc<dyn Scheduler>,
    total: u64,
) -> anyhow::Result<()> {
    let counter = Arc::new(RateCounter::with_scheduler(opt.interval, scheduler));
    let elapsed = {
        let counter = counter.clone();
        let iterations = opt.iterations;
        run_threads(opt.threads, move || {
            for _ in 0..iterations {
                counter.incr(1);
                counter.rate();
            }
        })?
    };
    info!(
        "{} incr+rate calls in {:?} ({:.1} ns/op), rate={}",
        total,
        elapsed,
        per_op(elapsed, total),
        counter.rate()
    );

    let drain_start = Instant::now();
    while counter.rate() != 0 {
        std::thread::sleep(Duration::from_millis(1));
    }
    info!(
        "Drained to zero {:?} after the last increment (interval={:?})",
        drain_start.elapsed(),
        opt.interval
    );
    Ok(())
}

fn schedule_only(
    opt: &CommandLineArguments,
    scheduler: Arc<dyn Scheduler>,
    total: u64,
) -> anyhow::Result<()> {
    // Each decrement takes one off the counter, so it drains to -total.
    let counter = Arc::new(AtomicCounter::new());
    let elapsed = {
        let counter = counter.clone();
        // the closure is dropped when the threads finish; the wheel has to outlive that
        let scheduler = scheduler.clone();
        let interval = opt.interval;
        let iterations = opt.iterations;
        run_threads(opt.threads, move || {
            for _ in 0..iterations {
                scheduler.schedule(interval, Decrement::new(counter.clone(), 1));
            }
        })?
    };
    info!(
        "{} schedule calls in {:?} ({:.1} ns/op)",
        total,
        elapsed,
        per_op(elapsed, total)
    );

    let target = (total as i64).wrapping_neg();
    let drain_start = Instant::now();
    while counter.value() != target {
        std::thread::sleep(Duration::from_millis(1));
    }
    info!(
        "All decrements fired {:?} after the last schedule (interval={:?})",
        drain_start.elapsed(),
        opt.interval
    );
    Ok(())
}
