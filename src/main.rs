use rand::Rng;
use sigdrain::cli::{parse_args, CliArgs};
use sigdrain::{
    log, log_with_worker, set_log_file, Context, ShutdownConfig, ShutdownCoordinator,
    ShutdownHook, WaitGroup,
};
use std::io;
use std::process;
use std::time::Duration;

/// Pause between simulated jobs
const IDLE_MS: u64 = 100;

fn load_config(args: &CliArgs) -> io::Result<ShutdownConfig> {
    let mut config = match &args.config_file {
        Some(path) => ShutdownConfig::from_file(path)?,
        None => ShutdownConfig::default(),
    }
    .apply_env()?;

    if let Some(grace) = args.grace_seconds {
        config.drain_timeout_secs = if grace == 0 { None } else { Some(grace) };
    }
    Ok(config)
}

/// Worker loop: pulls simulated jobs until `accepting` is cancelled
///
/// Each job is registered on `wait_group` before the gate is checked, so a
/// job is either refused or fully drained.
fn run_worker(id: usize, accepting: Context, wait_group: WaitGroup, max_job_ms: u64) {
    let mut rng = rand::thread_rng();
    let mut jobs = 0u64;

    loop {
        let job = wait_group.enter();
        if accepting.is_cancelled() {
            drop(job);
            break;
        }

        let duration = rng.gen_range(1..=max_job_ms);
        let _ = log_with_worker(&format!("Job {} started ({} ms)", jobs + 1, duration), Some(id));
        std::thread::sleep(Duration::from_millis(duration));
        jobs += 1;
        drop(job);

        if accepting.wait_timeout(Duration::from_millis(IDLE_MS)).is_some() {
            break;
        }
    }

    let cause = accepting
        .cause()
        .map(|c| c.to_string())
        .unwrap_or_else(|| "unknown".to_string());
    let _ = log_with_worker(&format!("Stopped after {} job(s): {}", jobs, cause), Some(id));
}

fn run(args: CliArgs) -> io::Result<bool> {
    let config = load_config(&args)?;
    let coordinator = ShutdownCoordinator::with_config(config)?;

    let signalled = coordinator.cancellable_context(&Context::background())?;
    let (accepting, stop_accepting) = Context::with_cancel(&signalled);

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(args.workers)
        .thread_name(|i| format!("sigdrain-worker-{}", i + 1))
        .build()
        .map_err(|e| io::Error::new(io::ErrorKind::Other, format!("Failed to build worker pool: {}", e)))?;

    for id in 1..=args.workers {
        let accepting = accepting.clone();
        let wait_group = coordinator.wait_group().clone();
        let max_job_ms = args.max_job_ms;
        pool.spawn(move || run_worker(id, accepting, wait_group, max_job_ms));
    }
    let _ = log(&format!("Started {} worker(s)", args.workers));

    let stop_hook: ShutdownHook<'_> = Box::new(move || {
        let _ = log("No longer accepting new jobs");
        stop_accepting.cancel();
    });
    let report = coordinator.wait_for_shutdown(vec![stop_hook]);

    Ok(report.drained)
}

fn main() {
    let args = parse_args();
    if let Some(log_file) = &args.log_file {
        if let Err(e) = set_log_file(log_file) {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    }

    match run(args) {
        Ok(true) => process::exit(0),
        Ok(false) => process::exit(1),
        Err(e) => {
            let _ = log(&format!("Error: {}", e));
            process::exit(1);
        }
    }
}
