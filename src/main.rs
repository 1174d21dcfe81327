use async_balancer::{Balancer, BalancerError, BalancerHandle, Config, LoadSnapshot};
use clap::Parser;
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use tokio::{runtime::Builder, task::JoinHandle, time::Duration};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;


/// Демонстрация: requester-ы шлют запросы, воркеры считают sin(x).
#[derive(Debug, Parser)]
#[command(name = "async_balancer", version)]
struct Args {
    /// Число воркеров
    #[arg(long, default_value_t = 4)]
    workers: usize,
    /// Число параллельных requester-ов
    #[arg(long, default_value_t = 10)]
    requesters: usize,
    /// Запросов на одного requester-а
    #[arg(long, default_value_t = 1000)]
    requests: usize,
    /// Верхняя граница длительности одной работы, мкс
    #[arg(long, default_value_t = 2000)]
    max_work_us: u64,
    /// Период вывода статистики, мс
    #[arg(long, default_value_t = 500)]
    stats_interval_ms: u64,
}


struct XorShift(u64);

impl XorShift {
    fn from_time(salt: u64) -> Self {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos() as u64;
        // нулевое состояние xorshift не покидает
        Self((nanos ^ salt.wrapping_mul(0x9E37_79B9_7F4A_7C15)) | 1)
    }

    fn next(&mut self) -> u64 {
        self.0 ^= self.0 << 13;
        self.0 ^= self.0 >> 7;
        self.0 ^= self.0 << 17;
        self.0
    }

    fn below(&mut self, bound: u64) -> u64 {
        self.next() % bound.max(1)
    }
}


fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let rt = Builder::new_multi_thread()
        .enable_all()
        .build()?;

    rt.block_on(run(args))?;
    Ok(())
}


/// Сумма ответов по всем requester-ам. Упавший requester логируется и не учитывается.
async fn collect_answered(requesters: Vec<JoinHandle<usize>>) -> usize {
    let mut answered = 0usize;
    for requester in requesters {
        match requester.await {
            Ok(n) => answered += n,
            Err(e) => warn!(error = %e, "requester task failed"),
        }
    }
    answered
}


async fn run(args: Args) -> Result<(), BalancerError> {
    let max_work_us = args.max_work_us;
    let config = Config {
        num_workers: args.workers,
        max_pending: args.requesters.max(1) * 4,
    };

    let balancer = Balancer::start(config, move |x: u32| async move {
        let mut rng = XorShift::from_time(x as u64);
        tokio::time::sleep(Duration::from_micros(rng.below(max_work_us))).await;
        (x as f64).sin()
    })?;

    let monitor = balancer.start_monitoring(
        Duration::from_millis(args.stats_interval_ms.max(1)),
        |snapshot: LoadSnapshot| {
            info!(
                pending = ?snapshot.pending,
                avg = snapshot.mean(),
                variance = snapshot.variance(),
                "load"
            );
        },
    );

    let started = Instant::now();
    let mut requesters = Vec::with_capacity(args.requesters);
    for r in 0..args.requesters {
        let submitter = balancer.submitter();
        let requests = args.requests;
        requesters.push(tokio::spawn(async move {
            let mut rng = XorShift::from_time(r as u64);
            let mut answered = 0usize;
            for _ in 0..requests {
                tokio::time::sleep(Duration::from_micros(rng.below(100))).await;
                match submitter.call(rng.below(90) as u32).await {
                    Ok(_) => answered += 1,
                    Err(e) => {
                        warn!(requester = r, error = %e, "request failed");
                        break;
                    }
                }
            }
            answered
        }));
    }

    let answered = collect_answered(requesters).await;

    BalancerHandle::<u32, f64>::stop_monitoring(monitor);
    let metrics = balancer.metrics();
    balancer.shutdown().await;

    info!(
        answered,
        dispatched = metrics.dispatched,
        completed = metrics.completed,
        elapsed = ?started.elapsed(),
        "all requesters finished"
    );
    Ok(())
}
