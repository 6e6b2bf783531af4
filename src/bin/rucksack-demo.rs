#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use rucksack::log::{self, Level};
use rucksack::met::{self, runtime};
use rucksack::Rucksack;
use std::io::Write;
use std::time::{Duration, Instant};

/// Emits a few log lines and metrics using the environment configuration,
/// e.g. `LOG_NAME=demo MET_NAME=demo MET_RUNTIME=all MET_REPORT_INTERVAL=1s`.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let rucksack = Rucksack::init();

    rucksack::info!(pid = std::process::id(), "demo starting");

    let requests = met::counter("requests", &["route:/demo"]);
    let latency = met::timer("latency", &[]);
    let started = Instant::now();

    for round in 0..5u32 {
        let start = Instant::now();
        let payload: Vec<Vec<u8>> = (0..1000).map(|i| vec![0u8; 64 + i]).collect();
        drop(payload);
        requests.inc();
        latency.since(start);

        let pause = runtime::reclaim();
        rucksack::debug!(round, pause_us = pause.as_micros() as u64, "reclaimed memory");
        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    let mut child = log::current().writer(Level::Warn, Default::default());
    writeln!(child, "forwarded from a child process")?;
    drop(child);

    let recovered = log::error_on_panic(|| -> u32 { panic!("demo panic") });
    rucksack::warn!(recovered = recovered.is_some(), "panic recovered");

    rucksack::info!(
        elapsed_ms = started.elapsed().as_millis() as u64,
        "demo finished"
    );
    drop(rucksack);
    Ok(())
}
