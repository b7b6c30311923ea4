//! Latency and throughput measurement against a running replica group.

use std::fmt;
use std::path::Path;
use std::time::{Duration, Instant};

use clap::ValueEnum;
use rand::RngCore;
use tokio::io::AsyncWriteExt;
use tracing::info;

use crate::client::{QuorumClient, QuorumError};
use crate::register::Value;
use crate::transport::Transport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BenchMode {
    /// Time each of a fixed number of operations.
    Latency,
    /// Count operations completed within a fixed duration.
    Throughput,
    /// Time a fixed number of operations and derive the rate from the total.
    Both,
}

#[derive(Debug, Clone)]
pub struct BenchOptions {
    pub mode: BenchMode,
    pub write: bool,
    pub size: usize,
    pub ops: usize,
    pub duration: Duration,
}

impl BenchOptions {
    fn operation(&self) -> &'static str {
        if self.write { "write" } else { "read" }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatencySummary {
    pub mean: Duration,
    pub std_dev: Duration,
    pub samples: usize,
}

impl LatencySummary {
    /// Mean and standard deviation after dropping the single fastest and
    /// slowest sample. Fewer than three samples are summarized as-is.
    pub fn from_samples(samples: &[Duration]) -> Option<Self> {
        let mut nanos: Vec<f64> = samples.iter().map(|d| d.as_nanos() as f64).collect();
        if nanos.len() > 2 {
            nanos.sort_by(f64::total_cmp);
            nanos.pop();
            nanos.remove(0);
        }
        if nanos.is_empty() {
            return None;
        }

        let count = nanos.len() as f64;
        let mean = nanos.iter().sum::<f64>() / count;
        let variance = nanos.iter().map(|n| (n - mean).powi(2)).sum::<f64>() / count;
        Some(Self {
            mean: Duration::from_nanos(mean as u64),
            std_dev: Duration::from_nanos(variance.sqrt() as u64),
            samples: nanos.len(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct BenchReport {
    pub operation: &'static str,
    pub size: usize,
    pub ops: usize,
    pub elapsed: Duration,
    pub latency: Option<LatencySummary>,
    pub ops_per_sec: Option<f64>,
}

impl BenchReport {
    /// `mean_ns stddev_ns ops_per_sec ops operation size rfc3339`, zeros for
    /// whatever the mode did not measure.
    pub fn result_line(&self) -> String {
        let (mean, std_dev) = self
            .latency
            .map(|l| (l.mean.as_nanos(), l.std_dev.as_nanos()))
            .unwrap_or_default();
        format!(
            "{} {} {} {} {} {} {}",
            mean,
            std_dev,
            self.ops_per_sec.unwrap_or_default() as u64,
            self.ops,
            self.operation,
            self.size,
            chrono::Utc::now().to_rfc3339(),
        )
    }

    pub async fn append_to(&self, path: &Path) -> std::io::Result<()> {
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        file.write_all(self.result_line().as_bytes()).await?;
        file.write_all(b"\n").await?;
        file.flush().await
    }
}

impl fmt::Display for BenchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Result:")?;
        if let Some(latency) = &self.latency {
            write!(f, " latency {:?} ({:?})", latency.mean, latency.std_dev)?;
        }
        if let Some(rate) = self.ops_per_sec {
            write!(f, " throughput {}", rate as u64)?;
        }
        write!(
            f,
            " [{} {} ops of {}B in {:.3}s]",
            self.ops,
            self.operation,
            self.size,
            self.elapsed.as_secs_f64()
        )
    }
}

pub fn random_payload(size: usize) -> Value {
    let mut data = vec![0u8; size];
    rand::thread_rng().fill_bytes(&mut data);
    data
}

/// Runs one benchmark. Read benchmarks write a payload first so there is
/// something of the requested size to read back.
pub async fn run<T: Transport>(
    client: &QuorumClient<T>,
    options: &BenchOptions,
) -> Result<BenchReport, QuorumError> {
    let payload = random_payload(options.size);
    info!(
        mode = ?options.mode,
        operation = options.operation(),
        size = options.size,
        "starting benchmark"
    );
    if !options.write {
        client.write(payload.clone()).await?;
    }

    let mut latencies = Vec::new();
    let mut ops = 0;
    let start = Instant::now();
    match options.mode {
        BenchMode::Latency | BenchMode::Both => {
            for _ in 0..options.ops {
                let before = Instant::now();
                run_once(client, options.write, &payload).await?;
                latencies.push(before.elapsed());
                ops += 1;
            }
        }
        BenchMode::Throughput => {
            while start.elapsed() < options.duration {
                run_once(client, options.write, &payload).await?;
                ops += 1;
            }
        }
    }
    let elapsed = start.elapsed();

    let latency = match options.mode {
        BenchMode::Throughput => None,
        _ => LatencySummary::from_samples(&latencies),
    };
    let ops_per_sec = match options.mode {
        BenchMode::Latency => None,
        _ if elapsed.is_zero() => Some(0.0),
        _ => Some(ops as f64 / elapsed.as_secs_f64()),
    };

    Ok(BenchReport {
        operation: options.operation(),
        size: options.size,
        ops,
        elapsed,
        latency,
        ops_per_sec,
    })
}

async fn run_once<T: Transport>(
    client: &QuorumClient<T>,
    write: bool,
    payload: &Value,
) -> Result<(), QuorumError> {
    if write {
        client.write(payload.clone()).await?;
    } else {
        client.read().await?;
    }
    Ok(())
}

/// Timings of one read-then-write-back round.
#[derive(Debug, Clone, PartialEq)]
pub struct Round {
    pub index: u64,
    pub value: Option<Value>,
    pub read: Duration,
    pub write: Duration,
}

/// Reads the register and writes the value straight back, `rounds` times.
///
/// An unwritten register is written back as an empty value. Stops at the
/// first failed operation.
pub async fn read_write_loop<T, F>(
    client: &QuorumClient<T>,
    rounds: u64,
    mut observe: F,
) -> Result<(), QuorumError>
where
    T: Transport,
    F: FnMut(&Round),
{
    for index in 0..rounds {
        let started = Instant::now();
        let value = client.read().await?;
        let read = started.elapsed();

        let started = Instant::now();
        client.write(value.clone().unwrap_or_default()).await?;
        let write = started.elapsed();

        observe(&Round {
            index,
            value,
            read,
            write,
        });
    }
    Ok(())
}
