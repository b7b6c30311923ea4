use std::{path::PathBuf, time::Duration};

use clap::{Args, Parser, Subcommand};

use crate::bench::{BenchMode, BenchOptions};
use crate::config::ClientConfig;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a replica of the register.
    Serve(ServeArgs),
    /// Read the register through a quorum.
    Read(ClientArgs),
    /// Write a value to the register through a quorum.
    Write(WriteArgs),
    /// Ask seed replicas for the current view.
    View(ViewArgs),
    /// Measure read or write latency and throughput.
    Bench(BenchArgs),
    /// Repeatedly read the register and write the value back.
    Loop(LoopArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// Socket address the replica should bind to. Use port 0 for an ephemeral port.
    #[arg(long, default_value = "127.0.0.1:5000")]
    pub listen: String,

    /// Address of every replica in the view, including this one. Defaults to
    /// the bound address alone.
    #[arg(long = "peer", value_delimiter = ',')]
    pub peers: Vec<String>,
}

#[derive(Args, Debug, Clone)]
pub struct ClientArgs {
    /// Address of every replica in the view.
    #[arg(long = "peer", value_delimiter = ',', default_values_t = default_peers())]
    pub peers: Vec<String>,

    /// Milliseconds to wait for a single replica before treating it as unreachable.
    #[arg(long, default_value_t = 2000)]
    pub request_timeout_ms: u64,
}

impl ClientArgs {
    pub fn config(&self) -> ClientConfig {
        ClientConfig::default().with_request_timeout(Duration::from_millis(self.request_timeout_ms))
    }
}

#[derive(Args, Debug, Clone)]
pub struct WriteArgs {
    #[command(flatten)]
    pub client: ClientArgs,

    /// Value to store, taken as UTF-8 bytes.
    pub value: String,
}

#[derive(Args, Debug, Clone)]
pub struct ViewArgs {
    /// Replicas to ask, in order, until one answers.
    #[arg(long = "seed", value_delimiter = ',', required = true)]
    pub seeds: Vec<String>,

    #[arg(long, default_value_t = 2000)]
    pub request_timeout_ms: u64,
}

#[derive(Args, Debug, Clone)]
pub struct BenchArgs {
    #[command(flatten)]
    pub client: ClientArgs,

    #[arg(long, value_enum, default_value_t = BenchMode::Both)]
    pub mode: BenchMode,

    /// Measure writes instead of reads.
    #[arg(long)]
    pub write: bool,

    /// Payload size in bytes.
    #[arg(long, default_value_t = 1)]
    pub size: usize,

    /// Number of operations for latency measurements.
    #[arg(long, default_value_t = 1000)]
    pub ops: usize,

    /// Seconds to run throughput measurements for.
    #[arg(long, default_value_t = 10)]
    pub duration: u64,

    /// Append a one-line result to this file.
    #[arg(long)]
    pub output: Option<PathBuf>,
}

impl BenchArgs {
    pub fn options(&self) -> BenchOptions {
        BenchOptions {
            mode: self.mode,
            write: self.write,
            size: self.size,
            ops: self.ops,
            duration: Duration::from_secs(self.duration),
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct LoopArgs {
    #[command(flatten)]
    pub client: ClientArgs,

    /// Number of read-then-write rounds. Runs until interrupted when omitted.
    #[arg(short, long, default_value_t = u64::MAX)]
    pub n: u64,

    /// Print a full progress line every this many rounds, a dot otherwise.
    #[arg(long, default_value_t = 1000)]
    pub report_every: u64,
}

fn default_peers() -> Vec<String> {
    ["127.0.0.1:5000", "127.0.0.1:5001", "127.0.0.1:5002"]
        .into_iter()
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_takes_peers_and_value() {
        let cli = Cli::parse_from([
            "quorum-register",
            "write",
            "--peer",
            "127.0.0.1:7000,127.0.0.1:7001",
            "hello",
        ]);
        match cli.command {
            Command::Write(args) => {
                assert_eq!(args.client.peers, ["127.0.0.1:7000", "127.0.0.1:7001"]);
                assert_eq!(args.value, "hello");
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn read_defaults_to_local_three_replica_view() {
        let cli = Cli::parse_from(["quorum-register", "read"]);
        match cli.command {
            Command::Read(args) => {
                assert_eq!(args.peers.len(), 3);
                assert_eq!(args.config().request_timeout, Duration::from_secs(2));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn bench_parses_mode() {
        let cli = Cli::parse_from(["quorum-register", "bench", "--mode", "throughput", "--write"]);
        match cli.command {
            Command::Bench(args) => {
                let options = args.options();
                assert_eq!(options.mode, BenchMode::Throughput);
                assert!(options.write);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn view_requires_a_seed() {
        assert!(Cli::try_parse_from(["quorum-register", "view"]).is_err());
    }

    #[test]
    fn loop_takes_round_count() {
        let cli = Cli::parse_from(["quorum-register", "loop", "-n", "5"]);
        match cli.command {
            Command::Loop(args) => {
                assert_eq!(args.n, 5);
                assert_eq!(args.report_every, 1000);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn loop_runs_forever_by_default() {
        let cli = Cli::parse_from(["quorum-register", "loop"]);
        assert!(matches!(cli.command, Command::Loop(args) if args.n == u64::MAX));
    }
}
