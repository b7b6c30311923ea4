use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use quorum_register::{
    bench,
    cli::{BenchArgs, ClientArgs, Cli, Command, LoopArgs, ServeArgs, ViewArgs, WriteArgs},
    client::{QuorumClient, fetch_view},
    server::ReplicaServer,
    service::ReplicaService,
    transport::TcpTransport,
    view::{Process, View},
};

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Command::Serve(args) => serve(args).await?,
        Command::Read(args) => read(args).await?,
        Command::Write(args) => write(args).await?,
        Command::View(args) => view(args).await?,
        Command::Bench(args) => run_bench(args).await?,
        Command::Loop(args) => run_loop(args).await?,
    }

    Ok(())
}

async fn serve(args: ServeArgs) -> Result<()> {
    let listener = TcpListener::bind(&args.listen)
        .await
        .with_context(|| format!("failed to bind {}", args.listen))?;
    let addr = listener.local_addr()?;

    let view = if args.peers.is_empty() {
        View::with_processes([addr.to_string()])?
    } else {
        View::with_processes(args.peers)?
    };
    if !view.has_member(&Process::new(addr.to_string())) && !view.has_member(&Process::new(&*args.listen)) {
        warn!(%addr, %view, "listen address is not a member of the view");
    }

    let server = ReplicaServer::new(listener, Arc::new(ReplicaService::new(view.clone())));
    info!(%view, "serving view");
    info!("replica listening on {}", addr);
    if let Err(err) = server.run_until_ctrl_c().await {
        warn!("replica exited with error: {err:?}");
        return Err(err);
    }
    Ok(())
}

fn connect(args: &ClientArgs) -> Result<QuorumClient<TcpTransport>> {
    let view = View::with_processes(args.peers.iter().map(String::as_str))?;
    let client = QuorumClient::with_config(view, TcpTransport::new(), args.config());
    debug!(
        view = %client.view(),
        request_timeout = ?client.config().request_timeout,
        "quorum client ready"
    );
    Ok(client)
}

async fn read(args: ClientArgs) -> Result<()> {
    let client = connect(&args)?;
    let value = client.read().await.context("quorum read failed")?;
    match value {
        Some(bytes) => println!("{}", String::from_utf8_lossy(&bytes)),
        None => println!("<empty>"),
    }
    Ok(())
}

async fn write(args: WriteArgs) -> Result<()> {
    let client = connect(&args.client)?;
    let timestamp = client
        .write(args.value.into_bytes())
        .await
        .context("quorum write failed")?;
    println!("{timestamp}");
    Ok(())
}

async fn view(args: ViewArgs) -> Result<()> {
    let seeds: Vec<Process> = args.seeds.into_iter().map(Process::new).collect();
    let view = fetch_view(
        &TcpTransport::new(),
        &seeds,
        Duration::from_millis(args.request_timeout_ms),
    )
    .await
    .context("failed to fetch the current view")?;
    for process in view.members() {
        println!("{process}");
    }
    Ok(())
}

async fn run_bench(args: BenchArgs) -> Result<()> {
    let client = connect(&args.client)?;
    let report = bench::run(&client, &args.options())
        .await
        .context("benchmark failed")?;
    println!("{report}");
    if let Some(path) = &args.output {
        report
            .append_to(path)
            .await
            .with_context(|| format!("failed to append results to {}", path.display()))?;
    }
    Ok(())
}

async fn run_loop(args: LoopArgs) -> Result<()> {
    let client = connect(&args.client)?;
    let report_every = args.report_every.max(1);
    let mut stdout = std::io::stdout();
    bench::read_write_loop(&client, args.n, |round| {
        if round.index % report_every == 0 {
            let shown = round
                .value
                .as_deref()
                .map(String::from_utf8_lossy)
                .unwrap_or_else(|| "<empty>".into());
            let _ = writeln!(
                stdout,
                "{}: read {} ({:?}) -> write ({:?})",
                round.index, shown, round.read, round.write
            );
        } else {
            let _ = write!(stdout, ".");
            let _ = stdout.flush();
        }
    })
    .await
    .context("read/write loop failed")?;
    Ok(())
}
