use std::{net::SocketAddr, process::Stdio, time::Duration};

use anyhow::{Context, Result, anyhow};
use assert_cmd::Command as CliCommand;
use tokio::{
    io::{AsyncBufReadExt, BufReader, Lines},
    process::{Child, ChildStdout, Command},
    time::timeout,
};

const LOG_TIMEOUT: Duration = Duration::from_secs(5);
const BINARY: &str = env!("CARGO_BIN_EXE_quorum-register");

#[tokio::test]
async fn cli_write_read_and_view_end_to_end() -> Result<()> {
    let (mut replica, mut logs) = spawn_replica().await?;
    let addr = wait_for_listen_addr(&mut logs).await?;

    // The replica keeps logging to its piped stdout; keep consuming it.
    let log_task = tokio::spawn(async move { while let Ok(Some(_)) = logs.next_line().await {} });

    run_client(&["read", "--peer", &addr]).stdout("<empty>\n");
    run_client(&["write", "--peer", &addr, "hello"]).stdout("1\n");
    run_client(&["write", "--peer", &addr, "world"]).stdout("2\n");
    run_client(&["read", "--peer", &addr]).stdout("world\n");
    run_client(&["view", "--seed", &addr]).stdout(format!("{addr}\n"));

    let _ = replica.kill().await;
    let _ = replica.wait().await;
    let _ = log_task.await;

    Ok(())
}

#[test]
fn read_without_replicas_fails() {
    CliCommand::cargo_bin("quorum-register")
        .expect("binary built")
        .args(["read", "--peer", "127.0.0.1:1", "--request-timeout-ms", "200"])
        .env("RUST_LOG", "off")
        .assert()
        .failure();
}

fn run_client(args: &[&str]) -> assert_cmd::assert::Assert {
    CliCommand::cargo_bin("quorum-register")
        .expect("binary built")
        .args(args)
        .env("RUST_LOG", "off")
        .assert()
        .success()
}

async fn spawn_replica() -> Result<(Child, Lines<BufReader<ChildStdout>>)> {
    let mut cmd = Command::new(BINARY);
    cmd.arg("serve")
        .arg("--listen")
        .arg("127.0.0.1:0")
        .env("RUST_LOG", "info")
        .env("NO_COLOR", "1")
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    let mut child = cmd.spawn().context("failed to spawn replica")?;
    let stdout = child
        .stdout
        .take()
        .context("replica stdout missing after spawn")?;

    Ok((child, BufReader::new(stdout).lines()))
}

/// Scans the replica's log for the "replica listening on <addr>" line.
async fn wait_for_listen_addr(logs: &mut Lines<BufReader<ChildStdout>>) -> Result<String> {
    loop {
        let line = timeout(LOG_TIMEOUT, logs.next_line())
            .await
            .context("timed out waiting for the replica to start listening")??
            .context("replica exited before announcing its address")?;
        let Some((_, rest)) = line.split_once("replica listening on ") else {
            continue;
        };
        let addr = rest.split_whitespace().next().unwrap_or_default();
        if addr.parse::<SocketAddr>().is_err() {
            return Err(anyhow!("replica announced a bad address: {line}"));
        }
        return Ok(addr.to_string());
    }
}
