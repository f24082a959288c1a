use std::{path::Path, process::Stdio, time::Duration};

use anyhow::{Context, Result, anyhow};
use serde_json::{Value, json};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    process::{Child, ChildStdout, Command},
    task::JoinHandle,
    time::timeout,
};

const READ_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::test]
async fn three_processes_compute_a_submission() -> Result<()> {
    let binary = assert_cmd::cargo::cargo_bin!("fib_pipeline");
    let data_dir = tempfile::tempdir()?;

    let mut store = spawn_process(
        &binary,
        &[
            "store",
            "--listen",
            "127.0.0.1:0",
            "--data-dir",
            path_arg(data_dir.path())?,
        ],
    )?;
    let store_addr = read_listen_addr(&mut store.stdout, "store").await?;
    let (mut store, store_logs) = store.into_drained();

    // The worker must be subscribed before anything is published.
    let mut worker = spawn_process(&binary, &["worker", "--store", &store_addr])?;
    wait_for_line(&mut worker.stdout, "worker subscribed").await?;
    let (mut worker, worker_logs) = worker.into_drained();

    let mut api = spawn_process(
        &binary,
        &["api", "--listen", "127.0.0.1:0", "--store", &store_addr],
    )?;
    let api_addr = read_listen_addr(&mut api.stdout, "api").await?;
    let (mut api, api_logs) = api.into_drained();
    let base = format!("http://{api_addr}");

    let http = reqwest::Client::new();

    let accepted = http
        .post(format!("{base}/values"))
        .json(&json!({ "index": 10 }))
        .send()
        .await?;
    assert_eq!(accepted.status(), reqwest::StatusCode::ACCEPTED);
    assert_eq!(accepted.json::<Value>().await?, json!({ "working": true }));

    let rejected = http
        .post(format!("{base}/values"))
        .json(&json!({ "index": 41 }))
        .send()
        .await?;
    assert_eq!(rejected.status(), reqwest::StatusCode::UNPROCESSABLE_ENTITY);

    let value = poll_value(&http, &base, "10").await?;
    assert_eq!(value, "89");

    let all: Value = http
        .get(format!("{base}/values/all"))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(all, json!([{ "number": 10 }]));

    // The CLI client reads the same history back.
    let output = Command::new(&binary)
        .args(["client", "--api-url", &base, "all"])
        .env("RUST_LOG", "warn")
        .output()
        .await
        .context("failed to run client")?;
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(
        stdout.lines().any(|line| line == "indexes seen: 10"),
        "unexpected client output: {stdout}"
    );

    for process in [&mut api, &mut worker, &mut store] {
        let _ = process.kill().await;
        let _ = process.wait().await;
    }
    for logs in [api_logs, worker_logs, store_logs] {
        let _ = logs.await;
    }

    Ok(())
}

#[tokio::test]
async fn api_gives_up_when_store_never_appears() -> Result<()> {
    let binary = assert_cmd::cargo::cargo_bin!("fib_pipeline");

    // Reserve a port and release it so nothing is listening there.
    let probe = std::net::TcpListener::bind("127.0.0.1:0")?;
    let addr = probe.local_addr()?.to_string();
    drop(probe);

    let status = Command::new(&binary)
        .args(["api", "--store", &addr, "--connect-attempts", "2"])
        .env("RUST_LOG", "warn")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
    let status = timeout(READ_TIMEOUT, status).await??;
    assert!(!status.success());
    Ok(())
}

struct Process {
    child: Child,
    stdout: BufReader<ChildStdout>,
}

impl Process {
    /// Hands stdout to a background task so the pipe never fills.
    fn into_drained(self) -> (Child, JoinHandle<()>) {
        let Process { child, stdout } = self;
        (child, tokio::spawn(drain_stdout(stdout)))
    }
}

fn spawn_process(binary: &Path, args: &[&str]) -> Result<Process> {
    let mut child = Command::new(binary)
        .args(args)
        .env("RUST_LOG", "info")
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("failed to spawn {args:?}"))?;
    let stdout = child
        .stdout
        .take()
        .context("stdout missing after spawn")?;
    Ok(Process {
        child,
        stdout: BufReader::new(stdout),
    })
}

fn path_arg(path: &Path) -> Result<&str> {
    path.to_str().context("temp dir is not valid UTF-8")
}

async fn read_listen_addr(reader: &mut BufReader<ChildStdout>, role: &str) -> Result<String> {
    let line = wait_for_line(reader, &format!("{role} listening on")).await?;
    let addr = line
        .split_whitespace()
        .last()
        .context("unexpected banner format")?;
    if !addr.contains(':') {
        return Err(anyhow!("{role} banner missing socket: {line}"));
    }
    Ok(addr.to_string())
}

async fn wait_for_line(reader: &mut BufReader<ChildStdout>, needle: &str) -> Result<String> {
    let search = async {
        let mut line = String::new();
        loop {
            line.clear();
            if reader.read_line(&mut line).await? == 0 {
                return Err(anyhow!("stream closed before '{needle}'"));
            }
            if line.contains(needle) {
                return Ok(line.trim_end_matches(['\r', '\n']).to_string());
            }
        }
    };
    timeout(READ_TIMEOUT, search)
        .await
        .map_err(|_| anyhow!("timed out waiting for '{needle}'"))?
}

async fn poll_value(http: &reqwest::Client, base: &str, index: &str) -> Result<String> {
    for _ in 0..100 {
        let current: Value = http
            .get(format!("{base}/values/current"))
            .send()
            .await?
            .json()
            .await?;
        match current.get(index).and_then(Value::as_str) {
            Some("pending") | None => {}
            Some(value) => return Ok(value.to_string()),
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    Err(anyhow!("index {index} never computed"))
}

async fn drain_stdout(mut reader: BufReader<ChildStdout>) {
    let mut buffer = String::new();
    while reader
        .read_line(&mut buffer)
        .await
        .map(|bytes| {
            let has_data = bytes > 0;
            if has_data {
                buffer.clear();
            }
            has_data
        })
        .unwrap_or(false)
    {}
}
