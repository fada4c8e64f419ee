//! A cycle over real HTTP and real processes.

#![cfg(unix)]

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use watchpost::config::{Config, ConfigFormat};
use watchpost::cooldown::CooldownTracker;
use watchpost::credentials::Credentials;
use watchpost::dispatcher::ProcessRunner;
use watchpost::fetcher::HttpFetcher;
use watchpost::registry::Registry;
use watchpost::scout::{FailureStage, RuleOutcome, Scout};

/// Answer `count` requests with the same response.
async fn serve(status_line: &str, body: &str, count: usize) -> SocketAddr {
    let listener = match TcpListener::bind("127.0.0.1:0").await {
        Ok(listener) => listener,
        Err(err) => panic!("listener should bind: {err}"),
    };
    let addr = match listener.local_addr() {
        Ok(addr) => addr,
        Err(err) => panic!("listener should expose local addr: {err}"),
    };

    let response = format!(
        "HTTP/1.1 {status_line}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    tokio::spawn(async move {
        for _ in 0..count {
            if let Ok((mut socket, _)) = listener.accept().await {
                let mut read_buf = [0_u8; 4096];
                let _ = socket.read(&mut read_buf).await;
                let _ = socket.write_all(response.as_bytes()).await;
            }
        }
    });
    addr
}

fn registry(ok: SocketAddr, failing: SocketAddr, marker: &str) -> Registry {
    let toml = format!(
        r#"
[[targets]]
description = "failing"
host = "{failing_host}"
port = {failing_port}

[[targets.rules]]
id = "down"
request = {{ path = "/api/overview" }}
predicate = "true"

[[targets.rules.actions]]
command = "touch"
args = ["{marker}.down"]

[[targets]]
description = "broker"
host = "{ok_host}"
port = {ok_port}

[[targets.rules]]
id = "backlog"
request = {{ path = "/api/queues" }}
predicate = "sum(map(body, q => q.messages)) > 100"
cooldown_ms = 60000

[[targets.rules.actions]]
command = "touch"
args = ["{marker}"]

[[targets.rules.actions]]
command = "sh"
args = ["-c", "exit 0"]
"#,
        failing_host = failing.ip(),
        failing_port = failing.port(),
        ok_host = ok.ip(),
        ok_port = ok.port(),
    );
    let config = match Config::parse(&toml, ConfigFormat::Toml) {
        Ok(config) => config,
        Err(err) => panic!("fixture should parse: {err:#}"),
    };
    match Registry::from_config(&config.targets, &Credentials::from_map(BTreeMap::new())) {
        Ok(registry) => registry,
        Err(err) => panic!("fixture should validate: {err}"),
    }
}

#[tokio::test]
async fn server_error_on_one_target_does_not_block_another() {
    let failing = serve("500 Internal Server Error", "oops", 1).await;
    let ok = serve("200 OK", r#"[{"messages": 60}, {"messages": 70}]"#, 1).await;
    let dir = tempfile::tempdir().expect("tempdir");
    let marker = dir.path().join("fired");
    let registry = registry(ok, failing, &marker.display().to_string());

    let fetcher = HttpFetcher::new(Duration::from_secs(5)).expect("client");
    let scout = Scout::new(Arc::new(fetcher), Arc::new(ProcessRunner));
    let mut cooldowns = CooldownTracker::new();

    let report = scout
        .run_cycle(&registry, &mut cooldowns)
        .await
        .expect("cycle");

    match report.outcome("down") {
        Some(RuleOutcome::Failed(err)) => assert_eq!(err.stage(), FailureStage::Fetch),
        other => panic!("expected fetch failure, got {other:?}"),
    }
    assert!(matches!(
        report.outcome("backlog"),
        Some(RuleOutcome::Fired { actions_run: 2, .. })
    ));
    assert!(marker.exists());
    assert!(!dir.path().join("fired.down").exists());
    assert!(cooldowns.expiry("backlog").is_some());
    assert!(cooldowns.expiry("down").is_none());
}
