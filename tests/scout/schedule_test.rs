//! Timed mode: immediate first cycle, fixed period, clean shutdown.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use watchpost::config::{Config, ConfigFormat};
use watchpost::cooldown::CooldownTracker;
use watchpost::credentials::Credentials;
use watchpost::dispatcher::{ActionError, ActionRunner};
use watchpost::fetcher::{FetchError, Fetcher};
use watchpost::registry::{Action, Registry, Rule, Target};
use watchpost::scout::Scout;

#[derive(Default)]
struct CountingFetcher {
    calls: AtomicUsize,
}

#[async_trait]
impl Fetcher for CountingFetcher {
    async fn fetch(&self, _target: &Target, _rule: &Rule) -> Result<Vec<u8>, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(b"{}".to_vec())
    }
}

struct NoopRunner;

#[async_trait]
impl ActionRunner for NoopRunner {
    async fn run(&self, _action: &Action) -> Result<(), ActionError> {
        Ok(())
    }
}

fn registry() -> Registry {
    let toml = r#"
[[targets]]
host = "localhost"
port = 8080

[[targets.rules]]
id = "tick"
request = { path = "/" }
predicate = "false"
"#;
    let config = match Config::parse(toml, ConfigFormat::Toml) {
        Ok(config) => config,
        Err(err) => panic!("fixture should parse: {err:#}"),
    };
    match Registry::from_config(&config.targets, &Credentials::from_map(BTreeMap::new())) {
        Ok(registry) => registry,
        Err(err) => panic!("fixture should validate: {err}"),
    }
}

#[tokio::test(start_paused = true)]
async fn runs_immediately_then_every_period_until_shutdown() {
    let fetcher = Arc::new(CountingFetcher::default());
    let scout = Scout::new(fetcher.clone(), Arc::new(NoopRunner));
    let registry = registry();
    let mut cooldowns = CooldownTracker::new();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(250)).await;
        let _ = shutdown_tx.send(true);
    });

    let cycles = scout
        .run_scheduled(&registry, &mut cooldowns, Duration::from_millis(100), shutdown_rx)
        .await;

    // Ticks at 0, 100 and 200 ms; shutdown lands at 250 ms.
    assert_eq!(cycles, 3);
    assert_eq!(fetcher.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn shutdown_already_requested_runs_nothing() {
    let fetcher = Arc::new(CountingFetcher::default());
    let scout = Scout::new(fetcher.clone(), Arc::new(NoopRunner));
    let mut cooldowns = CooldownTracker::new();

    let (shutdown_tx, shutdown_rx) = watch::channel(true);
    let cycles = scout
        .run_scheduled(&registry(), &mut cooldowns, Duration::from_millis(100), shutdown_rx)
        .await;
    drop(shutdown_tx);

    assert_eq!(cycles, 0);
    assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn dropped_sender_stops_the_loop() {
    let scout = Scout::new(Arc::new(CountingFetcher::default()), Arc::new(NoopRunner));
    let mut cooldowns = CooldownTracker::new();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    drop(shutdown_tx);
    let cycles = scout
        .run_scheduled(&registry(), &mut cooldowns, Duration::from_millis(100), shutdown_rx)
        .await;
    assert_eq!(cycles, 0);
}

#[tokio::test(start_paused = true)]
async fn empty_registry_is_logged_and_retried() {
    let scout = Scout::new(Arc::new(CountingFetcher::default()), Arc::new(NoopRunner));
    let mut cooldowns = CooldownTracker::new();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(150)).await;
        let _ = shutdown_tx.send(true);
    });
    let cycles = scout
        .run_scheduled(&Registry::default(), &mut cooldowns, Duration::from_millis(100), shutdown_rx)
        .await;
    assert_eq!(cycles, 2);
}
