#![allow(dead_code)]

use async_trait::async_trait;
use core_logic::{ConcurrencyLimiter, CooldownStore, ProxyAssignment, ProxyConfig};
use pharos_project::client::{ApiRequest, RawResult, Transport};
use pharos_project::config::PharosConfig;
use pharos_project::faucet::FaucetContext;
use pharos_project::identity::Identity;
use pharos_project::onchain::iterations::{ActionPlanner, IterationReport};
use pharos_project::onchain::OnchainRunner;
use pharos_project::WalletTaskScheduler;
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Login,
    Status,
    Claim,
    Ip,
}

impl Endpoint {
    fn from_url(url: &str) -> Self {
        if url.contains("/user/login") {
            Endpoint::Login
        } else if url.contains("/faucet/status") {
            Endpoint::Status
        } else if url.contains("/faucet/daily") {
            Endpoint::Claim
        } else {
            Endpoint::Ip
        }
    }
}

pub fn jwt_ok() -> RawResult {
    RawResult::ok(r#"{"code":0,"data":{"jwt":"test-jwt"},"msg":"ok"}"#)
}

pub fn status_able() -> RawResult {
    RawResult::ok(r#"{"code":0,"data":{"avaliable_timestamp":0,"is_able_to_faucet":true},"msg":"ok"}"#)
}

pub fn claim_ok() -> RawResult {
    RawResult::ok(r#"{"code":0,"msg":"ok"}"#)
}

pub fn claim_unbound() -> RawResult {
    RawResult::ok(r#"{"code":1,"msg":"user has not bound X account"}"#)
}

pub fn claim_already() -> RawResult {
    RawResult::ok(r#"{"code":1,"msg":"faucet did not cooldown"}"#)
}

/// Replays per-address scripts for each endpoint, falling back to a happy
/// default once a script runs dry.
pub struct ScriptedTransport {
    scripts: Mutex<HashMap<(Endpoint, String), VecDeque<RawResult>>>,
    calls: Mutex<Vec<(Endpoint, String)>>,
    latency: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    per_endpoint: Mutex<HashMap<Endpoint, (usize, usize)>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            latency: Duration::ZERO,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            per_endpoint: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn script(&self, endpoint: Endpoint, address: &str, replies: Vec<RawResult>) {
        self.scripts
            .lock()
            .unwrap()
            .insert((endpoint, address.to_lowercase()), replies.into());
    }

    pub fn calls_to(&self, endpoint: Endpoint, address: &str) -> usize {
        let address = address.to_lowercase();
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(e, a)| *e == endpoint && *a == address)
            .count()
    }

    pub fn total_calls(&self, endpoint: Endpoint) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(e, _)| *e == endpoint)
            .count()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn max_in_flight_to(&self, endpoint: Endpoint) -> usize {
        self.per_endpoint
            .lock()
            .unwrap()
            .get(&endpoint)
            .map_or(0, |(_, max)| *max)
    }

    fn enter(&self, endpoint: Endpoint) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let mut per = self.per_endpoint.lock().unwrap();
        let slot = per.entry(endpoint).or_insert((0, 0));
        slot.0 += 1;
        slot.1 = slot.1.max(slot.0);
    }

    fn leave(&self, endpoint: Endpoint) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        if let Some(slot) = self.per_endpoint.lock().unwrap().get_mut(&endpoint) {
            slot.0 -= 1;
        }
    }

    fn default_reply(endpoint: Endpoint) -> RawResult {
        match endpoint {
            Endpoint::Login => jwt_ok(),
            Endpoint::Status => status_able(),
            Endpoint::Claim => claim_ok(),
            Endpoint::Ip => RawResult::ok(r#"{"ip":"127.0.0.1"}"#),
        }
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: &ApiRequest, _proxy: Option<&ProxyConfig>) -> RawResult {
        let endpoint = Endpoint::from_url(&request.url);
        let address = request
            .query
            .iter()
            .find(|(k, _)| k == "address")
            .map(|(_, v)| v.to_lowercase())
            .unwrap_or_default();

        self.calls.lock().unwrap().push((endpoint, address.clone()));

        self.enter(endpoint);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.leave(endpoint);

        let scripted = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&(endpoint, address))
            .and_then(VecDeque::pop_front);
        scripted.unwrap_or_else(|| Self::default_reply(endpoint))
    }
}

/// Records which identities reached the on-chain stage.
pub struct FakeOnchain {
    pub report: IterationReport,
    pub calls: Mutex<Vec<String>>,
}

impl FakeOnchain {
    pub fn succeeding() -> Self {
        Self {
            report: IterationReport {
                completed: 1,
                succeeded: 1,
                attempts_used: 1,
                ..IterationReport::default()
            },
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl OnchainRunner for FakeOnchain {
    async fn run(
        &self,
        identity: &Identity,
        _index: usize,
        _proxy: Option<&ProxyConfig>,
        _planner: ActionPlanner,
        _cancel: &CancellationToken,
    ) -> IterationReport {
        self.calls.lock().unwrap().push(identity.address().to_string());
        self.report.clone()
    }
}

pub fn identities(n: usize) -> Vec<Identity> {
    (1..=n)
        .map(|i| Identity::from_str_key(&format!("0x{:064x}", i + 1000)).unwrap())
        .collect()
}

/// Defaults with every pause zeroed and all logs under `dir`.
pub fn test_config(dir: &Path) -> PharosConfig {
    let mut config = PharosConfig::default();
    config.timing.claim_jitter_min_ms = 0;
    config.timing.claim_jitter_max_ms = 0;
    config.timing.iteration_delay_min_ms = 0;
    config.timing.iteration_delay_max_ms = 0;
    config.timing.dispatch_delay_min_ms = 0;
    config.timing.dispatch_delay_max_ms = 0;
    config.timing.extra_cycles = 0;
    config.timing.base_cycles = 1;

    let path = |name: &str| dir.join(name).to_string_lossy().to_string();
    config.files.faucet_success_log = path("success_log/pharos_success.txt");
    config.files.faucet_failure_log = path("failed_log/pharos_failed.txt");
    config.files.onchain_success_log = path("success_log/success.log");
    config.files.onchain_failure_log = path("failed_log/failed_tx.log");
    config
}

pub struct Harness {
    pub transport: Arc<ScriptedTransport>,
    pub onchain: Arc<FakeOnchain>,
    pub ctx: FaucetContext,
    pub scheduler: WalletTaskScheduler,
    pub cancel: CancellationToken,
}

impl Harness {
    pub fn new(config: PharosConfig, transport: ScriptedTransport) -> Self {
        Self::with_onchain(config, transport, FakeOnchain::succeeding())
    }

    pub fn with_onchain(config: PharosConfig, transport: ScriptedTransport, onchain: FakeOnchain) -> Self {
        let transport = Arc::new(transport);
        let onchain = Arc::new(onchain);
        let config = Arc::new(config);
        let ctx = FaucetContext {
            transport: transport.clone(),
            config: config.clone(),
            limiter: ConcurrencyLimiter::new(config.limiter_config()),
            cooldowns: CooldownStore::new(),
        };
        let cancel = CancellationToken::new();
        let scheduler = WalletTaskScheduler::new(
            ctx.clone(),
            onchain.clone(),
            ProxyAssignment::direct(),
            cancel.clone(),
        );
        Self {
            transport,
            onchain,
            ctx,
            scheduler,
            cancel,
        }
    }
}
