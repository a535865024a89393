//! Proxy-aware command execution with retry and direct fallback
//!
//! One call walks an explicit state machine:
//!
//! ```text
//! Start ─┬─ Direct ─────────────────────────────────────────┬─ Success
//!        ├─ StaticProxy ─ (DirectFallback) ─────────────────┤
//!        └─ ProxyAttempt(1..=max) ─┬─ NoProxyDirect ────────┤
//!                                  └─ DirectFallback ───────┴─ FinalFailure
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use super::runner::{CommandRunner, ToolCommand};
use crate::config::{ProxyConfig, StaticProxyConfig};
use crate::error::{GateError, Result};
use crate::proxy::{ProxyCandidate, ProxyPool};

/// How outbound tool invocations are routed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProxyMode {
    /// Always run directly
    Disabled,
    /// Always use one fixed proxy, optionally retrying directly
    Static {
        proxy: StaticProxyConfig,
        fallback_direct: bool,
    },
    /// Rotate through the public proxy pool
    Rotating,
}

impl ProxyMode {
    /// A static proxy takes precedence over the rotating pool.
    pub fn from_config(config: &ProxyConfig) -> Self {
        match &config.static_proxy {
            Some(proxy) => ProxyMode::Static {
                proxy: proxy.clone(),
                fallback_direct: config.static_fallback_direct,
            },
            None if config.enabled => ProxyMode::Rotating,
            None => ProxyMode::Disabled,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProxyMode::Disabled => "disabled",
            ProxyMode::Static { .. } => "static",
            ProxyMode::Rotating => "rotating",
        }
    }
}

/// Executor tuning
#[derive(Clone, Debug)]
pub struct ExecutorConfig {
    /// Proxied attempts before falling back to a direct run
    pub max_retries: u32,
    /// Timeout for direct runs
    pub direct_timeout: Duration,
    /// Timeout for proxied runs
    pub proxied_timeout: Duration,
    /// Working-set size below which the pool is refreshed
    pub min_working: usize,
    /// Number of live proxies a refresh looks for
    pub refresh_target: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            direct_timeout: Duration::from_secs(120),
            proxied_timeout: Duration::from_secs(60),
            min_working: 2,
            refresh_target: 5,
        }
    }
}

/// Outcome of one tool run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success,
    Failure(String),
}

/// Record of one tool run inside an `execute` call
#[derive(Debug, Clone)]
pub struct ExecutionAttempt {
    pub number: u32,
    /// Log-safe proxy URL, `None` for direct runs
    pub proxy: Option<String>,
    pub outcome: AttemptOutcome,
}

impl fmt::Display for ExecutionAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let via = self.proxy.as_deref().unwrap_or("direct");
        match &self.outcome {
            AttemptOutcome::Success => write!(f, "#{} via {}: ok", self.number, via),
            AttemptOutcome::Failure(e) => write!(f, "#{} via {}: {}", self.number, via, e),
        }
    }
}

enum Step<'a> {
    Start,
    Direct,
    StaticProxy(&'a StaticProxyConfig, bool),
    ProxyAttempt(u32),
    NoProxyDirect,
    DirectFallback,
    Success(String),
    FinalFailure(GateError),
}

/// Runs tool commands according to the configured [`ProxyMode`]
pub struct ResilientExecutor {
    mode: ProxyMode,
    config: ExecutorConfig,
    pool: Arc<ProxyPool>,
    runner: Arc<dyn CommandRunner>,
}

impl ResilientExecutor {
    pub fn new(
        mode: ProxyMode,
        config: ExecutorConfig,
        pool: Arc<ProxyPool>,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        Self {
            mode,
            config,
            pool,
            runner,
        }
    }

    pub fn mode(&self) -> &ProxyMode {
        &self.mode
    }

    pub fn pool(&self) -> &Arc<ProxyPool> {
        &self.pool
    }

    /// Proxy for a one-shot streaming invocation that cannot be retried.
    pub fn stream_proxy(&self) -> Option<String> {
        match &self.mode {
            ProxyMode::Disabled => None,
            ProxyMode::Static { proxy, .. } => Some(proxy.url.clone()),
            ProxyMode::Rotating => self.pool.next().map(|p| p.proxy_url()),
        }
    }

    /// Run `command` for `target_url`, returning its stdout.
    ///
    /// With proxying disabled a failure is returned unchanged; otherwise the most recent
    /// recorded failure is wrapped in [`GateError::ExecutionFailed`].
    #[instrument(skip(self, command), fields(mode = self.mode.as_str()))]
    pub async fn execute(&self, command: &ToolCommand, target_url: &str) -> Result<String> {
        let mut attempts: Vec<ExecutionAttempt> = Vec::new();
        let mut last_error: Option<GateError> = None;
        let mut step = Step::Start;

        loop {
            step = match step {
                Step::Start => match &self.mode {
                    ProxyMode::Disabled => Step::Direct,
                    ProxyMode::Static {
                        proxy,
                        fallback_direct,
                    } => Step::StaticProxy(proxy, *fallback_direct),
                    ProxyMode::Rotating => {
                        self.pool
                            .ensure_working(self.config.min_working, self.config.refresh_target)
                            .await;
                        Step::ProxyAttempt(1)
                    }
                },

                Step::Direct => {
                    info!("Executing without proxy: {}", target_url);
                    match self.direct(command, &mut attempts).await {
                        Ok(output) => Step::Success(output),
                        Err(e) => Step::FinalFailure(e),
                    }
                }

                Step::StaticProxy(proxy, fallback_direct) => {
                    info!("Executing with static proxy {}: {}", proxy.redacted(), target_url);
                    let proxied = command.with_proxy(&proxy.url);
                    match self
                        .attempt(
                            &proxied,
                            Some(proxy.redacted()),
                            self.config.proxied_timeout,
                            &mut attempts,
                        )
                        .await
                    {
                        Ok(output) => Step::Success(output),
                        Err(e) => {
                            warn!("Static proxy {} failed: {}", proxy.redacted(), e);
                            if fallback_direct {
                                last_error = Some(e);
                                Step::DirectFallback
                            } else {
                                Step::FinalFailure(exhausted(&attempts, e))
                            }
                        }
                    }
                }

                Step::ProxyAttempt(n) if n > self.config.max_retries => Step::DirectFallback,

                Step::ProxyAttempt(n) => match self.pool.next() {
                    None => Step::NoProxyDirect,
                    Some(proxy) => {
                        info!(
                            "Attempt {}/{} with proxy {}: {}",
                            n, self.config.max_retries, proxy, target_url
                        );
                        match self.proxied(command, &proxy, &mut attempts).await {
                            Ok(output) => {
                                info!("Success with proxy {}", proxy);
                                Step::Success(output)
                            }
                            Err(e) => {
                                warn!("Proxy {} failed: {}", proxy, e);
                                self.pool.mark_bad(&proxy);
                                last_error = Some(e);

                                self.pool
                                    .ensure_working(
                                        self.config.min_working,
                                        self.config.refresh_target,
                                    )
                                    .await;
                                Step::ProxyAttempt(n + 1)
                            }
                        }
                    }
                },

                // The direct run here stands in for the final fallback, so it is not repeated.
                Step::NoProxyDirect => {
                    info!("No proxies available, trying without proxy...");
                    match self.direct(command, &mut attempts).await {
                        Ok(output) => Step::Success(output),
                        Err(e) => Step::FinalFailure(exhausted(&attempts, e)),
                    }
                }

                Step::DirectFallback => {
                    info!("All proxies failed, trying without proxy...");
                    match self.direct(command, &mut attempts).await {
                        Ok(output) => Step::Success(output),
                        Err(e) => {
                            let last = last_error.take().unwrap_or(e);
                            Step::FinalFailure(exhausted(&attempts, last))
                        }
                    }
                }

                Step::Success(output) => {
                    debug!("Execution succeeded after {} attempt(s)", attempts.len());
                    return Ok(output);
                }

                Step::FinalFailure(err) => {
                    warn!(
                        "Execution for {} failed after {} attempt(s): {}",
                        target_url,
                        attempts.len(),
                        err
                    );
                    for attempt in &attempts {
                        debug!("  {}", attempt);
                    }
                    return Err(err);
                }
            };
        }
    }

    async fn direct(
        &self,
        command: &ToolCommand,
        attempts: &mut Vec<ExecutionAttempt>,
    ) -> Result<String> {
        self.attempt(command, None, self.config.direct_timeout, attempts)
            .await
    }

    async fn proxied(
        &self,
        command: &ToolCommand,
        proxy: &ProxyCandidate,
        attempts: &mut Vec<ExecutionAttempt>,
    ) -> Result<String> {
        let proxy_url = proxy.proxy_url();
        self.attempt(
            &command.with_proxy(&proxy_url),
            Some(proxy_url),
            self.config.proxied_timeout,
            attempts,
        )
        .await
    }

    async fn attempt(
        &self,
        command: &ToolCommand,
        proxy: Option<String>,
        limit: Duration,
        attempts: &mut Vec<ExecutionAttempt>,
    ) -> Result<String> {
        let result = self.runner.run(command, limit).await;
        attempts.push(ExecutionAttempt {
            number: attempts.len() as u32 + 1,
            proxy,
            outcome: match &result {
                Ok(_) => AttemptOutcome::Success,
                Err(e) => AttemptOutcome::Failure(e.to_string()),
            },
        });
        result
    }
}

fn exhausted(attempts: &[ExecutionAttempt], last: GateError) -> GateError {
    GateError::ExecutionFailed {
        attempts: attempts.len() as u32,
        last: Box::new(last),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StaticProxyProtocol;
    use crate::proxy::pool::tests::test_pool;
    use crate::proxy::sources::tests::StaticFetcher;
    use crate::proxy::{ProxyPoolConfig, ProxyProber, SourceAggregator};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    type Script = Box<dyn Fn(&ToolCommand) -> Result<String> + Send + Sync>;

    /// Records every command and answers according to `script`.
    struct FakeRunner {
        calls: Mutex<Vec<ToolCommand>>,
        script: Script,
    }

    impl FakeRunner {
        fn new(
            script: impl Fn(&ToolCommand) -> Result<String> + Send + Sync + 'static,
        ) -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
                script: Box::new(script),
            })
        }

        fn proxies_used(&self) -> Vec<Option<String>> {
            self.calls
                .lock()
                .iter()
                .map(|c| c.proxy().map(str::to_string))
                .collect()
        }
    }

    #[async_trait]
    impl CommandRunner for FakeRunner {
        async fn run(&self, command: &ToolCommand, _limit: Duration) -> Result<String> {
            self.calls.lock().push(command.clone());
            tokio::task::yield_now().await;
            (self.script)(command)
        }
    }

    fn command() -> ToolCommand {
        ToolCommand::new("yt-dlp").args(["-J", "https://www.youtube.com/watch?v=dQw4w9WgXcQ"])
    }

    const TARGET: &str = "https://www.youtube.com/watch?v=dQw4w9WgXcQ";

    fn executor(mode: ProxyMode, pool: ProxyPool, runner: Arc<FakeRunner>) -> ResilientExecutor {
        ResilientExecutor::new(mode, ExecutorConfig::default(), Arc::new(pool), runner)
    }

    #[tokio::test]
    async fn test_disabled_mode_runs_once_directly() {
        let pool = test_pool(true, "1.2.3.4:8080", &["1.2.3.4:8080"]);
        let runner = FakeRunner::new(|_| Ok("{}".to_string()));
        let exec = executor(ProxyMode::Disabled, pool, runner.clone());

        assert_eq!(exec.execute(&command(), TARGET).await.unwrap(), "{}");
        assert_eq!(runner.proxies_used(), vec![None]);
        // The pool was never consulted.
        assert_eq!(exec.pool().candidate_count(), 0);
        assert!(exec.pool().status().last_fetch.is_none());
    }

    #[tokio::test]
    async fn test_disabled_mode_propagates_failure_as_is() {
        let pool = test_pool(false, "", &[]);
        let runner = FakeRunner::new(|_| Err(GateError::CommandFailed("boom".into())));
        let exec = executor(ProxyMode::Disabled, pool, runner.clone());

        let err = exec.execute(&command(), TARGET).await.unwrap_err();
        assert!(matches!(err, GateError::CommandFailed(ref m) if m == "boom"));
        assert_eq!(runner.calls.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_first_proxy_success_short_circuits() {
        let pool = test_pool(true, "", &[]);
        pool.seed(&["1.2.3.4:8080"], &["1.2.3.4:8080", "5.6.7.8:3128"]);
        let runner = FakeRunner::new(|_| Ok("ok".to_string()));
        let exec = executor(ProxyMode::Rotating, pool, runner.clone());

        assert_eq!(exec.execute(&command(), TARGET).await.unwrap(), "ok");
        assert_eq!(
            runner.proxies_used(),
            vec![Some("http://1.2.3.4:8080".to_string())]
        );
        assert_eq!(exec.pool().working_count(), 2);
    }

    #[tokio::test]
    async fn test_failed_proxy_is_demoted_and_next_one_used() {
        let pool = test_pool(true, "1.2.3.4:8080\n5.6.7.8:3128", &["5.6.7.8:3128"]);
        pool.seed(
            &["1.2.3.4:8080", "5.6.7.8:3128"],
            &["1.2.3.4:8080", "5.6.7.8:3128"],
        );
        let runner = FakeRunner::new(|cmd| match cmd.proxy() {
            Some("http://1.2.3.4:8080") => Err(GateError::CommandFailed("proxy refused".into())),
            _ => Ok("payload".to_string()),
        });
        let exec = executor(ProxyMode::Rotating, pool, runner.clone());

        assert_eq!(exec.execute(&command(), TARGET).await.unwrap(), "payload");
        assert_eq!(
            runner.proxies_used(),
            vec![
                Some("http://1.2.3.4:8080".to_string()),
                Some("http://5.6.7.8:3128".to_string()),
            ]
        );
        assert_eq!(
            exec.pool().working_proxies(),
            vec![ProxyCandidate::parse("5.6.7.8:3128").unwrap()]
        );
    }

    #[tokio::test]
    async fn test_retry_bound_then_single_direct_fallback() {
        let live = ["10.0.0.1:80", "10.0.0.2:80", "10.0.0.3:80", "10.0.0.4:80", "10.0.0.5:80"];
        let pool = test_pool(true, &live.join("\n"), &live);
        pool.seed(&live, &live);
        let runner = FakeRunner::new(|cmd| {
            Err(GateError::CommandFailed(format!(
                "failed via {}",
                cmd.proxy().unwrap_or("direct")
            )))
        });
        let exec = executor(ProxyMode::Rotating, pool, runner.clone());

        let err = exec.execute(&command(), TARGET).await.unwrap_err();

        let used = runner.proxies_used();
        assert_eq!(used.len(), 4);
        assert!(used[..3].iter().all(Option::is_some));
        assert_eq!(used[3], None);

        // The last proxied failure wins over the direct one.
        match err {
            GateError::ExecutionFailed { attempts, last } => {
                assert_eq!(attempts, 4);
                assert_eq!(last.to_string(), "Command failed: failed via http://10.0.0.3:80");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_dead_candidates_fall_through_to_one_direct_run() {
        let pool = test_pool(true, "1.2.3.4:8080\n5.6.7.8:3128", &[]);
        let runner = FakeRunner::new(|_| Err(GateError::CommandFailed("direct failed".into())));
        let exec = executor(ProxyMode::Rotating, pool, runner.clone());

        let err = exec.execute(&command(), TARGET).await.unwrap_err();

        assert_eq!(runner.proxies_used(), vec![None]);
        match err {
            GateError::ExecutionFailed { attempts, last } => {
                assert_eq!(attempts, 1);
                assert!(last.to_string().contains("direct failed"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(exec.pool().candidate_count(), 2);
    }

    #[tokio::test]
    async fn test_empty_sources_single_direct_success() {
        let pool = test_pool(true, "", &[]);
        let runner = FakeRunner::new(|_| Ok("direct output".to_string()));
        let exec = executor(ProxyMode::Rotating, pool, runner.clone());

        assert_eq!(exec.execute(&command(), TARGET).await.unwrap(), "direct output");
        assert_eq!(runner.proxies_used(), vec![None]);

        let status = exec.pool().status();
        assert_eq!(status.total_candidates, 0);
        assert_eq!(status.working_count, 0);
    }

    #[tokio::test]
    async fn test_pool_drained_midway_falls_back_directly() {
        let pool = test_pool(true, "1.2.3.4:8080\n5.6.7.8:3128", &[]);
        pool.seed(
            &["1.2.3.4:8080", "5.6.7.8:3128"],
            &["1.2.3.4:8080", "5.6.7.8:3128"],
        );
        let runner = FakeRunner::new(|cmd| match cmd.proxy() {
            Some(_) => Err(GateError::CommandFailed("proxy refused".into())),
            None => Ok("direct".to_string()),
        });
        let exec = executor(ProxyMode::Rotating, pool, runner.clone());

        assert_eq!(exec.execute(&command(), TARGET).await.unwrap(), "direct");
        // One proxied failure empties the pool on refresh, then one direct run.
        assert_eq!(
            runner.proxies_used(),
            vec![Some("http://1.2.3.4:8080".to_string()), None]
        );
        assert_eq!(exec.pool().working_count(), 0);
    }

    /// Live set prober that counts calls and yields so concurrent refreshes can interleave.
    struct CountingProber {
        live: Vec<String>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ProxyProber for CountingProber {
        async fn probe(&self, candidate: &ProxyCandidate) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            self.live.iter().any(|l| l == candidate.as_str())
        }
    }

    #[tokio::test]
    async fn test_concurrent_demotions_share_one_refresh() {
        let live = ["10.0.0.1:80", "10.0.0.2:80", "10.0.0.3:80", "10.0.0.4:80", "10.0.0.5:80"];
        let list = live.join("\n");
        let prober = Arc::new(CountingProber {
            live: live.iter().map(|s| s.to_string()).collect(),
            calls: AtomicUsize::new(0),
        });
        let pool = ProxyPool::new(
            ProxyPoolConfig {
                enabled: true,
                ..ProxyPoolConfig::default()
            },
            SourceAggregator::new(
                Arc::new(StaticFetcher::new(&[("http://list.test/http.txt", list.as_str())])),
                vec!["http://list.test/http.txt".to_string()],
            ),
            prober.clone(),
        );
        pool.seed(&live, &["1.1.1.1:80", "2.2.2.2:80"]);

        let runner = FakeRunner::new(|cmd| match cmd.proxy() {
            Some("http://1.1.1.1:80") | Some("http://2.2.2.2:80") => {
                Err(GateError::CommandFailed("proxy refused".into()))
            }
            _ => Ok("ok".to_string()),
        });
        let exec = executor(ProxyMode::Rotating, pool, runner.clone());

        let (cmd_a, cmd_b) = (command(), command());
        let (a, b) = tokio::join!(
            exec.execute(&cmd_a, TARGET),
            exec.execute(&cmd_b, TARGET)
        );

        assert_eq!(a.unwrap(), "ok");
        assert_eq!(b.unwrap(), "ok");
        // The second demotion finds the set already refilled and does not probe again.
        assert_eq!(prober.calls.load(Ordering::SeqCst), live.len());
        assert_eq!(runner.calls.lock().len(), 4);
    }

    fn static_mode(fallback_direct: bool) -> ProxyMode {
        ProxyMode::Static {
            proxy: StaticProxyConfig {
                protocol: StaticProxyProtocol::Http,
                url: "http://egress.example:3128".to_string(),
            },
            fallback_direct,
        }
    }

    #[tokio::test]
    async fn test_static_proxy_falls_back_directly() {
        let pool = test_pool(true, "1.2.3.4:8080", &["1.2.3.4:8080"]);
        let runner = FakeRunner::new(|cmd| match cmd.proxy() {
            Some(_) => Err(GateError::CommandFailed("Unable to connect to proxy".into())),
            None => Ok("direct".to_string()),
        });
        let exec = executor(static_mode(true), pool, runner.clone());

        assert_eq!(exec.execute(&command(), TARGET).await.unwrap(), "direct");
        assert_eq!(
            runner.proxies_used(),
            vec![Some("http://egress.example:3128".to_string()), None]
        );
        assert_eq!(exec.pool().candidate_count(), 0);
    }

    #[tokio::test]
    async fn test_static_proxy_without_fallback_fails_once() {
        let pool = test_pool(false, "", &[]);
        let runner = FakeRunner::new(|_| {
            Err(GateError::CommandFailed("Unable to connect to proxy".into()))
        });
        let exec = executor(static_mode(false), pool, runner.clone());

        let err = exec.execute(&command(), TARGET).await.unwrap_err();
        assert_eq!(runner.calls.lock().len(), 1);
        assert_eq!(err.client_message(), "Upstream request blocked by proxy.");
    }

    #[tokio::test]
    async fn test_stream_proxy_per_mode() {
        let runner = FakeRunner::new(|_| Ok(String::new()));

        let exec = executor(ProxyMode::Disabled, test_pool(false, "", &[]), runner.clone());
        assert_eq!(exec.stream_proxy(), None);

        let exec = executor(static_mode(true), test_pool(false, "", &[]), runner.clone());
        assert_eq!(exec.stream_proxy().as_deref(), Some("http://egress.example:3128"));

        let pool = test_pool(true, "", &[]);
        pool.seed(&[], &["1.2.3.4:8080"]);
        let exec = executor(ProxyMode::Rotating, pool, runner);
        assert_eq!(exec.stream_proxy().as_deref(), Some("http://1.2.3.4:8080"));
    }

    #[test]
    fn test_attempt_display_names_route_and_outcome() {
        let proxied = ExecutionAttempt {
            number: 1,
            proxy: Some("http://1.2.3.4:8080".to_string()),
            outcome: AttemptOutcome::Failure("Command failed: refused".to_string()),
        };
        let direct = ExecutionAttempt {
            number: 2,
            proxy: None,
            outcome: AttemptOutcome::Success,
        };
        assert_eq!(
            proxied.to_string(),
            "#1 via http://1.2.3.4:8080: Command failed: refused"
        );
        assert_eq!(direct.to_string(), "#2 via direct: ok");
    }

    #[test]
    fn test_mode_from_config() {
        use crate::config::ProbeMethod;

        let mut config = ProxyConfig {
            enabled: false,
            static_proxy: None,
            static_fallback_direct: true,
            max_retries: 3,
            probe: ProbeMethod::Connect,
            refresh_interval: Duration::from_secs(600),
        };
        assert_eq!(ProxyMode::from_config(&config), ProxyMode::Disabled);

        config.enabled = true;
        assert_eq!(ProxyMode::from_config(&config), ProxyMode::Rotating);

        config.static_proxy = Some(StaticProxyConfig {
            protocol: StaticProxyProtocol::Socks5,
            url: "socks5://egress.example:1080".to_string(),
        });
        assert_eq!(ProxyMode::from_config(&config).as_str(), "static");
    }
}
