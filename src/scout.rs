//! Cycle scheduling: one pass over every rule, once or on a timer.
//!
//! A cycle walks targets and rules in declaration order. Each rule runs
//! fetch, evaluate, cooldown check and dispatch; any failure is logged and
//! recorded against that rule only, and the cycle moves on.
//!
//! Timed mode never overlaps cycles. The next tick is awaited only after the
//! current cycle finishes, and ticks missed in the meantime are skipped.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::cooldown::{CooldownStatus, CooldownTracker};
use crate::dispatcher::{self, ActionRunner, DispatchError};
use crate::fetcher::{FetchError, Fetcher};
use crate::predicate::PredicateError;
use crate::registry::{ConfigError, Registry, Rule, Target};

/// Source of the current time for cooldown decisions.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Stage at which a rule failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureStage {
    /// The HTTP request.
    Fetch,
    /// Predicate evaluation.
    Evaluate,
    /// The action chain.
    Dispatch,
}

/// Why a rule failed in one cycle.
#[derive(Debug, thiserror::Error)]
pub enum RuleError {
    /// Fetching the endpoint failed.
    #[error(transparent)]
    Fetch(#[from] FetchError),
    /// The predicate could not produce a verdict.
    #[error("predicate evaluation failed: {source}")]
    Evaluation {
        /// Underlying predicate error.
        #[source]
        source: PredicateError,
        /// Predicate source text.
        predicate: String,
        /// Response body, lossily decoded.
        body: String,
    },
    /// An action in the chain failed.
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

impl RuleError {
    /// The stage that produced this error.
    pub fn stage(&self) -> FailureStage {
        match self {
            Self::Fetch(_) => FailureStage::Fetch,
            Self::Evaluation { .. } => FailureStage::Evaluate,
            Self::Dispatch(_) => FailureStage::Dispatch,
        }
    }
}

/// What happened to one rule in one cycle.
#[derive(Debug)]
pub enum RuleOutcome {
    /// The predicate returned `false`.
    EvaluatedFalse,
    /// The predicate returned `true` inside the cooldown window.
    Delayed {
        /// End of the window.
        until: DateTime<Utc>,
    },
    /// Every action ran successfully.
    Fired {
        /// Time taken just before the first action.
        fired_at: DateTime<Utc>,
        /// New cooldown expiry.
        until: DateTime<Utc>,
        /// Number of actions run.
        actions_run: usize,
    },
    /// The rule failed at some stage.
    Failed(RuleError),
}

impl RuleOutcome {
    /// Short label for logs and summaries.
    pub fn label(&self) -> &'static str {
        match self {
            Self::EvaluatedFalse => "evaluated-false",
            Self::Delayed { .. } => "delayed",
            Self::Fired { .. } => "fired",
            Self::Failed(_) => "failed",
        }
    }
}

/// Outcome of one rule, with its identity.
#[derive(Debug)]
pub struct RuleReport {
    /// Target label.
    pub target: String,
    /// Rule id.
    pub rule: String,
    /// What happened.
    pub outcome: RuleOutcome,
}

/// All rule outcomes of one cycle, in declaration order.
#[derive(Debug)]
pub struct CycleReport {
    /// Correlation id shared by every log line of the cycle.
    pub cycle_id: Uuid,
    /// Per-rule outcomes.
    pub rules: Vec<RuleReport>,
}

impl CycleReport {
    fn count(&self, label: &str) -> usize {
        self.rules
            .iter()
            .filter(|r| r.outcome.label() == label)
            .count()
    }

    /// Rules whose actions all ran.
    pub fn fired(&self) -> usize {
        self.count("fired")
    }

    /// Rules suppressed by cooldown.
    pub fn delayed(&self) -> usize {
        self.count("delayed")
    }

    /// Rules whose predicate was false.
    pub fn evaluated_false(&self) -> usize {
        self.count("evaluated-false")
    }

    /// Rules that failed.
    pub fn failed(&self) -> usize {
        self.count("failed")
    }

    /// The outcome recorded for a rule id.
    pub fn outcome(&self, rule_id: &str) -> Option<&RuleOutcome> {
        self.rules
            .iter()
            .find(|r| r.rule == rule_id)
            .map(|r| &r.outcome)
    }
}

/// Runs cycles over a registry.
pub struct Scout {
    fetcher: Arc<dyn Fetcher>,
    runner: Arc<dyn ActionRunner>,
    clock: Clock,
}

impl Scout {
    /// A scout using the wall clock.
    pub fn new(fetcher: Arc<dyn Fetcher>, runner: Arc<dyn ActionRunner>) -> Self {
        Self {
            fetcher,
            runner,
            clock: Arc::new(Utc::now),
        }
    }

    /// Replace the clock used for cooldown decisions.
    #[must_use]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Run one pass over every rule.
    ///
    /// Rule failures are recorded in the report and never abort the cycle.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::EmptyRegistry`] when there is nothing to check.
    pub async fn run_cycle(
        &self,
        registry: &Registry,
        cooldowns: &mut CooldownTracker,
    ) -> Result<CycleReport, ConfigError> {
        if registry.is_empty() {
            return Err(ConfigError::EmptyRegistry);
        }

        let cycle_id = Uuid::new_v4();
        let span = info_span!("cycle", cycle_id = %cycle_id);
        let report = async move {
            let mut rules = Vec::with_capacity(registry.rule_count());
            for (target, rule) in registry.rules() {
                let label = target.label();
                let rule_span = info_span!(
                    "rule",
                    endpoint = %label,
                    rule = %rule.id,
                    description = %rule.description
                );
                let outcome = self
                    .process_rule(target, rule, cooldowns)
                    .instrument(rule_span)
                    .await;
                rules.push(RuleReport {
                    target: label,
                    rule: rule.id.clone(),
                    outcome,
                });
            }

            let report = CycleReport { cycle_id, rules };
            info!(
                fired = report.fired(),
                delayed = report.delayed(),
                evaluated_false = report.evaluated_false(),
                failed = report.failed(),
                "cycle complete"
            );
            report
        }
        .instrument(span)
        .await;
        Ok(report)
    }

    async fn process_rule(
        &self,
        target: &Target,
        rule: &Rule,
        cooldowns: &mut CooldownTracker,
    ) -> RuleOutcome {
        info!(url = %rule.request.url, "processing");

        let body = match self.fetcher.fetch(target, rule).await {
            Ok(body) => body,
            Err(e) => return fail(e.into()),
        };

        let verdict = match rule.predicate.evaluate(&body) {
            Ok(verdict) => verdict,
            Err(source) => {
                let body = String::from_utf8_lossy(&body).into_owned();
                debug!(predicate = %rule.predicate.source(), body = %body, "evaluation context");
                return fail(RuleError::Evaluation {
                    source,
                    predicate: rule.predicate.source().to_owned(),
                    body,
                });
            }
        };

        if !verdict {
            info!("evaluated false");
            return RuleOutcome::EvaluatedFalse;
        }
        info!("evaluated true");

        if let CooldownStatus::Suppressed { until } = cooldowns.check(&rule.id, (self.clock)()) {
            info!(until = %until, "delayed");
            return RuleOutcome::Delayed { until };
        }

        let fired_at = (self.clock)();
        let result = dispatcher::dispatch(self.runner.as_ref(), &rule.actions).await;
        // A partially failed chain still starts the window.
        let until = cooldowns.arm(&rule.id, rule.cooldown, fired_at);

        match result {
            Ok(actions_run) => {
                info!(actions_run, until = %until, "fired");
                RuleOutcome::Fired {
                    fired_at,
                    until,
                    actions_run,
                }
            }
            Err(e) => fail(e.into()),
        }
    }

    /// Run cycles every `period` until `shutdown_rx` flips to `true` or its
    /// sender is dropped. The first cycle starts immediately.
    ///
    /// A cycle in progress when shutdown arrives runs to completion. Returns
    /// the number of cycles started.
    pub async fn run_scheduled(
        &self,
        registry: &Registry,
        cooldowns: &mut CooldownTracker,
        period: Duration,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> u64 {
        let interval_ms = u64::try_from(period.as_millis()).unwrap_or(u64::MAX);
        info!(interval_ms, rules = registry.rule_count(), "scout started");

        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut cycles: u64 = 0;

        while !*shutdown_rx.borrow() {
            tokio::select! {
                biased;
                result = shutdown_rx.changed() => {
                    if result.is_err() {
                        break;
                    }
                }
                _ = interval.tick() => {
                    cycles = cycles.saturating_add(1);
                    if let Err(e) = self.run_cycle(registry, cooldowns).await {
                        error!(error = %e, "cycle aborted");
                    }
                }
            }
        }

        info!(cycles, "scout stopped");
        cycles
    }
}

fn fail(error: RuleError) -> RuleOutcome {
    warn!(stage = ?error.stage(), error = %error, "rule failed");
    RuleOutcome::Failed(error)
}
