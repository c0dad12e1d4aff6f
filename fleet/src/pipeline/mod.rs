// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The provisioning pipeline
//!
//! The pipeline is an explicit ordered table of named steps behind a common
//! [`Step`] capability.  The executor walks the table forward; when a
//! critical step fails it walks the completed prefix (including the failing
//! step) *backward*, invoking each step's `undo`.  Every step and every undo
//! is idempotent, so the walk is safe to run against partial state — a
//! half-provisioned tenant from a crashed attempt, or a partially-rolled-back
//! one.
//!
//! Steps tagged [`StepMode::BestEffort`] (certificate issuance, the
//! completion notification) have their failures caught and logged right here
//! at the executor boundary; they never trigger rollback.

pub mod compose;
pub mod steps;

use crate::db::model::{Server, Tenant};
use crate::db::DataStore;
use crate::interfaces::certificates::CertificateIssuer;
use crate::interfaces::notify::Notifier;
use crate::interfaces::proxy::ReverseProxy;
use crate::interfaces::runtime::{ContainerRuntime, EnvironmentSpec};
use crate::secrets::TenantCredentials;
use async_trait::async_trait;
use camino::Utf8PathBuf;
use emporos_common::api::external::Error;
use slog::Logger;
use std::sync::Arc;
use std::sync::OnceLock;
use std::time::Duration;

/// Whether a step's failure aborts the pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepMode {
    /// failure aborts the pipeline and triggers rollback
    Critical,
    /// failure is logged and the pipeline continues
    BestEffort,
}

/// One named pipeline step.
///
/// Generic over the context so the executor itself can be exercised with a
/// synthetic context in tests; the provisioning steps are written against
/// [`ProvisionContext`].
#[async_trait]
pub trait Step<C: Send + Sync>: Send + Sync {
    fn name(&self) -> &'static str;

    fn mode(&self) -> StepMode {
        StepMode::Critical
    }

    async fn execute(&self, ctx: &C) -> Result<(), Error>;

    /// Reverse this step's side effects.  Undo must tolerate the step having
    /// only partially executed, and must be a no-op when there is nothing to
    /// clean up.
    async fn undo(&self, _ctx: &C) -> Result<(), anyhow::Error> {
        Ok(())
    }
}

/// Receives step-by-step progress; the worker uses this to keep the job's
/// step cursor current in the database.
#[async_trait]
pub trait StepObserver: Send + Sync {
    async fn step_started(&self, index: usize, name: &str);
}

/// Observer that ignores progress, for callers that don't track a job.
pub struct NullObserver;

#[async_trait]
impl StepObserver for NullObserver {
    async fn step_started(&self, _index: usize, _name: &str) {}
}

/// Walks `steps` in order.  On a critical failure, unwinds everything up to
/// and including the failed step in reverse order and returns the error that
/// started it.
pub async fn execute_steps<C: Send + Sync>(
    log: &Logger,
    ctx: &C,
    steps: &[Arc<dyn Step<C>>],
    observer: &dyn StepObserver,
) -> Result<(), Error> {
    for (i, step) in steps.iter().enumerate() {
        observer.step_started(i, step.name()).await;
        info!(log, "pipeline step starting"; "step" => step.name());
        match step.execute(ctx).await {
            Ok(()) => {
                debug!(log, "pipeline step complete"; "step" => step.name());
            }
            Err(error) if step.mode() == StepMode::BestEffort => {
                warn!(
                    log,
                    "best-effort pipeline step failed (continuing)";
                    "step" => step.name(),
                    "error" => %error,
                );
            }
            Err(error) => {
                error!(
                    log,
                    "pipeline step failed; rolling back";
                    "step" => step.name(),
                    "error" => %error,
                );
                unwind_steps(log, ctx, &steps[..=i]).await;
                return Err(error);
            }
        }
    }
    Ok(())
}

/// Runs the undo of each step in reverse order.  Undo failures are logged
/// and do not stop the walk: the system prefers a clearly-failed,
/// partially-cleaned-up tenant over a silently-stuck one.
pub async fn unwind_steps<C: Send + Sync>(
    log: &Logger,
    ctx: &C,
    completed: &[Arc<dyn Step<C>>],
) {
    for step in completed.iter().rev() {
        debug!(log, "rollback: undoing step"; "step" => step.name());
        if let Err(error) = step.undo(ctx).await {
            warn!(
                log,
                "rollback of step failed (continuing)";
                "step" => step.name(),
                "error" => %error,
            );
        }
    }
}

/// Everything the provisioning steps need, passed explicitly into each run —
/// no global worker state, so multiple workers can run in one process.
pub struct ProvisionContext {
    pub log: Logger,
    pub datastore: Arc<DataStore>,
    pub tenant: Tenant,
    pub server: Server,
    pub workspace_root: Utf8PathBuf,
    pub master_key: [u8; 32],
    pub health_timeout: Duration,
    pub health_poll_interval: Duration,
    pub runtime: Arc<dyn ContainerRuntime>,
    pub proxy: Arc<dyn ReverseProxy>,
    pub certificates: Arc<dyn CertificateIssuer>,
    pub notifier: Arc<dyn Notifier>,
    credentials: OnceLock<TenantCredentials>,
    port: OnceLock<u16>,
}

impl ProvisionContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        log: Logger,
        datastore: Arc<DataStore>,
        tenant: Tenant,
        server: Server,
        workspace_root: Utf8PathBuf,
        master_key: [u8; 32],
        health_timeout: Duration,
        health_poll_interval: Duration,
        runtime: Arc<dyn ContainerRuntime>,
        proxy: Arc<dyn ReverseProxy>,
        certificates: Arc<dyn CertificateIssuer>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        ProvisionContext {
            log,
            datastore,
            tenant,
            server,
            workspace_root,
            master_key,
            health_timeout,
            health_poll_interval,
            runtime,
            proxy,
            certificates,
            notifier,
            credentials: OnceLock::new(),
            port: OnceLock::new(),
        }
    }

    pub fn workspace_dir(&self) -> Utf8PathBuf {
        self.workspace_root.join(self.tenant.id.to_string())
    }

    pub fn environment_spec(&self) -> EnvironmentSpec {
        EnvironmentSpec::new(self.tenant.id, self.workspace_dir())
    }

    pub(crate) fn set_credentials(&self, credentials: TenantCredentials) {
        // A pipeline run executes the credentials step exactly once.
        let _ = self.credentials.set(credentials);
    }

    pub(crate) fn credentials(&self) -> Result<&TenantCredentials, Error> {
        self.credentials.get().ok_or_else(|| {
            Error::internal_error(
                "pipeline ordering bug: credentials not yet generated",
            )
        })
    }

    pub(crate) fn set_port(&self, port: u16) {
        let _ = self.port.set(port);
    }

    pub(crate) fn port(&self) -> Result<u16, Error> {
        self.port.get().copied().ok_or_else(|| {
            Error::internal_error(
                "pipeline ordering bug: port not yet allocated",
            )
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use dropshot::{ConfigLogging, ConfigLoggingLevel};
    use std::sync::Mutex;

    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl Recorder {
        fn new() -> Self {
            Recorder { events: Mutex::new(Vec::new()) }
        }

        fn record(&self, event: &str) {
            self.events.lock().unwrap().push(event.to_string());
        }

        fn events(&self) -> Vec<String> {
            self.events.lock().unwrap().clone()
        }
    }

    struct TestStep {
        name: &'static str,
        mode: StepMode,
        fail: bool,
        fail_undo: bool,
    }

    impl TestStep {
        fn ok(name: &'static str) -> Arc<dyn Step<Recorder>> {
            Arc::new(TestStep {
                name,
                mode: StepMode::Critical,
                fail: false,
                fail_undo: false,
            })
        }

        fn failing(name: &'static str) -> Arc<dyn Step<Recorder>> {
            Arc::new(TestStep {
                name,
                mode: StepMode::Critical,
                fail: true,
                fail_undo: false,
            })
        }

        fn best_effort_failing(name: &'static str) -> Arc<dyn Step<Recorder>> {
            Arc::new(TestStep {
                name,
                mode: StepMode::BestEffort,
                fail: true,
                fail_undo: false,
            })
        }

        fn undo_failing(name: &'static str) -> Arc<dyn Step<Recorder>> {
            Arc::new(TestStep {
                name,
                mode: StepMode::Critical,
                fail: false,
                fail_undo: true,
            })
        }
    }

    #[async_trait]
    impl Step<Recorder> for TestStep {
        fn name(&self) -> &'static str {
            self.name
        }

        fn mode(&self) -> StepMode {
            self.mode
        }

        async fn execute(&self, ctx: &Recorder) -> Result<(), Error> {
            if self.fail {
                ctx.record(&format!("fail:{}", self.name));
                return Err(Error::unavail("induced failure"));
            }
            ctx.record(&format!("exec:{}", self.name));
            Ok(())
        }

        async fn undo(&self, ctx: &Recorder) -> Result<(), anyhow::Error> {
            ctx.record(&format!("undo:{}", self.name));
            if self.fail_undo {
                anyhow::bail!("induced undo failure");
            }
            Ok(())
        }
    }

    fn test_logger(name: &str) -> Logger {
        ConfigLogging::StderrTerminal { level: ConfigLoggingLevel::Warn }
            .to_logger(name.to_string())
            .unwrap()
    }

    #[tokio::test]
    async fn test_steps_run_in_order() {
        let log = test_logger("steps_in_order");
        let ctx = Recorder::new();
        let steps =
            vec![TestStep::ok("a"), TestStep::ok("b"), TestStep::ok("c")];
        execute_steps(&log, &ctx, &steps, &NullObserver).await.unwrap();
        assert_eq!(ctx.events(), vec!["exec:a", "exec:b", "exec:c"]);
    }

    #[tokio::test]
    async fn test_failure_unwinds_in_reverse() {
        let log = test_logger("unwind_reverse");
        let ctx = Recorder::new();
        let steps =
            vec![TestStep::ok("a"), TestStep::ok("b"), TestStep::failing("c")];
        let error =
            execute_steps(&log, &ctx, &steps, &NullObserver).await.unwrap_err();
        assert!(error.retryable());
        // The failing step's own undo runs first, then the completed prefix
        // in reverse.
        assert_eq!(
            ctx.events(),
            vec!["exec:a", "exec:b", "fail:c", "undo:c", "undo:b", "undo:a"]
        );
    }

    #[tokio::test]
    async fn test_best_effort_failure_continues() {
        let log = test_logger("best_effort");
        let ctx = Recorder::new();
        let steps = vec![
            TestStep::ok("a"),
            TestStep::best_effort_failing("cert"),
            TestStep::ok("b"),
        ];
        execute_steps(&log, &ctx, &steps, &NullObserver).await.unwrap();
        assert_eq!(ctx.events(), vec!["exec:a", "fail:cert", "exec:b"]);
    }

    #[tokio::test]
    async fn test_undo_failure_does_not_stop_unwind() {
        let log = test_logger("undo_failure");
        let ctx = Recorder::new();
        let steps = vec![
            TestStep::ok("a"),
            TestStep::undo_failing("b"),
            TestStep::failing("c"),
        ];
        execute_steps(&log, &ctx, &steps, &NullObserver).await.unwrap_err();
        // "b"'s undo fails but "a" is still undone.
        assert_eq!(
            ctx.events(),
            vec!["exec:a", "exec:b", "fail:c", "undo:c", "undo:b", "undo:a"]
        );
    }
}
