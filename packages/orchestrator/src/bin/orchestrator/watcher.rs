use std::borrow::Cow;
use std::fmt::{Display, Write};
use std::pin::Pin;
use std::{collections::HashMap, sync::Arc};

use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::http::HeaderValue;
use axum::response::IntoResponse;
use chrono::{DateTime, Duration, Utc};
use liquidot::ChainId;
use liquidot_orchestrator::config::{Delay, TaskConfig, WatcherConfig};
use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use rand::Rng;
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::app::App;

/// Different kinds of tasks that we can watch
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash, PartialOrd, Ord)]
pub(crate) enum TaskLabel {
    IngestPools,
    Decide,
    Dispatch,
    ExecutionNudge,
    Monitor { chain: ChainId },
    RangeWatch,
    Liquidate { index: usize },
    OperatorBalance { chain: ChainId },
}

impl Display for TaskLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            TaskLabel::Monitor { chain } => write!(f, "Monitor chain {chain}"),
            TaskLabel::Liquidate { index } => write!(f, "Liquidation worker #{index}"),
            TaskLabel::OperatorBalance { chain } => write!(f, "Operator balance chain {chain}"),
            x => write!(f, "{x:?}"),
        }
    }
}

impl TaskLabel {
    fn task_config_for(&self, config: &WatcherConfig) -> TaskConfig {
        match self {
            TaskLabel::IngestPools => config.ingest,
            TaskLabel::Decide => config.decide,
            TaskLabel::Dispatch => config.dispatch,
            TaskLabel::ExecutionNudge => config.execution_nudge,
            TaskLabel::Monitor { .. } => config.monitor,
            TaskLabel::RangeWatch => config.range_watch,
            TaskLabel::Liquidate { .. } => config.liquidate,
            TaskLabel::OperatorBalance { .. } => config.operator_balance,
        }
    }

    /// Tasks whose failure should flip the status endpoint to alerting.
    fn triggers_alert(&self) -> bool {
        match self {
            TaskLabel::IngestPools => false,
            TaskLabel::Decide => true,
            TaskLabel::Dispatch => true,
            TaskLabel::ExecutionNudge => false,
            TaskLabel::Monitor { .. } => true,
            TaskLabel::RangeWatch => true,
            TaskLabel::Liquidate { .. } => true,
            TaskLabel::OperatorBalance { .. } => false,
        }
    }

    pub(crate) fn ident(self) -> Cow<'static, str> {
        match self {
            TaskLabel::IngestPools => "ingest-pools".into(),
            TaskLabel::Decide => "decide".into(),
            TaskLabel::Dispatch => "dispatch".into(),
            TaskLabel::ExecutionNudge => "execution-nudge".into(),
            TaskLabel::Monitor { chain } => format!("monitor-{chain}").into(),
            TaskLabel::RangeWatch => "range-watch".into(),
            TaskLabel::Liquidate { index } => format!("liquidate-{index}").into(),
            TaskLabel::OperatorBalance { chain } => format!("operator-balance-{chain}").into(),
        }
    }
}

struct ToSpawn {
    future: Pin<Box<dyn std::future::Future<Output = Result<()>> + Send>>,
    label: TaskLabel,
}

#[derive(Default)]
pub(crate) struct Watcher {
    to_spawn: Vec<ToSpawn>,
    set: JoinSet<Result<()>>,
    statuses: StatusMap,
}

pub(crate) type StatusMap = HashMap<TaskLabel, Arc<RwLock<TaskStatus>>>;

#[derive(Default)]
pub(crate) struct TaskStatuses {
    statuses: Arc<OnceCell<StatusMap>>,
}

#[derive(Clone)]
pub(crate) struct TaskStatus {
    last_result: TaskResult,
    last_retry_error: Option<TaskError>,
    current_run_started: Option<DateTime<Utc>>,
    out_of_date: Duration,
}

#[derive(Clone)]
pub(crate) struct TaskResult {
    pub(crate) value: Arc<Result<String, String>>,
    pub(crate) updated: DateTime<Utc>,
}

#[derive(Clone)]
pub(crate) struct TaskError {
    pub(crate) value: Arc<String>,
    pub(crate) updated: DateTime<Utc>,
}

impl TaskStatus {
    fn is_out_of_date(&self) -> bool {
        match self.current_run_started {
            Some(started) => {
                let out_of_date = started + self.out_of_date;
                out_of_date <= Utc::now()
            }
            None => false,
        }
    }
}

impl Watcher {
    /// Hand the status map to the app and drive every registered task to
    /// completion. Returns early with the error if any task fails hard;
    /// completes cleanly once cancellation has drained all of them.
    pub(crate) async fn wait(mut self, app: &App) -> Result<()> {
        app.statuses
            .statuses
            .set(self.statuses)
            .map_err(|_| anyhow::anyhow!("app.statuses.statuses set twice"))?;
        for ToSpawn { future, label } in self.to_spawn {
            self.set.spawn(async move {
                future
                    .await
                    .with_context(|| format!("Failure while running: {label}"))
            });
        }

        while let Some(res) = self.set.join_next().await {
            if let Err(e) = res.map_err(anyhow::Error::from).and_then(|res| res) {
                self.set.abort_all();
                return Err(e);
            }
        }

        Ok(())
    }
}

impl crate::app::AppBuilder {
    /// Watch a background job that runs continuously, launched immediately
    pub(crate) fn watch_background<Fut>(&mut self, task: Fut)
    where
        Fut: std::future::Future<Output = Result<()>> + Send + 'static,
    {
        self.watcher.set.spawn(task);
    }

    /// Register a periodic task under the watcher. Respects the task's
    /// retry and delay policy; exits cleanly on cancellation.
    pub(crate) fn watch_periodic<T>(&mut self, label: TaskLabel, mut task: T) -> Result<()>
    where
        T: WatchedTask,
    {
        let config = label.task_config_for(&self.app.config.watcher());
        let out_of_date = Duration::seconds(config.out_of_date.into());
        let task_status = Arc::new(RwLock::new(TaskStatus {
            last_result: TaskResult {
                value: Ok("Task has not yet completed a single run".to_owned()).into(),
                updated: Utc::now(),
            },
            last_retry_error: None,
            current_run_started: None,
            out_of_date,
        }));
        {
            let old = self.watcher.statuses.insert(label, task_status.clone());
            if old.is_some() {
                anyhow::bail!("Two periodic tasks with label {label:?}");
            }
        }
        let app = self.app.clone();
        let cancel = self.cancel.clone();
        let watcher_config = app.config.watcher();
        let future = Box::pin(async move {
            let mut retries = 0;
            loop {
                if cancel.is_cancelled() {
                    tracing::info!("{label}: stopping on shutdown signal");
                    break Ok(());
                }
                {
                    let mut guard = task_status.write();
                    let old = &*guard;
                    *guard = TaskStatus {
                        last_result: old.last_result.clone(),
                        last_retry_error: old.last_retry_error.clone(),
                        current_run_started: Some(Utc::now()),
                        out_of_date,
                    };
                }
                let before = tokio::time::Instant::now();
                let res = tokio::select! {
                    _ = cancel.cancelled() => continue,
                    res = task.run_single(app.clone(), Heartbeat {
                        task_status: task_status.clone(),
                    }) => res,
                };
                match res {
                    Ok(output) => {
                        if !output.suppress_log {
                            tracing::info!("{label}: Success! {}", output.message);
                        }
                        *task_status.write() = TaskStatus {
                            last_result: TaskResult {
                                value: Ok(output.message).into(),
                                updated: Utc::now(),
                            },
                            last_retry_error: None,
                            current_run_started: None,
                            out_of_date,
                        };
                        retries = 0;
                        if !output.skip_delay {
                            let sleep = match config.delay {
                                Delay::Constant(secs) => {
                                    Some(tokio::time::Duration::from_secs(secs))
                                }
                                Delay::Random { low, high } => Some(
                                    tokio::time::Duration::from_secs(
                                        rand::thread_rng().gen_range(low..=high),
                                    ),
                                ),
                                Delay::Interval(secs) => before
                                    .checked_add(tokio::time::Duration::from_secs(secs))
                                    .map(|after| after.saturating_duration_since(
                                        tokio::time::Instant::now(),
                                    )),
                            };
                            if let Some(sleep) = sleep {
                                tokio::select! {
                                    _ = cancel.cancelled() => {}
                                    _ = tokio::time::sleep(sleep) => {}
                                }
                            }
                        }
                    }
                    Err(err) => {
                        tracing::warn!("{label}: Error: {err:?}");
                        retries += 1;
                        let max_retries = config.retries.unwrap_or(watcher_config.retries);
                        if retries >= max_retries {
                            retries = 0;
                            *task_status.write() = TaskStatus {
                                last_result: TaskResult {
                                    value: Err(format!("{err:?}")).into(),
                                    updated: Utc::now(),
                                },
                                last_retry_error: None,
                                current_run_started: None,
                                out_of_date,
                            };
                        } else {
                            {
                                let mut guard = task_status.write();
                                let old = &*guard;
                                *guard = TaskStatus {
                                    last_result: old.last_result.clone(),
                                    last_retry_error: Some(TaskError {
                                        value: format!("{err:?}").into(),
                                        updated: Utc::now(),
                                    }),
                                    current_run_started: None,
                                    out_of_date,
                                };
                            }
                            let delay = config
                                .delay_between_retries
                                .unwrap_or(watcher_config.delay_between_retries);
                            tokio::select! {
                                _ = cancel.cancelled() => {}
                                _ = tokio::time::sleep(tokio::time::Duration::from_secs(
                                    delay.into(),
                                )) => {}
                            }
                        }
                    }
                }
            }
        });
        self.watcher.to_spawn.push(ToSpawn { future, label });
        Ok(())
    }
}

#[derive(Debug)]
pub(crate) struct WatchedTaskOutput {
    skip_delay: bool,
    suppress_log: bool,
    message: String,
}

impl WatchedTaskOutput {
    pub(crate) fn new(message: impl Into<String>) -> Self {
        WatchedTaskOutput {
            skip_delay: false,
            suppress_log: false,
            message: message.into(),
        }
    }

    pub(crate) fn skip_delay(mut self) -> Self {
        self.skip_delay = true;
        self
    }

    pub(crate) fn suppress(mut self) -> Self {
        self.suppress_log = true;
        self
    }
}

#[async_trait]
pub(crate) trait WatchedTask: Send + Sync + 'static {
    async fn run_single(&mut self, app: Arc<App>, heartbeat: Heartbeat)
        -> Result<WatchedTaskOutput>;
}

pub(crate) struct Heartbeat {
    task_status: Arc<RwLock<TaskStatus>>,
}

impl Heartbeat {
    pub(crate) fn reset_too_old(&self) {
        let mut guard = self.task_status.write();
        let old = &*guard;
        *guard = TaskStatus {
            last_result: old.last_result.clone(),
            last_retry_error: old.last_retry_error.clone(),
            current_run_started: Some(Utc::now()),
            out_of_date: old.out_of_date,
        };
    }
}

struct RenderedStatus {
    label: TaskLabel,
    status: TaskStatus,
    short: ShortStatus,
}

impl TaskStatuses {
    fn all_statuses(&self) -> Vec<RenderedStatus> {
        let mut all_statuses = self
            .statuses
            .get()
            .map(|statuses| {
                statuses
                    .iter()
                    .map(|(label, status)| {
                        let label = *label;
                        let status = status.read().clone();
                        let short = status.short(label);
                        RenderedStatus {
                            label,
                            status,
                            short,
                        }
                    })
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();

        all_statuses.sort_by_key(|x| (x.short, x.label));
        all_statuses
    }

    /// Per-status counters for the diagnostics endpoint.
    pub(crate) fn summary(&self) -> Vec<(String, String)> {
        self.all_statuses()
            .into_iter()
            .map(|rendered| {
                (
                    rendered.label.ident().into_owned(),
                    rendered.short.as_str().to_owned(),
                )
            })
            .collect()
    }

    pub(crate) fn all_statuses_text(&self) -> axum::response::Response {
        let mut response_builder = ResponseBuilder::default();
        let statuses = self.all_statuses();
        let alert = statuses.iter().any(|x| x.short.alert());
        statuses
            .into_iter()
            .for_each(|rendered| response_builder.add(rendered).unwrap());
        let mut res = response_builder.into_response();

        if alert {
            *res.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
        }

        res
    }

    pub(crate) fn single_status_text(&self, ident: &str) -> Option<axum::response::Response> {
        let rendered = self
            .all_statuses()
            .into_iter()
            .find(|status| status.label.ident() == ident)?;
        let alert = rendered.short.alert();
        let mut response_builder = ResponseBuilder::default();
        response_builder.add(rendered).unwrap();
        let mut res = response_builder.into_response();
        if alert {
            *res.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
        }
        Some(res)
    }
}

#[derive(Default)]
struct ResponseBuilder {
    buffer: String,
    any_errors: bool,
}

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum ShortStatus {
    Error,
    OutOfDate,
    ErrorNoAlert,
    OutOfDateNoAlert,
    Success,
}

impl TaskStatus {
    fn short(&self, label: TaskLabel) -> ShortStatus {
        match self.last_result.value.as_ref() {
            Ok(_) => {
                if self.is_out_of_date() {
                    if label.triggers_alert() {
                        ShortStatus::OutOfDate
                    } else {
                        ShortStatus::OutOfDateNoAlert
                    }
                } else {
                    ShortStatus::Success
                }
            }
            Err(_) => {
                if label.triggers_alert() {
                    ShortStatus::Error
                } else {
                    ShortStatus::ErrorNoAlert
                }
            }
        }
    }
}

impl ShortStatus {
    fn as_str(self) -> &'static str {
        match self {
            ShortStatus::OutOfDate => "OUT OF DATE",
            ShortStatus::OutOfDateNoAlert => "OUT OF DATE (no alert)",
            ShortStatus::Success => "SUCCESS",
            ShortStatus::Error => "ERROR",
            ShortStatus::ErrorNoAlert => "ERROR (no alert)",
        }
    }

    fn alert(&self) -> bool {
        match self {
            ShortStatus::Error => true,
            ShortStatus::OutOfDate => true,
            ShortStatus::ErrorNoAlert => false,
            ShortStatus::OutOfDateNoAlert => false,
            ShortStatus::Success => false,
        }
    }
}

impl ResponseBuilder {
    fn add(
        &mut self,
        RenderedStatus {
            label,
            status:
                TaskStatus {
                    last_result,
                    last_retry_error,
                    current_run_started,
                    out_of_date: _,
                },
            short,
        }: RenderedStatus,
    ) -> std::fmt::Result {
        writeln!(&mut self.buffer, "# {label}. Status: {}", short.as_str())?;

        if let Some(started) = current_run_started {
            writeln!(&mut self.buffer, "Currently running, started at {started}")?;
        }

        writeln!(&mut self.buffer)?;
        match last_result.value.as_ref() {
            Ok(msg) => {
                writeln!(&mut self.buffer, "{msg}")?;
                writeln!(&mut self.buffer, "Updated: {}", last_result.since())?;
            }
            Err(err) => {
                self.any_errors = true;
                writeln!(&mut self.buffer, "{err}")?;
                writeln!(&mut self.buffer, "Failed: {}", last_result.since())?;
            }
        }

        if let Some(err) = last_retry_error {
            writeln!(&mut self.buffer)?;
            writeln!(
                &mut self.buffer,
                "Currently retrying, last attempt failed {} with:\n\n{}",
                err.since(),
                err.value
            )?;
        }

        writeln!(&mut self.buffer)?;
        Ok(())
    }

    fn into_response(self) -> axum::response::Response {
        let mut res = self.buffer.into_response();
        res.headers_mut().append(
            CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        if self.any_errors {
            *res.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
        }
        res
    }
}

impl TaskResult {
    fn since(&self) -> Since {
        Since(self.updated)
    }
}

impl TaskError {
    fn since(&self) -> Since {
        Since(self.updated)
    }
}

struct Since(DateTime<Utc>);

impl Display for Since {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let duration = Utc::now().signed_duration_since(self.0);
        let secs = duration.num_seconds();

        match secs.cmp(&0) {
            std::cmp::Ordering::Less => write!(f, "{}", self.0),
            std::cmp::Ordering::Equal => write!(f, "just now ({})", self.0),
            std::cmp::Ordering::Greater => {
                let minutes = secs / 60;
                let secs = secs % 60;
                let hours = minutes / 60;
                let minutes = minutes % 60;
                let days = hours / 24;
                let hours = hours % 24;

                let mut need_space = false;
                for (number, letter) in [(days, 'd'), (hours, 'h'), (minutes, 'm'), (secs, 's')] {
                    if number > 0 {
                        if need_space {
                            write!(f, " {number}{letter}")?;
                        } else {
                            need_space = true;
                            write!(f, "{number}{letter}")?;
                        }
                    }
                }

                write!(f, " ({})", self.0)
            }
        }
    }
}

/// Listen for ctrl-c / SIGTERM and flip the shared cancellation token.
pub(crate) fn spawn_shutdown_listener(cancel: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut sigterm = match tokio::signal::unix::signal(
                tokio::signal::unix::SignalKind::terminate(),
            ) {
                Ok(sigterm) => sigterm,
                Err(err) => {
                    tracing::error!("Cannot install SIGTERM handler: {err}");
                    return;
                }
            };
            tokio::select! {
                _ = ctrl_c => {}
                _ = sigterm.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
        }
        tracing::info!("Shutdown signal received, cancelling tasks");
        cancel.cancel();
    });
}
