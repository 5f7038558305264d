//! One listener per configured account: resolves its queues, configures them
//! at startup, then long-polls each queue in its own task.
//!
//! ## Batch handling
//!
//! ```text
//! receive(≤10) → spawn handler per message → join all against one deadline
//!                                            └─ late handlers: detached, counted as timeouts
//! ```

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{timeout, timeout_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::{ListenerConfig, Settings};
use crate::directory::Directories;
use crate::error::{ConfigError, QueueError};
use crate::plugin::ActionTable;
use crate::processor::Processor;
use crate::queue::{QueueClient, QueueResolver, QueueSpec, ResolvedQueue};

/// Pause after a failed receive before polling the same queue again.
const RECEIVE_ERROR_PAUSE: Duration = Duration::from_secs(1);

/// Running totals for one listener.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Counters {
    pub messages: u64,
    pub successes: u64,
    pub failures: u64,
    pub service_errors: u64,
    pub thread_timeouts: u64,
}

/// Result of a single receive-and-process cycle.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchReport {
    pub received: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub timed_out: usize,
}

pub struct Listener {
    name: String,
    wait_time: i32,
    visibility_timeout: i32,
    settings: Arc<Settings>,
    client: Arc<dyn QueueClient>,
    processor: Processor,
    queues: Vec<ResolvedQueue>,
    counters: Arc<Mutex<Counters>>,
}

impl Listener {
    /// Parse and resolve the listener's queue specs.
    ///
    /// A bad pattern or a failed queue listing is fatal. Specs that match
    /// nothing only produce a warning.
    pub async fn new(
        name: impl Into<String>,
        config: &ListenerConfig,
        settings: Arc<Settings>,
        client: Arc<dyn QueueClient>,
        directories: Directories,
        actions: Arc<ActionTable>,
    ) -> Result<Self, ConfigError> {
        let name = name.into();
        let specs = config
            .queues
            .iter()
            .map(|spec| QueueSpec::parse(spec))
            .collect::<Result<Vec<_>, _>>()?;

        let resolver = QueueResolver::new(Arc::clone(&client));
        let urls = resolver
            .resolve_all(&specs)
            .await
            .map_err(ConfigError::QueueListing)?;
        let queues: Vec<ResolvedQueue> = urls
            .into_iter()
            .map(|url| ResolvedQueue::new(url, name.clone()))
            .collect();

        info!(
            listener = %name,
            region = %config.region,
            queues = ?queues.iter().map(|q| q.name.as_str()).collect::<Vec<_>>(),
            "listener_queues_resolved"
        );

        let processor = Processor::new(
            Arc::clone(&settings),
            Arc::clone(&client),
            directories,
            actions,
        );

        Ok(Self {
            wait_time: config.wait_time(&settings),
            visibility_timeout: config.visibility_timeout(&settings),
            name,
            settings,
            client,
            processor,
            queues,
            counters: Arc::new(Mutex::new(Counters::default())),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn queues(&self) -> &[ResolvedQueue] {
        &self.queues
    }

    /// Snapshot of the counters.
    pub fn counters(&self) -> Counters {
        *self.counters.lock()
    }

    /// Apply wait time and visibility timeout to every queue concurrently.
    ///
    /// Each update is bounded by `sqs_set_attributes_timeout`; running past it
    /// is fatal, as is any service error other than a missing queue.
    pub async fn configure_queues(&self) -> Result<(), ConfigError> {
        let limit = self.settings.set_attributes_timeout();

        let updates = self.queues.iter().map(|queue| async move {
            let result = timeout(
                limit,
                self.client
                    .set_queue_attributes(&queue.url, self.wait_time, self.visibility_timeout),
            )
            .await;
            (queue, result)
        });

        for (queue, result) in join_all(updates).await {
            match result {
                Ok(Ok(())) => debug!(
                    listener = %self.name,
                    queue = %queue.name,
                    wait_time = self.wait_time,
                    visibility_timeout = self.visibility_timeout,
                    "sqs_queue_configured"
                ),
                Ok(Err(QueueError::QueueDoesNotExist { .. })) => warn!(
                    listener = %self.name,
                    queue = %queue.name,
                    "sqs_queue_missing_skipping"
                ),
                Ok(Err(source)) => {
                    return Err(ConfigError::QueueAttributes {
                        queue: queue.url.clone(),
                        source,
                    })
                }
                Err(_) => {
                    return Err(ConfigError::QueueAttributesTimeout {
                        queue: queue.url.clone(),
                        seconds: limit.as_secs_f64(),
                    })
                }
            }
        }

        info!(listener = %self.name, queues = self.queues.len(), "listener_configured");
        Ok(())
    }

    /// Receive one batch from `queue` and process it.
    ///
    /// A receive error is counted and returned; it never panics or aborts the
    /// caller's loop.
    pub async fn poll_once(&self, queue: &ResolvedQueue) -> Result<BatchReport, QueueError> {
        let batch = match self
            .client
            .receive_messages(&queue.url, self.wait_time, self.visibility_timeout)
            .await
        {
            Ok(batch) => batch,
            Err(e) => {
                self.counters.lock().service_errors += 1;
                error!(
                    listener = %self.name,
                    queue = %queue.name,
                    error = %e,
                    "sqs_receive_failed"
                );
                return Err(e);
            }
        };

        let mut report = BatchReport {
            received: batch.len(),
            ..BatchReport::default()
        };
        if batch.is_empty() {
            return Ok(report);
        }

        self.counters.lock().messages += batch.len() as u64;
        debug!(
            listener = %self.name,
            queue = %queue.name,
            count = batch.len(),
            "sqs_batch_received"
        );

        let deadline = Instant::now() + self.settings.listen_timeout();
        let handles: Vec<JoinHandle<_>> = batch
            .into_iter()
            .map(|raw| {
                let processor = self.processor.clone();
                let queue = queue.clone();
                tokio::spawn(async move { processor.process(&queue, raw).await })
            })
            .collect();

        for mut handle in handles {
            match timeout_at(deadline, &mut handle).await {
                Ok(Ok(outcome)) if outcome.succeeded() => report.succeeded += 1,
                Ok(Ok(_)) => report.failed += 1,
                Ok(Err(e)) => {
                    error!(
                        listener = %self.name,
                        queue = %queue.name,
                        error = %e,
                        "message_handler_crashed"
                    );
                    report.failed += 1;
                }
                Err(_) => {
                    // Dropping the handle detaches the task; it keeps running.
                    warn!(
                        listener = %self.name,
                        queue = %queue.name,
                        listen_timeout_secs = self.settings.listen_timeout().as_secs_f64(),
                        "message_handler_timeout"
                    );
                    report.timed_out += 1;
                }
            }
        }

        {
            let mut counters = self.counters.lock();
            counters.successes += report.succeeded as u64;
            counters.failures += report.failed as u64;
            counters.thread_timeouts += report.timed_out as u64;
        }

        Ok(report)
    }

    /// Spawn one poll loop per queue plus the stats reporter.
    pub fn listen(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        let mut tasks: Vec<JoinHandle<()>> = self
            .queues
            .iter()
            .cloned()
            .map(|queue| {
                let listener = Arc::clone(self);
                tokio::spawn(async move {
                    info!(listener = %listener.name, queue = %queue.name, "listener_polling");
                    loop {
                        if listener.poll_once(&queue).await.is_err() {
                            tokio::time::sleep(RECEIVE_ERROR_PAUSE).await;
                        }
                    }
                })
            })
            .collect();

        tasks.push(tokio::spawn(report_stats(
            self.name.clone(),
            Arc::clone(&self.counters),
            self.settings.stats_interval(),
        )));

        tasks
    }
}

async fn report_stats(listener: String, counters: Arc<Mutex<Counters>>, period: Duration) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let snapshot = *counters.lock();
        info!(
            listener = %listener,
            messages = snapshot.messages,
            successes = snapshot.successes,
            failures = snapshot.failures,
            service_errors = snapshot.service_errors,
            thread_timeouts = snapshot.thread_timeouts,
            "listener_stats"
        );
    }
}
