// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Consumer Loop
//!
//! Drives the wait/dispatch cycle for one queue consumer. The loop blocks on
//! the delivery stream with a bounded poll interval so the three stop
//! conditions (message count, wall-clock uptime, peak memory) and the
//! cancellation token are re-evaluated periodically even with no traffic.
//! A transport wait-timeout triggers reconnect and consumer re-registration;
//! any other failure stops the loop with an error after a best-effort cancel
//! of the broker-side registration.

use crate::channel::{AmqpChannel, DeliveryStream};
use crate::entity::AmqpEntity;
use crate::errors::AmqpError;
use crate::processor::{MessageProcessor, ProcessorRunner};
use crate::queue::QueueEntity;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Bound on each delivery wait so stop conditions are never starved.
const POLL_INTERVAL: Duration = Duration::from_secs(1);
/// Pause before reconnecting after a transport wait-timeout.
const RECONNECT_DELAY: Duration = Duration::from_millis(1);

/// Soft lifetime bounds for a consume run.
#[derive(Debug, Clone, Copy)]
pub struct ConsumeLimits {
    /// Stop after this many processed messages.
    pub message_count: u64,
    /// Stop after this much wall-clock uptime, in seconds.
    pub seconds_uptime: u64,
    /// Stop when peak process memory exceeds this ceiling, in MiB.
    pub memory_mib: u64,
}

impl Default for ConsumeLimits {
    fn default() -> Self {
        ConsumeLimits {
            message_count: 100,
            seconds_uptime: 60,
            memory_mib: 64,
        }
    }
}

/// Why a consume run stopped cleanly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    MessageLimit,
    UptimeLimit,
    MemoryLimit,
    Cancelled,
}

/// A queue wired to a message processor, ready to run the consume loop.
pub struct Consumer {
    alias: String,
    queue: Arc<QueueEntity>,
    prefetch_count: u16,
    runner: ProcessorRunner,
    cancel: CancellationToken,
}

impl Consumer {
    pub fn new(
        alias: &str,
        queue: Arc<QueueEntity>,
        prefetch_count: u16,
        processor: Arc<dyn MessageProcessor>,
    ) -> Consumer {
        Consumer {
            alias: alias.to_owned(),
            queue,
            prefetch_count,
            runner: ProcessorRunner::new(processor),
            cancel: CancellationToken::new(),
        }
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn queue(&self) -> &Arc<QueueEntity> {
        &self.queue
    }

    pub fn prefetch_count(&self) -> u16 {
        self.prefetch_count
    }

    pub fn processed_messages(&self) -> u64 {
        self.runner.processed_messages()
    }

    /// Token observed by the loop. Cancelling it (from a signal handler or
    /// shutdown hook wired at the process boundary) stops consumption
    /// cleanly; cancelling twice is harmless.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Requests a clean stop. Equivalent to cancelling the token.
    pub fn stop_consuming(&self) {
        self.cancel.cancel();
    }

    /// Consumer tag unique across processes and hosts sharing this alias.
    fn consumer_tag(&self) -> String {
        let host = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "unknown".to_owned());
        format!("{}_{}_{}", self.alias, host, std::process::id())
    }

    async fn register(
        &self,
        consumer_tag: &str,
    ) -> Result<(Arc<dyn AmqpChannel>, Box<dyn DeliveryStream>), AmqpError> {
        let channel = self.queue.connection().channel().await?;
        channel.basic_qos(self.prefetch_count).await?;
        let stream = channel
            .basic_consume(self.queue.name(), consumer_tag)
            .await?;
        Ok((channel, stream))
    }

    fn should_stop(&self, limits: &ConsumeLimits, started: Instant) -> Option<StopReason> {
        if self.cancel.is_cancelled() {
            info!(consumer = self.alias, "stop requested, shutting down");
            return Some(StopReason::Cancelled);
        }
        evaluate_stop(
            limits,
            started.elapsed(),
            self.runner.processed_messages(),
            peak_memory_mib(),
        )
    }

    /// Runs the consume loop until a stop condition triggers, the token is
    /// cancelled, or an unrecoverable failure occurs.
    pub async fn start_consuming(&self, limits: ConsumeLimits) -> Result<(), AmqpError> {
        if self.queue.attributes().auto_create {
            self.queue.create().await?;
            self.queue.bind().await?;
        }

        let started = Instant::now();
        let consumer_tag = self.consumer_tag();
        debug!(
            consumer = self.alias,
            consumer_tag = consumer_tag,
            prefetch_count = self.prefetch_count,
            "starting consumer"
        );

        let (mut channel, mut stream) = self.register(&consumer_tag).await?;

        loop {
            if let Some(reason) = self.should_stop(&limits, started) {
                info!(consumer = self.alias, reason = ?reason, "consumer stopped");
                self.cancel_registration(&channel, &consumer_tag).await;
                return Ok(());
            }

            match stream.next_delivery(POLL_INTERVAL).await {
                Ok(Some(delivery)) => {
                    self.runner.consume(channel.clone(), delivery).await;
                }
                // Idle poll cycle, nothing delivered within the bound.
                Ok(None) => {}
                Err(err) if err.is_wait_timeout() => {
                    warn!(
                        consumer = self.alias,
                        "wait timed out, reconnecting and re-registering"
                    );
                    tokio::time::sleep(RECONNECT_DELAY).await;
                    self.queue.connection().reconnect().await?;
                    let (fresh_channel, fresh_stream) = self.register(&consumer_tag).await?;
                    channel = fresh_channel;
                    stream = fresh_stream;
                }
                Err(err) => {
                    error!(
                        error = err.to_string(),
                        consumer = self.alias,
                        "unexpected failure during consume, stopping"
                    );
                    self.cancel_registration(&channel, &consumer_tag).await;
                    return Err(err);
                }
            }
        }
    }

    async fn cancel_registration(&self, channel: &Arc<dyn AmqpChannel>, consumer_tag: &str) {
        if let Err(err) = channel.basic_cancel(consumer_tag).await {
            debug!(
                error = err.to_string(),
                consumer = self.alias,
                "ignoring consumer cancel failure"
            );
        }
    }
}

/// Evaluates the three stop conditions against observed values.
fn evaluate_stop(
    limits: &ConsumeLimits,
    elapsed: Duration,
    processed: u64,
    peak_mib: Option<u64>,
) -> Option<StopReason> {
    if elapsed.as_secs() >= limits.seconds_uptime {
        info!(
            limit_seconds = limits.seconds_uptime,
            elapsed_seconds = elapsed.as_secs(),
            "uptime limit reached"
        );
        return Some(StopReason::UptimeLimit);
    }
    if let Some(peak) = peak_mib {
        if peak >= limits.memory_mib {
            info!(
                limit_mib = limits.memory_mib,
                peak_mib = peak,
                "memory limit reached"
            );
            return Some(StopReason::MemoryLimit);
        }
    }
    if processed >= limits.message_count {
        info!(
            limit_messages = limits.message_count,
            processed = processed,
            "message limit reached"
        );
        return Some(StopReason::MessageLimit);
    }
    None
}

/// Peak resident set size of this process in MiB, when the platform exposes
/// it (`VmHWM` in `/proc/self/status` on Linux).
fn peak_memory_mib() -> Option<u64> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    for line in status.lines() {
        if let Some(value) = line.strip_prefix("VmHWM:") {
            let kib: u64 = value.trim().trim_end_matches("kB").trim().parse().ok()?;
            return Some(kib / 1024);
        }
    }
    None
}

/// Cancels `token` when the process receives SIGINT or SIGTERM.
///
/// Meant to be called once from the process boundary before starting a
/// consumer; the loop itself never installs signal handlers.
pub fn cancel_on_signals(token: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut terminate = match signal(SignalKind::terminate()) {
                Ok(stream) => stream,
                Err(err) => {
                    error!(error = err.to_string(), "failure to install SIGTERM handler");
                    return;
                }
            };
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = terminate.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
        }
        info!("termination signal received, stopping consumer");
        token.cancel();
    });
}
