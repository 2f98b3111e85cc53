//! Message dispatch and process lifecycle
//!
//! The router consumes inbound messages in delivery order and hands each one
//! to exactly one handler, chosen by an exhaustive match over the protocol's
//! message types. All shared state lives in an explicit context owned here;
//! there are no process globals.

use crate::aggregator::RequestAggregator;
use crate::bus::{BusSender, InboundMessage};
use crate::msgtype::MessageType;
use crate::observer::ReplyObserver;
use crate::sdl::SharedData;
use qpdriver_common::config::QpDriverConfig;
use qpdriver_common::metrics::MetricsRegistry;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

/// Everything the handlers need, threaded explicitly instead of living in
/// process globals
pub struct XappContext {
    /// Shared-data backend
    pub sdl: Arc<dyn SharedData>,

    /// Outbound message sender
    pub sender: Arc<dyn BusSender>,

    /// Runtime configuration
    pub config: Arc<QpDriverConfig>,

    /// Metrics registry
    pub metrics: MetricsRegistry,
}

/// Counter snapshot exposed on the process control surface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Messages that fell through to the default handler
    pub def_handler_called: u64,

    /// Steering requests processed
    pub steering_requests: u64,
}

/// Message router
///
/// Dispatches each inbound message to at most one handler and never
/// reorders the delivery stream. Handlers run to completion one at a time;
/// a failed handler is the handler's problem, the router does not retry.
pub struct Router {
    aggregator: RequestAggregator,
    observer: ReplyObserver,
    metrics: MetricsRegistry,
}

impl Router {
    /// Build a router and its handlers from the context
    pub fn new(ctx: XappContext) -> Self {
        let aggregator = RequestAggregator::new(
            ctx.sdl,
            ctx.sender,
            ctx.config,
            ctx.metrics.dispatch.clone(),
        );

        Self {
            aggregator,
            observer: ReplyObserver::new(),
            metrics: ctx.metrics,
        }
    }

    /// Dispatch one inbound message to its handler
    pub async fn dispatch(&self, message: InboundMessage) {
        match MessageType::from_raw(message.message_type) {
            MessageType::PolicyTrigger => self.aggregator.handle(message).await,
            MessageType::PredictionResult => self.observer.handle(message),
            MessageType::Unknown(raw) => self.default_handler(raw, message),
        }
    }

    /// Handler for message types outside the protocol
    fn default_handler(&self, raw: i32, message: InboundMessage) {
        self.metrics.dispatch.default_handler_invocations.inc();
        warn!(message_type = raw, "received an unexpected message type");
        message.release();
    }

    /// Consume messages until the inbound channel closes, occupying the
    /// calling task
    pub async fn run(&self, mut inbound: mpsc::Receiver<InboundMessage>) {
        while let Some(message) = inbound.recv().await {
            self.dispatch(message).await;
        }
        info!("inbound channel closed, router exiting");
    }

    /// Consume messages on a background task
    ///
    /// The returned handle stops the loop between deliveries; an in-flight
    /// handler invocation is never interrupted.
    pub fn spawn(self: Arc<Self>, mut inbound: mpsc::Receiver<InboundMessage>) -> RouterHandle {
        let (stop_tx, mut stop_rx) = watch::channel(false);

        let join = tokio::spawn(async move {
            loop {
                tokio::select! {
                    delivery = inbound.recv() => match delivery {
                        Some(message) => self.dispatch(message).await,
                        None => break,
                    },
                    _ = stop_rx.changed() => {
                        info!("router stop requested");
                        break;
                    }
                }
            }
        });

        RouterHandle { stop_tx, join }
    }

    /// Snapshot of the dispatch counters
    pub fn stats(&self) -> StatsSnapshot {
        StatsSnapshot {
            def_handler_called: self.metrics.dispatch.default_handler_invocations.get(),
            steering_requests: self.metrics.dispatch.steering_requests_processed.get(),
        }
    }
}

/// Handle for a router running in non-blocking mode
pub struct RouterHandle {
    stop_tx: watch::Sender<bool>,
    join: tokio::task::JoinHandle<()>,
}

impl RouterHandle {
    /// Request the consumer loop to stop after the current delivery
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    /// Wait for the consumer loop to finish
    pub async fn join(self) -> Result<(), tokio::task::JoinError> {
        self.join.await
    }
}
