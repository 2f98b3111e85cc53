//! Request aggregation for traffic steering triggers
//!
//! This is the main handler of the xApp. On each steering policy it resolves
//! the configured UE batch against the shared-data layer with a bounded
//! concurrent fan-out, merges the results into one deterministic prediction
//! request, and sends it to the QoE predictor with bounded retry.

use crate::bus::{BusSender, InboundMessage};
use crate::msgtype::QP_PREDICTION_REQUEST;
use crate::sdl::{SharedData, UeMetrics};
use qpdriver_common::config::QpDriverConfig;
use qpdriver_common::metrics::DispatchMetrics;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, info, warn};

/// Aggregated request sent to the QoE predictor
///
/// Invariant: `ueid_list` and `ue_data` cover exactly the same identifiers,
/// and `ueid_list` preserves the resolution order of the input batch.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PredictionRequest {
    /// Successfully resolved UE identifiers, in batch order
    #[serde(rename = "ueid-list")]
    pub ueid_list: Vec<String>,

    /// Resolved metrics keyed by UE identifier
    #[serde(rename = "ue-data")]
    pub ue_data: BTreeMap<String, UeMetrics>,
}

/// Typed outcome of the retried send
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// The transport accepted the message
    Sent {
        /// Attempts used, including the successful one
        attempts: u32,
    },

    /// Every attempt was rejected; the request is dropped
    Exhausted {
        /// Attempts made
        attempts: u32,
    },
}

/// Handler for the traffic steering policy trigger
pub struct RequestAggregator {
    sdl: Arc<dyn SharedData>,
    sender: Arc<dyn BusSender>,
    config: Arc<QpDriverConfig>,
    metrics: DispatchMetrics,
}

impl RequestAggregator {
    /// Create a new aggregator
    pub fn new(
        sdl: Arc<dyn SharedData>,
        sender: Arc<dyn BusSender>,
        config: Arc<QpDriverConfig>,
        metrics: DispatchMetrics,
    ) -> Self {
        Self {
            sdl,
            sender,
            config,
            metrics,
        }
    }

    /// Process one steering policy trigger
    ///
    /// Always produces exactly one outbound message and bumps the steering
    /// counter exactly once; individual lookup failures only shrink the
    /// batch. Send exhaustion is logged and counted, never escalated.
    pub async fn handle(&self, message: InboundMessage) {
        let policy_id = message.sub_id;
        let payload_len = message.payload.len();

        info!(
            policy_id,
            payload_len, "received traffic steering policy trigger"
        );

        // The policy body does not drive the lookups yet; the buffer goes
        // back to the transport before any blocking work starts.
        message.release();

        let request = self.resolve_batch().await;

        debug!(
            resolved = request.ueid_list.len(),
            requested = self.config.ue_batch.len(),
            "UE batch resolved"
        );

        // Serializing string keys and plain integer records cannot fail, so
        // the send step is reached on every invocation.
        let payload = serde_json::to_vec(&request).unwrap_or_default();

        match self.send_with_retry(&payload).await {
            SendOutcome::Sent { attempts } => {
                debug!(attempts, policy_id, "prediction request sent to predictor");
            }
            SendOutcome::Exhausted { attempts } => {
                self.metrics.send_failures.inc();
                warn!(
                    attempts,
                    policy_id, "unable to send prediction request to predictor"
                );
            }
        }

        self.metrics.steering_requests_processed.inc();
    }

    /// Resolve the configured UE batch against the shared-data layer
    ///
    /// Lookups run concurrently up to the configured cap, each under its own
    /// timeout, and are joined in batch order so the result is a stable
    /// filter of the input. Failed identifiers are skipped in place.
    async fn resolve_batch(&self) -> PredictionRequest {
        let semaphore = Arc::new(Semaphore::new(self.config.lookup.max_concurrency));
        let per_lookup_timeout = self.config.lookup_timeout();

        let mut handles = Vec::with_capacity(self.config.ue_batch.len());
        for ueid in &self.config.ue_batch {
            let semaphore = semaphore.clone();
            let sdl = self.sdl.clone();
            let namespace = self.config.sdl_namespace.clone();
            let ueid = ueid.trim().to_string();

            handles.push(tokio::spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    // The semaphore is never closed while lookups run
                    Err(_) => return (ueid, None),
                };

                let record = lookup_ue(sdl, &namespace, &ueid, per_lookup_timeout).await;
                (ueid, record)
            }));
        }

        let deadline = Instant::now() + self.config.batch_timeout();
        let mut ueid_list = Vec::new();
        let mut ue_data = BTreeMap::new();

        for mut handle in handles {
            match timeout_at(deadline, &mut handle).await {
                Ok(Ok((ueid, Some(metrics)))) => {
                    ueid_list.push(ueid.clone());
                    ue_data.insert(ueid, metrics);
                }
                Ok(Ok((ueid, None))) => {
                    self.metrics.ue_lookups_skipped.inc();
                    debug!(ueid = %ueid, "UE skipped for this batch");
                }
                Ok(Err(e)) => {
                    self.metrics.ue_lookups_skipped.inc();
                    warn!(error = %e, "lookup task failed, skipping UE");
                }
                Err(_) => {
                    handle.abort();
                    self.metrics.ue_lookups_skipped.inc();
                    warn!(
                        batch_timeout_ms = self.config.lookup.batch_timeout_ms,
                        "batch deadline exceeded, skipping remaining lookup"
                    );
                }
            }
        }

        PredictionRequest { ueid_list, ue_data }
    }

    /// Send the serialized request with bounded retry and exponential backoff
    async fn send_with_retry(&self, payload: &[u8]) -> SendOutcome {
        let max_attempts = self.config.send_retry.max_attempts;
        let mut backoff = self.config.initial_backoff();

        for attempt in 1..=max_attempts {
            if self.sender.send(QP_PREDICTION_REQUEST, payload) {
                return SendOutcome::Sent { attempts: attempt };
            }

            if attempt < max_attempts {
                self.metrics.send_retries.inc();
                debug!(
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    "transport rejected send, backing off"
                );
                tokio::time::sleep(backoff).await;
                backoff *= 2;
            }
        }

        SendOutcome::Exhausted {
            attempts: max_attempts,
        }
    }
}

/// Fetch and decode one UE record, mapping every failure to a skip
async fn lookup_ue(
    sdl: Arc<dyn SharedData>,
    namespace: &str,
    ueid: &str,
    lookup_timeout: std::time::Duration,
) -> Option<UeMetrics> {
    let lookup = {
        let namespace = namespace.to_string();
        let key = ueid.to_string();
        tokio::task::spawn_blocking(move || sdl.get(&namespace, &key))
    };

    match timeout(lookup_timeout, lookup).await {
        Ok(Ok(Ok(Some(bytes)))) => match serde_json::from_slice::<UeMetrics>(&bytes) {
            Ok(metrics) => Some(metrics),
            Err(e) => {
                warn!(ueid = %ueid, error = %e, "undecodable UE record");
                None
            }
        },
        Ok(Ok(Ok(None))) => {
            debug!(ueid = %ueid, "no record in shared data");
            None
        }
        Ok(Ok(Err(e))) => {
            warn!(ueid = %ueid, error = %e, "shared-data lookup failed");
            None
        }
        Ok(Err(e)) => {
            warn!(ueid = %ueid, error = %e, "lookup task aborted");
            None
        }
        Err(_) => {
            warn!(ueid = %ueid, "shared-data lookup timed out");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::LocalBus;
    use crate::msgtype::TS_POLICY_TRIGGER;
    use crate::sdl::FakeSdl;
    use qpdriver_common::metrics::MetricsRegistry;
    use std::sync::atomic::{AtomicU32, Ordering};

    const NAMESPACE: &str = "TS-UE-metrics";

    fn test_config(ue_batch: &[&str]) -> QpDriverConfig {
        QpDriverConfig {
            ue_batch: ue_batch.iter().map(|s| s.to_string()).collect(),
            ..QpDriverConfig::default()
        }
    }

    fn seed(sdl: &FakeSdl, ueid: &str, rsrp: i64) {
        let metrics = UeMetrics {
            rsrp,
            rsrq: rsrp - 10,
            rssinr: rsrp + 40,
        };
        sdl.put(NAMESPACE, ueid, serde_json::to_vec(&metrics).unwrap());
    }

    fn aggregator(
        sdl: Arc<dyn SharedData>,
        sender: Arc<dyn BusSender>,
        config: QpDriverConfig,
    ) -> (RequestAggregator, MetricsRegistry) {
        let metrics = MetricsRegistry::new();
        let aggregator =
            RequestAggregator::new(sdl, sender, Arc::new(config), metrics.dispatch.clone());
        (aggregator, metrics)
    }

    async fn deliver_policy(bus: &LocalBus, rx: &mut tokio::sync::mpsc::Receiver<InboundMessage>) -> InboundMessage {
        bus.deliver(TS_POLICY_TRIGGER, 1, b"{}".to_vec()).unwrap();
        rx.recv().await.unwrap()
    }

    /// Sender that rejects the first `fail_first` attempts
    struct FlakySender {
        fail_first: u32,
        attempts: AtomicU32,
        inner: LocalBus,
    }

    impl BusSender for FlakySender {
        fn send(&self, message_type: i32, payload: &[u8]) -> bool {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if attempt <= self.fail_first {
                return false;
            }
            self.inner.send(message_type, payload)
        }
    }

    #[tokio::test]
    async fn test_missing_ue_is_skipped_in_place() {
        let sdl = Arc::new(FakeSdl::new());
        seed(&sdl, "257", 74);
        seed(&sdl, "258", 45);
        // "259" deliberately absent

        let (bus, mut rx) = LocalBus::new(4);
        let (aggregator, metrics) =
            aggregator(sdl, Arc::new(bus.clone()), test_config(&["257", "258", "259"]));

        let msg = deliver_policy(&bus, &mut rx).await;
        aggregator.handle(msg).await;

        let sent = bus.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].message_type, QP_PREDICTION_REQUEST);

        let request: PredictionRequest = serde_json::from_slice(&sent[0].payload).unwrap();
        assert_eq!(request.ueid_list, vec!["257", "258"]);
        assert_eq!(request.ue_data.len(), 2);
        assert!(request.ue_data.contains_key("257"));
        assert!(request.ue_data.contains_key("258"));

        assert_eq!(metrics.dispatch.steering_requests_processed.get(), 1);
        assert_eq!(metrics.dispatch.ue_lookups_skipped.get(), 1);
        assert_eq!(bus.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_resolution_order_is_stable_filter() {
        let sdl = Arc::new(FakeSdl::new());
        seed(&sdl, "262", 34);
        seed(&sdl, "257", 74);
        seed(&sdl, "265", 36);
        // Batch order differs from key order; the gap sits in the middle
        sdl.put(NAMESPACE, "260", b"not json".to_vec());

        let (bus, mut rx) = LocalBus::new(4);
        let (aggregator, _metrics) = aggregator(
            sdl,
            Arc::new(bus.clone()),
            test_config(&["262", "260", "257", "265"]),
        );

        let msg = deliver_policy(&bus, &mut rx).await;
        aggregator.handle(msg).await;

        let request: PredictionRequest =
            serde_json::from_slice(&bus.sent()[0].payload).unwrap();
        assert_eq!(request.ueid_list, vec!["262", "257", "265"]);
        assert_eq!(
            request.ueid_list.len(),
            request.ue_data.len(),
            "no orphans either direction"
        );
        for ueid in &request.ueid_list {
            assert!(request.ue_data.contains_key(ueid));
        }
    }

    #[tokio::test]
    async fn test_empty_batch_still_sends() {
        let sdl = Arc::new(FakeSdl::new());

        let (bus, mut rx) = LocalBus::new(4);
        let (aggregator, metrics) =
            aggregator(sdl, Arc::new(bus.clone()), test_config(&["257", "258"]));

        let msg = deliver_policy(&bus, &mut rx).await;
        aggregator.handle(msg).await;

        // Liveness: the predictor still gets one (empty) request
        assert_eq!(bus.sent_count(), 1);
        let request: PredictionRequest =
            serde_json::from_slice(&bus.sent()[0].payload).unwrap();
        assert!(request.ueid_list.is_empty());
        assert!(request.ue_data.is_empty());

        assert_eq!(metrics.dispatch.steering_requests_processed.get(), 1);
        assert_eq!(metrics.dispatch.ue_lookups_skipped.get(), 2);
    }

    #[tokio::test]
    async fn test_idempotent_for_same_store_state() {
        let sdl = Arc::new(FakeSdl::new());
        seed(&sdl, "257", 74);
        seed(&sdl, "258", 45);

        let (bus, mut rx) = LocalBus::new(4);
        let (aggregator, _metrics) =
            aggregator(sdl, Arc::new(bus.clone()), test_config(&["257", "258"]));

        let msg = deliver_policy(&bus, &mut rx).await;
        aggregator.handle(msg).await;
        let msg = deliver_policy(&bus, &mut rx).await;
        aggregator.handle(msg).await;

        let sent = bus.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].payload, sent[1].payload);
    }

    #[tokio::test]
    async fn test_wire_format_field_names() {
        let sdl = Arc::new(FakeSdl::new());
        seed(&sdl, "257", 74);

        let (bus, mut rx) = LocalBus::new(4);
        let (aggregator, _metrics) =
            aggregator(sdl, Arc::new(bus.clone()), test_config(&["257"]));

        let msg = deliver_policy(&bus, &mut rx).await;
        aggregator.handle(msg).await;

        let value: serde_json::Value =
            serde_json::from_slice(&bus.sent()[0].payload).unwrap();
        assert_eq!(value["ueid-list"], serde_json::json!(["257"]));
        assert_eq!(value["ue-data"]["257"]["rsrp"], 74);
        assert_eq!(value["ue-data"]["257"]["rsrq"], 64);
        assert_eq!(value["ue-data"]["257"]["rssinr"], 114);
    }

    #[tokio::test]
    async fn test_send_retries_until_accepted() {
        let sdl = Arc::new(FakeSdl::new());
        seed(&sdl, "257", 74);

        let (bus, mut rx) = LocalBus::new(4);
        let sender = Arc::new(FlakySender {
            fail_first: 2,
            attempts: AtomicU32::new(0),
            inner: bus.clone(),
        });

        let mut config = test_config(&["257"]);
        config.send_retry.initial_backoff_ms = 1;
        let (aggregator, metrics) = aggregator(sdl, sender, config);

        let msg = deliver_policy(&bus, &mut rx).await;
        aggregator.handle(msg).await;

        assert_eq!(bus.sent_count(), 1);
        assert_eq!(metrics.dispatch.send_retries.get(), 2);
        assert_eq!(metrics.dispatch.send_failures.get(), 0);
        assert_eq!(metrics.dispatch.steering_requests_processed.get(), 1);
    }

    #[tokio::test]
    async fn test_send_exhaustion_completes_normally() {
        let sdl = Arc::new(FakeSdl::new());
        seed(&sdl, "257", 74);

        let (bus, mut rx) = LocalBus::new(4);
        let sender = Arc::new(FlakySender {
            fail_first: u32::MAX,
            attempts: AtomicU32::new(0),
            inner: bus.clone(),
        });

        let mut config = test_config(&["257"]);
        config.send_retry.max_attempts = 3;
        config.send_retry.initial_backoff_ms = 1;
        let (aggregator, metrics) = aggregator(sdl, sender, config);

        let msg = deliver_policy(&bus, &mut rx).await;
        aggregator.handle(msg).await;

        // Nothing got through, but the handler completed and counted the
        // request anyway
        assert_eq!(bus.sent_count(), 0);
        assert_eq!(metrics.dispatch.send_failures.get(), 1);
        assert_eq!(metrics.dispatch.send_retries.get(), 2);
        assert_eq!(metrics.dispatch.steering_requests_processed.get(), 1);
        assert_eq!(bus.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_batch_deadline_skips_remaining_in_place() {
        /// Store slower than the whole-batch deadline for every key
        struct StalledSdl;

        impl SharedData for StalledSdl {
            fn get(&self, _namespace: &str, _key: &str) -> qpdriver_common::Result<Option<Vec<u8>>> {
                std::thread::sleep(std::time::Duration::from_millis(300));
                Ok(None)
            }
        }

        let (bus, mut rx) = LocalBus::new(4);
        let mut config = test_config(&["257", "258"]);
        // Generous per-lookup timeout so only the batch deadline can trip
        config.lookup.timeout_ms = 1000;
        config.lookup.batch_timeout_ms = 50;
        let (aggregator, metrics) = aggregator(Arc::new(StalledSdl), Arc::new(bus.clone()), config);

        let msg = deliver_policy(&bus, &mut rx).await;
        aggregator.handle(msg).await;

        // Liveness survives a blown deadline: one (empty) request still
        // goes out and the invocation is still counted
        assert_eq!(bus.sent_count(), 1);
        let request: PredictionRequest =
            serde_json::from_slice(&bus.sent()[0].payload).unwrap();
        assert!(request.ueid_list.is_empty());
        assert!(request.ue_data.is_empty());

        assert_eq!(metrics.dispatch.ue_lookups_skipped.get(), 2);
        assert_eq!(metrics.dispatch.steering_requests_processed.get(), 1);
        assert_eq!(bus.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_nonnumeric_ueids_still_sent() {
        let sdl = Arc::new(FakeSdl::new());
        seed(&sdl, "ue-\u{3b2}42", 74);
        seed(&sdl, "a\"b", 45);

        let (bus, mut rx) = LocalBus::new(4);
        let (aggregator, metrics) = aggregator(
            sdl,
            Arc::new(bus.clone()),
            test_config(&["ue-\u{3b2}42", "a\"b"]),
        );

        let msg = deliver_policy(&bus, &mut rx).await;
        aggregator.handle(msg).await;

        // Identifiers needing JSON escaping still serialize and send
        assert_eq!(bus.sent_count(), 1);
        let request: PredictionRequest =
            serde_json::from_slice(&bus.sent()[0].payload).unwrap();
        assert_eq!(request.ueid_list, vec!["ue-\u{3b2}42", "a\"b"]);
        assert_eq!(metrics.dispatch.steering_requests_processed.get(), 1);
    }

    #[tokio::test]
    async fn test_slow_lookup_is_skipped() {
        /// Store whose lookups outlast the per-lookup timeout for one key
        struct SlowSdl {
            inner: FakeSdl,
            slow_key: String,
        }

        impl SharedData for SlowSdl {
            fn get(&self, namespace: &str, key: &str) -> qpdriver_common::Result<Option<Vec<u8>>> {
                if key == self.slow_key {
                    std::thread::sleep(std::time::Duration::from_millis(200));
                }
                self.inner.get(namespace, key)
            }
        }

        let inner = FakeSdl::new();
        seed(&inner, "257", 74);
        seed(&inner, "258", 45);
        let sdl = Arc::new(SlowSdl {
            inner,
            slow_key: "257".to_string(),
        });

        let (bus, mut rx) = LocalBus::new(4);
        let mut config = test_config(&["257", "258"]);
        config.lookup.timeout_ms = 20;
        let (aggregator, metrics) = aggregator(sdl, Arc::new(bus.clone()), config);

        let msg = deliver_policy(&bus, &mut rx).await;
        aggregator.handle(msg).await;

        let request: PredictionRequest =
            serde_json::from_slice(&bus.sent()[0].payload).unwrap();
        assert_eq!(request.ueid_list, vec!["258"]);
        assert_eq!(metrics.dispatch.ue_lookups_skipped.get(), 1);
    }
}
