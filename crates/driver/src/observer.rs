//! Prediction reply observer
//!
//! Handler for the asynchronous result coming back from the QoE predictor.
//! In this scope the result is only surfaced through logging; a real
//! consumer (persisting the prediction, triggering a steering action)
//! would attach here.

use crate::bus::InboundMessage;
use tracing::{info, warn};

/// Handler for the prediction-result message type
#[derive(Debug, Default)]
pub struct ReplyObserver;

impl ReplyObserver {
    /// Create a new observer
    pub fn new() -> Self {
        Self
    }

    /// Decode and surface one prediction result
    pub fn handle(&self, message: InboundMessage) {
        match serde_json::from_slice::<serde_json::Value>(&message.payload) {
            Ok(prediction) => {
                info!(
                    sub_id = message.sub_id,
                    prediction = %prediction,
                    "received prediction result"
                );
            }
            Err(e) => {
                warn!(
                    sub_id = message.sub_id,
                    payload_len = message.payload.len(),
                    error = %e,
                    "prediction result payload is not valid JSON"
                );
            }
        }

        message.release();
    }
}
