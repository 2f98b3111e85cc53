//! Message-type constants shared with the QoE predictor
//!
//! These values are protocol constants; the downstream predictor routes on
//! them and they must match exactly for interoperability.

/// A1 traffic steering policy trigger (inbound)
pub const TS_POLICY_TRIGGER: i32 = 20010;

/// Aggregated QoE prediction request (outbound, routed to the predictor)
pub const QP_PREDICTION_REQUEST: i32 = 35000;

/// Asynchronous prediction result from the predictor (inbound)
pub const QP_PREDICTION_RESULT: i32 = 35001;

/// Closed enumeration of the message types this xApp dispatches on
///
/// Wire values outside the protocol map to `Unknown`, which routes to the
/// default handler; everything else is matched exhaustively at dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    /// Traffic steering policy trigger
    PolicyTrigger,

    /// Prediction result from the QoE predictor
    PredictionResult,

    /// Any message type outside the protocol
    Unknown(i32),
}

impl MessageType {
    /// Classify a raw wire message type
    pub fn from_raw(raw: i32) -> Self {
        match raw {
            TS_POLICY_TRIGGER => MessageType::PolicyTrigger,
            QP_PREDICTION_RESULT => MessageType::PredictionResult,
            other => MessageType::Unknown(other),
        }
    }

    /// Get the raw wire value
    pub fn raw(&self) -> i32 {
        match self {
            MessageType::PolicyTrigger => TS_POLICY_TRIGGER,
            MessageType::PredictionResult => QP_PREDICTION_RESULT,
            MessageType::Unknown(raw) => *raw,
        }
    }
}
