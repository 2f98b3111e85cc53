//! QP Driver xApp
//!
//! Message-driven microservice in the RAN control loop: consumes traffic
//! steering policy triggers, resolves per-UE signal metrics from the
//! shared-data layer, and forwards an aggregated prediction request to the
//! QoE predictor over the message bus.

pub mod aggregator;
pub mod bus;
pub mod msgtype;
pub mod observer;
pub mod router;
pub mod sdl;

pub use aggregator::{PredictionRequest, RequestAggregator, SendOutcome};
pub use bus::{BusSender, InboundMessage, LocalBus, OutboundMessage};
pub use msgtype::MessageType;
pub use observer::ReplyObserver;
pub use router::{Router, RouterHandle, StatsSnapshot, XappContext};
pub use sdl::{FakeSdl, SharedData, UeMetrics};
