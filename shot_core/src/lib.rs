#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Shot timing and stop-at-weight control (transport-agnostic).
//!
//! Machine telemetry and scale readings arrive on independent clocks. This
//! crate puts both on one shot-relative timeline and runs the brew-stop loop
//! on top of it. Transports only deliver decoded samples; all output leaves
//! through `ShotEvent`s published to `shot_traits::Sink`s.
//!
//! ## Architecture
//!
//! - **Timeline**: device-timer epoch, clamped monotone, reconnect tolerant (`timeline`)
//! - **Fusion**: spike rejection, noise floor, windowed flow (`fusion`)
//! - **Tare**: forward-only handshake with timeout (`tare`)
//! - **Stop**: lag-compensated stop-at-weight, latched once per shot (`predictor`)
//! - **Settling**: post-stop stability, cup removal (`settling`)
//! - **Learning**: record validation and drip prediction (`learning`)
//! - **Attribution**: why each profile frame ended (`attribution`, `profile`)
//! - **Composition**: `ShotController` owns all state; `runner` drives it
//!
//! Handlers run to completion on one thread. Timers carry a shot generation
//! so anything scheduled for an earlier shot is ignored.

pub mod attribution;
pub mod builder;
pub mod config;
pub mod controller;
pub mod conversions;
pub mod error;
pub mod fusion;
pub mod learning;
pub mod mocks;
pub mod predictor;
pub mod profile;
pub mod router;
pub mod runner;
pub mod settling;
pub mod tare;
pub mod timeline;
pub mod timer;
pub mod types;
pub mod util;

pub use attribution::{FrameAttributor, FrameExitReason};
pub use builder::ShotControllerBuilder;
pub use config::{
    AttributionCfg, FusionCfg, LearningCfg, PredictorCfg, SettlingCfg, TareCfg, TimingCfg,
};
pub use controller::{ShotController, ShotPhase, ShotSnapshot};
pub use learning::{LearningEntry, LearningHistory, SawLearningRecord};
pub use profile::{ControlMode, ExitCondition, ExitKind, FrameSpec, Profile};
pub use router::{AbandonReason, ChannelSink, Degradation, SampleRouter, ShotEvent};
pub use runner::{EventLoop, InputEvent, ReplayStats, replay};
pub use settling::SettledVia;
pub use tare::{TareState, TareVia};
pub use timeline::ShotTime;
pub use types::{SensorReading, TelemetrySample, WeightSample};
