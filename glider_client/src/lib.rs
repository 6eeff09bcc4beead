//! Async orchestration on top of the `glider` core.
//!
//! - [`run`]: one streamed optimisation run at a time
//! - [`preview`]: debounced preview renders of the current vehicle
//! - [`evaluate`]: one-shot fitness and drop-test actions
//! - [`http`]: the reqwest-backed [`service::RemoteService`]

pub mod codec;
pub mod config;
pub mod error;
pub mod evaluate;
pub mod http;
pub mod preview;
pub mod run;
pub mod service;

pub use config::ClientConfig;
pub use error::{ClientError, ClientResult};
pub use evaluate::{Evaluator, FitnessOutcome};
pub use http::HttpService;
pub use preview::PreviewFetcher;
pub use run::{RunController, RunHandle, RunOutcome};
pub use service::{ByteStream, RemoteService};
