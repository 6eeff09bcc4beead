//! # glider
//!
//! Client-side core for driving a remote glider optimisation service.
//!
//! This crate holds the synchronous, runtime-agnostic pieces: the wire data
//! model, the incremental event-stream decoder, the evaluation ledger and the
//! shared state store that fans results out to subscribers. The async
//! orchestration (HTTP, streamed runs, debounced previews) lives in
//! `glider_client`.
//!
//! ## Modules
//!
//! - [`model`]: vehicles, run parameters and result records
//! - [`frame`]: chunked byte stream to decoded records
//! - [`ledger`]: append-only evaluation history with derived queries
//! - [`store`]: shared state with synchronous change notification
//! - [`sequence`]: staleness tickets for racing requests

pub mod frame;
pub mod ledger;
pub mod model;
pub mod sequence;
pub mod store;

pub mod prelude {
    pub use crate::frame::{Frame, FrameDecoder};
    pub use crate::ledger::{EvaluationLedger, EvaluationRecord};
    pub use crate::model::{
        DropTestVideo, EvolutionParams, EvolutionRequest, Geometry, GenerationResult,
        PreviewImage, ValidationError, Vehicle,
    };
    pub use crate::sequence::{RequestSequencer, Ticket};
    pub use crate::store::{
        Change, EvaluationStatus, Field, PreviewState, RunPhase, RunState, Store,
    };
}
