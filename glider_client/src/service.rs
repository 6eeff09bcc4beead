//! Boundary to the remote optimisation service.
//!
//! Components talk to the service through [`RemoteService`] so the run and
//! preview state machines can be driven by a scripted fake in tests.

use std::future::Future;

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use glider::model::{DropTestVideo, EvolutionRequest, PreviewImage, Vehicle};
use tokio_util::sync::CancellationToken;

use crate::error::{ClientError, ClientResult};

/// Raw body of a streaming response.
pub type ByteStream = BoxStream<'static, std::io::Result<Bytes>>;

pub trait RemoteService: Send + Sync + 'static {
    /// `GET /vehicle/`
    fn random_vehicle(&self) -> BoxFuture<'_, ClientResult<Vehicle>>;

    /// `POST /vehicle/view/`
    fn render_preview<'a>(&'a self, vehicle: &'a Vehicle) -> BoxFuture<'a, ClientResult<PreviewImage>>;

    /// `POST /vehicle/drop_test/`
    fn drop_test_scene<'a>(&'a self, vehicle: &'a Vehicle) -> BoxFuture<'a, ClientResult<String>>;

    /// `POST /vehicle/fitness/`
    fn fitness<'a>(&'a self, vehicle: &'a Vehicle) -> BoxFuture<'a, ClientResult<f64>>;

    /// `POST /vehicle/drop_test_video/`
    fn drop_test_video<'a>(&'a self, vehicle: &'a Vehicle) -> BoxFuture<'a, ClientResult<DropTestVideo>>;

    /// `POST /evolution/run`. Resolves once response headers report success;
    /// the returned body streams frames until the server closes it.
    fn start_evolution<'a>(&'a self, request: &'a EvolutionRequest) -> BoxFuture<'a, ClientResult<ByteStream>>;
}

/// Race `fut` against `token`. On cancellation the future is dropped, which
/// tears down any connection it holds, and `ClientError::Cancelled` is returned.
pub async fn cancellable<T>(
    token: &CancellationToken,
    fut: impl Future<Output = ClientResult<T>>,
) -> ClientResult<T> {
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(ClientError::Cancelled),
        result = fut => result,
    }
}
