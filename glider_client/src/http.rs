//! HTTP implementation of [`RemoteService`] over reqwest.

use futures::future::BoxFuture;
use futures::{FutureExt as _, StreamExt as _, TryStreamExt as _};
use glider::model::{DropTestVideo, EvolutionRequest, PreviewImage, Vehicle};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::service::{ByteStream, RemoteService};

#[derive(Debug, Clone)]
pub struct HttpService {
    client: Client,
    base_url: String,
    request_timeout: std::time::Duration,
}

impl HttpService {
    pub fn new(config: &ClientConfig) -> ClientResult<Self> {
        config.validate()?;
        let client = Client::builder()
            .connect_timeout(config.connect_timeout())
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            request_timeout: config.request_timeout(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn post_text(&self, path: &str, body: &impl Serialize) -> ClientResult<String> {
        debug!("POST {}", path);
        let resp = self
            .client
            .post(self.url(path))
            .timeout(self.request_timeout)
            .json(body)
            .send()
            .await?;
        Ok(check_status(resp)?.text().await?)
    }

    async fn post_json<T: DeserializeOwned>(&self, path: &str, body: &impl Serialize) -> ClientResult<T> {
        let text = self.post_text(path, body).await?;
        Ok(serde_json::from_str(&text)?)
    }
}

/// Non-success statuses become `ClientError::Status` with code and reason.
fn check_status(resp: Response) -> ClientResult<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    Err(ClientError::Status {
        status: status.as_u16(),
        text: status.canonical_reason().unwrap_or_default().to_string(),
    })
}

/// The scene endpoint may answer with a JSON string or with raw text.
fn unwrap_text_body(body: String) -> String {
    match serde_json::from_str::<String>(&body) {
        Ok(inner) => inner,
        Err(_) => body,
    }
}

fn parse_score(body: &str) -> ClientResult<f64> {
    let trimmed = body.trim();
    serde_json::from_str::<f64>(trimmed)
        .or_else(|_| trimmed.parse::<f64>())
        .map_err(|_| ClientError::Decode(format!("expected a numeric score, got {:?}", trimmed)))
}

impl RemoteService for HttpService {
    fn random_vehicle(&self) -> BoxFuture<'_, ClientResult<Vehicle>> {
        async move {
            debug!("GET /vehicle/");
            let resp = self
                .client
                .get(self.url("/vehicle/"))
                .timeout(self.request_timeout)
                .send()
                .await?;
            let text = check_status(resp)?.text().await?;
            Ok(serde_json::from_str(&text)?)
        }
        .boxed()
    }

    fn render_preview<'a>(&'a self, vehicle: &'a Vehicle) -> BoxFuture<'a, ClientResult<PreviewImage>> {
        self.post_json("/vehicle/view/", vehicle).boxed()
    }

    fn drop_test_scene<'a>(&'a self, vehicle: &'a Vehicle) -> BoxFuture<'a, ClientResult<String>> {
        async move {
            let body = self.post_text("/vehicle/drop_test/", vehicle).await?;
            Ok(unwrap_text_body(body))
        }
        .boxed()
    }

    fn fitness<'a>(&'a self, vehicle: &'a Vehicle) -> BoxFuture<'a, ClientResult<f64>> {
        async move {
            let body = self.post_text("/vehicle/fitness/", vehicle).await?;
            parse_score(&body)
        }
        .boxed()
    }

    fn drop_test_video<'a>(&'a self, vehicle: &'a Vehicle) -> BoxFuture<'a, ClientResult<DropTestVideo>> {
        self.post_json("/vehicle/drop_test_video/", vehicle).boxed()
    }

    fn start_evolution<'a>(&'a self, request: &'a EvolutionRequest) -> BoxFuture<'a, ClientResult<ByteStream>> {
        async move {
            debug!("POST /evolution/run");
            // No total timeout: the connection stays open for the whole run.
            let resp = self
                .client
                .post(self.url("/evolution/run"))
                .header(reqwest::header::ACCEPT, "text/event-stream")
                .json(request)
                .send()
                .await?;
            let body = check_status(resp)?
                .bytes_stream()
                .map_err(std::io::Error::other)
                .boxed();
            Ok(body)
        }
        .boxed()
    }
}
