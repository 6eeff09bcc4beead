//! Scripted in-process stand-in for the remote service.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use bytes::Bytes;
use futures::channel::mpsc;
use futures::future::BoxFuture;
use futures::{FutureExt as _, StreamExt as _};
use glider::model::{DropTestVideo, EvolutionRequest, Geometry, GenerationResult, PreviewImage, Vehicle};
use glider_client::{ByteStream, ClientError, ClientResult, RemoteService};

pub type Chunks = mpsc::UnboundedSender<io::Result<Bytes>>;

pub enum Evolution {
    Stream(mpsc::UnboundedReceiver<io::Result<Bytes>>),
    Reject { status: u16, text: &'static str },
}

/// Scripted reply to a one-shot request: delay, then the result.
pub struct Reply<T> {
    pub delay: Duration,
    pub result: ClientResult<T>,
}

impl<T> Reply<T> {
    pub fn ok(delay_ms: u64, value: T) -> Self {
        Self {
            delay: Duration::from_millis(delay_ms),
            result: Ok(value),
        }
    }

    pub fn status(delay_ms: u64, status: u16, text: &str) -> Self {
        Self {
            delay: Duration::from_millis(delay_ms),
            result: Err(ClientError::Status {
                status,
                text: text.to_string(),
            }),
        }
    }
}

#[derive(Default)]
pub struct FakeService {
    pub evolutions: Mutex<VecDeque<Evolution>>,
    pub evolution_requests: Mutex<Vec<EvolutionRequest>>,

    pub previews: Mutex<VecDeque<Reply<()>>>,
    pub preview_requests: Mutex<Vec<Vehicle>>,
    pub previews_completed: AtomicUsize,

    pub randoms: Mutex<VecDeque<Reply<Vehicle>>>,
    pub fitness: Mutex<VecDeque<Reply<f64>>>,
    pub scenes: Mutex<VecDeque<Reply<String>>>,
    pub videos: Mutex<VecDeque<Reply<DropTestVideo>>>,
}

impl FakeService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a streamed run and return the sender that feeds its body.
    pub fn script_stream(&self) -> Chunks {
        let (tx, rx) = mpsc::unbounded();
        self.evolutions.lock().unwrap().push_back(Evolution::Stream(rx));
        tx
    }

    pub fn script_reject(&self, status: u16, text: &'static str) {
        self.evolutions
            .lock()
            .unwrap()
            .push_back(Evolution::Reject { status, text });
    }

    pub fn evolution_calls(&self) -> usize {
        self.evolution_requests.lock().unwrap().len()
    }

    pub fn preview_calls(&self) -> Vec<Vehicle> {
        self.preview_requests.lock().unwrap().clone()
    }
}

async fn reply<T>(queue: &Mutex<VecDeque<Reply<T>>>, what: &str) -> ClientResult<T> {
    let next = queue.lock().unwrap().pop_front();
    let Some(reply) = next else {
        panic!("unscripted {} request", what);
    };
    tokio::time::sleep(reply.delay).await;
    reply.result
}

/// The image a fake render returns for `vehicle`.
pub fn image_for(vehicle: &Vehicle) -> PreviewImage {
    PreviewImage {
        data: format!("render:{:?}", vehicle.mass_kg),
    }
}

impl RemoteService for FakeService {
    fn random_vehicle(&self) -> BoxFuture<'_, ClientResult<Vehicle>> {
        reply(&self.randoms, "random vehicle").boxed()
    }

    fn render_preview<'a>(&'a self, vehicle: &'a Vehicle) -> BoxFuture<'a, ClientResult<PreviewImage>> {
        async move {
            self.preview_requests.lock().unwrap().push(vehicle.clone());
            let next = self.previews.lock().unwrap().pop_front();
            let reply = next.unwrap_or_else(|| Reply::ok(50, ()));
            tokio::time::sleep(reply.delay).await;
            self.previews_completed.fetch_add(1, Ordering::SeqCst);
            reply.result.map(|()| image_for(vehicle))
        }
        .boxed()
    }

    fn drop_test_scene<'a>(&'a self, _vehicle: &'a Vehicle) -> BoxFuture<'a, ClientResult<String>> {
        reply(&self.scenes, "drop test scene").boxed()
    }

    fn fitness<'a>(&'a self, _vehicle: &'a Vehicle) -> BoxFuture<'a, ClientResult<f64>> {
        reply(&self.fitness, "fitness").boxed()
    }

    fn drop_test_video<'a>(&'a self, _vehicle: &'a Vehicle) -> BoxFuture<'a, ClientResult<DropTestVideo>> {
        reply(&self.videos, "drop test video").boxed()
    }

    fn start_evolution<'a>(&'a self, request: &'a EvolutionRequest) -> BoxFuture<'a, ClientResult<ByteStream>> {
        async move {
            self.evolution_requests.lock().unwrap().push(request.clone());
            let next = self.evolutions.lock().unwrap().pop_front();
            match next {
                Some(Evolution::Stream(rx)) => Ok(rx.boxed()),
                Some(Evolution::Reject { status, text }) => Err(ClientError::Status {
                    status,
                    text: text.to_string(),
                }),
                None => panic!("unscripted evolution run"),
            }
        }
        .boxed()
    }
}

pub fn tetra() -> Geometry {
    Geometry::new(
        vec![
            [0.0, 0.0, 0.0],
            [1.0, 0.0, 0.0],
            [0.0, 1.0, 0.0],
            [0.0, 0.0, 1.0],
        ],
        vec![[0, 1, 2], [0, 1, 3], [0, 2, 3], [1, 2, 3]],
    )
    .unwrap()
}

/// A vehicle with geometry, told apart by its mass.
pub fn glider(mass_kg: f64) -> Vehicle {
    Vehicle {
        mass_kg: Some(mass_kg),
        ..Vehicle::default()
    }
    .with_geometry(tetra())
}

pub fn generation(n: u32, best: f64) -> GenerationResult {
    GenerationResult {
        generation: n,
        best_fitness: best,
        avg_fitness: best / 2.0,
        best_vehicle: glider(10.0 + n as f64),
        population_fitness: vec![best, best / 2.0, 0.0],
    }
}

/// One event-stream frame carrying `g`.
pub fn frame(g: &GenerationResult) -> Bytes {
    Bytes::from(format!("data: {}\n\n", serde_json::to_string(g).unwrap()))
}

pub fn send(chunks: &Chunks, bytes: impl Into<Bytes>) {
    chunks.unbounded_send(Ok(bytes.into())).unwrap();
}

/// Let spawned tasks run until they block.
pub async fn settle() {
    for _ in 0..32 {
        tokio::task::yield_now().await;
    }
}
