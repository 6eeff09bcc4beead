//! glider - command-line client for the glider optimisation service
//!
//! Streams evolution runs and runs one-shot evaluations against a running
//! service. Configuration comes from `<config_dir>/glider/client.json` and
//! `GLIDER_*` environment variables; `--base-url` wins over both.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, SystemTime};

use clap::{Parser, Subcommand};
use glider::model::{EvolutionParams, PreviewImage, Vehicle};
use glider::store::{Field, Store};
use glider_client::{
    ClientConfig, Evaluator, HttpService, PreviewFetcher, RemoteService, RunController, RunOutcome,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const WATCH_POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Parser, Debug)]
#[command(name = "glider", version, about = "Drive the glider optimisation service")]
struct Cli {
    /// Service base URL (overrides config file and GLIDER_BASE_URL).
    #[arg(long)]
    base_url: Option<String>,

    /// Vehicle JSON to work on. A random vehicle is fetched when omitted.
    #[arg(long, global = true)]
    vehicle: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Stream an evolution run, one line per generation. Ctrl-C aborts.
    Run {
        #[arg(long, default_value_t = glider::model::DEFAULT_POPULATION_SIZE)]
        population: usize,
        #[arg(long, default_value_t = glider::model::DEFAULT_NUM_GENERATIONS)]
        generations: usize,
        #[arg(long, default_value_t = glider::model::DEFAULT_SURVIVAL_WEIGHT)]
        survival: f64,
        #[arg(long, default_value_t = glider::model::DEFAULT_CLONING_WEIGHT)]
        cloning: f64,
        /// Write the best vehicle of the whole run here.
        #[arg(long)]
        best_out: Option<PathBuf>,
    },
    /// Print a random vehicle as JSON.
    Random,
    /// Score the vehicle.
    Fitness,
    /// Print the drop-test scene description.
    Scene,
    /// Render a PNG preview.
    Preview {
        #[arg(long, default_value = "preview.png")]
        out: PathBuf,
    },
    /// Follow edits to the --vehicle file: debounced preview renders plus a
    /// fitness score per edit. Ctrl-C prints the recent scores and exits.
    Watch {
        #[arg(long, default_value = "preview.png")]
        out: PathBuf,
    },
    /// Render both drop-test videos.
    Video {
        #[arg(long, default_value = ".")]
        out_dir: PathBuf,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Logs on stderr; stdout carries command output.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();

    let mut config = ClientConfig::load()?;
    if let Some(url) = cli.base_url {
        config.base_url = url;
    }
    let service: Arc<dyn RemoteService> = Arc::new(HttpService::new(&config)?);
    info!("Using service at {}", config.base_url);

    let store = Store::default();
    let evaluator = Evaluator::new(Arc::clone(&service), store.clone());
    match &cli.vehicle {
        Some(path) => store.set_vehicle(read_vehicle(path)?),
        None if matches!(cli.command, Command::Watch { .. }) => {
            return Err("watch needs --vehicle".into());
        }
        None if !matches!(cli.command, Command::Random) => {
            evaluator.generate_random().await?;
        }
        None => {}
    }

    match cli.command {
        Command::Run {
            population,
            generations,
            survival,
            cloning,
            best_out,
        } => {
            store.set_params(EvolutionParams {
                population_size: population,
                num_generations: generations,
                survival_weight: survival,
                cloning_weight: cloning,
            });
            run_command(service, store, best_out).await?;
        }
        Command::Random => {
            let vehicle = service.random_vehicle().await?;
            println!("{}", serde_json::to_string_pretty(&vehicle)?);
        }
        Command::Fitness => {
            let outcome = evaluator.evaluate_fitness().await?;
            println!("{}", outcome.record.score);
        }
        Command::Scene => {
            if let Some(scene) = evaluator.drop_test_scene().await? {
                println!("{}", scene);
            }
        }
        Command::Preview { out } => {
            let image = service.render_preview(&store.vehicle()).await?;
            std::fs::write(&out, image.png_bytes()?)?;
            info!("Preview written to {:?}", out);
        }
        Command::Watch { out } => {
            let path = cli.vehicle.unwrap_or_default();
            watch_command(service, store, evaluator, &config, path, out).await?;
        }
        Command::Video { out_dir } => {
            if let Some((video, _)) = evaluator.drop_test_video().await? {
                std::fs::create_dir_all(&out_dir)?;
                std::fs::write(out_dir.join("fixed_camera.mp4"), video.fixed_camera_bytes()?)?;
                std::fs::write(out_dir.join("track_camera.mp4"), video.track_camera_bytes()?)?;
                println!("fitness {}", video.fitness);
                info!("Videos written to {:?}", out_dir);
            }
        }
    }

    Ok(())
}

fn read_vehicle(path: &Path) -> Result<Vehicle, Box<dyn std::error::Error>> {
    let text = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

async fn run_command(
    service: Arc<dyn RemoteService>,
    store: Store,
    best_out: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let printed = Arc::new(AtomicUsize::new(0));
    {
        let printed = Arc::clone(&printed);
        store.subscribe(move |store, change| {
            if change.field != Field::Run {
                return;
            }
            let run = store.run();
            if run.generations.len() <= printed.load(Ordering::Relaxed) {
                return;
            }
            printed.store(run.generations.len(), Ordering::Relaxed);
            if let Some(g) = run.latest() {
                let progress = run.progress();
                println!(
                    "gen {:>4}/{:<4} best {:>10.4} avg {:>10.4}",
                    g.generation + 1,
                    progress.total,
                    g.best_fitness,
                    g.avg_fitness
                );
            }
        });
    }

    let controller = Arc::new(RunController::new(service, store.clone()));
    let handle = controller.start().await?;

    {
        let controller = Arc::clone(&controller);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Ctrl-C: stopping run");
                controller.stop();
            }
        });
    }

    let outcome = handle.wait().await;
    let run = store.run();
    if let (Some(path), Some(best)) = (best_out, run.best()) {
        std::fs::write(&path, serde_json::to_string_pretty(&best.best_vehicle)?)?;
        info!("Best vehicle (fitness {:.4}) written to {:?}", best.best_fitness, path);
    }

    match outcome {
        RunOutcome::Completed | RunOutcome::Aborted => {
            println!("{} after {} generations", run.phase.label(), run.generations.len());
            Ok(())
        }
        RunOutcome::Failed(e) => Err(format!("run failed: {}", e).into()),
    }
}

async fn watch_command(
    service: Arc<dyn RemoteService>,
    store: Store,
    evaluator: Evaluator,
    config: &ClientConfig,
    vehicle_path: PathBuf,
    out: PathBuf,
) -> Result<(), Box<dyn std::error::Error>> {
    let written: Arc<Mutex<Option<PreviewImage>>> = Arc::new(Mutex::new(None));
    store.subscribe(move |store, change| {
        if change.field != Field::Preview {
            return;
        }
        let Some(image) = store.preview().image else {
            return;
        };
        let mut last = written.lock().unwrap_or_else(PoisonError::into_inner);
        if last.as_ref() == Some(&image) {
            return;
        }
        let result = match image.png_bytes() {
            Ok(png) => std::fs::write(&out, png).map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };
        match result {
            Ok(()) => info!("Preview written to {:?}", out),
            Err(e) => warn!("Could not write preview: {}", e),
        }
        *last = Some(image);
    });

    let fetcher = PreviewFetcher::spawn(service, store.clone(), config.preview_debounce());
    let mut modified = modified_at(&vehicle_path);
    score(&evaluator).await;

    let mut poll = tokio::time::interval(WATCH_POLL_INTERVAL);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            _ = poll.tick() => {
                let now = modified_at(&vehicle_path);
                if now == modified {
                    continue;
                }
                modified = now;
                match read_vehicle(&vehicle_path) {
                    Ok(vehicle) => {
                        store.set_vehicle(vehicle);
                        score(&evaluator).await;
                    }
                    Err(e) => warn!("Ignoring unreadable vehicle file: {}", e),
                }
            }
        }
    }

    fetcher.shutdown().await;
    evaluator.cancel_all();
    store.with_evaluations(|ledger| {
        let recent = ledger.recent(config.evaluation_window);
        println!("last {} of {} evaluations", recent.len(), ledger.len());
        for record in recent {
            println!("{:>10.4}", record.score);
        }
        if let Some(best) = ledger.best() {
            println!("best {:>10.4}", best.score);
        }
    });
    Ok(())
}

fn modified_at(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|meta| meta.modified()).ok()
}

async fn score(evaluator: &Evaluator) {
    match evaluator.evaluate_fitness().await {
        Ok(outcome) if outcome.improved => println!("fitness {:.4} (new best)", outcome.record.score),
        Ok(outcome) => println!("fitness {:.4}", outcome.record.score),
        Err(e) => warn!("Fitness evaluation failed: {}", e),
    }
}
