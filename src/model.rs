//! Wire-level data model shared with the remote optimisation service.
//!
//! Everything here is plain data: it serialises to the JSON bodies the service
//! accepts and deserialises from the JSON it returns. Invariants that the wire
//! format cannot express (complete-or-absent geometry, weight budgets) are
//! enforced at the type boundary.

use base64::engine::general_purpose::STANDARD as BASE64_ENGINE;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

pub const DEFAULT_POPULATION_SIZE: usize = 100;
pub const DEFAULT_NUM_GENERATIONS: usize = 10;
pub const DEFAULT_SURVIVAL_WEIGHT: f64 = 0.3;
pub const DEFAULT_CLONING_WEIGHT: f64 = 0.4;
pub const DEFAULT_MAX_DIM_M: f64 = 4.5;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GeometryError {
    #[error("geometry is partial: vertices {vertices}, faces {faces}")]
    Partial {
        vertices: &'static str,
        faces: &'static str,
    },

    #[error("face {face} references vertex {index} but only {vertex_count} vertices exist")]
    IndexOutOfRange {
        face: usize,
        index: usize,
        vertex_count: usize,
    },
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("population_size must be at least 1")]
    EmptyPopulation,

    #[error("num_generations must be at least 1")]
    NoGenerations,

    #[error("{name} must be a finite value in [0, 1], got {value}")]
    WeightOutOfRange { name: &'static str, value: f64 },

    #[error("survival_weight + cloning_weight must not exceed 1.0 (got {survival} + {cloning} = {sum})")]
    WeightBudgetExceeded {
        survival: f64,
        cloning: f64,
        sum: f64,
    },

    #[error("max_dim_m must be positive, got {0}")]
    NonPositiveDimension(f64),

    #[error(transparent)]
    Geometry(#[from] GeometryError),
}

// ═══════════════════════════════════════════════════════════════════════════
// Vehicle
// ═══════════════════════════════════════════════════════════════════════════

/// A triangulated surface: point coordinates plus index triples into them.
#[derive(Debug, Clone, PartialEq)]
pub struct Geometry {
    vertices: Vec<[f64; 3]>,
    faces: Vec<[usize; 3]>,
}

impl Geometry {
    pub fn new(vertices: Vec<[f64; 3]>, faces: Vec<[usize; 3]>) -> Result<Self, GeometryError> {
        if vertices.is_empty() || faces.is_empty() {
            return Err(GeometryError::Partial {
                vertices: if vertices.is_empty() { "empty" } else { "present" },
                faces: if faces.is_empty() { "empty" } else { "present" },
            });
        }
        let vertex_count = vertices.len();
        for (face, tri) in faces.iter().enumerate() {
            if let Some(&index) = tri.iter().find(|&&i| i >= vertex_count) {
                return Err(GeometryError::IndexOutOfRange {
                    face,
                    index,
                    vertex_count,
                });
            }
        }
        Ok(Self { vertices, faces })
    }

    pub fn vertices(&self) -> &[[f64; 3]] {
        &self.vertices
    }

    pub fn faces(&self) -> &[[usize; 3]] {
        &self.faces
    }
}

/// The unit of work sent to the remote service.
///
/// Geometry is either complete or absent; a vehicle without geometry asks the
/// service to generate one.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(try_from = "VehicleWire", into = "VehicleWire")]
pub struct Vehicle {
    pub geometry: Option<Geometry>,
    pub max_dim_m: Option<f64>,
    pub mass_kg: Option<f64>,
    pub orientation: Option<Vec<f64>>,
    pub wing_density: Option<f64>,
    pub pilot: bool,
}

impl Vehicle {
    pub fn has_geometry(&self) -> bool {
        self.geometry.is_some()
    }

    pub fn with_geometry(mut self, geometry: Geometry) -> Self {
        self.geometry = Some(geometry);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct VehicleWire {
    #[serde(default)]
    vertices: Option<Vec<[f64; 3]>>,
    #[serde(default)]
    faces: Option<Vec<[usize; 3]>>,
    #[serde(default)]
    max_dim_m: Option<f64>,
    #[serde(default)]
    mass_kg: Option<f64>,
    #[serde(default)]
    orientation: Option<Vec<f64>>,
    #[serde(default)]
    wing_density: Option<f64>,
    #[serde(default)]
    pilot: bool,
}

impl TryFrom<VehicleWire> for Vehicle {
    type Error = GeometryError;

    fn try_from(w: VehicleWire) -> Result<Self, Self::Error> {
        let geometry = match (w.vertices, w.faces) {
            (None, None) => None,
            (Some(vertices), Some(faces)) => Some(Geometry::new(vertices, faces)?),
            (vertices, faces) => {
                return Err(GeometryError::Partial {
                    vertices: if vertices.is_some() { "present" } else { "null" },
                    faces: if faces.is_some() { "present" } else { "null" },
                })
            }
        };
        Ok(Vehicle {
            geometry,
            max_dim_m: w.max_dim_m,
            mass_kg: w.mass_kg,
            orientation: w.orientation,
            wing_density: w.wing_density,
            pilot: w.pilot,
        })
    }
}

impl From<Vehicle> for VehicleWire {
    fn from(v: Vehicle) -> Self {
        let (vertices, faces) = match v.geometry {
            Some(g) => (Some(g.vertices), Some(g.faces)),
            None => (None, None),
        };
        VehicleWire {
            vertices,
            faces,
            max_dim_m: v.max_dim_m,
            mass_kg: v.mass_kg,
            orientation: v.orientation,
            wing_density: v.wing_density,
            pilot: v.pilot,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Evolution parameters
// ═══════════════════════════════════════════════════════════════════════════

/// User-editable run composition.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EvolutionParams {
    #[serde(default = "default_population_size")]
    pub population_size: usize,
    #[serde(default = "default_num_generations")]
    pub num_generations: usize,
    #[serde(default = "default_survival_weight")]
    pub survival_weight: f64,
    #[serde(default = "default_cloning_weight")]
    pub cloning_weight: f64,
}

fn default_population_size() -> usize {
    DEFAULT_POPULATION_SIZE
}

fn default_num_generations() -> usize {
    DEFAULT_NUM_GENERATIONS
}

fn default_survival_weight() -> f64 {
    DEFAULT_SURVIVAL_WEIGHT
}

fn default_cloning_weight() -> f64 {
    DEFAULT_CLONING_WEIGHT
}

impl Default for EvolutionParams {
    fn default() -> Self {
        Self {
            population_size: DEFAULT_POPULATION_SIZE,
            num_generations: DEFAULT_NUM_GENERATIONS,
            survival_weight: DEFAULT_SURVIVAL_WEIGHT,
            cloning_weight: DEFAULT_CLONING_WEIGHT,
        }
    }
}

impl EvolutionParams {
    /// Pre-flight check run before any network traffic.
    ///
    /// The weight budget is compared exactly: a sum of precisely 1.0 passes and
    /// anything strictly greater is rejected, rounding error included.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.population_size == 0 {
            return Err(ValidationError::EmptyPopulation);
        }
        if self.num_generations == 0 {
            return Err(ValidationError::NoGenerations);
        }
        for (name, value) in [
            ("survival_weight", self.survival_weight),
            ("cloning_weight", self.cloning_weight),
        ] {
            if !value.is_finite() || !(0.0..=1.0).contains(&value) {
                return Err(ValidationError::WeightOutOfRange { name, value });
            }
        }
        let sum = self.survival_weight + self.cloning_weight;
        if sum > 1.0 {
            return Err(ValidationError::WeightBudgetExceeded {
                survival: self.survival_weight,
                cloning: self.cloning_weight,
                sum,
            });
        }
        Ok(())
    }
}

/// Body of `POST /evolution/run`: run composition plus the seed vehicle fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvolutionRequest {
    pub population_size: usize,
    pub num_generations: usize,
    pub survival_weight: f64,
    pub cloning_weight: f64,
    pub max_dim_m: f64,
    pub pilot: bool,
    pub mass_kg: Option<f64>,
    pub wing_density: Option<f64>,
}

impl EvolutionRequest {
    /// Validates `params` and combines them with the seed vehicle.
    pub fn new(params: &EvolutionParams, seed: &Vehicle) -> Result<Self, ValidationError> {
        let request = Self {
            population_size: params.population_size,
            num_generations: params.num_generations,
            survival_weight: params.survival_weight,
            cloning_weight: params.cloning_weight,
            max_dim_m: seed.max_dim_m.unwrap_or(DEFAULT_MAX_DIM_M),
            pilot: seed.pilot,
            mass_kg: seed.mass_kg,
            wing_density: seed.wing_density,
        };
        request.validate()?;
        Ok(request)
    }

    pub fn params(&self) -> EvolutionParams {
        EvolutionParams {
            population_size: self.population_size,
            num_generations: self.num_generations,
            survival_weight: self.survival_weight,
            cloning_weight: self.cloning_weight,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        self.params().validate()?;
        if !(self.max_dim_m > 0.0) {
            return Err(ValidationError::NonPositiveDimension(self.max_dim_m));
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Results
// ═══════════════════════════════════════════════════════════════════════════

/// One generation of a streamed run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationResult {
    pub generation: u32,
    pub best_fitness: f64,
    pub avg_fitness: f64,
    pub best_vehicle: Vehicle,
    pub population_fitness: Vec<f64>,
}

/// Bucketed population fitness for distribution display.
#[derive(Debug, Clone, PartialEq)]
pub struct FitnessHistogram {
    pub min: f64,
    pub max: f64,
    pub counts: Vec<usize>,
}

impl FitnessHistogram {
    pub fn bin_width(&self) -> f64 {
        if self.counts.is_empty() {
            return 0.0;
        }
        (self.max - self.min) / self.counts.len() as f64
    }
}

impl GenerationResult {
    /// Non-finite fitness values are skipped. Returns `None` when `bins` is zero
    /// or no finite values exist.
    pub fn histogram(&self, bins: usize) -> Option<FitnessHistogram> {
        if bins == 0 {
            return None;
        }
        let finite = || self.population_fitness.iter().copied().filter(|f| f.is_finite());
        let min = finite().reduce(f64::min)?;
        let max = finite().reduce(f64::max)?;

        let mut counts = vec![0usize; bins];
        let span = max - min;
        for f in finite() {
            let idx = if span > 0.0 {
                (((f - min) / span) * bins as f64) as usize
            } else {
                0
            };
            // The maximum lands exactly on the upper edge.
            counts[idx.min(bins - 1)] += 1;
        }
        Some(FitnessHistogram { min, max, counts })
    }
}

/// Base64 PNG returned by `POST /vehicle/view/`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreviewImage {
    pub data: String,
}

impl PreviewImage {
    pub fn png_bytes(&self) -> Result<Vec<u8>, base64::DecodeError> {
        BASE64_ENGINE.decode(self.data.as_bytes())
    }
}

/// Response of `POST /vehicle/drop_test_video/`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DropTestVideo {
    pub fitness: f64,
    pub fixed_camera_video: String,
    pub track_camera_video: String,
}

impl DropTestVideo {
    pub fn fixed_camera_bytes(&self) -> Result<Vec<u8>, base64::DecodeError> {
        BASE64_ENGINE.decode(self.fixed_camera_video.as_bytes())
    }

    pub fn track_camera_bytes(&self) -> Result<Vec<u8>, base64::DecodeError> {
        BASE64_ENGINE.decode(self.track_camera_video.as_bytes())
    }
}
