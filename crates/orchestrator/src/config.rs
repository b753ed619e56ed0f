//! Configuration parsing and validation for SPH simulations

use serde::{Deserialize, Serialize};
use sph_kernel::particle::lattice_side;
use sph_kernel::SimulationParams;
use std::fs;
use thiserror::Error;

/// Errors from loading or validating a configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// Path that was read.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The file is not valid JSON for a [`SimulationConfig`].
    #[error("failed to parse config JSON: {0}")]
    Parse(#[from] serde_json::Error),
    /// The values are out of range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Main simulation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Human-readable simulation name
    pub name: String,
    /// Initial particle placement
    pub scene: SceneConfig,
    /// Physical and numerical parameters
    #[serde(default)]
    pub params: SimulationParams,
    /// Rescale the particle mass to the rest density before the first step
    #[serde(default = "default_calibrate")]
    pub calibrate: bool,
    /// Stop after this many steps
    pub max_steps: Option<u64>,
    /// Host compute settings
    #[serde(default)]
    pub compute: ComputeConfig,
    /// Compute backend selection
    #[serde(default)]
    pub backend: BackendType,
}

/// Lattice shape of the initial particle block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SceneShape {
    /// `r x r x r` block.
    Cube,
    /// `r x r` sheet in the xy-plane at `center.z`.
    Square,
}

impl SceneShape {
    /// Lattice dimensionality.
    pub fn dims(self) -> u32 {
        match self {
            SceneShape::Cube => 3,
            SceneShape::Square => 2,
        }
    }
}

/// Initial particle placement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SceneConfig {
    /// Lattice shape
    pub shape: SceneShape,
    /// Requested particle count; rounded down to a full lattice
    pub requested_count: usize,
    /// Distance between lattice neighbors
    pub spacing: f32,
    /// Center of the block
    #[serde(default)]
    pub center: [f32; 3],
    /// Velocity given to every particle
    #[serde(default)]
    pub initial_velocity: [f32; 3],
}

impl SceneConfig {
    /// Particles per lattice axis.
    pub fn side(&self) -> usize {
        lattice_side(self.requested_count, self.shape.dims())
    }

    /// Actual particle count after rounding.
    pub fn particle_count(&self) -> usize {
        self.side().pow(self.shape.dims())
    }

    /// Half-extent of the lattice along each filled axis.
    pub fn half_extent(&self) -> f32 {
        0.5 * self.side().saturating_sub(1) as f32 * self.spacing
    }
}

/// Host compute settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ComputeConfig {
    /// Worker threads; rayon's default when absent
    pub threads: Option<usize>,
}

/// Which compute backend to run on
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackendType {
    /// Rayon thread pool
    #[default]
    Host,
    /// wgpu compute shaders (feature `gpu`)
    Gpu,
    /// GPU when available, host otherwise
    Auto,
}

fn default_calibrate() -> bool {
    true
}

impl SimulationConfig {
    /// Load configuration from a JSON file
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_string(),
            source,
        })?;
        Self::from_json(&contents)
    }

    /// Parse and validate a JSON document
    pub fn from_json(contents: &str) -> Result<Self, ConfigError> {
        let config: SimulationConfig = serde_json::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.params
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;

        let scene = &self.scene;
        if !(scene.spacing.is_finite() && scene.spacing > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "scene spacing must be positive, got {}",
                scene.spacing
            )));
        }
        if scene.requested_count == 0 {
            return Err(ConfigError::Invalid("requested_count must be at least 1".into()));
        }
        if scene.center.iter().chain(&scene.initial_velocity).any(|c| !c.is_finite()) {
            return Err(ConfigError::Invalid("scene center and velocity must be finite".into()));
        }

        // The lattice must start inside the box.
        let b = self.params.box_half_size;
        let half = scene.half_extent();
        let filled = scene.shape.dims() as usize;
        for (axis, &c) in scene.center.iter().enumerate() {
            let reach = if axis < filled { c.abs() + half } else { c.abs() };
            if reach > b {
                return Err(ConfigError::Invalid(format!(
                    "lattice of {} particles reaches {reach} on axis {axis}, outside box half-size {b}",
                    scene.particle_count()
                )));
            }
        }

        if self.max_steps == Some(0) {
            return Err(ConfigError::Invalid("max_steps must be at least 1".into()));
        }
        if self.compute.threads == Some(0) {
            return Err(ConfigError::Invalid("compute.threads must be at least 1".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CUBE: &str = r#"{
        "name": "cube-512",
        "scene": { "shape": "Cube", "requested_count": 512, "spacing": 0.538, "center": [0, 0, 0] },
        "params": { "rest_density": 4.0, "smoothing_radius": 0.7, "stiffness": 220.0,
                    "viscosity": 0.25, "box_half_size": 4.0, "time_step": 0.001 },
        "calibrate": true,
        "max_steps": 10,
        "compute": { "threads": null }
    }"#;

    fn cube() -> SimulationConfig {
        SimulationConfig::from_json(CUBE).unwrap()
    }

    #[test]
    fn parses_example_config() {
        let config = cube();
        assert_eq!(config.name, "cube-512");
        assert_eq!(config.scene.particle_count(), 512);
        assert_eq!(config.params.stiffness, 220.0);
        assert_eq!(config.params.boundary_damping, 0.5);
        assert_eq!(config.backend, BackendType::Host);
        assert_eq!(config.max_steps, Some(10));
    }

    #[test]
    fn round_trips_through_json() {
        let config = cube();
        let json = serde_json::to_string(&config).unwrap();
        let back = SimulationConfig::from_json(&json).unwrap();
        assert_eq!(back.params, config.params);
        assert_eq!(back.scene.requested_count, 512);
    }

    #[test]
    fn lattice_rounds_down() {
        let mut config = cube();
        config.scene.requested_count = 1000;
        assert_eq!(config.scene.side(), 10);
        config.scene.requested_count = 999;
        assert_eq!(config.scene.particle_count(), 729);
        config.scene.shape = SceneShape::Square;
        config.scene.requested_count = 1000;
        assert_eq!(config.scene.particle_count(), 961);
    }

    #[test]
    fn rejects_bad_values() {
        let mut config = cube();
        config.scene.spacing = 0.0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = cube();
        config.scene.requested_count = 0;
        assert!(config.validate().is_err());

        let mut config = cube();
        config.params.time_step = -1.0;
        assert!(config.validate().is_err());

        let mut config = cube();
        config.params.boundary_damping = 1.5;
        assert!(config.validate().is_err());

        let mut config = cube();
        config.max_steps = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_lattice_outside_box() {
        let mut config = cube();
        config.scene.spacing = 2.0;
        assert!(config.validate().is_err());

        let mut config = cube();
        config.scene.center = [3.5, 0.0, 0.0];
        assert!(config.validate().is_err());

        // A sheet only fills x and y.
        let mut config = cube();
        config.scene.shape = SceneShape::Square;
        config.scene.requested_count = 49;
        config.scene.spacing = 1.2;
        config.scene.center = [0.0, 0.0, 3.9];
        assert!(config.validate().is_ok());
    }

    #[test]
    fn parse_and_io_errors_are_distinct() {
        assert!(matches!(SimulationConfig::from_json("{ nope"), Err(ConfigError::Parse(_))));
        assert!(matches!(
            SimulationConfig::load("/definitely/not/here.json"),
            Err(ConfigError::Io { .. })
        ));
    }
}
