use crate::errors::SlimeError;
use log::info;
use serde::Deserialize;
use std::f32::consts::PI;
use std::path::PathBuf;
use typed_builder::TypedBuilder;

pub const DEFAULT_SETTINGS_FILE: &str = "slime.toml";

// Environment settings
pub const WIDTH: u32 = 1920;
pub const HEIGHT: u32 = 1080;
pub const DIFFUSION_KERNEL_SIZE: u32 = 3;
pub const DIFFUSION_DECAY: f32 = 0.1;
/// Blending factor when blurring. 0 keeps the current cell value, 1 uses the kernel output
pub const DIFFUSION_RATIO: f32 = 0.2;
pub const POPULATION_DENSITY: f32 = 0.15;

// Agent settings
pub const SENSOR_ANGLE: f32 = 22.5 * PI / 180.0;
pub const ROTATION_ANGLE: f32 = 45.0 * PI / 180.0;
pub const SENSOR_OFFSET: f32 = 9.0;
pub const SENSOR_WIDTH: u32 = 1;
pub const STEP_SIZE: f32 = 1.0;
pub const CHEMO_DEPOSITION: f32 = 5.0;
pub const MAX_CHEMO: f32 = 255.999;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Host,
    Device,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitPattern {
    Random,
    Circle,
}

/// Everything a run needs to know up front. Read once at construction and
/// never changed afterwards.
#[derive(Debug, Clone, PartialEq, Deserialize, TypedBuilder)]
#[serde(default)]
pub struct Settings {
    #[builder(default = WIDTH)]
    pub width: u32,
    #[builder(default = HEIGHT)]
    pub height: u32,
    /// Side length of the square diffusion neighbourhood. Must be odd.
    #[builder(default = DIFFUSION_KERNEL_SIZE)]
    pub diffusion_kernel_size: u32,
    /// Subtracted from every cell once per step
    #[builder(default = DIFFUSION_DECAY)]
    pub diffusion_decay: f32,
    #[builder(default = DIFFUSION_RATIO)]
    pub diffusion_ratio: f32,
    /// Agents per cell
    #[builder(default = POPULATION_DENSITY)]
    pub population_density: f32,
    /// Angle between the forward sensor and each side sensor (radians)
    #[builder(default = SENSOR_ANGLE)]
    pub sensor_angle: f32,
    /// How far out a sensor is from the agent
    #[builder(default = SENSOR_OFFSET)]
    pub sensor_offset: f32,
    /// Side length of the window each sensor sums over
    #[builder(default = SENSOR_WIDTH)]
    pub sensor_width: u32,
    /// How far an agent turns when it reacts to its sensors (radians)
    #[builder(default = ROTATION_ANGLE)]
    pub rotation_angle: f32,
    #[builder(default = STEP_SIZE)]
    pub step_size: f32,
    #[builder(default = CHEMO_DEPOSITION)]
    pub chemo_deposition: f32,
    #[builder(default = MAX_CHEMO)]
    pub max_chemo: f32,
    #[builder(default = InitPattern::Random)]
    pub init_pattern: InitPattern,
    /// Seed for the random service. Entropy is used when absent.
    #[builder(default, setter(strip_option))]
    pub seed: Option<u64>,
    #[builder(default = BackendKind::Host)]
    pub backend: BackendKind,
    /// Host worker threads, 0 means one per hardware thread
    #[builder(default = 0)]
    pub worker_threads: usize,
    /// WGSL program for the device backend. The bundled program is used when absent.
    #[builder(default, setter(strip_option))]
    pub compute_program: Option<PathBuf>,
    /// Stop the binary's run loop after this many steps
    #[builder(default, setter(strip_option))]
    pub max_steps: Option<u64>,
}

impl Default for Settings {
    fn default() -> Self {
        Settings::builder().build()
    }
}

impl Settings {
    /// Loads settings from `settings_file_name` (any format `config` understands) and
    /// then applies `SLIME_*` environment overrides. Missing keys keep their defaults.
    pub fn load_from_file(settings_file_name: &str) -> Result<Self, SlimeError> {
        let mut settings = config::Config::default();
        settings.merge(config::File::with_name(settings_file_name).required(false))?;
        settings.merge(config::Environment::with_prefix("SLIME"))?;
        let settings: Settings = settings.try_into()?;
        settings.validate()?;

        info!(
            "successfully loaded settings from '{}'",
            &settings_file_name
        );

        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), SlimeError> {
        let invalid = |reason: String| Err(SlimeError::InvalidSettings(reason));

        for (name, value) in [
            ("diffusion_decay", self.diffusion_decay),
            ("diffusion_ratio", self.diffusion_ratio),
            ("population_density", self.population_density),
            ("sensor_angle", self.sensor_angle),
            ("sensor_offset", self.sensor_offset),
            ("rotation_angle", self.rotation_angle),
            ("step_size", self.step_size),
            ("chemo_deposition", self.chemo_deposition),
            ("max_chemo", self.max_chemo),
        ] {
            if !value.is_finite() {
                return invalid(format!("{} must be a finite number, got {}", name, value));
            }
        }
        if self.width == 0 || self.height == 0 {
            return invalid(format!(
                "grid must be at least 1x1, got {}x{}",
                self.width, self.height
            ));
        }
        if self.diffusion_kernel_size == 0 || self.diffusion_kernel_size % 2 == 0 {
            return invalid(format!(
                "diffusion_kernel_size must be odd, got {}",
                self.diffusion_kernel_size
            ));
        }
        if !(0.0..=1.0).contains(&self.diffusion_ratio) {
            return invalid(format!(
                "diffusion_ratio must be within [0, 1], got {}",
                self.diffusion_ratio
            ));
        }
        if self.diffusion_decay < 0.0 {
            return invalid(format!(
                "diffusion_decay can't be negative, got {}",
                self.diffusion_decay
            ));
        }
        if self.population_density < 0.0 {
            return invalid(format!(
                "population_density can't be negative, got {}",
                self.population_density
            ));
        }
        if self.sensor_width == 0 || self.sensor_width % 2 == 0 {
            return invalid(format!(
                "sensor_width must be odd, got {}",
                self.sensor_width
            ));
        }
        if self.max_chemo <= 0.0 {
            return invalid(format!("max_chemo must be positive, got {}", self.max_chemo));
        }
        if self.population_size() > i32::MAX as usize || self.num_pixels() > i32::MAX as usize {
            return invalid("grid is too large to index with i32 destinations".to_owned());
        }

        Ok(())
    }

    pub fn num_pixels(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn population_size(&self) -> usize {
        (self.num_pixels() as f64 * self.population_density as f64) as usize
    }
}
