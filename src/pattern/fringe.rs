//! Phase-shift fringe pattern generation for structured light scanning.

use image::GrayImage;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use std::f64::consts::TAU;

use crate::error::{ScanError, ScanResult};

/// Direction in which the fringe phase varies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Orientation {
    /// Stripes run vertically, phase varies along X.
    Vertical,
    /// Stripes run horizontally, phase varies along Y.
    Horizontal,
}

impl Orientation {
    /// Orientation of the 1-based frame `index` in a scan of `steps` phase steps.
    ///
    /// The first `steps` frames are vertical, the rest horizontal.
    pub fn for_frame(index: usize, steps: usize) -> Self {
        if index <= steps {
            Orientation::Vertical
        } else {
            Orientation::Horizontal
        }
    }

    /// Single letter tag used in file names.
    pub fn tag(self) -> char {
        match self {
            Orientation::Vertical => 'V',
            Orientation::Horizontal => 'H',
        }
    }
}

/// A single generated fringe image.
#[derive(Debug, Clone)]
pub struct FringePattern {
    /// Grayscale pixels.
    pub image: GrayImage,
    /// Fringe orientation.
    pub orientation: Orientation,
    /// Phase step index in `[0, steps)`.
    pub phase_step: u32,
}

/// Parameters of the fringe sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FringeParams {
    /// Image width, must match the projector DMD width.
    pub width: u32,
    /// Image height, must match the projector DMD height.
    pub height: u32,
    /// Number of sine periods across the image.
    pub frequency: u32,
    /// Sine amplitude, clamped to `[0, 255]`.
    pub intensity: i32,
    /// DC bias, clamped to `[0, 255]`.
    pub offset: i32,
    /// Standard deviation of additive Gaussian noise (0 disables noise).
    pub noise_std: f64,
    /// Phase steps per orientation.
    pub steps: u32,
    /// Seed for reproducible noise.
    pub noise_seed: Option<u64>,
}

impl Default for FringeParams {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            frequency: 32,
            intensity: 100,
            offset: 128,
            noise_std: 0.0,
            steps: 4,
            noise_seed: None,
        }
    }
}

impl FringeParams {
    /// Check the parameters that make generation impossible.
    pub fn validate(&self) -> ScanResult<()> {
        if self.width == 0 || self.height == 0 {
            return Err(ScanError::Validation(format!(
                "pattern size must be positive, got {}x{}",
                self.width, self.height
            )));
        }
        if self.frequency == 0 {
            return Err(ScanError::Validation("frequency must be positive".into()));
        }
        if self.steps == 0 {
            return Err(ScanError::Validation("steps must be at least 1".into()));
        }
        if !self.noise_std.is_finite() || self.noise_std < 0.0 {
            return Err(ScanError::Validation(format!(
                "noise_std must be a non-negative number, got {}",
                self.noise_std
            )));
        }
        Ok(())
    }

    /// Total number of images in the sequence (2N).
    pub fn total_frames(&self) -> usize {
        self.steps as usize * 2
    }
}

/// Phase-shift fringe generator.
pub struct FringeGenerator {
    params: FringeParams,
    intensity: f64,
    offset: f64,
}

impl FringeGenerator {
    pub fn new(params: FringeParams) -> ScanResult<Self> {
        params.validate()?;
        let intensity = params.intensity.clamp(0, 255) as f64;
        let offset = params.offset.clamp(0, 255) as f64;
        Ok(Self {
            params,
            intensity,
            offset,
        })
    }

    pub fn params(&self) -> &FringeParams {
        &self.params
    }

    /// Generate the full sequence: N vertical patterns then N horizontal.
    pub fn generate(&self) -> Vec<FringePattern> {
        let mut noise = self.noise_source();
        let mut patterns = Vec::with_capacity(self.params.total_frames());

        for orientation in [Orientation::Vertical, Orientation::Horizontal] {
            for step in 0..self.params.steps {
                patterns.push(self.generate_pattern(orientation, step, noise.as_mut()));
            }
        }

        log::debug!(
            "Generated {} fringe patterns ({}x{}, {} steps, frequency {})",
            patterns.len(),
            self.params.width,
            self.params.height,
            self.params.steps,
            self.params.frequency
        );

        patterns
    }

    /// Generate one pattern.
    pub fn generate_pattern(
        &self,
        orientation: Orientation,
        step: u32,
        mut noise: Option<&mut NoiseSource>,
    ) -> FringePattern {
        let width = self.params.width as usize;
        let height = self.params.height as usize;
        let phase = TAU * step as f64 / self.params.steps as f64;
        let mut data = vec![0u8; width * height];

        match orientation {
            Orientation::Vertical => {
                // Phase is constant down a column.
                let base_row: Vec<f64> = (0..width)
                    .map(|x| self.wave(x as f64 / width as f64, phase))
                    .collect();
                for row in data.chunks_exact_mut(width) {
                    for (pixel, &value) in row.iter_mut().zip(&base_row) {
                        let jitter = noise.as_deref_mut().map_or(0.0, NoiseSource::sample);
                        *pixel = quantize(value + jitter);
                    }
                }
            }
            Orientation::Horizontal => {
                for (y, row) in data.chunks_exact_mut(width).enumerate() {
                    let jitter = noise.as_deref_mut().map_or(0.0, NoiseSource::sample);
                    let value = quantize(self.wave(y as f64 / height as f64, phase) + jitter);
                    row.fill(value);
                }
            }
        }

        let image = GrayImage::from_raw(self.params.width, self.params.height, data)
            .unwrap_or_else(|| GrayImage::new(self.params.width, self.params.height));

        FringePattern {
            image,
            orientation,
            phase_step: step,
        }
    }

    fn wave(&self, t: f64, phase: f64) -> f64 {
        self.offset + self.intensity * (TAU * self.params.frequency as f64 * t + phase).sin()
    }

    fn noise_source(&self) -> Option<NoiseSource> {
        if self.params.noise_std > 0.0 {
            NoiseSource::new(self.params.noise_std, self.params.noise_seed)
        } else {
            None
        }
    }
}

/// Gaussian noise sampler.
pub struct NoiseSource {
    rng: StdRng,
    dist: Normal<f64>,
}

impl NoiseSource {
    pub fn new(std_dev: f64, seed: Option<u64>) -> Option<Self> {
        let dist = Normal::new(0.0, std_dev).ok()?;
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Some(Self { rng, dist })
    }

    pub fn sample(&mut self) -> f64 {
        self.dist.sample(&mut self.rng)
    }
}

fn quantize(value: f64) -> u8 {
    value.clamp(0.0, 255.0).round() as u8
}
