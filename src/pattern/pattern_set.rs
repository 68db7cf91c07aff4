//! Pattern sets uploaded to the projector's pattern table.

use serde::{Deserialize, Serialize};

use super::fringe::{FringePattern, Orientation};
use crate::error::{ScanError, ScanResult};

/// LED channel used to illuminate a pattern set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Illumination {
    Red,
    Green,
    #[default]
    Blue,
    /// All channels together.
    White,
}

/// Exposure window programmed for every pattern of a set, in microseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternTiming {
    pub exposure_us: u32,
    pub pre_exposure_us: u32,
    pub post_exposure_us: u32,
}

impl Default for PatternTiming {
    fn default() -> Self {
        Self {
            exposure_us: 4000,
            pre_exposure_us: 3000,
            post_exposure_us: 3000,
        }
    }
}

impl PatternTiming {
    /// Full programmed window (pre + exposure + post).
    pub fn window_us(&self) -> u64 {
        self.pre_exposure_us as u64 + self.exposure_us as u64 + self.post_exposure_us as u64
    }
}

/// A group of patterns sharing timing and illumination.
#[derive(Debug, Clone)]
pub struct PatternSet {
    pub timing: PatternTiming,
    pub illumination: Illumination,
    pub invert: bool,
    pub orientation: Orientation,
    pub one_bit: bool,
    /// Resolution along the phase axis (width for vertical, height for horizontal).
    pub array_count: u32,
    pub patterns: Vec<FringePattern>,
}

impl PatternSet {
    pub fn is_vertical(&self) -> bool {
        self.orientation == Orientation::Vertical
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

/// Split a generated 2N sequence into the vertical and horizontal sets.
pub fn partition_sets(
    patterns: Vec<FringePattern>,
    steps: usize,
    vertical_timing: PatternTiming,
    horizontal_timing: PatternTiming,
    illumination: Illumination,
) -> ScanResult<[PatternSet; 2]> {
    if steps == 0 || patterns.len() != steps * 2 {
        return Err(ScanError::Validation(format!(
            "expected {} patterns for {} steps, got {}",
            steps * 2,
            steps,
            patterns.len()
        )));
    }

    let (width, height) = patterns[0].image.dimensions();
    let mut vertical = patterns;
    let horizontal = vertical.split_off(steps);

    let misplaced = vertical
        .iter()
        .any(|p| p.orientation != Orientation::Vertical)
        || horizontal
            .iter()
            .any(|p| p.orientation != Orientation::Horizontal);
    if misplaced {
        return Err(ScanError::Validation(
            "pattern sequence must be vertical patterns followed by horizontal".into(),
        ));
    }

    Ok([
        PatternSet {
            timing: vertical_timing,
            illumination,
            invert: false,
            orientation: Orientation::Vertical,
            one_bit: false,
            array_count: width,
            patterns: vertical,
        },
        PatternSet {
            timing: horizontal_timing,
            illumination,
            invert: false,
            orientation: Orientation::Horizontal,
            one_bit: false,
            array_count: height,
            patterns: horizontal,
        },
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::{FringeGenerator, FringeParams};

    fn sequence(steps: u32) -> Vec<FringePattern> {
        let params = FringeParams {
            width: 12,
            height: 6,
            steps,
            ..FringeParams::default()
        };
        FringeGenerator::new(params).unwrap().generate()
    }

    #[test]
    fn test_partition_counts_and_metadata() {
        let vertical_timing = PatternTiming {
            exposure_us: 8000,
            ..PatternTiming::default()
        };
        let [vertical, horizontal] = partition_sets(
            sequence(3),
            3,
            vertical_timing,
            PatternTiming::default(),
            Illumination::Blue,
        )
        .unwrap();

        assert_eq!(vertical.len(), 3);
        assert_eq!(horizontal.len(), 3);
        assert!(vertical.is_vertical());
        assert!(!horizontal.is_vertical());
        assert_eq!(vertical.array_count, 12);
        assert_eq!(horizontal.array_count, 6);
        assert_eq!(vertical.timing.exposure_us, 8000);
        assert_eq!(horizontal.timing.window_us(), 10_000);
    }

    #[test]
    fn test_partition_rejects_wrong_count() {
        let mut patterns = sequence(2);
        patterns.pop();
        let result = partition_sets(
            patterns,
            2,
            PatternTiming::default(),
            PatternTiming::default(),
            Illumination::Blue,
        );
        assert!(matches!(result, Err(ScanError::Validation(_))));
    }
}
