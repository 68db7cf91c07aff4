//! Fringe pattern generation and projector pattern sets.

mod fringe;
mod pattern_set;

pub use fringe::{FringeGenerator, FringeParams, FringePattern, NoiseSource, Orientation};
pub use pattern_set::{partition_sets, Illumination, PatternSet, PatternTiming};
