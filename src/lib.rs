//! Phase-Shift Fringe Capture
//!
//! Structured light acquisition with a stepped pattern projector and a
//! software-triggered camera:
//! - Sinusoidal fringe generation (vertical and horizontal phase steps)
//! - Camera parameter clamping against live device ranges
//! - Step / stabilize / trigger / await synchronisation loop
//! - Asynchronous frame persistence as 8-bit PNG

pub mod acquisition;
pub mod camera;
pub mod capture;
pub mod config;
pub mod device;
pub mod error;
pub mod pattern;
