//! Frame delivery, persistence and completion signalling.

mod mailbox;
mod sink;

pub use mailbox::Mailbox;
pub use sink::{
    frame_file_name, CapturedFrame, DeliveryOutcome, FrameEvent, FrameSink, SinkStats,
    VerificationReport,
};
