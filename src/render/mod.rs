pub mod scheduler;

pub use scheduler::{FrameScheduler, GpuJob};
