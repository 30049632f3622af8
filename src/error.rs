//! Error taxonomy and the external error sink.
//!
//! Hardware and GPU failures are caught at the component boundary and
//! reported through [`ErrorSink`]; they never cross into host code as an
//! unhandled fault. Malformed buffer sizes and similar caller bugs are
//! asserted, not reported.

use thiserror::Error;

use crate::camera::{CameraState, Facing};

/// Classification delivered to the host's [`ErrorSink`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Camera access denied or revoked.
    Permission,
    /// Driver exceptions, GPU allocation failure, teardown races.
    Unknown,
}

/// Implemented by the host application. Invoked from whichever internal
/// thread detected the failure, so it must not block.
pub trait ErrorSink: Send + Sync {
    fn on_error(&self, code: ErrorCode);
}

#[derive(Debug, Error)]
pub enum CameraError {
    #[error("camera access denied: {0}")]
    Permission(String),
    #[error("no {0:?} camera on this device")]
    MissingFacing(Facing),
    #[error("camera hardware failure: {0}")]
    Hardware(String),
    #[error("operation invalid in state {0:?}")]
    InvalidState(CameraState),
}

impl CameraError {
    pub fn code(&self) -> ErrorCode {
        match self {
            CameraError::Permission(_) => ErrorCode::Permission,
            _ => ErrorCode::Unknown,
        }
    }
}

#[derive(Debug, Error)]
pub enum GpuError {
    #[error("no suitable GPU adapter found")]
    NoAdapter,
    #[error("failed to acquire GPU device: {0}")]
    DeviceRequest(String),
    #[error("GPU allocation failed: {0}")]
    Allocation(String),
    #[error("render pass failed: {0}")]
    Draw(String),
    #[error("pixel readback failed: {0}")]
    Readback(String),
    #[error("surface error: {0}")]
    Surface(String),
}
