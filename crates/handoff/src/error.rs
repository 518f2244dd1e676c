use crate::device::DeviceError;

/// Failures surfaced by the handoff pipeline.
///
/// None of these cross the paint callback boundary; they are handed to a
/// [`DiagnosticsSink`](crate::DiagnosticsSink) instead. Backpressure drops
/// are expected under load and are only counted, see
/// [`HandoffStats`](crate::HandoffStats).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HandoffError {
    /// A resource could not be opened or used right now; the last good frame
    /// stays on screen.
    #[error("transient resource error: {0}")]
    TransientResource(String),
    /// A GPU device became invalid. Held resources are unrecoverable and the
    /// owning device wrapper must be rebuilt.
    #[error("device lost: {0}")]
    DeviceLost(String),
    /// The devices cannot share resources or fences; raster paints only.
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("invalid frame: {0}")]
    InvalidFrame(String),
    #[error("paint callback panicked: {0}")]
    CallbackPanic(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    Transient,
    DeviceLoss,
    Configuration,
    InvalidFrame,
    Panic,
}

impl HandoffError {
    pub fn class(&self) -> ErrorClass {
        match self {
            HandoffError::TransientResource(_) => ErrorClass::Transient,
            HandoffError::DeviceLost(_) => ErrorClass::DeviceLoss,
            HandoffError::Configuration(_) => ErrorClass::Configuration,
            HandoffError::InvalidFrame(_) => ErrorClass::InvalidFrame,
            HandoffError::CallbackPanic(_) => ErrorClass::Panic,
        }
    }

    pub fn is_device_loss(&self) -> bool {
        matches!(self, HandoffError::DeviceLost(_))
    }
}

impl From<DeviceError> for HandoffError {
    fn from(value: DeviceError) -> Self {
        match value {
            DeviceError::Lost(reason) => HandoffError::DeviceLost(reason),
            DeviceError::Unsupported(reason) => HandoffError::Configuration(reason),
            other => HandoffError::TransientResource(other.to_string()),
        }
    }
}
