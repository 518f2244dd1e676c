//! Driver and runtime compatibility quirks around opening shared resources.
//!
//! Everything version dependent about opening a shared texture on the host
//! device lives in this module. Call sites go through [`ResourceOpenPath::open`]
//! and never look at runtime versions themselves.

use std::fmt;

use crate::device::{DeviceCapabilities, DeviceError, HostDevice, SharedHandle, TextureDesc};

/// Version of the host graphics runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct RuntimeVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl RuntimeVersion {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl fmt::Display for RuntimeVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Entry point used to open a shared handle on the host device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpenApi {
    Legacy,
    /// The "open shared resource 1" family, required for NT handles.
    Versioned,
}

/// First runtime version whose texture wrapper takes an extra native
/// reference when adopting a resource opened through the versioned API.
pub const REFERENCE_FIX_SINCE: RuntimeVersion = RuntimeVersion::new(4, 2, 0);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceOpenPath {
    Legacy,
    Versioned,
    /// Versioned open followed by releasing the reference the host wrapper
    /// adds on adoption; without it every opened frame leaks.
    VersionedWithReferenceFix,
}

impl ResourceOpenPath {
    pub fn detect(caps: DeviceCapabilities, version: RuntimeVersion) -> Self {
        if !caps.versioned_open {
            ResourceOpenPath::Legacy
        } else if version >= REFERENCE_FIX_SINCE {
            ResourceOpenPath::VersionedWithReferenceFix
        } else {
            ResourceOpenPath::Versioned
        }
    }

    pub fn api(self) -> OpenApi {
        match self {
            ResourceOpenPath::Legacy => OpenApi::Legacy,
            ResourceOpenPath::Versioned | ResourceOpenPath::VersionedWithReferenceFix => {
                OpenApi::Versioned
            }
        }
    }

    pub fn open<H: HostDevice + ?Sized>(
        self,
        host: &mut H,
        handle: SharedHandle,
        desc: &TextureDesc,
    ) -> Result<H::Surface, DeviceError> {
        let surface = host.open_shared(handle, desc, self.api())?;
        if self == ResourceOpenPath::VersionedWithReferenceFix {
            host.release_reference(&surface);
        }
        Ok(surface)
    }
}
