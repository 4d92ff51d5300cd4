// SPDX-License-Identifier: CEPL-1.0
//! Typed failures of the Vulkan backend.

use std::path::PathBuf;

use ash::prelude::VkResult;
use ash::vk;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum InitError {
    #[error("failed to load the Vulkan loader: {0}")]
    Loading(#[from] ash::LoadingError),
    #[error("no Vulkan physical device available")]
    NoPhysicalDevice,
    #[error("device {name} has no graphics queue family")]
    NoGraphicsQueue { name: String },
    #[error("window handle unavailable: {0}")]
    Handle(#[from] raw_window_handle::HandleError),
    #[error(transparent)]
    UnsupportedSurface(#[from] UnsupportedSurfaceError),
    #[error("surface reports no formats")]
    NoSurfaceFormat,
    #[error(transparent)]
    Vulkan(#[from] VkCallError),
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("queue family {queue_family} of {device} cannot present to the window surface")]
pub struct UnsupportedSurfaceError {
    pub device: String,
    pub queue_family: u32,
}

/// A driver call that returned a negative result code.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("{call}: {result:?}")]
pub struct VkCallError {
    pub call: &'static str,
    pub result: vk::Result,
}

#[derive(Debug, Error)]
pub enum ShaderError {
    #[error("reading {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("{name} is not a SPIR-V module: {source}")]
    InvalidSpirv {
        name: String,
        source: std::io::Error,
    },
}

pub(crate) trait VkResultExt<T> {
    /// Tag the error with the name of the failing call.
    fn vk(self, call: &'static str) -> Result<T, VkCallError>;
}

impl<T> VkResultExt<T> for VkResult<T> {
    fn vk(self, call: &'static str) -> Result<T, VkCallError> {
        self.map_err(|result| VkCallError { call, result })
    }
}

pub(crate) trait VkStatusExt {
    /// For status-only calls: positive codes are informational, logged and
    /// dropped. Negative codes stay errors.
    fn status(self, call: &'static str) -> Result<(), VkCallError>;
}

impl VkStatusExt for VkResult<()> {
    fn status(self, call: &'static str) -> Result<(), VkCallError> {
        match self {
            Ok(()) => Ok(()),
            Err(result) if result.as_raw() > 0 => {
                warn!(call, ?result, "informational result ignored");
                Ok(())
            }
            Err(result) => Err(VkCallError { call, result }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_codes_keep_call_name() {
        let r: VkResult<u32> = Err(vk::Result::ERROR_DEVICE_LOST);
        let e = r.vk("queue_submit").unwrap_err();
        assert_eq!(e.call, "queue_submit");
        assert_eq!(e.to_string(), "queue_submit: ERROR_DEVICE_LOST");
    }

    #[test]
    fn positive_status_codes_are_ignored() {
        let r: VkResult<()> = Err(vk::Result::TIMEOUT);
        assert_eq!(r.status("wait_for_fences"), Ok(()));
        let r: VkResult<()> = Err(vk::Result::INCOMPLETE);
        assert_eq!(r.status("enumerate"), Ok(()));
    }

    #[test]
    fn negative_status_codes_are_errors() {
        let r: VkResult<()> = Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
        let e = r.status("device_wait_idle").unwrap_err();
        assert_eq!(e.result, vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
    }

    #[test]
    fn init_error_wraps_surface_failure() {
        let e: InitError = UnsupportedSurfaceError {
            device: "llvmpipe".into(),
            queue_family: 0,
        }
        .into();
        assert!(e.to_string().contains("llvmpipe"));
        assert!(matches!(e, InitError::UnsupportedSurface(_)));
    }
}
