// SPDX-License-Identifier: CEPL-1.0
//! Vulkan (ash) implementation of the frame backend.
//!
//! Construction order: [`DeviceContext`] → [`VkBackend`] (surface binding and
//! triangle pipeline) → swapchain on the first `rebuild`. Teardown runs in
//! reverse through `Drop`.

pub mod backend;
pub mod buffer;
pub mod device;
pub mod error;
pub mod pipeline;
pub mod surface;
pub mod swapchain;

pub use ash;
pub use backend::VkBackend;
pub use device::{DeviceContext, DeviceLimits, DeviceOptions, DeviceSummary};
pub use error::{InitError, ShaderError, UnsupportedSurfaceError, VkCallError};
pub use pipeline::ShaderSet;
pub use surface::SurfaceBinding;
