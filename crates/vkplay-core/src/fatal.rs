// SPDX-License-Identifier: CEPL-1.0
//! Unrecoverable-error policy.
//!
//! Bring-up code treats driver failures as fatal: log where it happened and
//! stop. The policy is a trait so an embedding process can swap the default
//! abort for an unwind it can catch and shut down from.

use std::panic::Location;
use thiserror::Error;

/// Payload carried by [`PanicOnFatal`] panics.
#[derive(Debug, Clone, Error)]
#[error("fatal error at {location}: {message}")]
pub struct FatalError {
    pub location: String,
    pub message: String,
}

pub trait FatalHandler: Send + Sync {
    fn fatal(&self, location: &'static Location<'static>, message: &str) -> !;
}

/// Logs the error with its source location, then aborts the process.
#[derive(Debug, Default, Clone, Copy)]
pub struct AbortOnFatal;

impl FatalHandler for AbortOnFatal {
    fn fatal(&self, location: &'static Location<'static>, message: &str) -> ! {
        tracing::error!("[FATAL: {location}] {message}");
        eprintln!("[FATAL: {location}] {message}");
        std::process::abort()
    }
}

/// Logs, then unwinds with a [`FatalError`] payload.
#[derive(Debug, Default, Clone, Copy)]
pub struct PanicOnFatal;

impl FatalHandler for PanicOnFatal {
    fn fatal(&self, location: &'static Location<'static>, message: &str) -> ! {
        tracing::error!("[FATAL: {location}] {message}");
        std::panic::panic_any(FatalError {
            location: location.to_string(),
            message: message.to_owned(),
        })
    }
}

/// Routes an `Err` to a [`FatalHandler`], recording the caller's location.
pub trait OrFatal<T> {
    fn or_fatal(self, handler: &dyn FatalHandler) -> T;
}

impl<T, E> OrFatal<T> for Result<T, E>
where
    E: Into<anyhow::Error>,
{
    #[track_caller]
    fn or_fatal(self, handler: &dyn FatalHandler) -> T {
        match self {
            Ok(v) => v,
            Err(e) => {
                let e: anyhow::Error = e.into();
                handler.fatal(Location::caller(), &format!("{e:#}"))
            }
        }
    }
}
