//! Central handling of failed GPU calls.
//!
//! Every non-success result from the device is routed through [`ResultHandler::check`]. The handler appends the failure
//! with its source location to a diagnostic file, runs the crash dump hook when the device was lost, and then applies
//! the configured [`FailurePolicy`].

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::panic::Location;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use ash::prelude::VkResult;
use ash::vk;

use crate::Error;

/// What happens after a failure has been logged.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Panic. A frame that cannot be submitted correctly cannot be partially rendered.
    Abort,
    /// Return the error to the caller.
    Propagate,
}

impl Default for FailurePolicy {
    fn default() -> Self {
        if cfg!(debug_assertions) {
            FailurePolicy::Abort
        } else {
            FailurePolicy::Propagate
        }
    }
}

/// Vendor crash dump capture, run when the device is lost and before the failure is escalated.
/// Returns a description of what was captured (usually a path to the dump), which is written to the diagnostic log.
pub trait CrashDumpHook: Send + Sync {
    fn capture(&self) -> Option<String>;
}

impl<F> CrashDumpHook for F
where
    F: Fn() -> Option<String> + Send + Sync,
{
    fn capture(&self) -> Option<String> {
        self()
    }
}

/// Logs failed device calls and escalates them according to the [`FailurePolicy`].
#[derive(Derivative)]
#[derivative(Debug)]
pub struct ResultHandler {
    policy: FailurePolicy,
    path: Option<PathBuf>,
    #[derivative(Debug = "ignore")]
    file: Mutex<Option<File>>,
    #[derivative(Debug = "ignore")]
    crash_dump: Option<Arc<dyn CrashDumpHook>>,
    failures: AtomicUsize,
}

impl ResultHandler {
    /// Create a result handler. If `path` is set, the diagnostic file is opened in append mode (and created if needed).
    pub fn new(policy: FailurePolicy, path: Option<&Path>, crash_dump: Option<Arc<dyn CrashDumpHook>>) -> Result<Self> {
        let file = match path {
            None => None,
            Some(path) => Some(OpenOptions::new().create(true).append(true).open(path)?),
        };
        Ok(Self {
            policy,
            path: path.map(Path::to_path_buf),
            file: Mutex::new(file),
            crash_dump,
            failures: AtomicUsize::new(0),
        })
    }

    /// Path of the diagnostic log, if one is configured.
    pub fn log_path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Number of failures that went through this handler.
    pub fn failure_count(&self) -> usize {
        self.failures.load(Ordering::Relaxed)
    }

    /// Check the result of a device call made during `operation`.
    #[track_caller]
    pub fn check<T>(&self, operation: &'static str, result: VkResult<T>) -> Result<T> {
        match result {
            Ok(value) => Ok(value),
            Err(vk::Result::ERROR_DEVICE_LOST) => {
                let location = Location::caller();
                self.record(operation, location, "VK_ERROR_DEVICE_LOST");
                if let Some(hook) = &self.crash_dump {
                    match hook.capture() {
                        Some(dump) => self.write_line(&format!("crash dump captured: {dump}")),
                        None => self.write_line("crash dump hook captured nothing"),
                    }
                }
                self.escalate_at(Error::DeviceLost(operation), location)
            }
            Err(err) => {
                let location = Location::caller();
                self.record(operation, location, &format!("{err}"));
                self.escalate_at(Error::VkError(err), location)
            }
        }
    }

    /// Escalate a protocol violation or other terminal error detected by the core itself.
    #[track_caller]
    pub fn escalate<T>(&self, error: Error) -> Result<T> {
        let location = Location::caller();
        self.record("protocol", location, &format!("{error}"));
        self.escalate_at(error, location)
    }

    fn escalate_at<T>(&self, error: Error, location: &Location) -> Result<T> {
        match self.policy {
            FailurePolicy::Abort => panic!("fatal GPU synchronization failure at {location}: {error}"),
            FailurePolicy::Propagate => Err(error.into()),
        }
    }

    fn record(&self, operation: &str, location: &Location, what: &str) {
        self.failures.fetch_add(1, Ordering::Relaxed);
        let thread = std::thread::current();
        let line = format!(
            "{operation} failed with {what} at {location} on thread {:?} ({})",
            thread.id(),
            thread.name().unwrap_or("unnamed")
        );
        error!("{line}");
        self.write_line(&line);
    }

    fn write_line(&self, line: &str) {
        let Ok(mut file) = self.file.lock() else {
            return;
        };
        if let Some(file) = file.as_mut() {
            // The diagnostic log is best effort, the failure is already reported through the logger.
            let _ = writeln!(file, "{line}").and_then(|_| file.flush());
        }
    }
}
