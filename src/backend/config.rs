//! Backend configuration
//!
//! [`BackendConfig`] selects the execution backend and sizes the emulation
//! worker pool. It is built programmatically or from environment variables:
//!
//! - `MEMFORGE_BACKEND`: `native`, `threads` or `fibers`
//! - `MEMFORGE_WORKERS`: number of emulation workers (> 0)
//! - `MEMFORGE_SENTINEL_FILL`: fill fresh allocations with a sentinel pattern
//! - `MEMFORGE_EMULATED_DEVICES`: number of devices the emulation reports

use std::fmt;

use crate::error::{MemError, MemResult};

const BACKEND_ENV: &str = "MEMFORGE_BACKEND";
const WORKERS_ENV: &str = "MEMFORGE_WORKERS";
const SENTINEL_ENV: &str = "MEMFORGE_SENTINEL_FILL";
const DEVICES_ENV: &str = "MEMFORGE_EMULATED_DEVICES";

/// Which execution backend is active
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// Discrete accelerator through the HIP runtime
    Native,
    /// Accelerator emulated on a pool of OS threads
    CpuThreads,
    /// Accelerator emulated with cooperative lanes on the calling thread
    Fibers,
}

impl BackendKind {
    /// True for both emulation modes
    pub fn is_emulation(self) -> bool {
        !matches!(self, BackendKind::Native)
    }

    /// Parse from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "native" | "rocm" | "hip" => Some(BackendKind::Native),
            "threads" | "cpu-threads" | "cpu" | "openmp" => Some(BackendKind::CpuThreads),
            "fibers" | "sequential" | "seq" => Some(BackendKind::Fibers),
            _ => None,
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Native => write!(f, "native"),
            BackendKind::CpuThreads => write!(f, "cpu-threads"),
            BackendKind::Fibers => write!(f, "fibers"),
        }
    }
}

/// Configuration for the execution backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendConfig {
    /// Backend to build
    pub kind: BackendKind,

    /// Parallel workers for the emulation backends
    pub workers: usize,

    /// Fill freshly allocated device memory with `SENTINEL_BYTE`
    pub sentinel_fill: bool,

    /// Devices reported by the emulation backends
    pub emulated_devices: usize,
}

impl Default for BackendConfig {
    fn default() -> Self {
        BackendConfig {
            kind: BackendKind::CpuThreads,
            workers: default_workers(),
            sentinel_fill: cfg!(debug_assertions),
            emulated_devices: 1,
        }
    }
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

impl BackendConfig {
    /// Create a new backend config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Default config for the given backend
    pub fn for_kind(kind: BackendKind) -> Self {
        Self::default().with_kind(kind)
    }

    /// Set backend kind
    pub fn with_kind(mut self, kind: BackendKind) -> Self {
        self.kind = kind;
        self
    }

    /// Set emulation worker count
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Enable or disable sentinel fill of fresh allocations
    pub fn with_sentinel_fill(mut self, sentinel_fill: bool) -> Self {
        self.sentinel_fill = sentinel_fill;
        self
    }

    /// Set number of emulated devices
    pub fn with_emulated_devices(mut self, emulated_devices: usize) -> Self {
        self.emulated_devices = emulated_devices;
        self
    }

    /// Build a config from `MEMFORGE_*` environment variables, falling back
    /// to defaults for unset ones
    pub fn from_env() -> MemResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> MemResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(value) = lookup(BACKEND_ENV) {
            config.kind = BackendKind::from_str(&value).ok_or_else(|| {
                MemError::InvalidConfiguration(format!("{}={}", BACKEND_ENV, value))
            })?;
        }
        if let Some(value) = lookup(WORKERS_ENV) {
            config.workers = parse_count(WORKERS_ENV, &value)?;
        }
        if let Some(value) = lookup(SENTINEL_ENV) {
            config.sentinel_fill = parse_flag(SENTINEL_ENV, &value)?;
        }
        if let Some(value) = lookup(DEVICES_ENV) {
            config.emulated_devices = value.trim().parse().map_err(|_| {
                MemError::InvalidConfiguration(format!("{}={}", DEVICES_ENV, value))
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check value ranges
    pub fn validate(&self) -> MemResult<()> {
        if self.workers == 0 {
            return Err(MemError::InvalidConfiguration(
                "worker count must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_count(key: &str, value: &str) -> MemResult<usize> {
    match value.trim().parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(MemError::InvalidConfiguration(format!("{}={}", key, value))),
    }
}

fn parse_flag(key: &str, value: &str) -> MemResult<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(MemError::InvalidConfiguration(format!("{}={}", key, value))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_backend_config_default() {
        let config = BackendConfig::default();
        assert_eq!(config.kind, BackendKind::CpuThreads);
        assert!(config.workers >= 1);
        assert_eq!(config.emulated_devices, 1);
    }

    #[test]
    fn test_backend_config_builder() {
        let config = BackendConfig::new()
            .with_kind(BackendKind::Fibers)
            .with_workers(3)
            .with_sentinel_fill(true)
            .with_emulated_devices(2);

        assert_eq!(config.kind, BackendKind::Fibers);
        assert_eq!(config.workers, 3);
        assert!(config.sentinel_fill);
        assert_eq!(config.emulated_devices, 2);
    }

    #[test]
    fn test_backend_kind_from_str() {
        assert_eq!(BackendKind::from_str("native"), Some(BackendKind::Native));
        assert_eq!(BackendKind::from_str("Threads"), Some(BackendKind::CpuThreads));
        assert_eq!(BackendKind::from_str("fibers"), Some(BackendKind::Fibers));
        assert_eq!(BackendKind::from_str("gpu-ish"), None);
        assert!(BackendKind::Fibers.is_emulation());
        assert!(!BackendKind::Native.is_emulation());
    }

    #[test]
    fn test_from_lookup() {
        let config = BackendConfig::from_lookup(lookup(&[
            ("MEMFORGE_BACKEND", "fibers"),
            ("MEMFORGE_WORKERS", "4"),
            ("MEMFORGE_SENTINEL_FILL", "yes"),
            ("MEMFORGE_EMULATED_DEVICES", "0"),
        ]))
        .unwrap();

        assert_eq!(config.kind, BackendKind::Fibers);
        assert_eq!(config.workers, 4);
        assert!(config.sentinel_fill);
        assert_eq!(config.emulated_devices, 0);
    }

    #[test]
    fn test_from_lookup_rejects_bad_values() {
        let err = BackendConfig::from_lookup(lookup(&[("MEMFORGE_WORKERS", "0")])).unwrap_err();
        assert!(matches!(err, MemError::InvalidConfiguration(_)));

        let err = BackendConfig::from_lookup(lookup(&[("MEMFORGE_BACKEND", "quantum")])).unwrap_err();
        assert!(err.to_string().contains("quantum"));

        let err =
            BackendConfig::from_lookup(lookup(&[("MEMFORGE_SENTINEL_FILL", "maybe")])).unwrap_err();
        assert!(matches!(err, MemError::InvalidConfiguration(_)));
    }
}
