//! # Utility Functions
//!
//! Formatting helpers for human-readable report output and small validation
//! helpers shared by the engine and the benchmark driver.
//!
//! ## Usage Examples
//!
//! ```rust
//! use sbk_perf::config::TimeUnit;
//! use sbk_perf::utils::*;
//!
//! assert_eq!(format_bytes(1536), "1.50 KB");
//! assert_eq!(format_rate(1048576.0), "1.00 MB/s");
//! assert_eq!(format_latency(1500.0, TimeUnit::Microseconds), "1.50ms");
//! ```

use crate::config::TimeUnit;
use crate::error::ConfigError;

/// Format a byte count with binary units
///
/// ## Examples
///
/// ```rust
/// # use sbk_perf::utils::format_bytes;
/// assert_eq!(format_bytes(500), "500 B");
/// assert_eq!(format_bytes(1572864), "1.50 MB");
/// ```
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    if bytes < 1024 {
        return format!("{} B", bytes);
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.2} {}", value, UNITS[unit])
}

/// Format a throughput given in bytes per second
pub fn format_rate(bytes_per_second: f64) -> String {
    if bytes_per_second < 1024.0 {
        format!("{:.2} B/s", bytes_per_second)
    } else if bytes_per_second < 1024.0 * 1024.0 {
        format!("{:.2} KB/s", bytes_per_second / 1024.0)
    } else if bytes_per_second < 1024.0 * 1024.0 * 1024.0 {
        format!("{:.2} MB/s", bytes_per_second / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB/s", bytes_per_second / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a latency expressed in ticks of `unit`
///
/// The value is rescaled to the largest unit that keeps it at or above one,
/// mirroring how durations are displayed elsewhere in reports.
pub fn format_latency(value: f64, unit: TimeUnit) -> String {
    let ns = value * (crate::config::defaults::NS_PER_MS / unit.ticks_per_ms()) as f64;
    if ns < 1_000.0 {
        format!("{:.0}ns", ns)
    } else if ns < 1_000_000.0 {
        format!("{:.2}μs", ns / 1_000.0)
    } else if ns < 1_000_000_000.0 {
        format!("{:.2}ms", ns / 1_000_000.0)
    } else {
        format!("{:.2}s", ns / 1_000_000_000.0)
    }
}

/// Logical CPU cores available to the process
pub fn get_cpu_count() -> usize {
    num_cpus::get()
}

/// Validate the number of workers feeding an engine
pub fn validate_workers(workers: usize) -> Result<(), ConfigError> {
    if workers == 0 {
        return Err(ConfigError::ZeroWorkers);
    }
    Ok(())
}
