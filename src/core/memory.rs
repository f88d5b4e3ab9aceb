//! Memory usage of the current process, read from `/proc/self/status`.

use std::fs;

/// Resident set size in bytes.
pub fn current_memory() -> u64 {
    read_status_kib("VmRSS:").map_or(0, |kib| kib * 1024)
}

/// Peak resident set size in bytes, falling back to the current size.
pub fn peak_memory() -> u64 {
    read_status_kib("VmHWM:")
        .or_else(|| read_status_kib("VmRSS:"))
        .map_or(0, |kib| kib * 1024)
}

#[cfg(target_os = "linux")]
fn read_status_kib(field: &str) -> Option<u64> {
    let contents = fs::read_to_string("/proc/self/status").ok()?;
    parse_status_kib(&contents, field)
}

#[cfg(not(target_os = "linux"))]
fn read_status_kib(_field: &str) -> Option<u64> {
    None
}

fn parse_status_kib(contents: &str, field: &str) -> Option<u64> {
    contents
        .lines()
        .find(|line| line.starts_with(field))
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|kib| kib.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_status_fields() {
        let status = "Name:\tworker\nVmHWM:\t   20480 kB\nVmRSS:\t   10240 kB\n";
        assert_eq!(parse_status_kib(status, "VmHWM:"), Some(20480));
        assert_eq!(parse_status_kib(status, "VmRSS:"), Some(10240));
        assert_eq!(parse_status_kib(status, "VmSwap:"), None);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn reads_own_memory() {
        assert!(current_memory() > 0);
        assert!(peak_memory() >= current_memory());
    }
}
