//! How much memory the process is using, in megabytes.

use std::fs::read_to_string;

pub trait MemoryProbe {
    fn usage(&mut self) -> u64;
}

/// Reads `VmSize` from `/proc/self/status`; reads 0 where that
/// file does not exist.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProcStatus;

impl MemoryProbe for ProcStatus {
    fn usage(&mut self) -> u64 {
        read_to_string("/proc/self/status")
            .ok()
            .and_then(|status| vm_size(&status))
            .unwrap_or(0)
    }
}

/// A probe that always reads the same value.
#[derive(Clone, Copy, Debug, Default)]
pub struct Fixed(pub u64);

impl MemoryProbe for Fixed {
    fn usage(&mut self) -> u64 {
        self.0
    }
}

/// Parse a `VmSize:  9999 kB` line.
fn vm_size(status: &str) -> Option<u64> {
    let line = status.lines().find(|l| l.starts_with("VmSize:"))?;
    let mut fields = line.split_whitespace().skip(1);
    let value = fields.next()?.parse::<u64>().ok()?;
    match fields.next()? {
        "kB" | "KB" => Some(value / 1024),
        "mB" | "MB" => Some(value),
        _ => None,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn status() {
        let status = "Name:\thorizon\nVmPeak:\t  20480 kB\nVmSize:\t  10240 kB\nVmRSS:\t 512 kB\n";
        assert_eq!(vm_size(status), Some(10));
        assert_eq!(vm_size("VmSize: 7 MB\n"), Some(7));
        assert_eq!(vm_size("VmSize: 7\n"), None);
        assert_eq!(vm_size("Name: x\n"), None);
        assert_eq!(Fixed(3).usage(), 3);
    }
}
