// nllb-sidecar: memory probe (spec.md §4.1)
//
// RAM/swap/process RSS go through `sysinfo`. VRAM is behind a trait since
// GPU driver bindings are out of scope; the default implementation
// reports no GPU present, which callers treat as "CPU-only host".

use std::fs;

use sysinfo::{Pid, System};

/// A GPU memory source. The real NVML/driver binding is out of scope of
/// this sidecar; production deployments provide their own implementation
/// and wire it in, the same way `Translator` is supplied externally.
pub trait VramProbe: Send + Sync {
    /// Returns `(used_mb, total_mb)` for the primary GPU, or `None` if
    /// no GPU is present/visible to this process.
    fn read(&self) -> Option<(f64, f64)>;

    fn gpu_name(&self) -> Option<String> {
        None
    }
}

/// No GPU visible. The default probe used unless a real backend is
/// plugged in.
pub struct NoGpu;

impl VramProbe for NoGpu {
    fn read(&self) -> Option<(f64, f64)> {
        None
    }
}

/// Samples host memory (RAM, swap) and process RSS via `sysinfo`, and
/// GPU memory via a pluggable `VramProbe`.
pub struct MemoryProbe {
    sys: System,
    pid: Pid,
    vram: Box<dyn VramProbe>,
}

impl MemoryProbe {
    pub fn new(vram: Box<dyn VramProbe>) -> Self {
        let mut sys = System::new();
        sys.refresh_memory();
        let pid = sysinfo::get_current_pid().unwrap_or(Pid::from(0));
        Self { sys, pid, vram }
    }

    /// Total host RAM, in MB.
    pub fn ram_total_mb(&mut self) -> f64 {
        self.sys.refresh_memory();
        bytes_to_mb(self.sys.total_memory())
    }

    /// Available (not just free) RAM, in MB — matches `/proc/meminfo`'s
    /// `MemAvailable`.
    pub fn ram_available_mb(&mut self) -> f64 {
        self.sys.refresh_memory();
        bytes_to_mb(self.sys.available_memory())
    }

    /// System-wide swap currently used, in MB.
    pub fn swap_used_mb(&mut self) -> f64 {
        self.sys.refresh_memory();
        bytes_to_mb(self.sys.used_swap())
    }

    /// This process's resident set size, in MB.
    pub fn process_rss_mb(&mut self) -> f64 {
        self.sys.refresh_processes(sysinfo::ProcessesToUpdate::Some(&[self.pid]), true);
        self.sys
            .process(self.pid)
            .map(|p| bytes_to_mb(p.memory()))
            .unwrap_or(0.0)
    }

    /// This process's own swap usage, in MB, read from
    /// `/proc/self/status` (`VmSwap`) — `sysinfo` does not expose
    /// per-process swap.
    pub fn process_swap_mb(&self) -> f64 {
        parse_proc_self_status_vmswap_kb()
            .map(|kb| kb as f64 / 1024.0)
            .unwrap_or(0.0)
    }

    pub fn vram_mb(&self) -> Option<(f64, f64)> {
        self.vram.read()
    }

    pub fn gpu_name(&self) -> Option<String> {
        self.vram.gpu_name()
    }
}

fn bytes_to_mb(bytes: u64) -> f64 {
    bytes as f64 / (1024.0 * 1024.0)
}

fn parse_proc_self_status_vmswap_kb() -> Option<u64> {
    let content = fs::read_to_string("/proc/self/status").ok()?;
    for line in content.lines() {
        if let Some(rest) = line.strip_prefix("VmSwap:") {
            return rest.trim().trim_end_matches(" kB").trim().parse().ok();
        }
    }
    None
}

/// Total swap configured on the host, in MB. Used once at startup to
/// establish a baseline so the hard swap limit compares a delta rather
/// than an absolute value (a host with pre-existing swap use shouldn't
/// immediately trip the hard limit).
pub fn swap_total_and_free_mb() -> (f64, f64) {
    let content = match fs::read_to_string("/proc/meminfo") {
        Ok(c) => c,
        Err(_) => return (0.0, 0.0),
    };
    let mut total_kb = 0u64;
    let mut free_kb = 0u64;
    for line in content.lines() {
        if let Some(rest) = line.strip_prefix("SwapTotal:") {
            total_kb = rest.trim().trim_end_matches(" kB").trim().parse().unwrap_or(0);
        } else if let Some(rest) = line.strip_prefix("SwapFree:") {
            free_kb = rest.trim().trim_end_matches(" kB").trim().parse().unwrap_or(0);
        }
    }
    (total_kb as f64 / 1024.0, free_kb as f64 / 1024.0)
}

/// CPU instruction-set features relevant to CPU inference throughput.
#[derive(Debug, Clone, Copy, Default, serde::Serialize, serde::Deserialize)]
pub struct CpuFeatures {
    pub avx2: bool,
    pub avx512: bool,
    pub avx512_bf16: bool,
}

pub fn detect_cpu_features() -> CpuFeatures {
    let content = fs::read_to_string("/proc/cpuinfo").unwrap_or_default();
    let flags_line = content
        .lines()
        .find(|l| l.starts_with("flags") || l.starts_with("Features"))
        .unwrap_or("");
    CpuFeatures {
        avx2: flags_line.contains("avx2"),
        avx512: flags_line.contains("avx512f"),
        avx512_bf16: flags_line.contains("avx512_bf16") || flags_line.contains("avx512bf16"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_gpu_probe_reports_absent() {
        let probe = MemoryProbe::new(Box::new(NoGpu));
        assert_eq!(probe.vram_mb(), None);
    }

    #[test]
    fn ram_total_is_positive_on_any_host() {
        let mut probe = MemoryProbe::new(Box::new(NoGpu));
        assert!(probe.ram_total_mb() > 0.0);
    }
}
