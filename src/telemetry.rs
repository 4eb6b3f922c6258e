//! Free-memory observations.
//!
//! Diagnostic side channel only: nothing in the server changes behavior based on these
//! numbers.

/// Free bytes in one memory pool.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemoryPool {
    pub name: &'static str,
    pub free_bytes: u64,
}

/// Source of memory pool readings.
pub trait MemoryProbe: Send + Sync {
    fn pools(&self) -> Vec<MemoryPool>;
}

/// Host memory via `sysinfo(2)`: pools `ram` and `swap`.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemMemoryProbe;

impl MemoryProbe for SystemMemoryProbe {
    #[cfg(target_os = "linux")]
    fn pools(&self) -> Vec<MemoryPool> {
        // SAFETY: sysinfo only writes into the struct we hand it.
        let mut info: libc::sysinfo = unsafe { std::mem::zeroed() };
        if unsafe { libc::sysinfo(&mut info) } != 0 {
            return Vec::new();
        }
        let unit = u64::from(info.mem_unit.max(1));
        vec![
            MemoryPool {
                name: "ram",
                free_bytes: (info.freeram as u64).saturating_mul(unit),
            },
            MemoryPool {
                name: "swap",
                free_bytes: (info.freeswap as u64).saturating_mul(unit),
            },
        ]
    }

    #[cfg(not(target_os = "linux"))]
    fn pools(&self) -> Vec<MemoryPool> {
        Vec::new()
    }
}

/// Render pools as `ram=<bytes> swap=<bytes>`.
pub fn format_pools(pools: &[MemoryPool]) -> String {
    if pools.is_empty() {
        return "unavailable".to_string();
    }
    pools
        .iter()
        .map(|pool| format!("{}={}", pool.name, pool.free_bytes))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Take one observation and log it at info level. The probe is read even when info
/// logging is disabled; the observation is returned to the caller.
pub fn log_memory(probe: &dyn MemoryProbe) -> Vec<MemoryPool> {
    let pools = probe.pools();
    log::info!("memory free: {}", format_pools(&pools));
    pools
}
