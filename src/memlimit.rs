//! Memory limiter gate.
//!
//! Runs before auth/decoding so that rejecting a request under pressure does
//! not itself allocate. Heap sampling is jemalloc-based (`tikv-jemalloc-ctl`)
//! everywhere except Windows, where jemalloc isn't available and we fall
//! back to `sysinfo`'s process RSS.

use crate::config::MemoryConfig;
use crate::error::IngestError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admit,
    RejectSoft,
    RejectHard,
}

/// Samples current heap usage and applies the soft/hard thresholds.
pub trait MemorySampler: Send + Sync {
    fn sample_bytes(&self) -> Result<u64, IngestError>;
}

pub struct MemoryLimiter<S: MemorySampler> {
    sampler: S,
    config: MemoryConfig,
}

impl<S: MemorySampler> MemoryLimiter<S> {
    pub fn new(sampler: S, config: MemoryConfig) -> Self {
        Self { sampler, config }
    }

    /// Hard limit first, then soft limit, else admit.
    pub fn check(&self) -> Result<Admission, IngestError> {
        let used = self.sampler.sample_bytes()?;
        if used > self.config.hard_limit_bytes() {
            Ok(Admission::RejectHard)
        } else if used > self.config.soft_limit_bytes() {
            Ok(Admission::RejectSoft)
        } else {
            Ok(Admission::Admit)
        }
    }

    /// Convenience wrapper returning the crate's error taxonomy.
    pub fn admit(&self) -> Result<(), IngestError> {
        match self.check()? {
            Admission::Admit => Ok(()),
            Admission::RejectSoft => Err(IngestError::OverCapacity("soft limit")),
            Admission::RejectHard => Err(IngestError::OverCapacity("hard limit")),
        }
    }
}

#[cfg(not(windows))]
pub struct JemallocSampler {
    epoch: tikv_jemalloc_ctl::epoch_mib,
    allocated: tikv_jemalloc_ctl::stats::allocated_mib,
}

#[cfg(not(windows))]
impl JemallocSampler {
    pub fn new() -> Result<Self, IngestError> {
        let epoch = tikv_jemalloc_ctl::epoch::mib()
            .map_err(|e| IngestError::Internal(format!("jemalloc epoch mib: {e}")))?;
        let allocated = tikv_jemalloc_ctl::stats::allocated::mib()
            .map_err(|e| IngestError::Internal(format!("jemalloc allocated mib: {e}")))?;
        Ok(Self { epoch, allocated })
    }
}

#[cfg(not(windows))]
impl MemorySampler for JemallocSampler {
    fn sample_bytes(&self) -> Result<u64, IngestError> {
        self.epoch
            .advance()
            .map_err(|e| IngestError::Internal(format!("jemalloc epoch advance: {e}")))?;
        let bytes = self
            .allocated
            .read()
            .map_err(|e| IngestError::Internal(format!("jemalloc read: {e}")))?;
        Ok(bytes as u64)
    }
}

/// `sysinfo`-backed fallback: process-wide resident set size.
pub struct SysinfoSampler {
    system: std::sync::Mutex<sysinfo::System>,
    pid: sysinfo::Pid,
}

impl SysinfoSampler {
    pub fn new() -> Self {
        let pid = sysinfo::Pid::from_u32(std::process::id());
        let mut system = sysinfo::System::new();
        system.refresh_process(pid);
        Self {
            system: std::sync::Mutex::new(system),
            pid,
        }
    }
}

impl Default for SysinfoSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySampler for SysinfoSampler {
    fn sample_bytes(&self) -> Result<u64, IngestError> {
        let mut system = self
            .system
            .lock()
            .map_err(|_| IngestError::Internal("memory sampler lock poisoned".into()))?;
        system.refresh_process(self.pid);
        let used = system
            .process(self.pid)
            .map(|p| p.memory())
            .unwrap_or(0);
        Ok(used)
    }
}

/// Fixed-value sampler for tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedSampler(pub u64);

impl MemorySampler for FixedSampler {
    fn sample_bytes(&self) -> Result<u64, IngestError> {
        Ok(self.0)
    }
}
