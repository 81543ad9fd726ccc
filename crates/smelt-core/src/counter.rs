//! Hardware performance counter control.
//!
//! Programming a counter requires writing model-specific registers, which is
//! only possible from the kernel. [`MsrCounterControl`] shells out to
//! `wrmsr` from msr-tools; reading happens in user space through
//! [`Timing::read_counter_delta`](crate::timing::Timing::read_counter_delta).

use std::fmt;
use std::process::Command;

use log::debug;
use thiserror::Error;

use crate::util::format_row;

/// Errors of counter programming.
#[derive(Debug, Error)]
pub enum CounterError {
    /// `wrmsr` could not be spawned
    #[error("failed to run wrmsr: {0}")]
    Spawn(#[from] std::io::Error),
    /// `wrmsr` exited unsuccessfully
    #[error("'{command}' failed with {status}")]
    Failed {
        /// The command line
        command: String,
        /// Exit status
        status: std::process::ExitStatus,
    },
}

/// Enables and disables one hardware event counter.
pub trait CounterControl {
    /// Resets the counter and starts counting.
    ///
    /// # Errors
    ///
    /// Returns error if the counter cannot be programmed.
    fn enable(&self) -> Result<(), CounterError>;

    /// Stops counting and resets the counter.
    ///
    /// # Errors
    ///
    /// Returns error if the counter cannot be programmed.
    fn disable(&self) -> Result<(), CounterError>;
}

/// Counter programming through `wrmsr -a` on all cores.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MsrCounterControl {
    select_register: &'static str,
    counter_register: &'static str,
    enable_mask: &'static str,
    disable_mask: &'static str,
}

const IA32_PERFEVTSEL0: &str = "0x186";
const IA32_PMC0: &str = "0xc1";
const ENABLE_LLC_MISSES: &str = "0x51412E";
const DISABLE_LLC_MISSES: &str = "0x11412E";
const RESET: &str = "0x0";

impl MsrCounterControl {
    /// Last-level cache misses on general purpose counter 0.
    pub fn llc_misses() -> Self {
        MsrCounterControl {
            select_register: IA32_PERFEVTSEL0,
            counter_register: IA32_PMC0,
            enable_mask: ENABLE_LLC_MISSES,
            disable_mask: DISABLE_LLC_MISSES,
        }
    }

    fn wrmsr(register: &str, value: &str) -> Result<(), CounterError> {
        let command = format!("wrmsr -a {} {}", register, value);
        debug!("{}", command);
        let status = Command::new("wrmsr")
            .args(["-a", register, value])
            .status()?;
        if !status.success() {
            return Err(CounterError::Failed { command, status });
        }
        Ok(())
    }
}

impl CounterControl for MsrCounterControl {
    fn enable(&self) -> Result<(), CounterError> {
        self.disable()?;
        Self::wrmsr(self.select_register, self.enable_mask)
    }

    fn disable(&self) -> Result<(), CounterError> {
        Self::wrmsr(self.select_register, self.disable_mask)?;
        Self::wrmsr(self.counter_register, RESET)
    }
}

/// Counter control that does nothing, for runs without msr-tools.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoCounter;

impl CounterControl for NoCounter {
    fn enable(&self) -> Result<(), CounterError> {
        Ok(())
    }

    fn disable(&self) -> Result<(), CounterError> {
        Ok(())
    }
}

/// Architectural performance monitoring capabilities (cpuid leaf 0x0a).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ArchPerfInfo {
    /// Version of architectural performance monitoring, 0 if unsupported
    pub version: u32,
    /// Number of general purpose counters per logical core
    pub num_counters: u32,
    /// Bit width of the general purpose counters
    pub counter_width: u32,
    /// Whether the LLC reference event is available
    pub llc_references: bool,
    /// Whether the LLC miss event is available
    pub llc_misses: bool,
}

impl ArchPerfInfo {
    /// Queries the executing core.
    pub fn query() -> Self {
        #[allow(unused_unsafe)]
        let leaf = unsafe { std::arch::x86_64::__cpuid(0x0a) };
        Self::from_registers(leaf.eax, leaf.ebx)
    }

    /// Decodes `eax` and `ebx` of cpuid leaf 0x0a.
    ///
    /// A set bit in `ebx` marks an event as unavailable.
    pub fn from_registers(eax: u32, ebx: u32) -> Self {
        ArchPerfInfo {
            version: eax & 0xff,
            num_counters: (eax >> 8) & 0xff,
            counter_width: (eax >> 16) & 0xff,
            llc_references: ebx & 0x4 == 0,
            llc_misses: ebx & 0x8 == 0,
        }
    }
}

impl fmt::Display for ArchPerfInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let yes_no = |b: bool| if b { "yes" } else { "no" };
        writeln!(f, "{}", format_row("version id", self.version))?;
        writeln!(f, "{}", format_row("gen. purp. perf. counters", self.num_counters))?;
        writeln!(f, "{}", format_row("bit width gen. purp. perf. counter", self.counter_width))?;
        writeln!(f, "{}", format_row("llc references available?", yes_no(self.llc_references)))?;
        write!(f, "{}", format_row("llc misses available?", yes_no(self.llc_misses)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arch_perf_info_decode() {
        let info = ArchPerfInfo::from_registers(0x0030_0804, 0x08);
        assert_eq!(info.version, 4);
        assert_eq!(info.num_counters, 8);
        assert_eq!(info.counter_width, 48);
        assert!(info.llc_references);
        assert!(!info.llc_misses);
        let out = info.to_string();
        assert_eq!(out.lines().count(), 5);
        assert!(out.lines().last().unwrap().ends_with("no"));
    }

    #[test]
    fn test_no_counter() {
        assert!(NoCounter.enable().is_ok());
        assert!(NoCounter.disable().is_ok());
    }
}
