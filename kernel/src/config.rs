//! The kernel's single configuration point (§10.3).
//!
//! A plain struct with a `Default`, constructed explicitly by `main` and
//! by every integration test rather than read from a hidden global —
//! only the genuinely process-wide scheduler/frame-table/disk state
//! stays behind the `static` cells `threads`, `vm`, and `filesystem`
//! each keep internally.

/// Bundles the one runtime-tunable knob (`vm::Config`) this kernel
/// exposes, plus the disk backing used for the demo filesystem.
#[derive(Debug, Clone)]
pub struct Config {
    pub vm: vm::Config,
    pub disk_sectors: u32,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            vm: vm::Config::default(),
            disk_sectors: filesystem::config::NUM_SECTORS,
        }
    }
}

impl Config {
    /// The demand-paging demo configuration: a small physical memory
    /// forcing most programs to page, matching scenario S6's
    /// `numPages = 2 * NumPhysPages` setup.
    pub fn demand_paging() -> Self {
        Config {
            vm: vm::Config { demand_paging: true, ..vm::Config::default() },
            ..Config::default()
        }
    }
}
