//! Runtime-configurable launch parameters and diagnostic categories.
//!
//! All values have sensible defaults. Override via environment variables
//! (prefixed `CLIQUE_`) or by constructing a custom `CliqueConfig`. The
//! config is passed explicitly to pools, communicators and streams; there is
//! no process-wide state.

use crate::launch::WORKERS_PER_GROUP;

/// Default wide-vector width: four 32-bit lanes.
pub const DEFAULT_VECTOR_WIDTH_BYTES: usize = 16;

/// Bitmask of diagnostic categories emitted through `tracing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TraceMask(u8);

impl TraceMask {
    pub const NONE: TraceMask = TraceMask(0);
    /// Public entry points (pool construction, collective calls).
    pub const API: TraceMask = TraceMask(1 << 0);
    /// Internal decisions (ring wiring, registration, drain).
    pub const INTERNAL: TraceMask = TraceMask(1 << 1);
    /// Launch geometry of every kernel.
    pub const KERNEL: TraceMask = TraceMask(1 << 2);
    pub const ALL: TraceMask = TraceMask(0b111);

    pub const fn from_bits(bits: u8) -> Self {
        TraceMask(bits & Self::ALL.0)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn contains(self, other: TraceMask) -> bool {
        self.0 & other.0 == other.0 && other.0 != 0
    }
}

impl std::ops::BitOr for TraceMask {
    type Output = TraceMask;

    fn bitor(self, rhs: Self) -> Self::Output {
        TraceMask(self.0 | rhs.0)
    }
}

/// Tuning parameters for launches and host-side polling.
#[derive(Debug, Clone)]
pub struct CliqueConfig {
    /// Workers per execution group. Every participant must use the same value.
    pub workers_per_group: usize,

    /// Width of one wide-vector operation in bytes. Every participant must
    /// use the same value.
    pub vector_width_bytes: usize,

    /// OS threads a stream spreads the groups of one launch over.
    pub compute_units: usize,

    /// Spin iterations between OS-level yields while polling a peer.
    pub spin_yield_interval: u32,

    /// Diagnostic categories to emit.
    pub trace: TraceMask,
}

impl Default for CliqueConfig {
    fn default() -> Self {
        let cores = std::thread::available_parallelism().map_or(1, |n| n.get());
        Self {
            workers_per_group: WORKERS_PER_GROUP,
            vector_width_bytes: DEFAULT_VECTOR_WIDTH_BYTES,
            compute_units: cores.clamp(1, 8),
            spin_yield_interval: 1024,
            trace: TraceMask::NONE,
        }
    }
}

impl CliqueConfig {
    /// Load config from environment variables, falling back to defaults.
    ///
    /// Recognized variables:
    /// - `CLIQUE_WORKERS_PER_GROUP`
    /// - `CLIQUE_VECTOR_BYTES`
    /// - `CLIQUE_COMPUTE_UNITS`
    /// - `CLIQUE_SPIN_YIELD`
    /// - `CLIQUE_TRACE` (bitmask: 1 = api, 2 = internal, 4 = kernel)
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(v) = std::env::var("CLIQUE_WORKERS_PER_GROUP")
            && let Ok(n) = v.parse::<usize>()
        {
            cfg.workers_per_group = n;
        }
        if let Ok(v) = std::env::var("CLIQUE_VECTOR_BYTES")
            && let Ok(n) = v.parse::<usize>()
        {
            cfg.vector_width_bytes = n;
        }
        if let Ok(v) = std::env::var("CLIQUE_COMPUTE_UNITS")
            && let Ok(n) = v.parse::<usize>()
        {
            cfg.compute_units = n.max(1);
        }
        if let Ok(v) = std::env::var("CLIQUE_SPIN_YIELD")
            && let Ok(n) = v.parse::<u32>()
        {
            cfg.spin_yield_interval = n;
        }
        if let Ok(v) = std::env::var("CLIQUE_TRACE")
            && let Ok(bits) = v.parse::<u8>()
        {
            cfg.trace = TraceMask::from_bits(bits);
        }

        cfg
    }

    pub fn traces(&self, category: TraceMask) -> bool {
        self.trace.contains(category)
    }
}
