//! Configuration and constants for the experiment database format.

/// Format version stamped into the document root
pub const FORMAT_VERSION: &str = "4.0";

/// File name of the emitted document inside the output directory
pub const EXPERIMENT_FILENAME: &str = "experiment.xml";

/// Subdirectory of the output bundle receiving copied source files
pub const SOURCE_SUBDIR: &str = "src";

// The packed metric identifier is (scope_base << 8) | slot, with 6-bit
// partial and statistic regions plus their internal mirrors. 64 of each is
// therefore a hard limit of the wire format, not a tunable.
pub const MAX_PARTIALS: usize = 64;
pub const MAX_STATISTICS: usize = 64;

/// First value of the decreasing id well for dynamically discovered
/// entities. Context ids grow upward from 0, so the two never collide
/// within a session.
pub const SYNTH_ID_WELL: u32 = 0x7FFF_FFFF;

/// Fixed procedure ids: `<unknown>` and `<partial call paths>` come first,
/// dynamically discovered procedures start after them.
pub const PROC_UNKNOWN_ID: u32 = 0;
pub const PROC_PARTIAL_ID: u32 = 1;
pub const FIRST_PROC_ID: u32 = 2;
