//! Result streams and the aggregate report
//!
//! Every environment produces one TAP stream ending in an exit trailer.
//! [`tap`] parses the test cases, [`trailer`] extracts the exit status, and
//! [`aggregate`] folds the per-environment results into one report in
//! discovery order.

pub mod aggregate;
pub mod tap;
pub mod trailer;

pub use aggregate::{
    AggregateReport, ExecutionResult, MatrixRow, ReportEntry, TapSummary,
};
pub use tap::{parse, TapStream, TestCase, TestStatus};
pub use trailer::{exit_status, format_trailer};
