pub mod envelope;

pub use envelope::{ApiResponse, ApiResult, BatchSummary, Pagination, Timed};
