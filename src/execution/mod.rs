pub mod engine;
pub mod error_classifier;
pub mod postgres;
pub mod resilient;
pub mod result;
pub mod sql_guard;

pub use engine::{ExecutionContext, SqlExecutor, UnconfiguredExecutor};
pub use error_classifier::{is_transient, is_unreachable, SqlErrorClass};
pub use postgres::PostgresExecutor;
pub use resilient::ResilientExecutor;
pub use result::QueryResult;
pub use sql_guard::ensure_read_only;
