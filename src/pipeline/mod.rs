//! Question-to-answer processing.

pub mod enhanced;
pub mod legacy;
pub mod service;
pub mod types;
pub mod visualization;

pub use enhanced::EnhancedProcessor;
pub use legacy::LegacyProcessor;
pub use service::{QueryService, ServiceSettings};
pub use types::{ErrorInfo, ProcessorKind, QueryProcessor, QueryRequest, QueryResponse};
pub use visualization::{recommend, ChartType, VisualizationConfig};
