pub mod analyzer;
pub mod session;
pub mod types;

pub use analyzer::BusinessContextAnalyzer;
pub use session::{ConversationStore, ConversationTurn};
pub use types::{
    BusinessContextProfile, BusinessDomain, BusinessEntity, EntityType, IntentType, QueryIntent,
    TimeRange,
};
