mod query;
mod response;

pub use query::{ImageAttachment, Query};
pub use response::{
    IntermediateQuery, Plan, PlanWeights, ResultItem, SchemaError, SearchResponse, SessionSummary,
};
