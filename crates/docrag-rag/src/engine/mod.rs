//! Query engines
//!
//! [`SimpleQueryEngine`] retrieves and generates in one shot,
//! [`SubQuestionQueryEngine`] decomposes complex queries and synthesizes the
//! partial answers, and [`RouterQueryEngine`] classifies a query's intent and
//! dispatches to one of the two with intent-specific reformatting.

pub mod classifier;
pub mod prompts;
pub mod router;
pub mod simple;
pub mod subquestion;

pub use classifier::QueryClassifier;
pub use router::RouterQueryEngine;
pub use simple::{QueryOptions, SimpleQueryEngine};
pub use subquestion::{ComplexityAnalysis, SubQuestionQueryEngine};
