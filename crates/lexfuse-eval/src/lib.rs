//! Offline evaluation: run labeled queries through pipeline variants and
//! report answer and ranking quality.
pub mod dataset;
pub mod harness;
pub mod metrics;
pub mod variant;

pub use dataset::{load_queries, parse_queries, LabeledQuery};
pub use harness::{EvaluationHarness, HarnessReport, QueryReport, VariantMetrics, VariantReport};
pub use metrics::LatencySummary;
pub use variant::{ConfigOverrides, EvalVariant};
