//! Context assembly for Strata.
//!
//! A [`ContextAssembler`] runs a user assembly function with a lineage
//! tracker bound, trims the result to a token budget, evaluates freshness,
//! prices it, and persists the context, its trace, and its audit record.

pub mod assembler;
pub mod budget;
pub mod error;
pub mod freshness;
pub mod model;
pub mod retriever;
pub mod template;
pub mod token;

pub use assembler::{AssemblerConfig, ContextAssembler, ContextDefinition, RECORD_VERSION};
pub use budget::{BudgetPolicy, TrimOutcome, trim_to_budget};
pub use error::ContextError;
pub use freshness::{FreshnessReport, parse_duration};
pub use model::{AssemblyOutput, Context, ContextItem, ContextMeta, ContextTrace};
pub use retriever::{Retriever, RetrieverRegistry, Search};
pub use template::{DependencyResolver, parse_dependencies, render};
pub use token::{CharCounter, EstimateCounter, TokenCounter, estimate_tokens};

#[cfg(feature = "tokenizer")]
pub use token::TokenizerCounter;
