//! Design generation: domain types and the external service client

pub mod client;
pub mod types;

pub use client::{GenerationService, HttpGenerationClient};
pub use types::{
    CostEstimate, DesignRequest, DesignResult, EstimateLine, MaterialItem, StyleImage, StyleSource,
};
