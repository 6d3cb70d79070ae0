pub mod agents;
pub mod assessments;
pub mod auth;
pub mod coaching;
pub mod embedding;
pub mod error;
pub mod incentives;
pub mod interventions;
pub mod knowledge;
pub mod risk;
pub mod safety;
pub mod stages;
pub mod tenants;
