pub mod admin;
pub mod agent;
pub mod assessments;
pub mod coaching;
pub mod health;
pub mod incentives;
pub mod interventions;
pub mod knowledge;
pub mod safety;
pub mod stages;
