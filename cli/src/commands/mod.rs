pub mod admin;
pub mod agent;
pub mod assess;
pub mod coach;
pub mod health;
pub mod incentives;
pub mod knowledge;
pub mod safety;
pub mod stage;
