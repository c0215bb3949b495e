//! The observe-think-act loop: conversation window, cost accounting,
//! decision handling, and the session orchestrator.

pub mod context;
pub mod cost;
pub mod decision;
pub mod runner;

pub use context::Conversation;
pub use cost::CostTracker;
pub use decision::DecisionEngine;
pub use runner::SessionRunner;
