//! Workspace Agent Orchestrator
//!
//! Routes free-text requests to mail, cloud storage and expense tools through
//! a language model:
//! - Classifies each request into a category with one model call
//! - Runs tool categories through a bounded function-calling loop
//! - Answers general questions with a single text-only call
//! - Guards the chat endpoint with a deterministic denylist
//! - Keeps reimbursement requests in a JSON-file store with an event log
//!
//! REQUEST FLOW:
//! INPUT → CLASSIFY → ROUTE → (CALL TOOL → FEED RESULT)* → ANSWER

pub mod agent;
pub mod api;
pub mod audit;
pub mod classifier;
pub mod config;
pub mod conversational;
pub mod error;
pub mod execution;
pub mod guardrail;
pub mod mcp;
pub mod model;
pub mod models;
pub mod store;
pub mod tools;

pub use error::Result;

// Re-export common types
pub use agent::{OrchestrationResult, Orchestrator};
pub use audit::{EventLog, SessionLog, SessionSettings};
pub use config::AppConfig;
pub use model::{GeminiClient, LanguageModel, ModelReply, ScriptedModel};
pub use models::*;
