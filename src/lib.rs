//! # Pagesmith
//!
//! Task orchestrator that turns a natural-language brief into a static web
//! application published on GitHub Pages.
//!
//! This library provides:
//! - An HTTP intake that validates task envelopes and acknowledges at once
//! - An LLM-backed code generator with bounded retries
//! - A GitHub publisher (create-or-reuse for Round 1, revise for Round 2)
//! - An evaluation reporter that posts the published result back
//!
//! ## Architecture
//!
//! ```text
//!   POST /initiate_task
//!          │ validate + ack
//!          ▼
//!  ┌──────────────────┐   ┌─────────────┐   ┌─────────────┐   ┌─────────────┐
//!  │ TaskOrchestrator │──▶│ attachments │──▶│  generator  │──▶│  publisher  │
//!  │ (background run) │   └─────────────┘   │   (LLM)     │   │  (GitHub)   │
//!  └──────────────────┘                     └─────────────┘   └──────┬──────┘
//!                                                                    ▼
//!                                                             ┌─────────────┐
//!                                                             │  reporter   │
//!                                                             └─────────────┘
//! ```
//!
//! ## Modules
//! - `task`: envelopes, validation and the run state machine
//! - `orchestrator`: background runs, concurrency limit, run registry
//! - `generator`: prompt construction and response parsing
//! - `github`: repository hosting trait and REST client
//! - `publisher`: Round 1 / Round 2 repository workflows
//! - `reporter`: evaluation callback

pub mod api;
pub mod attachments;
pub mod config;
pub mod error;
pub mod generator;
pub mod github;
pub mod llm;
pub mod orchestrator;
pub mod publisher;
pub mod reporter;
pub mod retry;
pub mod task;
pub mod util;

pub use config::Config;
pub use error::TaskError;
pub use orchestrator::TaskOrchestrator;
