// Copyright (c) 2025 Workflow Engine Contributors
// SPDX-License-Identifier: Apache-2.0

//! Recursive step interpreter, scope stack, and expression/script engine for
//! declarative workflows.
//!
//! A [`Workflow`](workflow::Workflow) is a tree of typed [`Step`](step::Step)s
//! with data dependencies expressed through a shared [`Scope`](scope::Scope)
//! stack rather than declared edges. [`driver::WorkflowDriver`] walks the tree,
//! resolving `{{ ... }}` expressions (`expr`), running sandboxed scripts
//! (`script`), retrying failed steps per policy (`retry`), and fanning out
//! `parallel` branches under a concurrency bound (`concurrency`).

pub mod actions;
pub mod cancel;
pub mod concurrency;
pub mod driver;
pub mod error;
pub mod executor;
pub mod expr;
pub mod retry;
pub mod scope;
pub mod script;
pub mod step;
pub mod testing;
pub mod value;
pub mod workflow;

pub use actions::{ActionExecutor, ActionRegistry};
pub use cancel::CancelSignal;
pub use driver::{WorkflowDriver, WorkflowResult, WorkflowStatus};
pub use error::{EngineError, Result};
pub use executor::ExecutionContext;
pub use scope::Scope;
pub use step::{Policy, Step, StepKind};
pub use value::Value;
pub use workflow::{Workflow, WorkflowLoader};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
