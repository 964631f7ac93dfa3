//! Tool-call guardrails.
//!
//! Every tool call the model requests is classified before anything runs:
//! it is blocked outright, held for human confirmation, or allowed.
//! Classification is a pure function of the tool name and its arguments.

mod decision;
mod error;
mod guardrail;

pub use decision::{Decision, RiskLevel};
pub use error::{Error, Result};
pub use guardrail::{Guardrail, Rules};
