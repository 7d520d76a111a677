//! The Lenda invocation loop and its two external seams.
//!
//! `invocation` drives one conversation turn; `caller` abstracts the model
//! endpoint (with an OpenAI-compatible HTTP implementation); `executor`
//! abstracts tool side effects; `truncate` bounds tool payloads before they
//! re-enter the model context.

pub mod caller;
pub mod executor;
pub mod invocation;
pub mod truncate;

pub use caller::{CallOptions, HttpModelCaller, ModelCaller, ModelResponse, ToolChoice};
pub use executor::{ToolExecutor, ToolOutcome};
pub use invocation::{InvocationOutcome, InvocationRequest, Invoker, MAX_TOOL_ROUNDS};
pub use truncate::truncate_payload;
