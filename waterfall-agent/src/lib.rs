//! Device-side agent answering waterfall calls.
//!
//! Each accepted connection carries exactly one call: the agent reads the
//! [`Hello`](waterfall_proto::Hello), accepts or refuses it, and runs the
//! matching handler until the call ends.
//!
//! ```no_run
//! use waterfall_agent::{Agent, AgentConfig};
//!
//! # async fn demo() -> std::io::Result<()> {
//! let agent = Agent::new(AgentConfig::default().installer(["pm", "install", "-g"]));
//! agent.serve_tcp("127.0.0.1:8088").await
//! # }
//! ```

mod exec;
mod files;
mod install;
mod server;

pub use server::{Agent, AgentConfig};
