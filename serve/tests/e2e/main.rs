//! End-to-end tests: a real coordinator on port 0, driven over real
//! WebSockets from both sides.

mod agent_errors;
mod common;
mod continue_and_halt;
mod halt_and_step;
