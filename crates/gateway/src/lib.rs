pub mod api;
pub mod bootstrap;
pub mod cli;
pub mod engine;
pub mod router;
pub mod state;
pub mod supervisor;
