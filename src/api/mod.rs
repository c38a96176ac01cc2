//! HTTP services.
//!
//! | Prefix   | Service                                   |
//! |----------|-------------------------------------------|
//! | `/data`  | raw invoice and transaction records       |
//! | `/kpi`   | dashboard counters                        |
//! | `/graph` | node/edge payload for visualization       |
//! | `/api`   | ingestion, chat, visualizations and stats |
//! | `/query` | question answering                        |

pub mod agentic;
pub mod app;
pub mod data;
pub mod error;
pub mod graph;
pub mod kpi;
pub mod main_api;
pub mod state;

pub use app::{build_router, serve};
pub use error::{ApiError, ApiResult};
pub use state::{AppState, DataType, IngestPrompts};
