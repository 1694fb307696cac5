pub mod client;
pub mod service;

pub use client::{RIVERS, ROADS, TestClient, sorted_ids};
pub use service::{Fault, RecordedQuery, RecordingService, ScriptedService};
