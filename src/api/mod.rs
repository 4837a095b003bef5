//! HTTP control surface for the pipeline.

pub mod routes;

pub use routes::{
    AppState, EnrichRequest, GenerateRequest, MessagesRequest, RunRequest, SendRequest, api_routes,
};
