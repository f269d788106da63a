use serde::{Deserialize, Serialize};
use tracex_core::query::{StatusResponse, TracesRequest, TracesResponse};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ApiRequest {
    Traces(TracesRequest),
    Status,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ApiResponse {
    Traces(TracesResponse),
    Status(StatusResponse),
    Error(String),
}
