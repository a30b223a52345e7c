use serde::{Deserialize, Serialize};

pub mod code;
pub mod db;
pub mod model;
pub mod render;
pub mod routes;
pub mod shortener;

/// Body of `POST /api/shorten`, as JSON or form fields.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShortenRequest {
    // optional so a missing url is reported as an invalid url rather than a malformed body
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub custom_code: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShortenResponse {
    pub code: String,
    pub short_url: String,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct SuccessResponse {
    pub success: bool,
}
