use actix_multipart::form::MultipartFormConfig;
use actix_web::{HttpResponse, ResponseError};
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub fields: serde_json::Value,
}

/// Creates the multipart upload config with standardized error handling for the entire project
///
/// Malformed bodies, missing fields and oversized uploads all answer with an
/// `ErrorResponse` JSON body and the status the multipart layer picked.
pub fn multipart_config(max_upload_size: usize) -> MultipartFormConfig {
    MultipartFormConfig::default()
        .total_limit(max_upload_size)
        .error_handler(|err, _req| {
            let status = err.status_code();
            let message = err.to_string();
            warn!("Rejected multipart upload ({}): {}", status, message);

            let error_response = ErrorResponse {
                error: "Request validation failed".to_string(),
                fields: serde_json::json!({ "message": message }),
            };
            actix_web::error::InternalError::from_response(
                "",
                HttpResponse::build(status).json(error_response),
            )
            .into()
        })
}
