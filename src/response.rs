use poem::http::StatusCode;
use poem::web::Json;
use poem::{IntoResponse, Response};
use serde_json::{json, Value};

use crate::controller::UploadInfo;
use crate::error::{ErrorClass, UploadError};

/// A standard JSON response with the content type set to application/json
pub fn json_response(status: StatusCode, data: Value) -> Response {
    Json(data).with_status(status).into_response()
}

pub fn error_response(err: &UploadError) -> Response {
    if err.class() == ErrorClass::Input {
        warn!("Rejected upload ({}): {}: {}", err.class(), err, err.detail());
    } else {
        error!("Upload failed ({}): {}: {}", err.class(), err, err.detail());
    }

    json_response(err.status(), json!({ "error": err.to_string() }))
}

pub fn upload_response(res: Result<UploadInfo, UploadError>) -> Response {
    match res {
        Ok(info) => Json(info).with_status(StatusCode::OK).into_response(),
        Err(e) => error_response(&e),
    }
}
