use std::sync::Arc;

use poem::middleware::{AddData, Tracing};
use poem::web::{Data, Field, Form, Multipart};
use poem::{get, handler, post, Endpoint, EndpointExt, Response, Route};
use serde::Deserialize;
use tokio_util::io::ReaderStream;

use crate::controller::UploadController;
use crate::error::UploadError;
use crate::response::upload_response;

/// The multipart field uploaded files are read from.
const IMAGE_FIELD: &str = "image";

#[derive(Debug, Deserialize)]
pub struct UrlUpload {
    image: Option<String>,
}

/// Constructs all the routes for the server.
pub fn router(controller: Arc<UploadController>) -> impl Endpoint {
    Route::new()
        .at("/file", post(upload_file))
        .at("/url", get(upload_url).post(upload_url))
        .with(AddData::new(controller))
        .with(Tracing)
}

#[handler]
pub async fn upload_file(
    Data(controller): Data<&Arc<UploadController>>,
    multipart: poem::Result<Multipart>,
) -> Response {
    let res = async {
        let mut multipart = multipart.map_err(|_| UploadError::MissingField)?;
        let field = find_image_field(&mut multipart).await?;
        let name = field.file_name().unwrap_or_default().to_string();

        // Streamed so the size limit applies while the body is read.
        let body = ReaderStream::new(field.into_async_read());
        controller.upload(body, name).await
    }
    .await;

    upload_response(res)
}

#[handler]
pub async fn upload_url(
    Data(controller): Data<&Arc<UploadController>>,
    form: poem::Result<Form<UrlUpload>>,
) -> Response {
    let res = async {
        let url = form
            .ok()
            .and_then(|Form(params)| params.image)
            .filter(|url| !url.is_empty())
            .ok_or_else(|| UploadError::Download("no url was given".to_string()))?;

        let body = controller.downloader().fetch(&url).await?;
        controller.upload(body, String::new()).await
    }
    .await;

    upload_response(res)
}

/// Skips ahead to the image field of the form.
async fn find_image_field(multipart: &mut Multipart) -> Result<Field, UploadError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|_| UploadError::MissingField)?
    {
        if field.name() == Some(IMAGE_FIELD) {
            return Ok(field);
        }
    }

    Err(UploadError::MissingField)
}
