//! Import trigger and paged listing for posts.

use crate::error::ApiError;
use crate::import::ImportService;
use crate::models::{PageResponse, Post};
use crate::routes::params::PageParams;
use crate::store::SharedStore;
use rocket::State;
use rocket::serde::json::Json;
use rocket_okapi::r#gen::OpenApiGenerator;
use rocket_okapi::okapi::openapi3::Responses;
use rocket_okapi::openapi;
use rocket_okapi::response::OpenApiResponderInner;
use rocket_okapi::util::add_schema_response;

pub const IMPORT_SUCCESS_MESSAGE: &str = "Imported posts successfully";

/// Plain-text result of an import trigger.
#[derive(Debug, Responder)]
pub enum ImportResponse {
    #[response(status = 200, content_type = "plain")]
    Imported(String),
    #[response(status = 500, content_type = "plain")]
    Failed(String),
}

impl OpenApiResponderInner for ImportResponse {
    fn responses(generator: &mut OpenApiGenerator) -> rocket_okapi::Result<Responses> {
        let mut responses = Responses::default();
        let schema = generator.json_schema::<String>();
        add_schema_response(&mut responses, 200, "text/plain", schema.clone())?;
        add_schema_response(&mut responses, 500, "text/plain", schema)?;
        Ok(responses)
    }
}

/// Fetch the upstream posts collection and upsert it; resolves once the import finished.
#[openapi(tag = "Posts")]
#[post("/import/posts")]
pub async fn import_posts(service: &State<ImportService>) -> ImportResponse {
    match service.run().await {
        Ok(_) => ImportResponse::Imported(IMPORT_SUCCESS_MESSAGE.to_string()),
        Err(err) => {
            log::error!("import failed: {}", err);
            ImportResponse::Failed(format!("Import failed: {err}"))
        }
    }
}

/// List imported posts ordered by id ascending.
#[openapi(tag = "Posts")]
#[get("/import/posts?<params..>")]
pub async fn list_posts(
    params: PageParams,
    store: &State<SharedStore>,
) -> Result<Json<PageResponse<Post>>, ApiError> {
    let (page, size) = params.resolve()?;
    let result = store.page(page, size).await?;

    Ok(Json(PageResponse::new(result.posts, page, size, result.total)))
}
