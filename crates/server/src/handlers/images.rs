//! Image lookup and album endpoints.

use crate::error::ApiResult;
use crate::state::AppState;
use almanac_acquire::ResolvedImage;
use almanac_core::ImageDate;
use axum::Json;
use axum::extract::{Path, State};
use serde::Serialize;

/// One stored image.
#[derive(Debug, Serialize)]
pub struct ImageResponse {
    /// Publication date, `YYYY-MM-DD`.
    pub date: ImageDate,
    /// Public locator of the stored image.
    pub url: String,
}

impl From<ResolvedImage> for ImageResponse {
    fn from(image: ResolvedImage) -> Self {
        Self {
            date: image.date,
            url: image.locator,
        }
    }
}

/// GET /v1/images/{date}
///
/// Fetches and stores the image on first request. Dates in the future or
/// before the first published image are rejected.
pub async fn get_image(
    State(state): State<AppState>,
    Path(date): Path<String>,
) -> ApiResult<Json<ImageResponse>> {
    let date = ImageDate::parse(&date)?;
    date.ensure_published(ImageDate::today_utc())?;

    let url = state.cache.resolve(date).await?;
    Ok(Json(ImageResponse { date, url }))
}

/// GET /v1/images
pub async fn list_images(State(state): State<AppState>) -> ApiResult<Json<Vec<ImageResponse>>> {
    let album = state.cache.list_resolved().await?;
    Ok(Json(album.into_iter().map(ImageResponse::from).collect()))
}
