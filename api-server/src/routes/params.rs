//! Query parameter helpers for list endpoints.
//!
//! Types follow Rocket's `FromForm` conventions and derive `JsonSchema` so the
//! generated OpenAPI document shows the parameters and their defaults.

use crate::error::ApiError;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

const fn default_page() -> i64 {
    0
}

const fn default_page_size() -> i64 {
    10
}

pub const MAX_PAGE_SIZE: i64 = 100;

/// Zero-based pagination parameters.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, rocket::form::FromForm)]
#[serde(rename_all = "camelCase")]
pub struct PageParams {
    /// Zero-based page index (defaults to the first page).
    #[field(default = 0)]
    #[serde(default = "default_page")]
    pub page: i64,
    /// Number of items per page (default 10, capped at 100).
    #[field(default = 10)]
    #[serde(default = "default_page_size")]
    pub size: i64,
}

impl Default for PageParams {
    fn default() -> Self {
        Self {
            page: default_page(),
            size: default_page_size(),
        }
    }
}

impl PageParams {
    /// Validated `(page, size)` pair; negative pages and empty sizes are rejected.
    pub fn resolve(&self) -> Result<(i64, i64), ApiError> {
        if self.page < 0 {
            return Err(ApiError::BadRequest(format!(
                "page index must not be negative, got {}",
                self.page
            )));
        }
        if self.size < 1 {
            return Err(ApiError::BadRequest(format!(
                "page size must be at least 1, got {}",
                self.size
            )));
        }

        let size = self.size.min(MAX_PAGE_SIZE);
        if self.page.checked_mul(size).is_none() {
            return Err(ApiError::BadRequest(format!(
                "page index {} is out of range for page size {}",
                self.page, size
            )));
        }

        Ok((self.page, size))
    }
}
