use serde::Deserialize;

/// Default page size for batch history.
pub const DEFAULT_LIMIT: i64 = 20;

/// Generic pagination parameters (`?limit=&offset=`).
///
/// Values are clamped in the store layer.
#[derive(Debug, Deserialize)]
pub struct PaginationParams {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl PaginationParams {
    pub fn limit(&self) -> i64 {
        self.limit.unwrap_or(DEFAULT_LIMIT)
    }

    pub fn offset(&self) -> i64 {
        self.offset.unwrap_or(0)
    }
}
