//! Pagination parameters
//!
//! Malformed values are corrected, never rejected: limits clamp to
//! `[1, MAX_LIMIT]`, pages to `>= 1`, and anything unparsable falls back to
//! the default.

pub const DEFAULT_LIMIT: usize = 20;
pub const MAX_LIMIT: usize = 50;
pub const DEFAULT_PAGE: u32 = 1;

fn clamp_limit(limit: i64) -> usize {
    limit.clamp(1, MAX_LIMIT as i64) as usize
}

fn parse_i64(raw: Option<&str>) -> Option<i64> {
    raw.map(str::trim).and_then(|s| s.parse::<i64>().ok())
}

/// Page-number request for the global feed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u32,
    pub limit: usize,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: DEFAULT_PAGE,
            limit: DEFAULT_LIMIT,
        }
    }
}

impl PageRequest {
    pub fn new(page: Option<i64>, limit: Option<i64>) -> Self {
        Self {
            page: page
                .map(|p| p.clamp(1, u32::MAX as i64) as u32)
                .unwrap_or(DEFAULT_PAGE),
            limit: limit.map(clamp_limit).unwrap_or(DEFAULT_LIMIT),
        }
    }

    /// Build from raw query-string values
    pub fn parse(page: Option<&str>, limit: Option<&str>) -> Self {
        Self::new(parse_i64(page), parse_i64(limit))
    }

    /// Offset of the first item on this page
    pub fn start(&self) -> usize {
        (self.page as usize - 1) * self.limit
    }

    /// Inclusive index of the last item on this page
    pub fn end(&self) -> usize {
        self.start() + self.limit - 1
    }
}

/// Cursor request for the personalized feed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CursorRequest {
    pub limit: usize,
    pub cursor: Option<String>,
}

impl CursorRequest {
    pub fn new(limit: Option<i64>, cursor: Option<String>) -> Self {
        Self {
            limit: limit.map(clamp_limit).unwrap_or(DEFAULT_LIMIT),
            cursor: cursor.filter(|c| !c.trim().is_empty()),
        }
    }

    pub fn parse(limit: Option<&str>, cursor: Option<&str>) -> Self {
        Self::new(parse_i64(limit), cursor.map(str::to_string))
    }
}
