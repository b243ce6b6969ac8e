//! Single-page front end served at `/`.

pub const INDEX_HTML: &str = include_str!("../static/index.html");
