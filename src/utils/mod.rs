pub mod url_validation;
pub use url_validation::{UrlValidationError, join_endpoint, validate_http_url, validate_ws_url};
