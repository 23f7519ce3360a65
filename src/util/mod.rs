//! Small shared helpers.
//!
//! - **URL validation**: scheme and host checks applied before any feed fetch
//! - **Text cleanup**: control-character stripping for user-supplied labels

mod text;
mod url_validator;

pub use text::{clean_label, strip_control_chars};
pub use url_validator::{validate_url, UrlPolicy, UrlValidationError};
