//! Utility functions shared by the clients and the command-line front end.
//!
//! - **URL validation**: service base URLs must be HTTPS (plain HTTP is only
//!   accepted for loopback hosts, which the test suites use), and playback URLs
//!   handed to the system browser must point at a public host.
//! - **Text processing**: catalog text is third-party input, so it is cleaned of
//!   control characters and truncated by display width before it reaches the
//!   terminal.
//!
//! # Examples
//!
//! ```
//! use streamshelf::util::{truncate_to_width, validate_base_url};
//!
//! let url = validate_base_url("https://pixabay.com/api/videos/").unwrap();
//! assert_eq!(url.host_str(), Some("pixabay.com"));
//!
//! assert_eq!(truncate_to_width("mountain, lake, sunrise", 12), "mountain,...");
//! ```

mod text;
mod url_validator;

pub use text::{display_width, pad_to_width, sanitize_line, truncate_to_width};
pub use url_validator::{validate_base_url, validate_playback_url, UrlValidationError};
