//! Input parsing modules
//!
//! Contains parsers for playlists and for user-supplied URL lists.

pub mod m3u8_parser;
pub mod url_list_parser;

// Re-export commonly used parsers
pub use m3u8_parser::*;
pub use url_list_parser::*;
