//! The forum-facing core: authenticated fetching, HTML extraction,
//! checkpoint diffing, reply submission and diagnostics.

pub mod checkpoint;
pub mod diagnostics;
pub mod extract;
pub mod fetch;
pub mod reply;
pub mod session;
pub mod tracker;
pub mod url;
