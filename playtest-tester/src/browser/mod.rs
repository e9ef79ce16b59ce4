pub mod bridge;
pub mod session;

pub use bridge::{HARNESS_GLOBAL, PageHarness};
pub use session::{BrowserConfig, BrowserKind, new_session};
