pub mod cdp;
pub mod completion;
pub mod driver;
pub mod launcher;
pub mod locators;
pub mod web;

pub use completion::{Completion, CompletionDetector, Observation, OutputProbe, ProbeError};
pub use driver::{ChatDriver, DriverFactory};
pub use launcher::{find_browser_binary, BrowserEngine};
pub use web::{CdpChatDriver, CdpDriverFactory};
