pub mod client;
pub mod poller;

pub use client::build_http_client;
pub use poller::{
    extract_content, finished_reply, parse_body, BackendPoller, ConversationSource,
    HttpConversationSource,
};
