//! Chat services: the streaming relay and conversation titles.

pub mod relay;
pub mod title;

pub use relay::{RelayEvent, StreamRelay};
pub use title::TitleService;
