pub mod oi_poller;
pub mod stream;

pub use oi_poller::OiPoller;
pub use stream::{FeedEvent, FeedHandle};
