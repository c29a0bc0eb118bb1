pub mod history;
pub mod outbox;
pub mod transport;
pub mod worker;

pub use history::AlertHistory;
pub use outbox::{AlertEvent, Outbox, OutboundMessage};
pub use transport::{AlertTransport, SendError, TelegramTransport};
pub use worker::AlertWorker;
