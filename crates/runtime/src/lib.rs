pub mod compose;
mod dispatcher;
pub mod liveness;
mod session;

pub use compose::{Button, OutboundMessage, ResponseComposer, escape_html};
pub use dispatcher::{BotAction, BotEvent, ChatId, Dispatcher};
pub use liveness::LivenessState;
pub use session::{Session, SessionStore, UserId};
