pub mod channel;
pub mod line_user;
pub mod tag;
pub mod rich_menu;
pub mod message;
pub mod step;
pub mod chat;
pub mod activity_log;

pub use channel::Channel;
pub use line_user::LineUser;
pub use tag::{LineUserTag, Tag};
pub use rich_menu::RichMenu;
pub use message::{ContentBlock, CustomAction, Message};
pub use step::{StepExecution, StepMessage, StepScenario};
