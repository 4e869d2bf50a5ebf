pub mod chats;
pub mod mode;
