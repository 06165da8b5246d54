pub mod conversation;
pub mod knowledge;
pub mod lead;
pub mod message;
pub mod tenant;
