pub mod channel;
pub mod delivery;
pub mod event;
pub mod health;
pub mod message;
pub mod preference;
pub mod response;
pub mod retry;
pub mod status;
pub mod task;
