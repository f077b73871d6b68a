pub mod database;
pub mod delivery;
pub mod health;
pub mod rbmq;
pub mod redis;
