pub mod payment;
pub mod subscription;
pub mod user;
pub mod webhook_event;
