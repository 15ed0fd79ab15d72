pub mod change_notification;
pub mod subscription_query;
pub mod webhook_ingestion;
