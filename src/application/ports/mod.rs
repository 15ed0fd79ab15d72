pub mod subscription_notifier;
