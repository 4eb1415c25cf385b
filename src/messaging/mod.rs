pub mod channels;
pub mod notification;

pub use channels::{
    NotificationConsumer, NotificationProducer, create_notification_channel, drain_notifications,
};
pub use notification::{HistoryEvent, Notification};
