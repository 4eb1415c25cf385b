// Lock-free notification channel between the history and the UI

use crate::messaging::notification::Notification;
use ringbuf::{HeapRb, traits::Consumer, traits::Split};

pub type NotificationProducer = ringbuf::HeapProd<Notification>;
pub type NotificationConsumer = ringbuf::HeapCons<Notification>;

pub fn create_notification_channel(
    capacity: usize,
) -> (NotificationProducer, NotificationConsumer) {
    let rb = HeapRb::<Notification>::new(capacity);
    rb.split()
}

/// Take every pending notification, oldest first
///
/// Meant to be called from the UI's idle tick.
pub fn drain_notifications(consumer: &mut NotificationConsumer) -> Vec<Notification> {
    consumer.pop_iter().collect()
}
