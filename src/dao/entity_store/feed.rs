use tokio::sync::broadcast;

use super::ChangeNotice;

/// Broadcast hub fanning commit notices out to live query subscribers.
#[derive(Clone)]
pub struct ChangeFeed {
    sender: broadcast::Sender<ChangeNotice>,
}

impl ChangeFeed {
    /// Construct a new feed backed by a Tokio broadcast channel with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _receiver) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Register a new subscriber that will receive subsequent notices.
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeNotice> {
        self.sender.subscribe()
    }

    /// Send a notice to all current subscribers, ignoring delivery errors.
    pub fn publish(&self, notice: ChangeNotice) {
        if notice.is_empty() {
            return;
        }
        let _ = self.sender.send(notice);
    }
}
