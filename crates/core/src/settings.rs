use {
    arc_swap::ArcSwap,
    futures::Stream,
    std::sync::Arc,
    tokio::sync::watch,
    tokio_stream::wrappers::WatchStream,
};

/// Hot-reloadable value.
///
/// Readers get a consistent snapshot without taking a lock, writers replace
/// the whole value and every subscriber gets notified.
#[derive(Debug)]
pub struct Setting<T> {
    value: Arc<ArcSwap<T>>,
    update_notifications: Arc<watch::Sender<()>>,
}

impl<T> Clone for Setting<T> {
    fn clone(&self) -> Self {
        Self {
            value: self.value.clone(),
            update_notifications: self.update_notifications.clone(),
        }
    }
}

impl<T: Default> Default for Setting<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> Setting<T> {
    pub fn new(value: T) -> Self {
        let (tx, _) = watch::channel(());

        Self {
            value: Arc::new(ArcSwap::from_pointee(value)),
            update_notifications: Arc::new(tx),
        }
    }

    /// Returns the current snapshot of this [`Setting`].
    pub fn get(&self) -> Arc<T> {
        self.value.load_full()
    }

    pub fn peek<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.value.load())
    }

    /// Replaces the value.
    pub fn set(&self, value: T) {
        self.value.store(Arc::new(value));
        self.update_notifications.send_replace(());
    }

    /// Atomically derives a new value from the current one.
    ///
    /// `f` may be called more than once if there are concurrent writers.
    pub fn update(&self, f: impl Fn(&T) -> T) {
        self.value.rcu(|current| f(current));
        self.update_notifications.send_replace(());
    }

    /// Stream of change notifications.
    ///
    /// The first item is yielded immediately.
    pub fn updates(&self) -> impl Stream<Item = ()> + Send + 'static {
        WatchStream::new(self.update_notifications.subscribe())
    }
}

#[cfg(test)]
mod test {
    use {super::*, futures::StreamExt as _, std::time::Duration};

    #[tokio::test]
    async fn notifies_subscribers() {
        let setting = Setting::new(1usize);
        let mut updates = setting.updates();

        // Current value.
        updates.next().await;

        setting.set(2);
        tokio::time::timeout(Duration::from_secs(1), updates.next())
            .await
            .unwrap();
        assert_eq!(*setting.get(), 2);

        setting.update(|v| v * 10);
        assert_eq!(setting.peek(|v| *v), 20);
    }
}
