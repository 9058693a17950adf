use {
    super::ClusterState,
    arc_swap::ArcSwap,
    futures::Stream,
    std::sync::Arc,
    tokio::sync::watch,
    tokio_stream::wrappers::WatchStream,
};

/// Write side of a [`View`]. Owned by the single writer.
#[derive(Debug)]
pub(super) struct Publisher {
    view: View,
    update_notifications: watch::Sender<()>,
}

impl Publisher {
    pub(super) fn new(state: ClusterState) -> Self {
        let (tx, rx) = watch::channel(());

        Self {
            view: View {
                state: Arc::new(ArcSwap::from_pointee(state)),
                update_notifications: rx,
            },
            update_notifications: tx,
        }
    }

    pub(super) fn publish(&self, state: Arc<ClusterState>) {
        self.view.state.store(state);
        let _ = self.update_notifications.send(());
    }

    pub(super) fn view(&self) -> View {
        self.view.clone()
    }
}

/// Lock-free read access to the latest published [`ClusterState`].
#[derive(Debug, Clone)]
pub struct View {
    state: Arc<ArcSwap<ClusterState>>,
    update_notifications: watch::Receiver<()>,
}

impl View {
    pub fn state(&self) -> Arc<ClusterState> {
        self.state.load_full()
    }

    pub fn peek<T>(&self, f: impl FnOnce(&ClusterState) -> T) -> T {
        f(&self.state.load())
    }

    /// Stream of publication notifications. The first item is yielded
    /// immediately.
    pub fn updates(&self) -> impl Stream<Item = ()> + Send + 'static {
        WatchStream::new(self.update_notifications.clone())
    }
}
