//! Single-writer queue of [`ClusterState`] updates.

use {
    super::{
        view::{Publisher, View},
        ClusterState,
    },
    futures::Stream,
    std::{
        cmp::{Ordering, Reverse},
        collections::BinaryHeap,
        future::Future,
        sync::{
            atomic::{self, AtomicU64},
            Arc,
        },
    },
    tokio::sync::{mpsc, oneshot},
};

/// Priority of a state update. Higher priorities are applied first, FIFO
/// within the same priority.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    Normal,
    High,
    Urgent,
}

#[derive(Debug, thiserror::Error)]
pub enum UpdateError<E> {
    /// The update task rejected the transition.
    #[error(transparent)]
    Task(E),

    #[error("Cluster state writer is closed")]
    Closed,
}

/// Source of truth for the [`ClusterState`].
///
/// Update tasks are executed one at a time, each against the latest
/// published state. A task either returns the next state, returns `None` to
/// leave the state as is, or fails without touching it.
pub trait StateUpdater: Clone + Send + Sync + 'static {
    /// Returns the latest published [`ClusterState`].
    fn state(&self) -> Arc<ClusterState>;

    /// Stream of publication notifications.
    fn updates(&self) -> impl Stream<Item = ()> + Send + 'static + use<Self>;

    /// Submits an update task, resolving with the state the task has been
    /// applied to or produced.
    fn submit<T, E>(
        &self,
        source: &str,
        priority: Priority,
        task: T,
    ) -> impl Future<Output = Result<Arc<ClusterState>, UpdateError<E>>> + Send
    where
        T: FnOnce(&ClusterState) -> Result<Option<ClusterState>, E> + Send + 'static,
        E: Send + 'static;
}

type Completion = Box<dyn FnOnce(Arc<ClusterState>) + Send>;

enum Applied {
    Unchanged(Completion),
    Changed(ClusterState, Completion),
    Failed,
}

type Job = Box<dyn FnOnce(&ClusterState) -> Applied + Send>;

struct Submission {
    source: String,
    priority: Priority,
    seq: u64,
    job: Job,
}

impl Submission {
    fn key(&self) -> (Priority, Reverse<u64>) {
        (self.priority, Reverse(self.seq))
    }
}

impl PartialEq for Submission {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Submission {}

impl PartialOrd for Submission {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Submission {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

/// In-process [`StateUpdater`] backed by a dedicated tokio task.
#[derive(Clone, Debug)]
pub struct ClusterService {
    view: View,
    submissions: mpsc::UnboundedSender<Submission>,
    seq: Arc<AtomicU64>,
}

impl ClusterService {
    /// Spawns the writer task owning `initial` state.
    ///
    /// The task stops once every handle is dropped.
    pub fn spawn(initial: ClusterState) -> Self {
        let publisher = Publisher::new(initial);
        let view = publisher.view();
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(
            Writer {
                publisher,
                view: view.clone(),
                submissions: rx,
                queue: BinaryHeap::new(),
            }
            .run(),
        );

        Self {
            view,
            submissions: tx,
            seq: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn view(&self) -> &View {
        &self.view
    }
}

impl StateUpdater for ClusterService {
    fn state(&self) -> Arc<ClusterState> {
        self.view.state()
    }

    fn updates(&self) -> impl Stream<Item = ()> + Send + 'static + use<> {
        self.view.updates()
    }

    fn submit<T, E>(
        &self,
        source: &str,
        priority: Priority,
        task: T,
    ) -> impl Future<Output = Result<Arc<ClusterState>, UpdateError<E>>> + Send
    where
        T: FnOnce(&ClusterState) -> Result<Option<ClusterState>, E> + Send + 'static,
        E: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();

        let job: Job = Box::new(move |state| match task(state) {
            Ok(None) => Applied::Unchanged(Box::new(move |s| {
                let _ = tx.send(Ok(s));
            })),
            Ok(Some(new)) => Applied::Changed(
                new,
                Box::new(move |s| {
                    let _ = tx.send(Ok(s));
                }),
            ),
            Err(err) => {
                let _ = tx.send(Err(UpdateError::Task(err)));
                Applied::Failed
            }
        });

        let submission = Submission {
            source: source.to_string(),
            priority,
            seq: self.seq.fetch_add(1, atomic::Ordering::Relaxed),
            job,
        };
        let submitted = self.submissions.send(submission).is_ok();

        async move {
            if !submitted {
                return Err(UpdateError::Closed);
            }

            rx.await.map_err(|_| UpdateError::Closed)?
        }
    }
}

struct Writer {
    publisher: Publisher,
    view: View,
    submissions: mpsc::UnboundedReceiver<Submission>,
    queue: BinaryHeap<Submission>,
}

impl Writer {
    async fn run(mut self) {
        tracing::debug!("cluster state writer started");

        while let Some(submission) = self.submissions.recv().await {
            self.queue.push(submission);
            self.drain_channel();

            while let Some(submission) = self.queue.pop() {
                self.apply(submission);
                self.drain_channel();
            }
        }

        tracing::debug!("cluster state writer stopped");
    }

    fn drain_channel(&mut self) {
        while let Ok(submission) = self.submissions.try_recv() {
            self.queue.push(submission);
        }
    }

    fn apply(&self, submission: Submission) {
        let current = self.view.state();

        match (submission.job)(&current) {
            Applied::Unchanged(done) => done(current),
            Applied::Changed(new, done) => {
                let new = Arc::new(new);

                tracing::debug!(
                    source = %submission.source,
                    priority = ?submission.priority,
                    from = current.version(),
                    to = new.version(),
                    "cluster state updated"
                );
                metrics::counter!("zonal_state_updates").increment(1);
                metrics::gauge!("zonal_state_version").set(new.version() as f64);

                self.publisher.publish(new.clone());
                done(new);
            }
            Applied::Failed => {
                tracing::debug!(source = %submission.source, "cluster state update rejected");
            }
        }
    }
}
