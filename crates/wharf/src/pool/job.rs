use core::future::Future;
use futures::future::BoxFuture;

/// A single unit of work executed by a pool worker.
///
/// The pool imposes no shared state on jobs; anything a job touches beyond its
/// own captures is the caller's responsibility. Closures of the form
/// `FnOnce(usize) -> impl Future<Output = ()>` implement this trait directly,
/// receiving the id of the worker that runs them.
pub trait Job: Send + 'static {
    fn run(self: Box<Self>, worker_id: usize) -> BoxFuture<'static, ()>;
}

impl<F, Fut> Job for F
where
    F: FnOnce(usize) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    fn run(self: Box<Self>, worker_id: usize) -> BoxFuture<'static, ()> {
        Box::pin((*self)(worker_id))
    }
}

pub(crate) type BoxJob = Box<dyn Job>;
