//! Воркеры балансировщика.

use super::{
    errors::BalancerError,
    pool::Load,
    request::{Request, Response},
    work::Work,
};
use futures::FutureExt;
use std::{
    any::Any,
    fmt,
    panic::AssertUnwindSafe,
    sync::Arc,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};


/// Стабильный идентификатор воркера, назначается при создании пула.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerId(pub usize);

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}


/// Учет нагрузки воркера на стороне балансировщика.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerLoad {
    id: WorkerId,
    pending: usize,
}

impl WorkerLoad {
    pub fn new(id: WorkerId) -> Self {
        Self { id, pending: 0 }
    }

    #[inline]
    pub fn id(&self) -> WorkerId {
        self.id
    }

    /// Запрос отдан воркеру.
    #[inline]
    pub fn inc_load(&mut self) {
        self.pending += 1;
    }

    /// Воркер сообщил о завершении запроса.
    #[inline]
    pub fn dec_load(&mut self) {
        debug_assert!(self.pending > 0, "completion without a pending request on worker {}", self.id);
        self.pending = self.pending.saturating_sub(1);
    }
}

impl Load for WorkerLoad {
    #[inline]
    fn worker_id(&self) -> WorkerId {
        self.id
    }

    #[inline]
    fn pending(&self) -> usize {
        self.pending
    }
}


/// Цикл исполнения одного воркера.
///
/// ```text
/// while let Some(request) = queue.recv().await {
///     request.respond(work.execute(request.payload).await);
///     done.send(worker_id);
/// }
/// ```
pub(crate) struct WorkerLoop<Req, Res> {
    id: WorkerId,
    queue: mpsc::UnboundedReceiver<Request<Req, Res>>,
    done: mpsc::UnboundedSender<WorkerId>,
    work: Arc<dyn Work<Req, Res>>,
    abort: CancellationToken,
}

impl<Req, Res> WorkerLoop<Req, Res>
where
    Req: Send + 'static,
    Res: Send + 'static,
{
    pub(crate) fn new(
        id: WorkerId,
        queue: mpsc::UnboundedReceiver<Request<Req, Res>>,
        done: mpsc::UnboundedSender<WorkerId>,
        work: Arc<dyn Work<Req, Res>>,
        abort: CancellationToken,
    ) -> Self {
        Self { id, queue, done, work, abort }
    }

    /// Работает, пока очередь не закрыта и не вычерпана, либо до abort.
    pub(crate) async fn run(mut self) {
        debug!(worker = %self.id, "worker started");

        loop {
            let request = tokio::select! {
                biased;
                _ = self.abort.cancelled() => break,
                request = self.queue.recv() => match request {
                    Some(request) => request,
                    None => break,
                },
            };

            self.process(request).await;

            if self.done.send(self.id).is_err() {
                warn!(worker = %self.id, "balancer is gone, completion not delivered");
                return;
            }
        }

        if self.abort.is_cancelled() {
            self.reject_queued();
        }
        debug!(worker = %self.id, "worker stopped");
    }

    async fn process(&self, request: Request<Req, Res>) {
        let Request { payload, responder, cancel } = request;

        if cancel.is_cancelled() || responder.is_closed() {
            trace!(worker = %self.id, "skipping cancelled request");
            let _ = responder.send(Err(BalancerError::Cancelled));
            return;
        }

        // execute вызывается внутри future, чтобы catch_unwind поймал и синхронную часть
        let work = Arc::clone(&self.work);
        let task = AssertUnwindSafe(async move { work.execute(payload).await }).catch_unwind();

        let result = tokio::select! {
            biased;
            _ = self.abort.cancelled() => Err(BalancerError::Cancelled),
            _ = cancel.cancelled() => Err(BalancerError::Cancelled),
            outcome = task => outcome.map_err(|panic| {
                let message = panic_message(panic.as_ref());
                warn!(worker = %self.id, %message, "work panicked");
                BalancerError::Panic(message)
            }),
        };

        let _ = responder.send(result.map(|value| Response { worker: self.id, value }));
    }

    /// После abort: оставшиеся в очереди запросы получают `Cancelled`
    /// и учитываются как завершенные.
    fn reject_queued(&mut self) {
        self.queue.close();
        let mut rejected = 0usize;
        while let Ok(request) = self.queue.try_recv() {
            request.reject(BalancerError::Cancelled);
            rejected += 1;
            if self.done.send(self.id).is_err() {
                break;
            }
        }
        if rejected > 0 {
            warn!(worker = %self.id, rejected, "queued requests cancelled by abort");
        }
    }
}


fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
