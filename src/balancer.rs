use super::{
    errors::BalancerError,
    handle::ResponseHandle,
    model::{
        BalancerMetrics,
        LoadSnapshot,
    },
    pool::{Load, WorkerPool},
    request::{Request, Response},
    result::BalanceResult,
    work::Work,
    worker::{WorkerId, WorkerLoad, WorkerLoop},
};
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use crossbeam::utils::CachePadded;
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
    time::Duration,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn, Level};


/// Конфигурация балансировщика
#[derive(Debug, Clone)]
pub struct Config {
    /// Число воркеров, фиксировано на все время жизни балансировщика
    pub num_workers: usize,
    /// Емкость общей входной очереди. При заполнении `submit` ждет
    pub max_pending: usize,
}

impl Default for Config {
    fn default() -> Self {
        let num_cpus = num_cpus::get();
        Self {
            num_workers: num_cpus,
            max_pending: num_cpus * 64,
        }
    }
}

impl Config {
    pub fn new(num_workers: usize) -> Self {
        Self {
            num_workers,
            ..Default::default()
        }
    }

    pub fn cpu_bound() -> Self {
        let num_cpus = num_cpus::get();
        Self {
            num_workers: num_cpus,
            max_pending: num_cpus * 16,
        }
    }

    pub fn io_bound() -> Self {
        let num_cpus = num_cpus::get();
        Self {
            num_workers: num_cpus * 4,
            max_pending: num_cpus * 256,
        }
    }

    pub fn validate(&self) -> BalanceResult<()> {
        if self.num_workers == 0 {
            return Err(BalancerError::InvalidConfig("num_workers must be positive".into()));
        }
        if self.max_pending == 0 {
            return Err(BalancerError::InvalidConfig("max_pending must be positive".into()));
        }
        Ok(())
    }
}


#[derive(Debug, Default)]
pub(crate) struct Counters {
    submitted: CachePadded<AtomicU64>,
    dispatched: CachePadded<AtomicU64>,
    completed: CachePadded<AtomicU64>,
}


pub(crate) enum Control {
    Snapshot(oneshot::Sender<LoadSnapshot>),
}


/// Диспетчер: единственный владелец пула воркеров.
///
/// Пул меняется только из цикла `run`, поэтому блокировки не нужны.
pub struct Balancer<Req, Res> {
    pool: WorkerPool<WorkerLoad>,
    // индекс = WorkerId
    queues: Vec<mpsc::UnboundedSender<Request<Req, Res>>>,
    dispatched: u64,
    completed: u64,
    counters: Arc<Counters>,
}

impl<Req, Res> Balancer<Req, Res>
where
    Req: Send + 'static,
    Res: Send + 'static,
{
    /// Создает `config.num_workers` воркеров, запускает их и цикл диспетчера.
    ///
    /// Должен вызываться внутри рантайма tokio.
    pub fn start<W>(config: Config, work: W) -> BalanceResult<BalancerHandle<Req, Res>>
    where
        W: Work<Req, Res>,
    {
        config.validate()?;

        let work: Arc<dyn Work<Req, Res>> = Arc::new(work);
        let (request_tx, request_rx) = mpsc::channel(config.max_pending);
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (done_tx, done_rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();
        let abort = CancellationToken::new();
        let counters = Arc::new(Counters::default());

        let (queues, workers) = spawn_workers(config.num_workers, &work, done_tx, &abort);

        let balancer = Self::new(queues, Arc::clone(&counters));
        let task = tokio::spawn(balancer.run(
            request_rx,
            control_rx,
            done_rx,
            workers,
            shutdown.clone(),
        ));

        Ok(BalancerHandle {
            submitter: Submitter::new(request_tx, Arc::clone(&counters)),
            control: control_tx,
            shutdown,
            abort,
            counters,
            num_workers: config.num_workers,
            task: Some(task),
        })
    }

    pub(crate) fn new(
        queues: Vec<mpsc::UnboundedSender<Request<Req, Res>>>,
        counters: Arc<Counters>,
    ) -> Self {
        let mut pool = WorkerPool::with_capacity(queues.len());
        for i in 0..queues.len() {
            pool.insert(WorkerLoad::new(WorkerId(i)));
        }
        Self {
            pool,
            queues,
            dispatched: 0,
            completed: 0,
            counters,
        }
    }

    async fn run(
        mut self,
        mut requests: mpsc::Receiver<Request<Req, Res>>,
        mut control: mpsc::UnboundedReceiver<Control>,
        mut completions: mpsc::UnboundedReceiver<WorkerId>,
        workers: Vec<JoinHandle<()>>,
        shutdown: CancellationToken,
    ) {
        info!(workers = self.pool.len(), "balancer started");

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => break,

                Some(id) = completions.recv() => self.complete(id),

                Some(Control::Snapshot(reply)) = control.recv() => {
                    let _ = reply.send(self.snapshot());
                }

                request = requests.recv() => match request {
                    Some(request) => {
                        self.dispatch(request);
                    }
                    None => {
                        debug!("all submitters dropped");
                        break;
                    }
                },
            }

            self.trace_load();
        }

        // новые запросы больше не принимаются, но уже принятые доходят до воркеров
        drop(control);
        requests.close();
        let mut drained = 0usize;
        while let Some(request) = requests.recv().await {
            self.dispatch(request);
            drained += 1;
        }
        info!(drained, in_flight = self.dispatched - self.completed, "balancer draining");

        // закрытая очередь останавливает воркера, когда он ее вычерпает
        self.queues.clear();
        while let Some(id) = completions.recv().await {
            self.complete(id);
        }

        for worker in workers {
            if let Err(e) = worker.await {
                error!(error = %e, "worker task failed");
            }
        }

        info!(dispatched = self.dispatched, completed = self.completed, "balancer stopped");
    }

    /// Отдает запрос наименее загруженному воркеру.
    pub(crate) fn dispatch(&mut self, request: Request<Req, Res>) -> Option<WorkerId> {
        let Some(mut worker) = self.pool.extract_min() else {
            unreachable!("dispatch on an empty worker pool");
        };
        let id = worker.id();

        let Some(queue) = self.queues.get(id.0) else {
            self.pool.insert(worker);
            request.reject(BalancerError::Shutdown);
            return None;
        };

        match queue.send(request) {
            Ok(()) => {
                worker.inc_load();
                let pending = worker.pending();
                self.pool.insert(worker);
                self.dispatched += 1;
                self.counters.dispatched.fetch_add(1, Ordering::Relaxed);
                debug!(worker = %id, pending, "dispatched");
                Some(id)
            }
            Err(mpsc::error::SendError(request)) => {
                self.pool.insert(worker);
                warn!(worker = %id, "worker queue closed, request rejected");
                request.reject(BalancerError::WorkerUnavailable(id));
                None
            }
        }
    }

    pub(crate) fn complete(&mut self, id: WorkerId) {
        let pending = self.pool.update(id, |worker| {
            worker.dec_load();
            worker.pending()
        });

        match pending {
            Some(pending) => {
                self.completed += 1;
                self.counters.completed.fetch_add(1, Ordering::Relaxed);
                debug!(worker = %id, pending, "completed");
            }
            None => warn!(worker = %id, "completion from unknown worker"),
        }
    }

    pub(crate) fn snapshot(&self) -> LoadSnapshot {
        LoadSnapshot {
            pending: self.pool.pending_by_worker(),
            dispatched: self.dispatched,
            completed: self.completed,
        }
    }

    fn trace_load(&self) {
        if tracing::enabled!(Level::TRACE) {
            let snapshot = self.snapshot();
            trace!(
                pending = ?snapshot.pending,
                mean = snapshot.mean(),
                variance = snapshot.variance(),
                "load"
            );
        }
    }
}


type WorkerSet<Req, Res> = (
    Vec<mpsc::UnboundedSender<Request<Req, Res>>>,
    Vec<JoinHandle<()>>,
);

/// Запускает `count` воркеров. Канал завершений закрывается,
/// когда выйдет последний из них.
fn spawn_workers<Req, Res>(
    count: usize,
    work: &Arc<dyn Work<Req, Res>>,
    done: mpsc::UnboundedSender<WorkerId>,
    abort: &CancellationToken,
) -> WorkerSet<Req, Res>
where
    Req: Send + 'static,
    Res: Send + 'static,
{
    let mut queues = Vec::with_capacity(count);
    let mut workers = Vec::with_capacity(count);

    for i in 0..count {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        queues.push(queue_tx);
        let worker = WorkerLoop::new(
            WorkerId(i),
            queue_rx,
            done.clone(),
            Arc::clone(work),
            abort.clone(),
        );
        workers.push(tokio::spawn(worker.run()));
    }
    (queues, workers)
}


async fn request_snapshot(control: &mpsc::UnboundedSender<Control>) -> BalanceResult<LoadSnapshot> {
    let (tx, rx) = oneshot::channel();
    control
        .send(Control::Snapshot(tx))
        .map_err(|_| BalancerError::Shutdown)?;
    rx.await.map_err(|_| BalancerError::Shutdown)
}


/// Точка входа для производителей запросов. Клонируется.
pub struct Submitter<Req, Res> {
    sender: mpsc::Sender<Request<Req, Res>>,
    counters: Arc<Counters>,
}

impl<Req, Res> Clone for Submitter<Req, Res> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            counters: Arc::clone(&self.counters),
        }
    }
}

impl<Req, Res> Submitter<Req, Res> {
    pub(crate) fn new(sender: mpsc::Sender<Request<Req, Res>>, counters: Arc<Counters>) -> Self {
        Self { sender, counters }
    }

    /// Кладет готовый запрос во входную очередь.
    /// Ждет, если очередь заполнена.
    pub async fn send(&self, request: Request<Req, Res>) -> BalanceResult<()> {
        self.counters.submitted.fetch_add(1, Ordering::Relaxed);
        if self.sender.send(request).await.is_err() {
            self.counters.submitted.fetch_sub(1, Ordering::Relaxed);
            return Err(BalancerError::Shutdown);
        }
        Ok(())
    }

    pub async fn submit(&self, payload: Req) -> BalanceResult<ResponseHandle<Res>> {
        let (request, handle) = Request::new(payload);
        self.send(request).await?;
        Ok(handle)
    }

    /// Неблокирующий вариант `submit`.
    pub fn try_submit(&self, payload: Req) -> BalanceResult<ResponseHandle<Res>> {
        let (request, handle) = Request::new(payload);
        self.counters.submitted.fetch_add(1, Ordering::Relaxed);
        match self.sender.try_send(request) {
            Ok(()) => Ok(handle),
            Err(e) => {
                self.counters.submitted.fetch_sub(1, Ordering::Relaxed);
                match e {
                    mpsc::error::TrySendError::Full(_) => Err(BalancerError::QueueFull),
                    mpsc::error::TrySendError::Closed(_) => Err(BalancerError::Shutdown),
                }
            }
        }
    }

    /// Отправляет запрос и ждет ответ.
    pub async fn call(&self, payload: Req) -> BalanceResult<Response<Res>> {
        self.submit(payload).await?.await
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}


/// Handle запущенного балансировщика.
///
/// Drop без `shutdown` запускает мягкую остановку в фоне.
pub struct BalancerHandle<Req, Res> {
    submitter: Submitter<Req, Res>,
    control: mpsc::UnboundedSender<Control>,
    shutdown: CancellationToken,
    abort: CancellationToken,
    counters: Arc<Counters>,
    num_workers: usize,
    task: Option<JoinHandle<()>>,
}

impl<Req, Res> BalancerHandle<Req, Res> {
    pub fn submitter(&self) -> Submitter<Req, Res> {
        self.submitter.clone()
    }

    pub async fn submit(&self, payload: Req) -> BalanceResult<ResponseHandle<Res>> {
        self.submitter.submit(payload).await
    }

    pub fn try_submit(&self, payload: Req) -> BalanceResult<ResponseHandle<Res>> {
        self.submitter.try_submit(payload)
    }

    pub async fn call(&self, payload: Req) -> BalanceResult<Response<Res>> {
        self.submitter.call(payload).await
    }

    #[inline]
    pub fn num_workers(&self) -> usize {
        self.num_workers
    }

    #[inline]
    pub fn metrics(&self) -> BalancerMetrics {
        BalancerMetrics {
            workers: self.num_workers,
            submitted: self.counters.submitted.load(Ordering::Relaxed),
            dispatched: self.counters.dispatched.load(Ordering::Relaxed),
            completed: self.counters.completed.load(Ordering::Relaxed),
        }
    }

    /// Согласованный срез нагрузки из цикла диспетчера.
    pub async fn snapshot(&self) -> BalanceResult<LoadSnapshot> {
        request_snapshot(&self.control).await
    }

    /// Мониторинг нагрузки с callback
    /// ВАЖНО: Вызовите token.cancel() для остановки мониторинга
    pub fn start_monitoring<F>(&self, interval: Duration, callback: F) -> CancellationToken
    where
        F: Fn(LoadSnapshot) + Send + 'static,
    {
        let control = self.control.clone();
        let token = CancellationToken::new();
        let token_clone = token.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {
                        match request_snapshot(&control).await {
                            Ok(snapshot) => callback(snapshot),
                            Err(_) => break,
                        }
                    }
                    _ = token_clone.cancelled() => break,
                }
            }
        });

        token
    }

    /// Остановить мониторинг
    pub fn stop_monitoring(token: CancellationToken) {
        token.cancel();
    }

    /// Мягкая остановка: уже принятые запросы обрабатываются до конца.
    pub async fn shutdown(mut self) {
        self.shutdown.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                error!(error = %e, "balancer task failed");
            }
        }
    }

    /// Как `shutdown`, но по истечении `timeout` прерывает незавершенную работу.
    /// Возвращает `false`, если пришлось прерывать.
    pub async fn shutdown_timeout(mut self, timeout: Duration) -> bool {
        self.shutdown.cancel();
        let Some(mut task) = self.task.take() else {
            return true;
        };

        match tokio::time::timeout(timeout, &mut task).await {
            Ok(joined) => {
                if let Err(e) = joined {
                    error!(error = %e, "balancer task failed");
                }
                true
            }
            Err(_) => {
                warn!(?timeout, "graceful shutdown timed out, aborting in-flight work");
                self.abort.cancel();
                if let Err(e) = task.await {
                    error!(error = %e, "balancer task failed");
                }
                false
            }
        }
    }
}

impl<Req, Res> Drop for BalancerHandle<Req, Res> {
    fn drop(&mut self) {
        if self.task.is_some() {
            self.shutdown.cancel();
        }
    }
}
