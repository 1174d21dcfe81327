//! Подключаемая функция работы воркера.

use super::{
    errors::BalancerError,
    result::BalanceResult,
};
use futures::{
    future::BoxFuture,
    FutureExt,
};
use std::{
    future::Future,
    sync::Arc,
};
use tokio::time::Duration;


/// Что именно вычисляет воркер над полезной нагрузкой запроса.
///
/// Прикладные ошибки кодируются в `Res`, балансировщик их не видит.
pub trait Work<Req, Res>: Send + Sync + 'static {
    fn execute(&self, req: Req) -> BoxFuture<'static, Res>;
}

impl<Req, Res, F, Fut> Work<Req, Res> for F
where
    F: Fn(Req) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Res> + Send + 'static,
{
    #[inline]
    fn execute(&self, req: Req) -> BoxFuture<'static, Res> {
        self(req).boxed()
    }
}


/// Синхронная функция работы, исполняемая в blocking-пуле tokio,
/// чтобы CPU-bound вычисление не занимало поток рантайма.
pub struct Blocking<F> {
    f: Arc<F>,
}

impl<F> Blocking<F> {
    pub fn new(f: F) -> Self {
        Self { f: Arc::new(f) }
    }
}

impl<Req, Res, F> Work<Req, Res> for Blocking<F>
where
    Req: Send + 'static,
    Res: Send + 'static,
    F: Fn(Req) -> Res + Send + Sync + 'static,
{
    fn execute(&self, req: Req) -> BoxFuture<'static, Res> {
        let f = Arc::clone(&self.f);
        async move {
            // Ошибок в `Res` нет, поэтому сбой blocking-задачи раскручивается
            // дальше как паника. Воркер ловит ее через catch_unwind и отвечает
            // `BalancerError::Panic`, так что ответ все равно будет доставлен.
            match tokio::task::spawn_blocking(move || (*f)(req)).await {
                Ok(res) => res,
                Err(join_err) => std::panic::resume_unwind(blocking_failure(join_err)),
            }
        }
        .boxed()
    }
}


/// Полезная нагрузка паники для упавшей blocking-задачи.
///
/// Исходная паника сохраняется как есть. Отмена задачи возможна только
/// при остановке рантайма и превращается в сообщение.
fn blocking_failure(join_err: tokio::task::JoinError) -> Box<dyn std::any::Any + Send> {
    match join_err.try_into_panic() {
        Ok(payload) => payload,
        Err(join_err) => Box::new(format!("blocking work aborted: {join_err}")),
    }
}


/// Ограничивает каждую единицу работы дедлайном.
/// Сам балансировщик о дедлайнах ничего не знает.
pub struct WithDeadline<W> {
    inner: W,
    timeout: Duration,
}

impl<W> WithDeadline<W> {
    pub fn new(inner: W, timeout: Duration) -> Self {
        Self { inner, timeout }
    }
}

impl<Req, Res, W> Work<Req, BalanceResult<Res>> for WithDeadline<W>
where
    Res: Send + 'static,
    W: Work<Req, Res>,
{
    fn execute(&self, req: Req) -> BoxFuture<'static, BalanceResult<Res>> {
        let fut = self.inner.execute(req);
        let timeout = self.timeout;
        async move {
            tokio::time::timeout(timeout, fut)
                .await
                .map_err(|_| BalancerError::Timeout)
        }
        .boxed()
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn closure_is_work() {
        let work = |x: u32| async move { x * 2 };
        assert_eq!(Work::<u32, u32>::execute(&work, 21).await, 42);
    }

    #[tokio::test]
    async fn blocking_runs_sync_function() {
        let work = Blocking::new(|x: f64| x.sin());
        let value = Work::<f64, f64>::execute(&work, 0.0).await;
        assert_eq!(value, 0.0);
    }

    #[tokio::test]
    async fn deadline_passes_fast_work() {
        let work = WithDeadline::new(|x: u8| async move { x }, Duration::from_millis(200));
        assert_eq!(Work::<u8, BalanceResult<u8>>::execute(&work, 5).await, Ok(5));
    }

    #[tokio::test]
    async fn deadline_cuts_slow_work() {
        let work = WithDeadline::new(
            |x: u8| async move {
                tokio::time::sleep(Duration::from_secs(10)).await;
                x
            },
            Duration::from_millis(20),
        );
        assert_eq!(
            Work::<u8, BalanceResult<u8>>::execute(&work, 5).await,
            Err(BalancerError::Timeout)
        );
    }
}
