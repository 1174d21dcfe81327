use super::{
    errors::BalancerError,
    request::Response,
    result::BalanceResult,
};
use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll}
};
use tokio::{
    sync::oneshot,
    time::Duration,
};
use tokio_util::sync::CancellationToken;


/// Handle на ответ запроса с поддержкой отмены и timeout.
///
/// Создается вместе с запросом в `Request::new`.
pub struct ResponseHandle<Res> {
    pub(crate) cancel: CancellationToken,
    pub(crate) receiver: oneshot::Receiver<BalanceResult<Response<Res>>>,
}

impl<Res> ResponseHandle<Res> {
    /// Просит воркера не выполнять (или прервать) работу.
    /// Ответ все равно придет: `Err(Cancelled)` или уже готовый результат.
    #[inline]
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Ждет ответ не дольше `timeout`. По истечении отменяет запрос.
    pub async fn await_timeout(self, timeout: Duration) -> BalanceResult<Response<Res>> {
        let cancel = self.cancel.clone();
        tokio::time::timeout(timeout, self).await.unwrap_or_else(|_| {
            cancel.cancel();
            Err(BalancerError::Timeout)
        })
    }
}

// Закрытый канал без ответа: запрос потерян вместе с отправителем.
impl<Res> Future for ResponseHandle<Res> {
    type Output = BalanceResult<Response<Res>>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(BalancerError::ChannelClosed)))
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::{request::Request, worker::WorkerId};

    #[tokio::test]
    async fn delivers_response() {
        let (request, handle) = Request::<u8, u8>::new(7);
        let _ = request.responder.send(Ok(Response { worker: WorkerId(1), value: 14 }));
        let response = handle.await.unwrap();
        assert_eq!(response.worker, WorkerId(1));
        assert_eq!(response.value, 14);
    }

    #[tokio::test]
    async fn dropped_request_closes_channel() {
        let (request, handle) = Request::<u8, u8>::new(7);
        drop(request);
        assert_eq!(handle.await, Err(BalancerError::ChannelClosed));
    }

    #[tokio::test]
    async fn timeout_cancels_request() {
        let (request, handle) = Request::<u8, u8>::new(7);
        let result = handle.await_timeout(Duration::from_millis(10)).await;
        assert_eq!(result, Err(BalancerError::Timeout));
        assert!(request.is_cancelled());
    }

    #[tokio::test]
    async fn cancel_is_visible_to_request() {
        let (request, handle) = Request::<u8, u8>::new(7);
        assert!(!handle.is_cancelled());
        handle.cancel();
        assert!(handle.is_cancelled());
        assert!(request.is_cancelled());
    }
}
