//! Конверт запроса: полезная нагрузка + одноразовый канал ответа.

use super::{
    handle::ResponseHandle,
    result::BalanceResult,
    worker::WorkerId,
};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;


pub(crate) type Responder<Res> = oneshot::Sender<BalanceResult<Response<Res>>>;


/// Результат обработки запроса.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response<Res> {
    /// Воркер, обработавший запрос. Только для диагностики.
    pub worker: WorkerId,
    pub value: Res,
}

/// Единица работы. Обрабатывается ровно одним воркером,
/// ответ доставляется ровно один раз.
pub struct Request<Req, Res> {
    pub(crate) payload: Req,
    pub(crate) responder: Responder<Res>,
    pub(crate) cancel: CancellationToken,
}

impl<Req, Res> Request<Req, Res> {
    /// Создает запрос и handle, через который придет ответ.
    pub fn new(payload: Req) -> (Self, ResponseHandle<Res>) {
        let (responder, receiver) = oneshot::channel();
        let cancel = CancellationToken::new();
        let handle = ResponseHandle {
            cancel: cancel.clone(),
            receiver,
        };
        (Self { payload, responder, cancel }, handle)
    }

    #[inline]
    pub fn payload(&self) -> &Req {
        &self.payload
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Отвечает ошибкой, не выполняя работу.
    pub(crate) fn reject(self, err: crate::errors::BalancerError) {
        let _ = self.responder.send(Err(err));
    }
}

impl<Req: std::fmt::Debug, Res> std::fmt::Debug for Request<Req, Res> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("payload", &self.payload)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}
