use crate::worker::WorkerId;
use thiserror::Error;

/// Ошибки протокола балансировщика.
///
/// Ошибки самой прикладной работы сюда не попадают: их кодирует
/// результат функции работы.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum BalancerError {
    #[error("invalid balancer config: {0}")]
    InvalidConfig(String),
    #[error("balancer is shut down")]
    Shutdown,
    #[error("inbound queue is full")]
    QueueFull,
    #[error("response channel closed")]
    ChannelClosed,
    #[error("worker {0} is unavailable")]
    WorkerUnavailable(WorkerId),
    #[error("deadline elapsed")]
    Timeout,
    #[error("request cancelled")]
    Cancelled,
    #[error("work panicked: {0}")]
    Panic(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages() {
        assert_eq!(BalancerError::Shutdown.to_string(), "balancer is shut down");
        assert_eq!(
            BalancerError::WorkerUnavailable(WorkerId(3)).to_string(),
            "worker 3 is unavailable"
        );
        assert_eq!(
            BalancerError::Panic("boom".into()).to_string(),
            "work panicked: boom"
        );
    }
}
