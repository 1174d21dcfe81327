//! Асинхронный балансировщик нагрузки поверх пула воркеров
//!
//! # Features
//! - Каждый новый запрос уходит наименее загруженному воркеру
//! - Пул воркеров: индексированная min-куча по числу незавершенных запросов
//! - Единственный цикл диспетчера владеет пулом, блокировок нет
//! - FIFO внутри воркера, ровно один ответ на каждый запрос
//! - Graceful shutdown с таймаутом, отмена запросов, перехват паник
//! - Срезы нагрузки и мониторинг

pub mod balancer;
pub mod errors;
pub mod handle;
pub mod model;
pub mod pool;
pub mod request;
pub mod result;
pub mod work;
pub mod worker;

pub use balancer::{Balancer, BalancerHandle, Config, Submitter};
pub use errors::BalancerError;
pub use handle::ResponseHandle;
pub use model::{BalancerMetrics, LoadSnapshot};
pub use request::{Request, Response};
pub use result::BalanceResult;
pub use work::{Blocking, WithDeadline, Work};
pub use worker::WorkerId;
