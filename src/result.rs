use super::errors::BalancerError;

pub type BalanceResult<T> = Result<T, BalancerError>;
