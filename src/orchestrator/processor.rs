use super::types::ItemOutcome;
use crate::error::ItemError;
use async_trait::async_trait;

/// Applies one source item to the target store
#[async_trait]
pub trait ItemProcessor<T: Sync>: Send + Sync {
    async fn process(&self, item: &T) -> Result<ItemOutcome, ItemError>;
}

/// Adapts a synchronous closure into an [`ItemProcessor`]
pub struct FnProcessor<F> {
    f: F,
}

impl<F> FnProcessor<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<T, F> ItemProcessor<T> for FnProcessor<F>
where
    T: Sync,
    F: Fn(&T) -> Result<ItemOutcome, ItemError> + Send + Sync,
{
    async fn process(&self, item: &T) -> Result<ItemOutcome, ItemError> {
        (self.f)(item)
    }
}
