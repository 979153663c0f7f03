use super::{
    errors::{AssetError, AssetResult},
    model::AssetKey,
};
use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};
use tokio::{
    sync::oneshot::{self, error::TryRecvError},
    time::Duration,
};


/// Handle на запрошенный ассет.
/// Сам по себе является future и резолвится вместе с остальными подписчиками.
pub struct AssetHandle<T> {
    key: AssetKey,
    receiver: oneshot::Receiver<AssetResult<T>>,
}

impl<T> AssetHandle<T> {
    pub fn new(key: AssetKey, receiver: oneshot::Receiver<AssetResult<T>>) -> Self {
        Self { key, receiver }
    }

    #[inline]
    pub fn key(&self) -> &AssetKey {
        &self.key
    }

    /// Неблокирующая проверка: `None`, пока загрузка не завершена
    pub fn try_result(&mut self) -> Option<AssetResult<T>> {
        match self.receiver.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Closed) => Some(Err(AssetError::ChannelClosed)),
        }
    }

    /// Блокирующее ожидание для кода вне async-рантайма.
    /// Паникует, если вызвано из контекста tokio.
    pub fn wait(self) -> AssetResult<T> {
        self.receiver
            .blocking_recv()
            .unwrap_or(Err(AssetError::ChannelClosed))
    }

    pub async fn await_timeout(self, timeout: Duration) -> AssetResult<T> {
        match tokio::time::timeout(timeout, self.receiver).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(AssetError::ChannelClosed),
            Err(_) => Err(AssetError::Timeout),
        }
    }
}

impl<T> Future for AssetHandle<T> {
    type Output = AssetResult<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.receiver).poll(cx) {
            Poll::Ready(res) => Poll::Ready(res.unwrap_or(Err(AssetError::ChannelClosed))),
            Poll::Pending => Poll::Pending,
        }
    }
}
