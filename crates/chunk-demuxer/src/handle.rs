//! Completion handles for asynchronous demuxer operations.
//!
//! Each handle wraps the receiving end of a oneshot channel whose sender the
//! demuxer keeps until the operation completes. A handle can be checked
//! without blocking through [`Handle::try_result`] or awaited.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use media_types::TimeDelta;
use tokio::sync::oneshot;

use crate::buffer::StreamRead;
use crate::error::{PipelineError, PipelineStatus};

/// A value a handle can resolve to.
pub trait Completion: Clone {
    /// Result reported when the demuxer dropped the operation without
    /// answering it.
    fn dropped() -> Self;
}

impl Completion for StreamRead {
    fn dropped() -> Self {
        StreamRead::Aborted
    }
}

impl Completion for PipelineStatus {
    fn dropped() -> Self {
        Err(PipelineError::Aborted)
    }
}

impl Completion for Result<TimeDelta, PipelineError> {
    fn dropped() -> Self {
        Err(PipelineError::CouldNotOpen)
    }
}

#[derive(Debug)]
pub struct Handle<T> {
    rx: oneshot::Receiver<T>,
    result: Option<T>,
}

/// Pending result of [`ChunkDemuxer::read`](crate::ChunkDemuxer::read).
pub type ReadHandle = Handle<StreamRead>;

/// Pending result of [`ChunkDemuxer::seek`](crate::ChunkDemuxer::seek).
pub type SeekHandle = Handle<PipelineStatus>;

/// Pending result of [`ChunkDemuxer::initialize`](crate::ChunkDemuxer::initialize):
/// the initial duration, or why initialization failed.
pub type InitHandle = Handle<Result<TimeDelta, PipelineError>>;

impl<T: Completion> Handle<T> {
    pub(crate) fn channel() -> (oneshot::Sender<T>, Self) {
        let (tx, rx) = oneshot::channel();
        (tx, Self { rx, result: None })
    }

    pub(crate) fn ready(value: T) -> Self {
        let (tx, handle) = Self::channel();
        let _ = tx.send(value);
        handle
    }

    /// The result if the operation has completed.
    pub fn try_result(&mut self) -> Option<T> {
        if self.result.is_none() {
            self.result = match self.rx.try_recv() {
                Ok(value) => Some(value),
                Err(oneshot::error::TryRecvError::Empty) => None,
                Err(oneshot::error::TryRecvError::Closed) => Some(T::dropped()),
            };
        }
        self.result.clone()
    }

    pub fn is_complete(&mut self) -> bool {
        self.try_result().is_some()
    }
}

impl<T: Completion + Unpin> Future for Handle<T> {
    type Output = T;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<T> {
        if let Some(result) = self.result.take() {
            return Poll::Ready(result);
        }
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(value)) => Poll::Ready(value),
            Poll::Ready(Err(_)) => Poll::Ready(T::dropped()),
            Poll::Pending => Poll::Pending,
        }
    }
}
