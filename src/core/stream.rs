//! Purpose: Lazy, validated document sequence returned by table queries.
//! Exports: `DocumentStream`.
//! Role: Adapts a store's row stream into checked documents, one row per pull.
//! Invariants: No row is decoded or checked before the consumer asks for it.
//! Invariants: The underlying connection is released on exhaustion, `close`, or drop.
//! Invariants: Forward-only and non-restartable; a malformed row fails only its own pull.
use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio_stream::{Stream, StreamExt};

use crate::core::check::Check;
use crate::core::error::Error;
use crate::store::RowStream;

pub struct DocumentStream<T> {
    rows: Option<RowStream>,
    check: Check<T>,
    yielded: usize,
}

impl<T> DocumentStream<T> {
    pub(crate) fn new(rows: RowStream, check: Check<T>) -> Self {
        Self {
            rows: Some(rows),
            check,
            yielded: 0,
        }
    }

    /// Documents handed out so far (including ones that failed the check).
    pub fn yielded(&self) -> usize {
        self.yielded
    }

    /// True once the rows are exhausted or the stream was closed.
    pub fn is_finished(&self) -> bool {
        self.rows.is_none()
    }

    pub async fn next_document(&mut self) -> Result<Option<T>, Error> {
        self.next().await.transpose()
    }

    /// First document, releasing the connection right after.
    pub async fn first(mut self) -> Result<Option<T>, Error> {
        let first = self.next_document().await;
        self.close();
        first
    }

    /// Drains the stream, stopping at the first error.
    pub async fn collect_documents(mut self) -> Result<Vec<T>, Error> {
        let mut out = Vec::new();
        while let Some(document) = self.next_document().await? {
            out.push(document);
        }
        Ok(out)
    }

    pub fn close(&mut self) {
        self.rows = None;
    }
}

impl<T> Stream for DocumentStream<T> {
    type Item = Result<T, Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let Some(rows) = this.rows.as_mut() else {
            return Poll::Ready(None);
        };
        match rows.as_mut().poll_next(cx) {
            Poll::Ready(Some(row)) => {
                this.yielded += 1;
                Poll::Ready(Some(row.and_then(|value| this.check.check(value))))
            }
            Poll::Ready(None) => {
                this.rows = None;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T> fmt::Debug for DocumentStream<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentStream")
            .field("yielded", &self.yielded)
            .field("finished", &self.is_finished())
            .finish()
    }
}
