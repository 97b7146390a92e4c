//! Event streams and the ordered map combinator.
//!
//! A subscription's source is an [`EventStream`]. Every event is mapped to a
//! [`Response`] by an asynchronous per-event execution, and those executions
//! may overlap. [`OrderedMap`] publishes their outputs in the order the
//! events arrived.

use crate::error::EventStreamError;
use crate::response::Response;
use futures::stream::{FusedStream, FuturesOrdered};
use futures::{Stream, StreamExt};
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

/// The upstream source behind a subscription field.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<Value, EventStreamError>> + Send>>;

/// The stream of per-event results handed to the subscriber.
///
/// Streams produced by [`SubscriptionExecutionStrategy::execute`] spawn one
/// Tokio task per event, so they must be polled from within a Tokio runtime.
///
/// [`SubscriptionExecutionStrategy::execute`]: crate::subscription::SubscriptionExecutionStrategy::execute
pub type ResponseStream = Pin<Box<dyn Stream<Item = Result<Response, EventStreamError>> + Send>>;

/// Maps every `Ok` item of `stream` through `f`, running up to
/// `max_in_flight` mapped futures at once and yielding their outputs in
/// input order.
///
/// The first `Err` item stops the upstream: it is dropped, every mapping
/// already started is drained, then the error is yielded as the last item.
/// A `max_in_flight` of zero is treated as one.
///
/// `map_ordered` itself is executor-agnostic. Whatever runtime `f` needs is
/// required of the caller polling the stream.
///
/// ```
/// use futures::StreamExt;
/// use sluice_runtime::streaming::map_ordered;
///
/// # futures::executor::block_on(async {
/// let upstream = futures::stream::iter(vec![Ok::<_, ()>(1), Ok(2), Err(()), Ok(3)]);
/// let mapped: Vec<_> = map_ordered(upstream, 4, |n| async move { n * 10 })
///     .collect()
///     .await;
/// assert_eq!(mapped, vec![Ok(10), Ok(20), Err(())]);
/// # });
/// ```
pub fn map_ordered<S, T, E, F, Fut>(stream: S, max_in_flight: usize, f: F) -> OrderedMap<S, F, Fut, E>
where
    S: Stream<Item = Result<T, E>> + Unpin,
    F: FnMut(T) -> Fut,
    Fut: Future,
{
    OrderedMap {
        upstream: Some(stream),
        f,
        in_flight: FuturesOrdered::new(),
        max_in_flight: max_in_flight.max(1),
        pending_error: None,
        terminated: false,
    }
}

/// Stream returned by [`map_ordered`].
#[must_use = "streams do nothing unless polled"]
pub struct OrderedMap<S, F, Fut, E>
where
    Fut: Future,
{
    upstream: Option<S>,
    f: F,
    in_flight: FuturesOrdered<Fut>,
    max_in_flight: usize,
    pending_error: Option<E>,
    terminated: bool,
}

// No field is structurally pinned: the upstream is required to be `Unpin`
// and `FuturesOrdered` boxes its futures.
impl<S: Unpin, F, Fut: Future, E> Unpin for OrderedMap<S, F, Fut, E> {}

impl<S, F, Fut, E> OrderedMap<S, F, Fut, E>
where
    Fut: Future,
{
    /// Number of mapped futures that have started and not yet been yielded.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Whether the upstream is still being consumed.
    pub fn is_upstream_open(&self) -> bool {
        self.upstream.is_some()
    }
}

impl<S, T, E, F, Fut> Stream for OrderedMap<S, F, Fut, E>
where
    S: Stream<Item = Result<T, E>> + Unpin,
    F: FnMut(T) -> Fut,
    Fut: Future,
{
    type Item = Result<Fut::Output, E>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.terminated {
            return Poll::Ready(None);
        }

        // Pull from upstream only while below the bound.
        while this.in_flight.len() < this.max_in_flight {
            let Some(upstream) = this.upstream.as_mut() else {
                break;
            };
            match upstream.poll_next_unpin(cx) {
                Poll::Ready(Some(Ok(item))) => {
                    let fut = (this.f)(item);
                    this.in_flight.push_back(fut);
                }
                Poll::Ready(Some(Err(error))) => {
                    this.upstream = None;
                    this.pending_error = Some(error);
                }
                Poll::Ready(None) => this.upstream = None,
                Poll::Pending => break,
            }
        }

        match this.in_flight.poll_next_unpin(cx) {
            Poll::Ready(Some(output)) => Poll::Ready(Some(Ok(output))),
            Poll::Ready(None) if this.upstream.is_none() => {
                this.terminated = true;
                Poll::Ready(this.pending_error.take().map(Err))
            }
            // Upstream returned Pending above, so the waker is registered.
            Poll::Ready(None) | Poll::Pending => Poll::Pending,
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let in_flight = self.in_flight.len();
        let error = usize::from(self.pending_error.is_some());
        match &self.upstream {
            Some(upstream) if !self.terminated => {
                let (_, upper) = upstream.size_hint();
                (in_flight, upper.and_then(|u| u.checked_add(in_flight + error)))
            }
            _ => (in_flight + error, Some(in_flight + error)),
        }
    }
}

impl<S, T, E, F, Fut> FusedStream for OrderedMap<S, F, Fut, E>
where
    S: Stream<Item = Result<T, E>> + Unpin,
    F: FnMut(T) -> Fut,
    Fut: Future,
{
    fn is_terminated(&self) -> bool {
        self.terminated
    }
}

impl<S, F, Fut, E> fmt::Debug for OrderedMap<S, F, Fut, E>
where
    Fut: Future,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrderedMap")
            .field("in_flight", &self.in_flight.len())
            .field("max_in_flight", &self.max_in_flight)
            .field("upstream_open", &self.upstream.is_some())
            .field("terminated", &self.terminated)
            .finish()
    }
}
