use crate::Promise;
use futures::{executor::block_on, stream::FuturesUnordered, StreamExt};
use tracing::{debug, trace};

/// Combines `promises` into one promise of all their values, in input order.
///
/// The first input to fail, by completion order, fails the combined promise
/// with that error, without waiting for the inputs still running. Those keep
/// running in the background. No inputs resolve immediately to an empty
/// vector.
///
/// # Examples
///
/// ```
/// use lazy_promise::{all, Promise};
/// let promises = vec![
///     Promise::<bool, String>::new(|| Ok(true)),
///     Promise::new(|| Ok(false)),
/// ];
/// assert_eq!(all(promises).wait(), Ok(vec![true, false]));
/// ```
pub fn all<T, E, I>(promises: I) -> Promise<Vec<T>, E>
where
    I: IntoIterator<Item = Promise<T, E>>,
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    let promises: Vec<_> = promises.into_iter().collect();
    if promises.is_empty() {
        return Promise::ready(Ok(Vec::new()));
    }
    Promise::builder()
        .name("promise-all")
        .build(move || block_on(collect(promises)))
}

async fn collect<T, E>(promises: Vec<Promise<T, E>>) -> Result<Vec<T>, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    trace!(inputs = promises.len(), "waiting on all inputs");
    let mut slots: Vec<Option<T>> = promises.iter().map(|_| None).collect();
    let mut pending: FuturesUnordered<_> = promises
        .iter()
        .enumerate()
        .map(|(index, promise)| {
            let done = promise.done();
            async move {
                done.await;
                index
            }
        })
        .collect();
    // The inputs resolve in any order; each value goes to its own slot.
    while let Some(index) = pending.next().await {
        match promises[index].wait_propagating() {
            Ok(value) => slots[index] = Some(value),
            Err(err) => {
                debug!(index, pending = pending.len(), "input failed, abandoning the rest");
                return Err(err);
            }
        }
    }
    Ok(slots.into_iter().flatten().collect())
}
