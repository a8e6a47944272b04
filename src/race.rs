use crate::Promise;
use futures::{executor::block_on, future::select_all};
use tracing::{debug, trace};

/// Combines `promises` into one promise that resolves with the result,
/// success or failure, of whichever input finishes first.
///
/// The slower inputs are not cancelled; they run to completion in the
/// background. No inputs resolve immediately to `T::default()`.
///
/// # Examples
///
/// ```
/// use lazy_promise::{race, Promise};
/// use std::{thread, time::Duration};
/// let slow = Promise::<&str, ()>::new(|| {
///     thread::sleep(Duration::from_millis(500));
///     Ok("slow")
/// });
/// let fast = Promise::new(|| Ok("fast"));
/// assert_eq!(race([slow, fast]).wait(), Ok("fast"));
/// ```
pub fn race<T, E, I>(promises: I) -> Promise<T, E>
where
    I: IntoIterator<Item = Promise<T, E>>,
    T: Clone + Default + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    let promises: Vec<_> = promises.into_iter().collect();
    if promises.is_empty() {
        return Promise::ready(Ok(T::default()));
    }
    Promise::builder().name("promise-race").build(move || {
        trace!(inputs = promises.len(), "racing inputs");
        let ((), index, rest) = block_on(select_all(promises.iter().map(Promise::done)));
        debug!(index, losers = rest.len(), "input finished first");
        promises[index].wait_propagating()
    })
}

#[cfg(test)]
mod tests {
    use super::race;
    use crate::{Error, Promise};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn delayed(millis: u64, result: Result<u32, String>) -> Promise<u32, String> {
        Promise::new(move || {
            thread::sleep(Duration::from_millis(millis));
            result
        })
    }

    #[test]
    fn test_race_empty_is_default() {
        let combined = race(Vec::<Promise<u32, String>>::new());
        assert!(combined.is_resolved());
        assert_eq!(combined.wait(), Ok(0));
    }

    #[test]
    fn test_race_single_input() {
        assert_eq!(race([delayed(10, Ok(4))]).wait(), Ok(4));
    }

    #[test]
    fn test_race_already_resolved_input_wins() {
        let pending = delayed(300, Ok(1));
        let ready = Promise::ready(Ok(2));
        assert_eq!(race([pending, ready]).wait(), Ok(2));
    }

    #[test]
    fn test_race_losers_still_run() {
        let counter = Arc::new(AtomicUsize::new(0));
        let slow = {
            let counter = counter.clone();
            Promise::<u32, String>::new(move || {
                thread::sleep(Duration::from_millis(50));
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(1)
            })
        };
        let combined = race([slow.clone(), delayed(0, Ok(2))]);
        assert_eq!(combined.wait(), Ok(2));
        assert_eq!(slow.wait(), Ok(1));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_race_forwards_panicked_winner() {
        let promises = vec![delayed(300, Ok(1)), Promise::new(|| panic!("boom"))];
        assert_eq!(
            race(promises).join(),
            Err(Error::Panicked(String::from("boom")))
        );
    }
}
