//! Lazily started promises whose computation runs at most once, on its own
//! thread, and whose result can be observed by any number of consumers.
//!
//! A [`Promise`] wraps a `FnOnce() -> Result<T, E>`. Nothing runs until the
//! promise is first observed through [`Promise::wait`], [`Promise::wait_or`],
//! the callback methods, [`Promise::done`], or by awaiting it. [`all`] and
//! [`race`] compose several promises into one.
//!
//! # Examples
//!
//! ```
//! use lazy_promise::{all, race, Promise};
//! use std::{thread, time::Duration};
//!
//! let fetch = |n: u32| Promise::<u32, String>::new(move || Ok(n * 2));
//! assert_eq!(all([fetch(1), fetch(2)]).wait(), Ok(vec![2, 4]));
//!
//! // A timeout is a race against a promise that fails after a delay.
//! let slow = Promise::new(|| {
//!     thread::sleep(Duration::from_secs(1));
//!     Ok(1)
//! });
//! let timer = Promise::new(|| {
//!     thread::sleep(Duration::from_millis(10));
//!     Err(String::from("timed out"))
//! });
//! assert_eq!(race([slow, timer]).wait(), Err(String::from("timed out")));
//! ```
pub mod all;
pub mod promise;
pub mod race;
pub mod signal;

pub use all::all;
pub use promise::{Builder, Promise};
pub use race::race;
pub use signal::Signal;

/// A fault of the thread running a computation.
///
/// The computation's own error type is never wrapped in this; it only
/// reports that no result could be produced at all.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("promise computation panicked: {0}")]
    Panicked(String),
    #[error("failed to spawn promise thread: {0}")]
    Spawn(String),
}
