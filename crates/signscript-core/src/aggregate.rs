//! Waiting on a batch of fallible futures.

use std::fmt::Display;
use std::future::Future;

use futures::future::join_all;
use tracing::warn;

/// Drives every future to completion, then reports the first failure.
///
/// All futures run concurrently in the calling task. A failure never cancels
/// the others; once everything has finished, the error of the earliest
/// failing future in submission order is returned and later errors are
/// logged. If nothing failed, the values are returned in submission order.
///
/// ```
/// # tokio_test_block(async {
/// use signscript_core::raise_future_errors;
///
/// let ok = raise_future_errors((1..=2).map(|i| async move { Ok::<_, String>(i) })).await;
/// assert_eq!(ok, Ok(vec![1, 2]));
/// # });
/// # fn tokio_test_block<F: std::future::Future>(f: F) -> F::Output {
/// #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
/// # }
/// ```
///
/// # Errors
///
/// Returns the error of the first failed future in submission order.
pub async fn raise_future_errors<I, F, T, E>(futures: I) -> Result<Vec<T>, E>
where
    I: IntoIterator<Item = F>,
    F: Future<Output = Result<T, E>>,
    E: Display,
{
    let results = join_all(futures).await;
    let total = results.len();

    let mut values = Vec::with_capacity(total);
    let mut first_error = None;
    for (index, result) in results.into_iter().enumerate() {
        match result {
            Ok(value) => values.push(value),
            Err(error) if first_error.is_none() => first_error = Some(error),
            Err(error) => warn!(index, total, %error, "additional subtask failure"),
        }
    }

    match first_error {
        Some(error) => Err(error),
        None => Ok(values),
    }
}
