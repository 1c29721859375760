//! Bounded concurrent dispatch with results in input order

use std::future::Future;

use futures_util::StreamExt;
use futures_util::stream;

use crate::http::SHARED_RUNTIME;

/// Run `f` over every item with at most `width` futures in flight.
///
/// Blocks until every future has completed; nothing is cancelled early.
/// Results come back in the order of `items`, regardless of completion order.
pub fn fan_out<T, R, F, Fut>(items: Vec<T>, width: usize, f: F) -> Vec<R>
where
    F: FnMut(T) -> Fut,
    Fut: Future<Output = R>,
{
    SHARED_RUNTIME.handle().block_on(
        stream::iter(items)
            .map(f)
            .buffered(width.max(1))
            .collect::<Vec<R>>(),
    )
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn results_follow_input_order() {
        // later items finish first
        let items: Vec<u64> = (0..8).collect();
        let out = fan_out(items, 8, |i| async move {
            tokio::time::sleep(Duration::from_millis((8 - i) * 5)).await;
            i * 10
        });
        assert_eq!(out, vec![0, 10, 20, 30, 40, 50, 60, 70]);
    }

    #[test]
    fn zero_width_still_runs() {
        let out = fan_out(vec![1, 2, 3], 0, |i| async move { i + 1 });
        assert_eq!(out, vec![2, 3, 4]);
    }

    #[test]
    fn empty_input() {
        let out: Vec<u8> = fan_out(Vec::<u8>::new(), 4, |i| async move { i });
        assert!(out.is_empty());
    }
}
