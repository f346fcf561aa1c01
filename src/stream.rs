//! Sessions as asynchronous streams.

use crate::error::{Error, Result};
use crate::session::{QuerySession, Solution};
use futures::stream::{self, Stream};

impl<'m> QuerySession<'m> {
    /// Turns the session into a stream of solutions. The task yields to the
    /// executor before each search step, so a long enumeration does not
    /// starve other tasks. The stream ends after exhaustion or the first
    /// error.
    pub fn into_stream(self) -> impl Stream<Item = Result<Solution>> + 'm {
        stream::unfold(Some(self), |state| async move {
            let mut session = state?;
            tokio::task::yield_now().await;
            match session.next() {
                Ok(Some(solution)) => Some((Ok(solution), Some(session))),
                Ok(None) | Err(Error::SessionExhausted) => None,
                Err(error) => Some((Err(error), None)),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::{Error, Machine};
    use futures::StreamExt;

    #[tokio::test]
    async fn test_stream_yields_every_solution() {
        let mut machine = Machine::new(None, None);
        machine
            .consult_module_string("user", "colour(red). colour(green). colour(blue).")
            .unwrap();
        let names: Vec<String> = machine
            .run_query("colour(C)")
            .unwrap()
            .into_stream()
            .map(|solution| solution.unwrap().get("C").unwrap().to_string())
            .collect()
            .await;
        assert_eq!(names, ["red", "green", "blue"]);
    }

    #[tokio::test]
    async fn test_stream_ends_after_an_error() {
        let machine = Machine::new(None, None);
        let results: Vec<_> = machine.run_query("missing(1)").unwrap().into_stream().collect().await;
        assert_eq!(results.len(), 1);
        assert!(matches!(results[0], Err(Error::Existence { .. })));
    }
}
