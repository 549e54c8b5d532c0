use crate::error::DataError;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::Poll;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

/// The outcome of a completed entry: the name it was registered under and
/// the value it resolved to.
#[derive(Debug)]
pub struct AwaitResult<T> {
    pub name: String,
    pub value: T,
}

/// A cooperative set of named in-flight tasks, mirroring a single-threaded
/// scheduler that multiplexes a handful of long-running jobs (receive,
/// keep-alive, login, subscribe, ...) over one connection.
///
/// `wait` races every registered task and resolves with whichever finishes
/// first. If the set gains a member while a wait is in progress, the wait
/// restarts so the newcomer is raced too - callers never need to re-issue
/// `wait` themselves after a `create_task`.
///
/// This type assumes registration only ever happens from the same task
/// that drives `wait`/`cleanup` (true of every `WSHandler` in this crate),
/// so the membership-changed notification never needs to survive across
/// scheduler yields unobserved.
pub struct Awaitables<T> {
    tasks: HashMap<String, JoinHandle<T>>,
    changed: Arc<Notify>,
    next_anon: u64,
}

impl<T> std::fmt::Debug for Awaitables<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Awaitables")
            .field("tasks", &self.tasks.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl<T> Default for Awaitables<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Awaitables<T> {
    pub fn new() -> Self {
        Self {
            tasks: HashMap::new(),
            changed: Arc::new(Notify::new()),
            next_anon: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tasks.contains_key(name)
    }

    fn reserve_name(&mut self, name: Option<String>) -> String {
        match name {
            Some(n) => n,
            None => {
                let n = format!("anon-{}", self.next_anon);
                self.next_anon += 1;
                n
            }
        }
    }

    /// Register an already-spawned handle under `name`, generating an
    /// anonymous name if none is given.
    pub fn add(&mut self, handle: JoinHandle<T>, name: Option<String>) -> Result<String, DataError> {
        let name = self.reserve_name(name);
        if self.tasks.contains_key(&name) {
            return Err(DataError::Duplicate(name));
        }
        self.tasks.insert(name.clone(), handle);
        self.changed.notify_waiters();
        Ok(name)
    }
}

impl<T> Awaitables<T>
where
    T: Send + 'static,
{
    /// Spawn `fut` on the ambient runtime and register it.
    pub fn create_task<F>(&mut self, fut: F, name: Option<String>) -> Result<String, DataError>
    where
        F: Future<Output = T> + Send + 'static,
    {
        self.add(tokio::spawn(fut), name)
    }

    /// Offload a blocking closure to the blocking pool and register the
    /// resulting handle.
    pub fn run_in_executor<F>(&mut self, func: F, name: Option<String>) -> Result<String, DataError>
    where
        F: FnOnce() -> T + Send + 'static,
    {
        self.add(tokio::task::spawn_blocking(func), name)
    }

    /// Suspend until any registered task completes, restarting if the set
    /// changes membership in the meantime.
    pub async fn wait(&mut self, timeout: Option<Duration>) -> Result<AwaitResult<T>, DataError> {
        let deadline = timeout.map(|d| tokio::time::Instant::now() + d);

        loop {
            let remaining = match deadline {
                Some(d) => {
                    let now = tokio::time::Instant::now();
                    if now >= d {
                        return Err(DataError::Timeout);
                    }
                    Some(d - now)
                }
                None => None,
            };

            let changed = self.changed.clone();
            let raced = race(&mut self.tasks, changed);

            let outcome = match remaining {
                Some(d) => match tokio::time::timeout(d, raced).await {
                    Ok(outcome) => outcome,
                    Err(_) => return Err(DataError::Timeout),
                },
                None => raced.await,
            };

            match outcome {
                RaceOutcome::Changed => continue,
                RaceOutcome::Completed(name, result) => {
                    self.tasks.remove(&name);
                    return match result {
                        Ok(value) => Ok(AwaitResult { name, value }),
                        Err(join_err) => Err(DataError::Execution(name, join_err.to_string())),
                    };
                }
            }
        }
    }

    /// Cancel every registered task and await their terminal status,
    /// swallowing every error (cancellation or panic alike).
    pub async fn cleanup(&mut self) {
        for handle in self.tasks.values() {
            handle.abort();
        }
        for (_, handle) in self.tasks.drain() {
            let _ = handle.await;
        }
        self.changed.notify_waiters();
    }
}

enum RaceOutcome<T> {
    Changed,
    Completed(String, Result<T, tokio::task::JoinError>),
}

async fn race<T>(tasks: &mut HashMap<String, JoinHandle<T>>, changed: Arc<Notify>) -> RaceOutcome<T> {
    if tasks.is_empty() {
        changed.notified().await;
        return RaceOutcome::Changed;
    }

    tokio::select! {
        biased;
        (name, result) = wait_any(tasks) => RaceOutcome::Completed(name, result),
        _ = changed.notified() => RaceOutcome::Changed,
    }
}

fn wait_any<T>(
    tasks: &mut HashMap<String, JoinHandle<T>>,
) -> impl Future<Output = (String, Result<T, tokio::task::JoinError>)> + '_ {
    std::future::poll_fn(move |cx| {
        for (name, handle) in tasks.iter_mut() {
            if let Poll::Ready(result) = Pin::new(handle).poll(cx) {
                return Poll::Ready((name.clone(), result));
            }
        }
        Poll::Pending
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration as StdDuration;

    #[tokio::test]
    async fn test_wait_resolves_first_completed() {
        let mut awaitables: Awaitables<u32> = Awaitables::new();
        awaitables
            .create_task(
                async {
                    tokio::time::sleep(StdDuration::from_millis(50)).await;
                    1
                },
                Some("slow".into()),
            )
            .unwrap();
        awaitables
            .create_task(async { 2 }, Some("fast".into()))
            .unwrap();

        let result = awaitables.wait(None).await.unwrap();
        assert_eq!(result.name, "fast");
        assert_eq!(result.value, 2);
        assert!(awaitables.contains("slow"));
        assert!(!awaitables.contains("fast"));
    }

    #[tokio::test]
    async fn test_duplicate_name_rejected() {
        let mut awaitables: Awaitables<u32> = Awaitables::new();
        awaitables
            .create_task(async { 1 }, Some("recv".into()))
            .unwrap();
        let err = awaitables
            .create_task(async { 2 }, Some("recv".into()))
            .unwrap_err();
        assert!(matches!(err, DataError::Duplicate(name) if name == "recv"));
    }

    #[tokio::test]
    async fn test_timeout_with_no_completing_task() {
        let mut awaitables: Awaitables<u32> = Awaitables::new();
        awaitables
            .create_task(
                async {
                    tokio::time::sleep(StdDuration::from_secs(10)).await;
                    1
                },
                Some("stuck".into()),
            )
            .unwrap();

        let err = awaitables
            .wait(Some(StdDuration::from_millis(20)))
            .await
            .unwrap_err();
        assert!(matches!(err, DataError::Timeout));
    }

    #[tokio::test]
    async fn test_cleanup_cancels_all() {
        let mut awaitables: Awaitables<u32> = Awaitables::new();
        awaitables
            .create_task(
                async {
                    tokio::time::sleep(StdDuration::from_secs(10)).await;
                    1
                },
                Some("a".into()),
            )
            .unwrap();
        awaitables
            .create_task(
                async {
                    tokio::time::sleep(StdDuration::from_secs(10)).await;
                    2
                },
                Some("b".into()),
            )
            .unwrap();

        awaitables.cleanup().await;
        assert!(awaitables.is_empty());
    }

    #[tokio::test]
    async fn test_wait_on_empty_set_observes_late_add() {
        let awaitables: Arc<tokio::sync::Mutex<Awaitables<u32>>> =
            Arc::new(tokio::sync::Mutex::new(Awaitables::new()));

        let adder = {
            let awaitables = awaitables.clone();
            tokio::spawn(async move {
                tokio::time::sleep(StdDuration::from_millis(20)).await;
                awaitables
                    .lock()
                    .await
                    .create_task(async { 7 }, Some("late".into()))
                    .unwrap();
            })
        };

        let result = loop {
            let mut guard = awaitables.lock().await;
            if guard.is_empty() {
                drop(guard);
                tokio::time::sleep(StdDuration::from_millis(5)).await;
                continue;
            }
            break guard.wait(None).await.unwrap();
        };

        adder.await.unwrap();
        assert_eq!(result.name, "late");
        assert_eq!(result.value, 7);
    }
}
