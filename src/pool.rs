use anyhow::Result;
use crossbeam_channel::bounded;
use std::time::{Duration, Instant};
use tracing::error;

/// Streams `items` through a fixed pool of workers over a bounded queue.
///
/// The producer runs on the calling thread and blocks whenever the queue is
/// full, so extraction never races ahead of processing. Each worker owns
/// private state from `init`. After the producer finishes the workers drain
/// the queue and are joined with a bounded wait; a pool that fails to drain
/// in time is abandoned and the process exits non-zero. An `Err` item stops
/// production and fails the phase once the workers have drained.
pub fn run_bounded_with<T, S>(
    workers: usize,
    queue_capacity: usize,
    wait: Duration,
    items: impl Iterator<Item = Result<T>>,
    init: impl Fn() -> S + Sync,
    work: impl Fn(&mut S, T) + Sync,
) -> Result<()>
where
    T: Send,
{
    let (tx, rx) = bounded::<T>(queue_capacity.max(1));

    std::thread::scope(|scope| {
        let mut handles = Vec::with_capacity(workers.max(1));
        for _ in 0..workers.max(1) {
            let rx = rx.clone();
            let init = &init;
            let work = &work;
            handles.push(scope.spawn(move || {
                let mut state = init();
                while let Ok(item) = rx.recv() {
                    work(&mut state, item);
                }
            }));
        }
        drop(rx);

        let mut producer_error = None;
        for item in items {
            match item {
                Ok(item) => {
                    if tx.send(item).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    producer_error = Some(e);
                    break;
                }
            }
        }
        drop(tx);

        let deadline = Instant::now() + wait;
        for handle in &handles {
            while !handle.is_finished() {
                if Instant::now() >= deadline {
                    // Cannot reclaim a wedged pool; the contract is to give
                    // up loudly rather than hang the phase forever.
                    error!(wait = ?wait, "worker pool failed to drain, abandoning");
                    eprintln!("Error: worker pool failed to drain within {:?}", wait);
                    std::process::exit(2);
                }
                std::thread::sleep(Duration::from_millis(10));
            }
        }
        for handle in handles {
            if handle.join().is_err() {
                anyhow::bail!("worker thread panicked");
            }
        }

        match producer_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    })
}

/// [`run_bounded_with`] for stateless workers.
pub fn run_bounded<T: Send>(
    workers: usize,
    queue_capacity: usize,
    wait: Duration,
    items: impl Iterator<Item = Result<T>>,
    work: impl Fn(T) + Sync,
) -> Result<()> {
    run_bounded_with(workers, queue_capacity, wait, items, || (), |_, item| work(item))
}
