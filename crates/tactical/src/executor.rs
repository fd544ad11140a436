// executor.rs - Fork-join task runner handed to the builder
//
// The builder needs exactly one capability from its scheduler: run one task
// per item and block until all of them are done. Each task gets exclusive
// access to its own item, so phases never lock.

use rayon::prelude::*;
use tracing::warn;

pub struct Executor {
    pool: Option<rayon::ThreadPool>,
    threads: usize,
}

impl Executor {
    /// Pool with `threads` workers; falls back to running on the calling
    /// thread if the pool cannot be created.
    pub fn new(threads: usize) -> Self {
        let threads = threads.max(1);
        match rayon::ThreadPoolBuilder::new().num_threads(threads).build() {
            Ok(pool) => Self {
                pool: Some(pool),
                threads,
            },
            Err(err) => {
                warn!("Failed to create thread pool: {}, using single-threaded", err);
                Self::sequential()
            }
        }
    }

    pub fn sequential() -> Self {
        Self {
            pool: None,
            threads: 1,
        }
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Run `task(index, &mut item)` for every item and wait for all of them.
    pub fn for_each_mut<T, F>(&self, items: &mut [T], task: F)
    where
        T: Send,
        F: Fn(usize, &mut T) + Send + Sync,
    {
        match &self.pool {
            Some(pool) => pool.install(|| {
                items
                    .par_iter_mut()
                    .enumerate()
                    .for_each(|(idx, item)| task(idx, item));
            }),
            None => {
                for (idx, item) in items.iter_mut().enumerate() {
                    task(idx, item);
                }
            }
        }
    }
}

impl Default for Executor {
    fn default() -> Self {
        Self::new(std::thread::available_parallelism().map_or(1, |n| n.get()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_item_visited_once() {
        for executor in [Executor::new(4), Executor::sequential()] {
            let mut items = vec![0usize; 100];
            executor.for_each_mut(&mut items, |idx, item| *item += idx + 1);
            for (idx, item) in items.iter().enumerate() {
                assert_eq!(*item, idx + 1);
            }
        }
    }

    #[test]
    fn test_thread_count_clamped() {
        assert_eq!(Executor::new(0).threads(), 1);
        assert_eq!(Executor::sequential().threads(), 1);
    }
}
