//! Worker pool construction.
//!
//! The library never touches the rayon global pool: callers build an explicit
//! pool once and pass it into the distance and signature-calculation entry
//! points. Dropping the pool shuts its workers down deterministically.

use anyhow::{Context, Result};
use rayon::{ThreadPool, ThreadPoolBuilder};

/// Build a work-stealing pool with `cores` workers.
///
/// `None` (or `Some(0)`) sizes the pool to the available hardware threads.
pub fn build_pool(cores: Option<usize>) -> Result<ThreadPool> {
    ThreadPoolBuilder::new()
        .num_threads(cores.unwrap_or(0))
        .thread_name(|i| format!("gambit-worker-{}", i))
        .build()
        .context("Failed to build worker pool")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_default_pool() {
        let pool = build_pool(None).unwrap();
        assert!(pool.current_num_threads() >= 1);
    }

    #[test]
    fn test_build_sized_pool() {
        let pool = build_pool(Some(2)).unwrap();
        assert_eq!(pool.current_num_threads(), 2);
    }
}
