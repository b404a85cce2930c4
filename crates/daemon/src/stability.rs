//! Stability checking for files that may still be written to.
//!
//! A recorder keeps appending to its segment for a moment after a split or
//! stop, and shared filesystems report sizes with some lag. A file is stable
//! once two consecutive size samples agree.

use crate::retry::RetryPolicy;
use std::path::Path;
use std::sync::{Mutex, PoisonError};

/// Result of a stability check on a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StabilityResult {
    /// Two consecutive samples agreed.
    Stable { size: u64 },
    /// Size still changed on the last sample.
    Unstable {
        /// Size before the last wait.
        initial_size: u64,
        /// Size after the last wait.
        current_size: u64,
    },
}

impl StabilityResult {
    pub fn is_stable(&self) -> bool {
        matches!(self, StabilityResult::Stable { .. })
    }
}

/// Compare two file sizes and return the appropriate StabilityResult.
#[inline]
pub fn compare_sizes(initial_size: u64, current_size: u64) -> StabilityResult {
    if initial_size == current_size {
        StabilityResult::Stable { size: current_size }
    } else {
        StabilityResult::Unstable {
            initial_size,
            current_size,
        }
    }
}

#[derive(Default)]
struct Samples {
    previous: Option<u64>,
    result: Option<StabilityResult>,
    error: Option<std::io::Error>,
}

/// Sample the size of `path` until it stops changing or `policy` is exhausted.
///
/// The first sample is taken immediately; each of the policy's attempts then
/// waits one interval and compares against the previous sample.
/// Returns `Err` if the file cannot be read at any point.
pub async fn wait_for_stable_size(
    path: &Path,
    policy: &RetryPolicy,
) -> Result<StabilityResult, std::io::Error> {
    let sampling = RetryPolicy::new(policy.attempts() + 1, policy.interval);
    let samples = Mutex::new(Samples::default());
    let state = &samples;

    sampling
        .poll_until(move || async move {
            let sampled = tokio::fs::metadata(path).await.map(|m| m.len());
            let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
            match sampled {
                // Stop polling; the error is returned below
                Err(e) => {
                    state.error = Some(e);
                    true
                }
                Ok(current) => match state.previous.replace(current) {
                    None => false,
                    Some(previous) => {
                        let result = compare_sizes(previous, current);
                        let stable = result.is_stable();
                        state.result = Some(result);
                        stable
                    }
                },
            }
        })
        .await;

    let state = samples.into_inner().unwrap_or_else(PoisonError::into_inner);
    if let Some(e) = state.error {
        return Err(e);
    }
    let size = state.previous.unwrap_or_default();
    Ok(state.result.unwrap_or_else(|| compare_sizes(size, size)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::io::AsyncWriteExt;

    proptest! {
        #[test]
        fn prop_stability_size_comparison(initial_size: u64, current_size: u64) {
            let result = compare_sizes(initial_size, current_size);

            if initial_size == current_size {
                prop_assert_eq!(result, StabilityResult::Stable { size: current_size });
            } else {
                match result {
                    StabilityResult::Unstable { initial_size: i, current_size: c } => {
                        prop_assert_eq!(i, initial_size);
                        prop_assert_eq!(c, current_size);
                    }
                    StabilityResult::Stable { .. } => {
                        prop_assert!(false, "Expected Unstable when sizes differ");
                    }
                }
            }
        }
    }

    #[test]
    fn test_compare_sizes_unstable_smaller() {
        assert_eq!(
            compare_sizes(2000, 1000),
            StabilityResult::Unstable {
                initial_size: 2000,
                current_size: 1000
            }
        );
    }

    #[tokio::test]
    async fn test_idle_file_is_stable() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("segment.mp4");
        std::fs::write(&path, b"finished segment").unwrap();

        let policy = RetryPolicy::new(3, Duration::from_millis(5));
        let result = wait_for_stable_size(&path, &policy).await.unwrap();
        assert_eq!(result, StabilityResult::Stable { size: 16 });
    }

    #[tokio::test]
    async fn test_growing_file_is_unstable() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("segment.mp4");
        std::fs::write(&path, b"").unwrap();

        let writer_path = path.clone();
        let writer = tokio::spawn(async move {
            let mut file = tokio::fs::OpenOptions::new()
                .append(true)
                .open(&writer_path)
                .await
                .unwrap();
            loop {
                file.write_all(&[0u8; 64]).await.unwrap();
                file.flush().await.unwrap();
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        });

        let policy = RetryPolicy::new(3, Duration::from_millis(30));
        let result = wait_for_stable_size(&path, &policy).await.unwrap();
        writer.abort();

        assert!(!result.is_stable());
    }

    #[tokio::test]
    async fn test_file_settling_within_attempts_is_stable() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("segment.mp4");
        std::fs::write(&path, b"").unwrap();

        let writer_path = path.clone();
        let writer = tokio::spawn(async move {
            let mut file = tokio::fs::OpenOptions::new()
                .append(true)
                .open(&writer_path)
                .await
                .unwrap();
            for _ in 0..5 {
                file.write_all(&[0u8; 64]).await.unwrap();
                file.flush().await.unwrap();
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        });

        let policy = RetryPolicy::new(20, Duration::from_millis(40));
        let result = wait_for_stable_size(&path, &policy).await.unwrap();
        writer.await.unwrap();

        assert_eq!(result, StabilityResult::Stable { size: 320 });
    }

    #[tokio::test]
    async fn test_single_attempt_still_compares_two_samples() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("segment.mp4");
        std::fs::write(&path, b"abc").unwrap();

        let policy = RetryPolicy::new(0, Duration::from_millis(1));
        let result = wait_for_stable_size(&path, &policy).await.unwrap();
        assert_eq!(result, StabilityResult::Stable { size: 3 });
    }

    #[tokio::test]
    async fn test_missing_file_is_error() {
        let temp_dir = TempDir::new().unwrap();
        let policy = RetryPolicy::new(1, Duration::from_millis(1));
        let result = wait_for_stable_size(&temp_dir.path().join("absent"), &policy).await;
        assert!(result.is_err());
    }
}
