//! Probe-then-retry buffer helper for variable-length OS queries.
//!
//! Several platform lookups take a caller-supplied buffer and report the
//! required size when it is too small. This module captures that protocol in
//! one place: probe with a minimum-size buffer, and on a short-buffer report
//! reallocate to exactly the required size and retry once.

use crate::error::{BlueTrayError, Result};

/// Outcome of a single underlying query attempt.
#[derive(Debug)]
pub enum AttemptStatus {
   /// The query succeeded and wrote `len` bytes into the buffer.
   Done { len: usize },
   /// The buffer was too small; `required` is the size the query asked for
   /// (0 when the query could not tell).
   ShortBuffer { required: usize },
   /// The query failed for a reason other than buffer size.
   Failed(BlueTrayError),
}

/// Runs `attempt` with a `min_size` buffer, retrying exactly once with the
/// reported size on a short-buffer outcome.
///
/// Any non-size failure is returned to the caller without a retry, including
/// a short-buffer report that carries no required size.
pub fn probe_then_fetch<F>(min_size: usize, mut attempt: F) -> Result<Vec<u8>>
where
   F: FnMut(&mut Vec<u8>) -> AttemptStatus,
{
   let mut buf = vec![0u8; min_size];

   match attempt(&mut buf) {
      AttemptStatus::Done { len } => {
         buf.truncate(len);
         Ok(buf)
      },
      AttemptStatus::ShortBuffer { required } if required > 0 => {
         buf.clear();
         buf.resize(required, 0);
         match attempt(&mut buf) {
            AttemptStatus::Done { len } => {
               buf.truncate(len);
               Ok(buf)
            },
            AttemptStatus::ShortBuffer { required } => Err(BlueTrayError::ShortBuffer { required }),
            AttemptStatus::Failed(e) => Err(e),
         }
      },
      AttemptStatus::ShortBuffer { required } => Err(BlueTrayError::ShortBuffer { required }),
      AttemptStatus::Failed(e) => Err(e),
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn test_short_buffer_then_success_retries_once() {
      let mut calls = 0;
      let result = probe_then_fetch(16, |buf| {
         calls += 1;
         if buf.len() < 100 {
            AttemptStatus::ShortBuffer { required: 100 }
         } else {
            buf[..4].copy_from_slice(b"data");
            AttemptStatus::Done { len: 4 }
         }
      })
      .unwrap();

      assert_eq!(calls, 2);
      assert_eq!(result, b"data");
   }

   #[test]
   fn test_retry_buffer_is_exactly_required_size() {
      let mut sizes = Vec::new();
      let _ = probe_then_fetch(16, |buf| {
         sizes.push(buf.len());
         if buf.len() < 100 {
            AttemptStatus::ShortBuffer { required: 100 }
         } else {
            AttemptStatus::Done { len: buf.len() }
         }
      })
      .unwrap();

      assert_eq!(sizes, vec![16, 100]);
   }

   #[test]
   fn test_immediate_success_is_single_attempt() {
      let mut calls = 0;
      let result = probe_then_fetch(16, |buf| {
         calls += 1;
         buf[0] = 0xAB;
         AttemptStatus::Done { len: 1 }
      })
      .unwrap();

      assert_eq!(calls, 1);
      assert_eq!(result, [0xAB]);
   }

   #[test]
   fn test_immediate_failure_is_single_attempt() {
      let mut calls = 0;
      let result = probe_then_fetch(16, |_| {
         calls += 1;
         AttemptStatus::Failed(BlueTrayError::SystemApi {
            op: "lookup",
            code: -1,
         })
      });

      assert_eq!(calls, 1);
      assert!(matches!(
         result,
         Err(BlueTrayError::SystemApi { op: "lookup", .. })
      ));
   }

   #[test]
   fn test_short_buffer_without_required_size_does_not_retry() {
      let mut calls = 0;
      let result = probe_then_fetch(16, |_| {
         calls += 1;
         AttemptStatus::ShortBuffer { required: 0 }
      });

      assert_eq!(calls, 1);
      assert!(matches!(
         result,
         Err(BlueTrayError::ShortBuffer { required: 0 })
      ));
   }

   #[test]
   fn test_second_short_buffer_is_surfaced() {
      let mut calls = 0;
      let result = probe_then_fetch(16, |_| {
         calls += 1;
         AttemptStatus::ShortBuffer { required: 100 }
      });

      assert_eq!(calls, 2);
      assert!(matches!(
         result,
         Err(BlueTrayError::ShortBuffer { required: 100 })
      ));
   }
}
