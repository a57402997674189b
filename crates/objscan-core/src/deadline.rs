use std::time::{Duration, Instant};

use crate::error::{Error, Result};

/// Wall-clock budget of one operation, checked at loop boundaries.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    operation: &'static str,
    budget: Duration,
    started: Instant,
}

impl Deadline {
    pub fn new(operation: &'static str, budget: Duration) -> Self {
        Self {
            operation,
            budget,
            started: Instant::now(),
        }
    }

    /// A deadline that never expires in practice.
    pub fn unbounded(operation: &'static str) -> Self {
        Self::new(operation, Duration::from_secs(u32::MAX as u64))
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn expired(&self) -> bool {
        self.elapsed() >= self.budget
    }

    pub fn check(&self) -> Result<()> {
        if self.expired() {
            return Err(Error::Timeout {
                operation: self.operation,
                budget: self.budget,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_budget_is_expired() {
        let deadline = Deadline::new("tree read", Duration::ZERO);
        assert!(deadline.expired());
        assert!(matches!(
            deadline.check(),
            Err(Error::Timeout {
                operation: "tree read",
                ..
            })
        ));
    }

    #[test]
    fn test_unbounded_is_not_expired() {
        let deadline = Deadline::unbounded("locate");
        assert!(!deadline.expired());
        assert!(deadline.check().is_ok());
    }
}
