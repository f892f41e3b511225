// Named failure injection for the in-memory store backends

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::{AppError, AppResult, StoreKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FailMode {
    Always,
    Transient(u32),
    After(u32),
}

/// Shared set of armed fail points. Cloning shares the same set, so a test
/// can keep a handle while the stores hold theirs.
#[derive(Debug, Clone, Default)]
pub struct FailPoints {
    points: Arc<Mutex<HashMap<String, FailMode>>>,
}

impl FailPoints {
    pub fn new() -> Self {
        Self::default()
    }

    fn points(&self) -> MutexGuard<'_, HashMap<String, FailMode>> {
        self.points.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Every call to `name` fails with a permanent dependency error.
    pub fn fail(&self, name: &str) {
        self.points().insert(name.to_string(), FailMode::Always);
    }

    /// The next `times` calls to `name` fail with a transient error.
    pub fn fail_transient(&self, name: &str, times: u32) {
        self.points()
            .insert(name.to_string(), FailMode::Transient(times));
    }

    /// Lets the next `passes` calls to `name` through, then fails every call
    /// after that.
    pub fn fail_after(&self, name: &str, passes: u32) {
        self.points().insert(name.to_string(), FailMode::After(passes));
    }

    pub fn clear(&self, name: &str) {
        self.points().remove(name);
    }

    pub fn clear_all(&self) {
        self.points().clear();
    }

    pub fn check(&self, name: &str, store: StoreKind) -> AppResult<()> {
        let mut points = self.points();
        match points.get(name).copied() {
            None => Ok(()),
            Some(FailMode::After(passes)) if passes > 0 => {
                points.insert(name.to_string(), FailMode::After(passes - 1));
                Ok(())
            }
            Some(FailMode::Always) | Some(FailMode::After(_)) => Err(AppError::dependency(
                store,
                format!("injected failure at {}", name),
            )),
            Some(FailMode::Transient(remaining)) => {
                if remaining <= 1 {
                    points.remove(name);
                } else {
                    points.insert(name.to_string(), FailMode::Transient(remaining - 1));
                }
                Err(AppError::unavailable(
                    store,
                    format!("injected transient failure at {}", name),
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permanent_fail_point_stays_armed() {
        let points = FailPoints::new();
        points.fail("search.insert");
        for _ in 0..3 {
            let err = points.check("search.insert", StoreKind::Search).unwrap_err();
            assert!(!err.is_transient());
        }
        points.clear("search.insert");
        assert!(points.check("search.insert", StoreKind::Search).is_ok());
    }

    #[test]
    fn test_transient_fail_point_expires() {
        let points = FailPoints::new();
        points.fail_transient("blob.upload", 2);
        assert!(points.check("blob.upload", StoreKind::Blob).unwrap_err().is_transient());
        assert!(points.check("blob.upload", StoreKind::Blob).is_err());
        assert!(points.check("blob.upload", StoreKind::Blob).is_ok());
    }

    #[test]
    fn test_fail_after_lets_calls_through_first() {
        let points = FailPoints::new();
        points.fail_after("search.delete", 1);
        assert!(points.check("search.delete", StoreKind::Search).is_ok());
        assert!(points.check("search.delete", StoreKind::Search).is_err());
        assert!(points.check("search.delete", StoreKind::Search).is_err());
    }

    #[test]
    fn test_clones_share_state() {
        let points = FailPoints::new();
        let handle = points.clone();
        handle.fail("graph.commit");
        assert!(points.check("graph.commit", StoreKind::Graph).is_err());
        points.clear_all();
        assert!(handle.check("graph.commit", StoreKind::Graph).is_ok());
    }
}
