use std::collections::{HashMap, HashSet};

use crate::trace::{EventId, StrId};
use crate::{Error, Result};

/// Resources an operation must hold while in flight, with descriptors
/// already resolved to the path they were opened on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Claim {
    Paths(Vec<StrId>),
    Descriptor { file: EventId, path: StrId },
}

/// Paths currently held by in-flight operations.
#[derive(Debug, Default)]
pub struct LockTable {
    paths: HashSet<StrId>,
    descriptors: HashMap<EventId, StrId>,
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_locked(&self, path: StrId) -> bool {
        self.paths.contains(&path)
    }

    pub fn lock(&mut self, path: StrId) -> Result<()> {
        if !self.paths.insert(path) {
            return Err(Error::AlreadyLocked(path));
        }
        Ok(())
    }

    pub fn unlock(&mut self, path: StrId) -> Result<()> {
        if !self.paths.remove(&path) {
            return Err(Error::NotLocked(path));
        }
        Ok(())
    }

    /// Locks the path behind descriptor `file`.
    pub fn lock_descriptor(&mut self, file: EventId, path: StrId) -> Result<()> {
        if self.descriptors.contains_key(&file) {
            return Err(Error::DescriptorRegistered(file));
        }
        self.lock(path)?;
        self.descriptors.insert(file, path);
        Ok(())
    }

    pub fn unlock_descriptor(&mut self, file: EventId) -> Result<StrId> {
        let path = self
            .descriptors
            .remove(&file)
            .ok_or(Error::DescriptorNotFound(file))?;
        self.unlock(path)?;
        Ok(path)
    }

    /// Takes every lock of `claim`, or none of them. Returns `false` when a
    /// path is held by another operation.
    pub fn try_acquire(&mut self, claim: &Claim) -> Result<bool> {
        match claim {
            Claim::Descriptor { file, path } => {
                if self.is_locked(*path) {
                    return Ok(false);
                }
                self.lock_descriptor(*file, *path)?;
            }
            Claim::Paths(paths) => {
                for (taken, &path) in paths.iter().enumerate() {
                    if self.is_locked(path) {
                        for &held in &paths[..taken] {
                            self.unlock(held)?;
                        }
                        return Ok(false);
                    }
                    self.lock(path)?;
                }
            }
        }
        Ok(true)
    }

    pub fn release(&mut self, claim: &Claim) -> Result<()> {
        match claim {
            Claim::Descriptor { file, .. } => {
                self.unlock_descriptor(*file)?;
            }
            Claim::Paths(paths) => {
                for &path in paths {
                    self.unlock(path)?;
                }
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty() && self.descriptors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn double_lock_and_stray_unlock_fail() {
        let mut locks = LockTable::new();
        locks.lock(4).unwrap();
        assert!(matches!(locks.lock(4), Err(Error::AlreadyLocked(4))));
        locks.unlock(4).unwrap();
        assert!(matches!(locks.unlock(4), Err(Error::NotLocked(4))));
        assert!(locks.is_empty());
    }

    #[test]
    fn partial_acquire_rolls_back() {
        let mut locks = LockTable::new();
        locks.lock(9).unwrap();
        let rename = Claim::Paths(vec![1, 9]);
        assert!(!locks.try_acquire(&rename).unwrap());
        assert!(!locks.is_locked(1));
        assert_eq!(locks.len(), 1);

        locks.unlock(9).unwrap();
        assert!(locks.try_acquire(&rename).unwrap());
        locks.release(&rename).unwrap();
        assert!(locks.is_empty());
    }

    #[test]
    fn descriptor_claims_lock_their_path() {
        let mut locks = LockTable::new();
        let read = Claim::Descriptor { file: 2, path: 5 };
        assert!(locks.try_acquire(&read).unwrap());
        assert!(locks.is_locked(5));
        assert!(!locks.try_acquire(&Claim::Paths(vec![5])).unwrap());
        assert!(!locks.try_acquire(&Claim::Descriptor { file: 7, path: 5 }).unwrap());
        locks.release(&read).unwrap();
        assert!(locks.is_empty());
        assert!(matches!(
            locks.unlock_descriptor(2),
            Err(Error::DescriptorNotFound(2))
        ));
    }
}
