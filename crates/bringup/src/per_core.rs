//! Per-core state arena.
//!
//! One slot per possible core, each behind its own lock. A slot is empty until the
//! primary seeds it (for itself at start-up, for a secondary right before dispatching
//! it). From then on only the owning core may modify it.

use spin::Mutex;

use crate::{BringUpError, CoreId, MAX_CORES};

pub struct PerCore<T> {
    slots: [Mutex<Option<T>>; MAX_CORES],
}

impl<T> PerCore<T> {
    pub fn new() -> Self {
        Self {
            slots: core::array::from_fn(|_| Mutex::new(None)),
        }
    }

    fn slot(&self, core: CoreId) -> Result<&Mutex<Option<T>>, BringUpError> {
        self.slots
            .get(core.as_usize())
            .ok_or(BringUpError::NoSuchCore(core))
    }

    /// Hands an empty slot its initial value. Seeding an occupied slot is refused.
    pub fn seed(&self, core: CoreId, value: T) -> Result<(), BringUpError> {
        let mut slot = self.slot(core)?.lock();
        if slot.is_some() {
            return Err(BringUpError::AlreadySeeded(core));
        }
        *slot = Some(value);
        Ok(())
    }

    /// Runs `f` on the state of `owner`, provided `caller` is `owner`.
    pub fn update<R>(
        &self,
        caller: CoreId,
        owner: CoreId,
        f: impl FnOnce(&mut T) -> R,
    ) -> Result<R, BringUpError> {
        if caller != owner {
            return Err(BringUpError::ForeignCore { owner, caller });
        }
        let mut slot = self.slot(owner)?.lock();
        let state = slot.as_mut().ok_or(BringUpError::NoSuchCore(owner))?;
        Ok(f(state))
    }

    /// Reads the state of `core` through `f`. Any core may read.
    pub fn read<R>(&self, core: CoreId, f: impl FnOnce(&T) -> R) -> Option<R> {
        self.slots.get(core.as_usize())?.lock().as_ref().map(f)
    }
}

impl<T> Default for PerCore<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_slots_read_as_none() {
        let arena: PerCore<u32> = PerCore::new();
        assert_eq!(arena.read(CoreId::new(5), |v| *v), None);
        assert_eq!(arena.read(CoreId::new(MAX_CORES), |v| *v), None);
    }

    #[test]
    fn owner_can_update() {
        let arena = PerCore::new();
        arena.seed(CoreId::new(2), 10u32).unwrap();

        let old = arena
            .update(CoreId::new(2), CoreId::new(2), |v| {
                let old = *v;
                *v += 1;
                old
            })
            .unwrap();
        assert_eq!(old, 10);
        assert_eq!(arena.read(CoreId::new(2), |v| *v), Some(11));
    }

    #[test]
    fn foreign_update_is_rejected() {
        let arena = PerCore::new();
        arena.seed(CoreId::new(1), 7u32).unwrap();

        assert_eq!(
            arena.update(CoreId::PRIMARY, CoreId::new(1), |v| *v = 0),
            Err(BringUpError::ForeignCore {
                owner: CoreId::new(1),
                caller: CoreId::PRIMARY,
            })
        );
        assert_eq!(arena.read(CoreId::new(1), |v| *v), Some(7));
    }

    #[test]
    fn reseeding_is_rejected() {
        let arena = PerCore::new();
        arena.seed(CoreId::new(1), 1u32).unwrap();
        assert_eq!(
            arena.seed(CoreId::new(1), 2),
            Err(BringUpError::AlreadySeeded(CoreId::new(1)))
        );
        assert_eq!(arena.read(CoreId::new(1), |v| *v), Some(1));
    }

    #[test]
    fn unseeded_update_is_rejected() {
        let arena: PerCore<u32> = PerCore::new();
        assert_eq!(
            arena.update(CoreId::new(3), CoreId::new(3), |_| ()),
            Err(BringUpError::NoSuchCore(CoreId::new(3)))
        );
        assert_eq!(
            arena.seed(CoreId::new(MAX_CORES), 1),
            Err(BringUpError::NoSuchCore(CoreId::new(MAX_CORES)))
        );
    }
}
