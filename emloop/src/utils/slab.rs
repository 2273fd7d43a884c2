use emloop_core::JobHandle;

/// Fixed-capacity descriptor storage addressed by tagged handles.
///
/// Each slot carries a generation tag that is bumped on removal, so a stale
/// [`JobHandle`] kept past its completion reply can never alias a descriptor
/// that later reuses the slot.
pub struct Slab<T, const N: usize> {
    tags: [u8; N],
    values: [Option<T>; N],
}

impl<T, const N: usize> Slab<T, N> {
    const _ASSERT: usize = 256 - N;

    pub const fn new() -> Self {
        Self {
            tags: [0; N],
            values: [const { None }; N],
        }
    }

    /// Parks a value, returning its handle. Fails with the value back when all
    /// slots are occupied.
    pub fn insert(&mut self, value: T) -> Result<JobHandle, T> {
        let _ = Self::_ASSERT;
        for slot in 0..N {
            if self.values[slot].is_none() {
                self.values[slot] = Some(value);
                return Ok(JobHandle::new(slot as u8, self.tags[slot]));
            }
        }
        Err(value)
    }

    fn index(&self, handle: JobHandle) -> Option<usize> {
        let slot = usize::from(handle.slot());
        if slot < N && self.tags[slot] == handle.tag() && self.values[slot].is_some() {
            Some(slot)
        } else {
            None
        }
    }

    pub fn contains(&self, handle: JobHandle) -> bool {
        self.index(handle).is_some()
    }

    pub fn get(&self, handle: JobHandle) -> Option<&T> {
        let slot = self.index(handle)?;
        self.values[slot].as_ref()
    }

    pub fn get_mut(&mut self, handle: JobHandle) -> Option<&mut T> {
        let slot = self.index(handle)?;
        self.values[slot].as_mut()
    }

    pub fn remove(&mut self, handle: JobHandle) -> Option<T> {
        let slot = self.index(handle)?;
        self.tags[slot] = self.tags[slot].wrapping_add(1);
        self.values[slot].take()
    }

    pub fn is_empty(&self) -> bool {
        self.values.iter().all(|slot| slot.is_none())
    }

    pub fn iter(&self) -> impl Iterator<Item = (JobHandle, &T)> {
        self.values.iter().enumerate().filter_map(|(slot, value)| {
            value
                .as_ref()
                .map(|value| (JobHandle::new(slot as u8, self.tags[slot]), value))
        })
    }
}

impl<T, const N: usize> Default for Slab<T, N> {
    fn default() -> Self {
        Self::new()
    }
}
