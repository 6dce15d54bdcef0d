//! Arena of regions with a registration-order resolution list.

use crate::access::{AccessClass, AccessKind};
use crate::region::{Region, RegionHandle};

#[derive(Debug, Clone)]
struct Slot {
    generation: u32,
    region: Option<Region>,
}

/// Region arena.
///
/// Slots are recycled after removal with a bumped generation; a recycled slot joins the end of
/// the resolution order like any other new registration.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    slots: Vec<Slot>,
    order: Vec<u32>,
    free: Vec<u32>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.order.clear();
        self.free.clear();
    }

    pub fn insert(&mut self, region: Region) -> RegionHandle {
        let index = match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.generation = slot.generation.wrapping_add(1);
                slot.region = Some(region);
                index
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    region: Some(region),
                });
                (self.slots.len() - 1) as u32
            }
        };
        self.order.push(index);
        RegionHandle {
            index,
            generation: self.slots[index as usize].generation,
        }
    }

    pub fn remove(&mut self, handle: RegionHandle) -> Option<Region> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        let region = slot.region.take()?;
        self.order.retain(|&index| index != handle.index);
        self.free.push(handle.index);
        Some(region)
    }

    pub fn get(&self, handle: RegionHandle) -> Option<&Region> {
        let slot = self.slots.get(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.region.as_ref()
    }

    pub fn get_mut(&mut self, handle: RegionHandle) -> Option<&mut Region> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.region.as_mut()
    }

    /// Regions in registration order.
    pub fn iter(&self) -> impl Iterator<Item = (RegionHandle, &Region)> + '_ {
        self.order.iter().filter_map(move |&index| {
            let slot = &self.slots[index as usize];
            slot.region.as_ref().map(|region| {
                (
                    RegionHandle {
                        index,
                        generation: slot.generation,
                    },
                    region,
                )
            })
        })
    }

    fn candidates(
        &self,
        kind: AccessKind,
        class: AccessClass,
    ) -> impl Iterator<Item = (RegionHandle, &Region)> + '_ {
        self.iter().filter(move |(_, region)| {
            region.enabled && region.services(kind) && class.admits(region.flags)
        })
    }

    /// First enabled region in registration order that contains `addr`, can service `kind` and is
    /// admitted by `class`.
    pub fn find(
        &self,
        addr: u32,
        kind: AccessKind,
        class: AccessClass,
    ) -> Option<(RegionHandle, &Region)> {
        if class == AccessClass::Disabled {
            return None;
        }
        self.candidates(kind, class)
            .find(|(_, region)| region.contains(addr))
    }

    /// The region that wins every address of `[start, end)`, if a single one does.
    ///
    /// Returns `None` when the first candidate intersecting the range does not cover all of it,
    /// since a later region may then win part of the range.
    pub fn find_covering(
        &self,
        start: u64,
        end: u64,
        kind: AccessKind,
        class: AccessClass,
    ) -> Option<(RegionHandle, &Region)> {
        if class == AccessClass::Disabled {
            return None;
        }
        let (handle, region) = self
            .candidates(kind, class)
            .find(|(_, region)| region.intersects(start, end))?;
        (u64::from(region.base) <= start && region.end() >= end).then_some((handle, region))
    }
}
