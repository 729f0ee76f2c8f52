//! Generational arena owning every rigid body of a world.
//!
//! Slots freed by `remove` are reused last-in first-out, with the slot's
//! generation bumped so stale handles are detected.

use super::rigid_body::{BodyDef, BodyHandle, RigidBody};

#[derive(Debug, Clone)]
struct BodySlot {
    generation: u32,
    body: Option<RigidBody>,
}

#[derive(Debug, Clone, Default)]
pub struct BodySet {
    slots: Vec<BodySlot>,
    free_list: Vec<u32>,
    len: usize,
}

impl BodySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a body from an already validated definition.
    pub(crate) fn insert(&mut self, def: &BodyDef) -> BodyHandle {
        let handle = match self.free_list.pop() {
            Some(index) => BodyHandle {
                index,
                generation: self.slots[index as usize].generation,
            },
            None => {
                self.slots.push(BodySlot {
                    generation: 0,
                    body: None,
                });
                BodyHandle {
                    index: (self.slots.len() - 1) as u32,
                    generation: 0,
                }
            }
        };
        self.slots[handle.index as usize].body = Some(RigidBody::from_def(handle, def));
        self.len += 1;
        handle
    }

    pub(crate) fn remove(&mut self, handle: BodyHandle) -> Option<RigidBody> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        let body = slot.body.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free_list.push(handle.index);
        self.len -= 1;
        Some(body)
    }

    pub fn get(&self, handle: BodyHandle) -> Option<&RigidBody> {
        self.slots
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.body.as_ref())
    }

    pub fn get_mut(&mut self, handle: BodyHandle) -> Option<&mut RigidBody> {
        self.slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.body.as_mut())
    }

    pub fn contains(&self, handle: BodyHandle) -> bool {
        self.get(handle).is_some()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of slots, live or free. Slot indices are below this bound.
    pub(crate) fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Live bodies in slot order.
    pub fn iter(&self) -> impl Iterator<Item = &RigidBody> {
        self.slots.iter().filter_map(|slot| slot.body.as_ref())
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut RigidBody> {
        self.slots.iter_mut().filter_map(|slot| slot.body.as_mut())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Vec2;
    use crate::objects::MassProperties;

    fn def(x: f64) -> BodyDef {
        BodyDef::dynamic(Vec2::new(x, 0.0), MassProperties::default())
    }

    #[test]
    fn test_insert_and_get() {
        let mut set = BodySet::new();
        let a = set.insert(&def(1.0));
        let b = set.insert(&def(2.0));
        assert_eq!(set.len(), 2);
        assert_eq!(set.get(a).unwrap().position(), Vec2::new(1.0, 0.0));
        assert_eq!(set.get(b).unwrap().handle(), b);
        assert_ne!(a, b);
    }

    #[test]
    fn test_stale_handle_is_rejected() {
        let mut set = BodySet::new();
        let a = set.insert(&def(1.0));
        assert!(set.remove(a).is_some());
        assert!(set.get(a).is_none());
        assert!(set.remove(a).is_none());

        let b = set.insert(&def(2.0));
        assert_eq!(b.index(), a.index());
        assert_eq!(b.generation(), a.generation() + 1);
        assert!(set.get(a).is_none());
        assert!(set.get(b).is_some());
    }

    #[test]
    fn test_free_slots_reused_lifo() {
        let mut set = BodySet::new();
        let handles: Vec<_> = (0..4).map(|i| set.insert(&def(i as f64))).collect();
        set.remove(handles[1]);
        set.remove(handles[3]);
        assert_eq!(set.insert(&def(9.0)).index(), handles[3].index());
        assert_eq!(set.insert(&def(9.0)).index(), handles[1].index());
        assert_eq!(set.insert(&def(9.0)).index(), 4);
        assert_eq!(set.len(), 5);
        assert_eq!(set.capacity(), 5);
    }

    #[test]
    fn test_iter_in_slot_order() {
        let mut set = BodySet::new();
        let a = set.insert(&def(0.0));
        let b = set.insert(&def(1.0));
        let c = set.insert(&def(2.0));
        set.remove(b);
        let order: Vec<_> = set.iter().map(|body| body.handle()).collect();
        assert_eq!(order, vec![a, c]);
    }
}
