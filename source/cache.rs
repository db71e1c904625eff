// Sparse, index-addressed message cache. Grounded on original_source/src/cache.c, reworked from
// manual realloc bookkeeping into a plain growable vector of optional records.

use crate::address::Address;

pub const SEEN: u32 = 1 << 0;
pub const RECENT: u32 = 1 << 1;
pub const ANSWERED: u32 = 1 << 2;
pub const DELETED: u32 = 1 << 3;
pub const FLAGGED: u32 = 1 << 4;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Envelope {
  pub subject: Option<String>,
  pub from: Vec<Address>,
  pub to: Vec<Address>,
  pub cc: Vec<Address>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Message {
  pub internal_date: Option<String>,
  pub size_octets: Option<u64>,
  pub flags: u32,
  pub envelope: Envelope,
  pub body_text: Option<String>,
}

#[derive(Debug)]
pub struct OutOfRange(pub usize, pub usize);

impl std::fmt::Display for OutOfRange {
  fn fmt(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
    write!(formatter, "cache index {} out of range (size {})", self.0, self.1)
  }
}

impl std::error::Error for OutOfRange {}

#[derive(Debug, Default)]
pub struct Cache {
  slots: Vec<Option<Message>>,
  /// Length as of the last time the dispatcher closed a fetch gap. `size > prev_size` is the
  /// signal that slots `(prev_size, size]` (1-based) still need a FETCH.
  prev_size: usize,
  recent: u32,
}

impl Cache {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn size(&self) -> usize {
    self.slots.len()
  }

  pub fn prev_size(&self) -> usize {
    self.prev_size
  }

  pub fn recent(&self) -> u32 {
    self.recent
  }

  pub fn set_recent(&mut self, n: u32) {
    self.recent = n;
  }

  /// 1-based external indexing; `None` if the slot doesn't exist or hasn't been fetched yet.
  pub fn get(&self, position: usize) -> Option<&Message> {
    position
      .checked_sub(1)
      .and_then(|index| self.slots.get(index))
      .and_then(|slot| slot.as_ref())
  }

  /// `new_size == size` is a no-op. Shrinking truncates from the high end (used only by reset
  /// paths, never driven directly by EXISTS). Growing leaves `prev_size` untouched so the gap
  /// remains visible to whoever closes it with a FETCH.
  pub fn resize(&mut self, new_size: usize) {
    match new_size.cmp(&self.slots.len()) {
      std::cmp::Ordering::Equal => (),
      std::cmp::Ordering::Less => {
        if new_size == 0 {
          self.slots.clear();
          self.prev_size = 0;
        } else {
          self.slots.truncate(new_size);
        }
      }
      std::cmp::Ordering::Greater => self.slots.resize_with(new_size, || None),
    }
  }

  /// Overwrites the slot at `position` (1-based). An out-of-range write against an otherwise
  /// initialized cache is an invariant violation and is surfaced rather than silently ignored,
  /// unlike the C original's silent no-op.
  pub fn insert(&mut self, position: usize, message: Message) -> Result<(), OutOfRange> {
    let index = position
      .checked_sub(1)
      .filter(|&index| index < self.slots.len())
      .ok_or(OutOfRange(position, self.slots.len()))?;
    self.slots[index] = Some(message);
    Ok(())
  }

  /// Merges `patch` into the slot at `position`, creating an empty record first if absent.
  pub fn merge(&mut self, position: usize, patch: impl FnOnce(&mut Message)) -> Result<(), OutOfRange> {
    let index = position
      .checked_sub(1)
      .filter(|&index| index < self.slots.len())
      .ok_or(OutOfRange(position, self.slots.len()))?;
    let slot = self.slots[index].get_or_insert_with(Message::default);
    patch(slot);
    Ok(())
  }

  /// Removes the slot at `position`, shifting every later slot down by one. `prev_size` is set
  /// equal to the new size: a shrink is not "new data to fetch".
  pub fn remove(&mut self, position: usize) -> Result<(), OutOfRange> {
    let index = position
      .checked_sub(1)
      .filter(|&index| index < self.slots.len())
      .ok_or(OutOfRange(position, self.slots.len()))?;
    self.slots.remove(index);
    self.prev_size = self.slots.len();
    Ok(())
  }

  /// Drops every slot and zeroes size/prev_size/recent. Called on SELECT.
  pub fn reset(&mut self) {
    self.slots.clear();
    self.prev_size = 0;
    self.recent = 0;
  }

  /// Marks the cache as caught up as of the current size (called after a bulk FETCH closes a
  /// gap, or right after a SELECT's initial prefetch).
  pub fn mark_synced(&mut self) {
    self.prev_size = self.slots.len();
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn resize_growth_leaves_gap_visible() {
    let mut cache = Cache::new();
    cache.resize(3);
    cache.mark_synced();
    cache.resize(5);
    assert_eq!(5, cache.size());
    assert_eq!(3, cache.prev_size());
    assert_eq!(None, cache.get(4));
    assert_eq!(None, cache.get(5));
  }

  #[test]
  fn remove_shifts_indices_and_syncs() {
    let mut cache = Cache::new();
    cache.resize(3);
    for i in 1..=3 {
      cache
        .insert(
          i,
          Message {
            size_octets: Some(i as u64),
            ..Default::default()
          },
        )
        .unwrap();
    }
    cache.remove(2).unwrap();
    assert_eq!(2, cache.size());
    assert_eq!(2, cache.prev_size());
    assert_eq!(Some(1), cache.get(1).unwrap().size_octets);
    assert_eq!(Some(3), cache.get(2).unwrap().size_octets);
  }

  #[test]
  fn insert_out_of_range_is_an_error() {
    let mut cache = Cache::new();
    cache.resize(1);
    assert!(cache.insert(5, Message::default()).is_err());
  }

  #[test]
  fn remove_last_slot_empties_cache() {
    let mut cache = Cache::new();
    cache.resize(1);
    cache.insert(1, Message::default()).unwrap();
    cache.remove(1).unwrap();
    assert_eq!(0, cache.size());
    assert_eq!(0, cache.prev_size());
  }

  #[test]
  fn reset_clears_everything() {
    let mut cache = Cache::new();
    cache.resize(4);
    cache.set_recent(2);
    cache.mark_synced();
    cache.reset();
    assert_eq!(0, cache.size());
    assert_eq!(0, cache.prev_size());
    assert_eq!(0, cache.recent());
  }
}
