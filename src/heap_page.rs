//! The slotted heap page: a bitmap header followed by fixed-width tuple
//! slots and zero padding.

use std::sync::Arc;

use crate::errors::{Error, Result};
use crate::tuple::{Tuple, TupleDesc};
use crate::{PageId, RecordId, TransactionId};

/// One fixed-size page of a heap file.
///
/// On disk the layout is a header of `ceil(num_slots / 8)` bytes where bit
/// `i` is set when slot `i` holds a tuple, followed by `num_slots` slots
/// of `tuple_size` bytes each, followed by zeros up to the page size.
///
/// In memory the page additionally tracks which transaction dirtied it and
/// a byte-exact before-image used to undo the transaction on abort.
#[derive(Debug, Clone)]
pub struct HeapPage {
    pid: PageId,
    desc: Arc<TupleDesc>,
    page_size: usize,
    header: Vec<u8>,
    tuples: Vec<Option<Tuple>>,
    dirty_by: Option<TransactionId>,
    before_image: Vec<u8>,
}

impl HeapPage {
    /// Number of tuple slots on a page:
    /// `floor((page_size * 8) / (tuple_size * 8 + 1))`.
    pub fn slots_per_page(page_size: usize, tuple_size: usize) -> usize {
        (page_size * 8) / (tuple_size * 8 + 1)
    }

    fn header_size(num_slots: usize) -> usize {
        (num_slots + 7) / 8
    }

    /// Parses a page from its on-disk bytes. The bytes become the page's
    /// before-image.
    pub fn parse(
        pid: PageId,
        desc: Arc<TupleDesc>,
        page_size: usize,
        data: &[u8],
    ) -> Result<Self> {
        if data.len() != page_size {
            return Err(Error::Schema(format!(
                "page image is {} bytes, expected {page_size}",
                data.len()
            )));
        }
        let tuple_size = desc.byte_size();
        let num_slots = Self::slots_per_page(page_size, tuple_size);
        let header_size = Self::header_size(num_slots);
        let header = data[..header_size].to_vec();

        let mut tuples = Vec::with_capacity(num_slots);
        for slot in 0..num_slots {
            if header[slot / 8] & (1 << (slot % 8)) == 0 {
                tuples.push(None);
                continue;
            }
            let start = header_size + slot * tuple_size;
            let mut tuple = Tuple::parse(&desc, &data[start..start + tuple_size])?;
            tuple.set_record_id(Some(RecordId::new(pid, slot as u16)));
            tuples.push(Some(tuple));
        }

        Ok(Self {
            pid,
            desc,
            page_size,
            header,
            tuples,
            dirty_by: None,
            before_image: data.to_vec(),
        })
    }

    /// A fresh page with every slot free.
    pub fn empty(pid: PageId, desc: Arc<TupleDesc>, page_size: usize) -> Self {
        let num_slots = Self::slots_per_page(page_size, desc.byte_size());
        Self {
            pid,
            desc,
            page_size,
            header: vec![0; Self::header_size(num_slots)],
            tuples: vec![None; num_slots],
            dirty_by: None,
            before_image: vec![0; page_size],
        }
    }

    pub fn id(&self) -> PageId {
        self.pid
    }

    pub fn desc(&self) -> &Arc<TupleDesc> {
        &self.desc
    }

    pub fn num_slots(&self) -> usize {
        self.tuples.len()
    }

    pub fn slot_used(&self, slot: usize) -> bool {
        self.header[slot / 8] & (1 << (slot % 8)) != 0
    }

    fn set_slot_used(&mut self, slot: usize, used: bool) {
        if used {
            self.header[slot / 8] |= 1 << (slot % 8);
        } else {
            self.header[slot / 8] &= !(1 << (slot % 8));
        }
    }

    pub fn empty_slots(&self) -> usize {
        self.tuples.iter().filter(|slot| slot.is_none()).count()
    }

    /// Serializes the page back into its on-disk representation. Parsing
    /// the result yields an identical page.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = vec![0u8; self.page_size];
        out[..self.header.len()].copy_from_slice(&self.header);
        let tuple_size = self.desc.byte_size();
        for (slot, tuple) in self.tuples.iter().enumerate() {
            if let Some(tuple) = tuple {
                let start = self.header.len() + slot * tuple_size;
                tuple.serialize(&mut out[start..start + tuple_size]);
            }
        }
        out
    }

    /// Places `tuple` in the first free slot and stamps its record id.
    pub fn insert_tuple(&mut self, mut tuple: Tuple) -> Result<RecordId> {
        if **tuple.desc() != *self.desc {
            return Err(Error::Schema(
                "tuple descriptor does not match the table".to_string(),
            ));
        }
        let slot = (0..self.num_slots())
            .find(|slot| !self.slot_used(*slot))
            .ok_or(Error::PageFull)?;
        let rid = RecordId::new(self.pid, slot as u16);
        tuple.set_record_id(Some(rid));
        self.set_slot_used(slot, true);
        self.tuples[slot] = Some(tuple);
        Ok(rid)
    }

    /// Frees the slot named by `rid`.
    pub fn delete_tuple(&mut self, rid: RecordId) -> Result<()> {
        let slot = rid.slot as usize;
        if rid.page_id != self.pid || slot >= self.num_slots() || !self.slot_used(slot) {
            return Err(Error::TupleNotOnPage);
        }
        self.set_slot_used(slot, false);
        self.tuples[slot] = None;
        Ok(())
    }

    /// Iterates the occupied slots in order.
    pub fn iter(&self) -> impl Iterator<Item = &Tuple> {
        self.tuples.iter().flatten()
    }

    pub fn dirty_by(&self) -> Option<TransactionId> {
        self.dirty_by
    }

    pub fn mark_dirty(&mut self, tid: Option<TransactionId>) {
        self.dirty_by = tid;
    }

    /// Re-snapshots the current contents as the before-image. Called after
    /// a flush makes the in-memory state authoritative on disk.
    pub fn set_before_image(&mut self) {
        self.before_image = self.serialize();
    }

    pub fn before_image(&self) -> &[u8] {
        &self.before_image
    }

    /// Rolls the page back to its before-image and clears the dirty mark.
    /// Used on abort so the next reader sees pre-transaction bytes without
    /// a disk read.
    pub fn restore_before_image(&mut self) -> Result<()> {
        let restored = Self::parse(self.pid, self.desc.clone(), self.page_size, &self.before_image)?;
        *self = restored;
        Ok(())
    }
}
