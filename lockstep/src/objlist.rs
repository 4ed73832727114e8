//! The partitioned container of user objects.

use std::cell::Cell;
use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;
use std::rc::Rc;

use lockstep_bytes::{BinStream, Serialize};

use crate::attrlist::{AttrList, AttrListAny};

/// A user object with a stable key.
///
/// Within an [`ObjList`] keys are unique; ownership of an object moves
/// between workers only through a migrate channel.
pub trait Keyed: 'static {
    /// The key type; hashed onto the ring to pick the owning worker.
    type Key: Clone + Ord + Hash + Eq + Serialize + 'static;

    /// The object's stable key.
    fn id(&self) -> &Self::Key;

    /// Constructs the object from a bare key, as inbound channels do when a
    /// message addresses a key with no local object yet.
    fn with_key(key: Self::Key) -> Self;
}

/// An ordered sequence of objects of one type, with a deletion bitmap, a
/// sorted prefix for binary search, a hash index over the unsorted tail,
/// and named attribute side-tables that follow the objects through every
/// reorder, compaction, and migration.
///
/// Mutated only by its owning worker thread.
pub struct ObjList<T: Keyed> {
    data: Vec<T>,
    del_bitmap: Vec<bool>,
    sorted_size: usize,
    num_del: usize,
    hashed_objs: HashMap<T::Key, usize>,
    len_cell: Rc<Cell<usize>>,
    attrlists: BTreeMap<String, Box<dyn AttrListAny>>,
    in_channels: Vec<u32>,
    out_channels: Vec<u32>,
}

impl<T: Keyed> Default for ObjList<T> {
    fn default() -> Self {
        ObjList::new()
    }
}

impl<T: Keyed> ObjList<T> {
    /// Creates an empty list.
    pub fn new() -> Self {
        ObjList {
            data: Vec::new(),
            del_bitmap: Vec::new(),
            sorted_size: 0,
            num_del: 0,
            hashed_objs: HashMap::new(),
            len_cell: Rc::new(Cell::new(0)),
            attrlists: BTreeMap::new(),
            in_channels: Vec::new(),
            out_channels: Vec::new(),
        }
    }

    /// Appends an object and returns its index.
    pub fn add_object(&mut self, obj: T) -> usize {
        let idx = self.data.len();
        self.hashed_objs.insert(obj.id().clone(), idx);
        self.data.push(obj);
        self.del_bitmap.push(false);
        self.len_cell.set(self.data.len());
        idx
    }

    /// Lazily deletes an object; the slot is reclaimed by
    /// [`deletion_finalize`](Self::deletion_finalize). Returns the index.
    pub fn delete_object(&mut self, obj: &T) -> usize {
        let idx = self.index_of(obj);
        self.delete_at(idx);
        idx
    }

    /// Lazily deletes the object at `idx`.
    pub fn delete_at(&mut self, idx: usize) {
        assert!(idx < self.data.len(), "ObjList::delete_at: index {} out of range", idx);
        if !self.del_bitmap[idx] {
            self.del_bitmap[idx] = true;
            self.num_del += 1;
        }
    }

    /// Index of an object that lives in this list. A foreign reference is a
    /// contract violation.
    pub fn index_of(&self, obj: &T) -> usize {
        let size = std::mem::size_of::<T>();
        assert!(size > 0, "ObjList::index_of: zero-sized object type");
        let base = self.data.as_ptr() as usize;
        let addr = obj as *const T as usize;
        assert!(
            addr >= base && (addr - base) % size == 0 && (addr - base) / size < self.data.len(),
            "ObjList::index_of: object does not belong to this list"
        );
        (addr - base) / size
    }

    /// Finds an object by key: binary search over the sorted prefix, hash
    /// index over the unsorted tail.
    pub fn find(&self, key: &T::Key) -> Option<&T> {
        self.find_index(key).map(|idx| &self.data[idx])
    }

    /// Index of the object with `key`, if present.
    pub fn find_index(&self, key: &T::Key) -> Option<usize> {
        if self.data.is_empty() {
            return None;
        }
        if let Ok(idx) = self.data[..self.sorted_size].binary_search_by(|obj| obj.id().cmp(key)) {
            return Some(idx);
        }
        if self.sorted_size < self.data.len() {
            if let Some(&idx) = self.hashed_objs.get(key) {
                return Some(idx);
            }
        }
        None
    }

    /// Stable-sorts by key, permutes every attribute list in lockstep,
    /// clears the hash index, and extends the sorted prefix to the full
    /// length.
    pub fn sort(&mut self) {
        if self.data.is_empty() {
            return;
        }
        let mut perm: Vec<usize> = (0..self.data.len()).collect();
        perm.sort_by(|&a, &b| self.data[a].id().cmp(self.data[b].id()));

        apply_gather(&mut self.data, &perm);
        apply_gather(&mut self.del_bitmap, &perm);
        for attrlist in self.attrlists.values() {
            attrlist.resize_to(self.data.len());
            attrlist.reorder(&perm);
        }
        self.hashed_objs.clear();
        self.sorted_size = self.data.len();
    }

    /// Compacts away deleted slots by moving live objects from the tail
    /// into the holes, mirroring every move into the attribute lists.
    /// Afterwards the bitmap is all-false and the length equals the live
    /// count; object order is not preserved, so callers normally
    /// [`sort`](Self::sort) next.
    pub fn deletion_finalize(&mut self) {
        if self.num_del == 0 {
            return;
        }
        let live = self.data.len() - self.num_del;
        for attrlist in self.attrlists.values() {
            attrlist.resize_to(self.data.len());
        }

        let mut hole = 0;
        let mut tail = self.data.len();
        loop {
            while hole < tail && !self.del_bitmap[hole] {
                hole += 1;
            }
            while tail > hole && self.del_bitmap[tail - 1] {
                tail -= 1;
            }
            if hole + 1 >= tail {
                break;
            }
            self.data.swap(hole, tail - 1);
            self.del_bitmap.swap(hole, tail - 1);
            for attrlist in self.attrlists.values() {
                attrlist.move_entry(hole, tail - 1);
            }
        }

        self.data.truncate(live);
        self.del_bitmap.truncate(live);
        self.del_bitmap.iter_mut().for_each(|bit| *bit = false);
        for attrlist in self.attrlists.values() {
            attrlist.truncate(live);
        }
        self.num_del = 0;
        self.len_cell.set(live);

        // Compaction scrambles order; fall back to the hash index until the
        // next sort.
        self.sorted_size = 0;
        self.hashed_objs.clear();
        for (idx, obj) in self.data.iter().enumerate() {
            self.hashed_objs.insert(obj.id().clone(), idx);
        }
    }

    /// Registers a typed attribute list under `name`.
    pub fn create_attrlist<A>(&mut self, name: &str) -> AttrList<A>
    where
        A: Clone + Default + Serialize + 'static,
    {
        assert!(
            !self.attrlists.contains_key(name),
            "ObjList::create_attrlist: attribute list {:?} already exists",
            name
        );
        let attrlist = AttrList::<A>::new(Rc::clone(&self.len_cell));
        self.attrlists.insert(name.to_owned(), Box::new(attrlist.clone()));
        attrlist
    }

    /// Retrieves a registered attribute list by name and type.
    pub fn get_attrlist<A>(&self, name: &str) -> Option<AttrList<A>>
    where
        A: Clone + Default + Serialize + 'static,
    {
        self.attrlists
            .get(name)
            .and_then(|any| any.as_any().downcast_ref::<AttrList<A>>())
            .cloned()
    }

    /// Drops a registered attribute list; returns whether it existed.
    pub fn del_attrlist(&mut self, name: &str) -> bool {
        self.attrlists.remove(name).is_some()
    }

    /// Serializes the object's attribute values, in name order, for
    /// migration.
    pub fn migrate_attribute(&mut self, bin: &mut BinStream, idx: usize) {
        for attrlist in self.attrlists.values() {
            attrlist.migrate(bin, idx);
        }
    }

    /// Recovers migrated attribute values, in name order, at `idx`.
    pub fn process_attribute(&mut self, bin: &mut BinStream, idx: usize) {
        for attrlist in self.attrlists.values() {
            attrlist.process_bin(bin, idx);
        }
    }

    /// Attaches an inbound channel id.
    pub fn attach_inchannel(&mut self, channel_id: u32) {
        self.in_channels.push(channel_id);
    }

    /// Attaches an outbound channel id.
    pub fn attach_outchannel(&mut self, channel_id: u32) {
        self.out_channels.push(channel_id);
    }

    /// Detaches an inbound channel id.
    pub fn detach_inchannel(&mut self, channel_id: u32) {
        self.in_channels.retain(|&id| id != channel_id);
    }

    /// Detaches an outbound channel id.
    pub fn detach_outchannel(&mut self, channel_id: u32) {
        self.out_channels.retain(|&id| id != channel_id);
    }

    /// Ids of attached inbound channels.
    pub fn in_channel_ids(&self) -> &[u32] {
        &self.in_channels
    }

    /// Ids of attached outbound channels.
    pub fn out_channel_ids(&self) -> &[u32] {
        &self.out_channels
    }

    /// Number of live (undeleted) objects.
    pub fn get_size(&self) -> usize {
        self.data.len() - self.num_del
    }

    /// Physical length including lazily deleted slots.
    pub fn vector_size(&self) -> usize {
        self.data.len()
    }

    /// Whether the slot at `idx` is lazily deleted.
    pub fn get_del(&self, idx: usize) -> bool {
        self.del_bitmap[idx]
    }

    /// Length of the sorted prefix.
    pub fn sorted_size(&self) -> usize {
        self.sorted_size
    }

    /// Number of lazily deleted slots.
    pub fn num_del(&self) -> usize {
        self.num_del
    }

    /// The object at `idx`.
    pub fn get(&self, idx: usize) -> &T {
        &self.data[idx]
    }

    /// Mutable access to the object at `idx`.
    pub fn get_mut(&mut self, idx: usize) -> &mut T {
        &mut self.data[idx]
    }

    /// The objects as a slice, deleted slots included.
    pub fn data(&self) -> &[T] {
        &self.data
    }
}

/// Applies a gather permutation in place: afterwards
/// `data[i]` holds the element previously at `perm[i]`.
pub(crate) fn apply_gather<T>(data: &mut [T], perm: &[usize]) {
    debug_assert_eq!(data.len(), perm.len());
    let mut visited = vec![false; perm.len()];
    for start in 0..perm.len() {
        if visited[start] {
            continue;
        }
        let mut current = start;
        loop {
            visited[current] = true;
            let src = perm[current];
            if src == start {
                break;
            }
            data.swap(current, src);
            current = src;
        }
    }
}
