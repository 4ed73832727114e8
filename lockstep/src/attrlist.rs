//! Typed attribute side-tables parallel to an [`ObjList`](crate::ObjList).

use std::any::Any;
use std::cell::{Cell, Ref, RefCell};
use std::rc::Rc;

use lockstep_bytes::{BinStream, Serialize};

use crate::objlist::apply_gather;

/// Type-erased operations the owning list applies to keep attribute tables
/// aligned with its objects through sorts, compactions, and migrations.
pub(crate) trait AttrListAny {
    fn as_any(&self) -> &dyn Any;
    fn resize_to(&self, len: usize);
    fn truncate(&self, len: usize);
    fn reorder(&self, perm: &[usize]);
    fn move_entry(&self, dest: usize, src: usize);
    fn migrate(&self, bin: &mut BinStream, idx: usize);
    fn process_bin(&self, bin: &mut BinStream, idx: usize);
}

/// One attribute value per object of the parent list, addressed by the same
/// indices.
///
/// The table extends lazily: indexing below the parent list's length but at
/// or beyond the table's current length grows the table with default values.
/// Indexing at or beyond the parent list's length is a contract violation.
pub struct AttrList<A> {
    data: Rc<RefCell<Vec<A>>>,
    list_len: Rc<Cell<usize>>,
}

impl<A> Clone for AttrList<A> {
    fn clone(&self) -> Self {
        AttrList { data: Rc::clone(&self.data), list_len: Rc::clone(&self.list_len) }
    }
}

impl<A: Clone + Default + Serialize + 'static> AttrList<A> {
    pub(crate) fn new(list_len: Rc<Cell<usize>>) -> Self {
        let data = vec![A::default(); list_len.get()];
        AttrList { data: Rc::new(RefCell::new(data)), list_len }
    }

    fn check_and_extend(&self, idx: usize) {
        let list_len = self.list_len.get();
        assert!(idx < list_len, "AttrList: index {} out of range ({} objects)", idx, list_len);
        let mut data = self.data.borrow_mut();
        if idx >= data.len() {
            data.resize(list_len, A::default());
        }
    }

    /// The attribute at `idx`.
    pub fn get(&self, idx: usize) -> Ref<'_, A> {
        self.check_and_extend(idx);
        Ref::map(self.data.borrow(), |data| &data[idx])
    }

    /// Sets the attribute at `idx`.
    pub fn set(&self, idx: usize, value: A) {
        self.check_and_extend(idx);
        self.data.borrow_mut()[idx] = value;
    }

    /// Mutates the attribute at `idx` in place.
    pub fn update<R>(&self, idx: usize, f: impl FnOnce(&mut A) -> R) -> R {
        self.check_and_extend(idx);
        f(&mut self.data.borrow_mut()[idx])
    }

    /// Current physical length of the table.
    pub fn len(&self) -> usize {
        self.data.borrow().len()
    }

    /// True when the table holds no entries yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<A: Clone + Default + Serialize + 'static> AttrListAny for AttrList<A> {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn resize_to(&self, len: usize) {
        let mut data = self.data.borrow_mut();
        if data.len() < len {
            data.resize(len, A::default());
        }
    }

    fn truncate(&self, len: usize) {
        self.data.borrow_mut().truncate(len);
    }

    fn reorder(&self, perm: &[usize]) {
        apply_gather(&mut self.data.borrow_mut(), perm);
    }

    fn move_entry(&self, dest: usize, src: usize) {
        self.data.borrow_mut().swap(dest, src);
    }

    fn migrate(&self, bin: &mut BinStream, idx: usize) {
        let mut data = self.data.borrow_mut();
        if idx >= data.len() {
            data.resize(self.list_len.get(), A::default());
        }
        bin.push(&data[idx]);
    }

    fn process_bin(&self, bin: &mut BinStream, idx: usize) {
        let value = bin.pop::<A>();
        self.set(idx, value);
    }
}

#[cfg(test)]
mod tests {
    use crate::objlist::{Keyed, ObjList};

    #[derive(Clone)]
    struct Obj {
        key: u32,
    }
    lockstep_bytes::impl_serialize!(Obj { key });

    impl Keyed for Obj {
        type Key = u32;
        fn id(&self) -> &u32 {
            &self.key
        }
        fn with_key(key: u32) -> Self {
            Obj { key }
        }
    }

    #[test]
    fn lazy_extension_and_access() {
        let mut list = ObjList::new();
        for key in 0..4u32 {
            list.add_object(Obj { key });
        }
        let attrs = list.create_attrlist::<i32>("score");
        assert_eq!(attrs.len(), 4);

        list.add_object(Obj { key: 4 });
        attrs.set(4, 44);
        assert_eq!(*attrs.get(4), 44);
        assert_eq!(*attrs.get(2), 0);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn out_of_range_access_is_fatal() {
        let mut list = ObjList::new();
        list.add_object(Obj { key: 0 });
        let attrs = list.create_attrlist::<i32>("score");
        attrs.get(1);
    }

    #[test]
    fn attributes_follow_sort() {
        let mut list = ObjList::new();
        for &key in &[30u32, 10, 20] {
            list.add_object(Obj { key });
        }
        let attrs = list.create_attrlist::<u32>("copy");
        for idx in 0..3 {
            attrs.set(idx, list.get(idx).key);
        }

        list.sort();
        for idx in 0..3 {
            assert_eq!(*attrs.get(idx), list.get(idx).key);
        }
    }

    #[test]
    fn attributes_follow_compaction() {
        let mut list = ObjList::new();
        for key in 0..6u32 {
            list.add_object(Obj { key });
        }
        let attrs = list.create_attrlist::<u32>("copy");
        for idx in 0..6 {
            attrs.set(idx, list.get(idx).key);
        }

        for key in [1u32, 4] {
            let idx = list.find_index(&key).unwrap();
            list.delete_at(idx);
        }
        list.deletion_finalize();

        assert_eq!(list.get_size(), 4);
        for idx in 0..list.get_size() {
            assert_eq!(*attrs.get(idx), list.get(idx).key);
        }
    }

    #[test]
    fn typed_retrieval() {
        let mut list = ObjList::<Obj>::new();
        list.create_attrlist::<f64>("rank");
        assert!(list.get_attrlist::<f64>("rank").is_some());
        assert!(list.get_attrlist::<i32>("rank").is_none());
        assert!(list.del_attrlist("rank"));
        assert!(!list.del_attrlist("rank"));
    }
}
