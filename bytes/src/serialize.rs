//! Encoding rules for the stream format.
//!
//! Scalars are raw bytes of their native width and byte order; strings and
//! containers are length-prefixed by a `usize` element count; pairs are first
//! then second; smart pointers serialize as their pointee; a nested stream is
//! length-prefixed by its remaining size. A value written and then read in
//! the same order yields the original.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::hash::Hash;
use std::rc::Rc;
use std::sync::Arc;

use byteorder::{ByteOrder, NativeEndian};

use crate::BinStream;

/// Conversion of a value to and from the stream format.
///
/// Implementations exist for the primitive types, strings, the common
/// containers, pairs, smart pointers, and nested [`BinStream`]s. User types
/// compose field-wise with the [`impl_serialize!`](crate::impl_serialize)
/// macro.
pub trait Serialize {
    /// Appends the binary representation of `self` at the stream's tail.
    fn serialize(&self, bin: &mut BinStream);
    /// Recovers an instance from the stream's head.
    fn deserialize(bin: &mut BinStream) -> Self
    where
        Self: Sized;
}

macro_rules! scalar_impl {
    ($ty:ty, $width:expr, $write:path, $read:path) => {
        impl Serialize for $ty {
            fn serialize(&self, bin: &mut BinStream) {
                let mut buf = [0u8; $width];
                $write(&mut buf, *self);
                bin.push_bytes(&buf);
            }
            fn deserialize(bin: &mut BinStream) -> Self {
                $read(bin.pop_bytes($width))
            }
        }
    };
}

scalar_impl!(u16, 2, NativeEndian::write_u16, NativeEndian::read_u16);
scalar_impl!(u32, 4, NativeEndian::write_u32, NativeEndian::read_u32);
scalar_impl!(u64, 8, NativeEndian::write_u64, NativeEndian::read_u64);
scalar_impl!(i16, 2, NativeEndian::write_i16, NativeEndian::read_i16);
scalar_impl!(i32, 4, NativeEndian::write_i32, NativeEndian::read_i32);
scalar_impl!(i64, 8, NativeEndian::write_i64, NativeEndian::read_i64);
scalar_impl!(f32, 4, NativeEndian::write_f32, NativeEndian::read_f32);
scalar_impl!(f64, 8, NativeEndian::write_f64, NativeEndian::read_f64);

impl Serialize for u8 {
    fn serialize(&self, bin: &mut BinStream) {
        bin.push_bytes(&[*self]);
    }
    fn deserialize(bin: &mut BinStream) -> Self {
        bin.pop_bytes(1)[0]
    }
}

impl Serialize for i8 {
    fn serialize(&self, bin: &mut BinStream) {
        bin.push_bytes(&[*self as u8]);
    }
    fn deserialize(bin: &mut BinStream) -> Self {
        bin.pop_bytes(1)[0] as i8
    }
}

// usize travels at the platform pointer width, which the homogeneous-cluster
// assumption makes uniform across peers.
impl Serialize for usize {
    fn serialize(&self, bin: &mut BinStream) {
        bin.push_bytes(&self.to_ne_bytes());
    }
    fn deserialize(bin: &mut BinStream) -> Self {
        let mut buf = [0u8; std::mem::size_of::<usize>()];
        let len = buf.len();
        buf.copy_from_slice(bin.pop_bytes(len));
        usize::from_ne_bytes(buf)
    }
}

impl Serialize for isize {
    fn serialize(&self, bin: &mut BinStream) {
        bin.push_bytes(&self.to_ne_bytes());
    }
    fn deserialize(bin: &mut BinStream) -> Self {
        let mut buf = [0u8; std::mem::size_of::<isize>()];
        let len = buf.len();
        buf.copy_from_slice(bin.pop_bytes(len));
        isize::from_ne_bytes(buf)
    }
}

impl Serialize for bool {
    fn serialize(&self, bin: &mut BinStream) {
        bin.push_bytes(&[*self as u8]);
    }
    fn deserialize(bin: &mut BinStream) -> Self {
        bin.pop_bytes(1)[0] != 0
    }
}

impl Serialize for char {
    fn serialize(&self, bin: &mut BinStream) {
        (*self as u32).serialize(bin);
    }
    fn deserialize(bin: &mut BinStream) -> Self {
        char::from_u32(u32::deserialize(bin)).expect("BinStream: invalid char encoding")
    }
}

impl Serialize for () {
    fn serialize(&self, _bin: &mut BinStream) {}
    fn deserialize(_bin: &mut BinStream) -> Self {}
}

impl Serialize for String {
    fn serialize(&self, bin: &mut BinStream) {
        bin.push(&self.len());
        bin.push_bytes(self.as_bytes());
    }
    fn deserialize(bin: &mut BinStream) -> Self {
        let len = bin.pop::<usize>();
        String::from_utf8(bin.pop_bytes(len).to_vec()).expect("BinStream: invalid utf-8")
    }
}

impl<T: Serialize> Serialize for Vec<T> {
    fn serialize(&self, bin: &mut BinStream) {
        bin.push(&self.len());
        for item in self {
            item.serialize(bin);
        }
    }
    fn deserialize(bin: &mut BinStream) -> Self {
        let len = bin.pop::<usize>();
        (0..len).map(|_| T::deserialize(bin)).collect()
    }
}

impl<T: Serialize> Serialize for VecDeque<T> {
    fn serialize(&self, bin: &mut BinStream) {
        bin.push(&self.len());
        for item in self {
            item.serialize(bin);
        }
    }
    fn deserialize(bin: &mut BinStream) -> Self {
        let len = bin.pop::<usize>();
        (0..len).map(|_| T::deserialize(bin)).collect()
    }
}

impl<T: Serialize> Serialize for Option<T> {
    fn serialize(&self, bin: &mut BinStream) {
        bin.push(&self.is_some());
        if let Some(value) = self {
            value.serialize(bin);
        }
    }
    fn deserialize(bin: &mut BinStream) -> Self {
        if bin.pop::<bool>() {
            Some(T::deserialize(bin))
        } else {
            None
        }
    }
}

impl<A: Serialize, B: Serialize> Serialize for (A, B) {
    fn serialize(&self, bin: &mut BinStream) {
        self.0.serialize(bin);
        self.1.serialize(bin);
    }
    fn deserialize(bin: &mut BinStream) -> Self {
        let a = A::deserialize(bin);
        let b = B::deserialize(bin);
        (a, b)
    }
}

impl<A: Serialize, B: Serialize, C: Serialize> Serialize for (A, B, C) {
    fn serialize(&self, bin: &mut BinStream) {
        self.0.serialize(bin);
        self.1.serialize(bin);
        self.2.serialize(bin);
    }
    fn deserialize(bin: &mut BinStream) -> Self {
        let a = A::deserialize(bin);
        let b = B::deserialize(bin);
        let c = C::deserialize(bin);
        (a, b, c)
    }
}

impl<K: Serialize + Eq + Hash, V: Serialize> Serialize for HashMap<K, V> {
    fn serialize(&self, bin: &mut BinStream) {
        bin.push(&self.len());
        for (key, value) in self {
            key.serialize(bin);
            value.serialize(bin);
        }
    }
    fn deserialize(bin: &mut BinStream) -> Self {
        let len = bin.pop::<usize>();
        (0..len).map(|_| <(K, V)>::deserialize(bin)).collect()
    }
}

impl<K: Serialize + Ord, V: Serialize> Serialize for BTreeMap<K, V> {
    fn serialize(&self, bin: &mut BinStream) {
        bin.push(&self.len());
        for (key, value) in self {
            key.serialize(bin);
            value.serialize(bin);
        }
    }
    fn deserialize(bin: &mut BinStream) -> Self {
        let len = bin.pop::<usize>();
        (0..len).map(|_| <(K, V)>::deserialize(bin)).collect()
    }
}

impl<T: Serialize + Eq + Hash> Serialize for HashSet<T> {
    fn serialize(&self, bin: &mut BinStream) {
        bin.push(&self.len());
        for item in self {
            item.serialize(bin);
        }
    }
    fn deserialize(bin: &mut BinStream) -> Self {
        let len = bin.pop::<usize>();
        (0..len).map(|_| T::deserialize(bin)).collect()
    }
}

impl<T: Serialize + Ord> Serialize for BTreeSet<T> {
    fn serialize(&self, bin: &mut BinStream) {
        bin.push(&self.len());
        for item in self {
            item.serialize(bin);
        }
    }
    fn deserialize(bin: &mut BinStream) -> Self {
        let len = bin.pop::<usize>();
        (0..len).map(|_| T::deserialize(bin)).collect()
    }
}

impl<T: Serialize> Serialize for Box<T> {
    fn serialize(&self, bin: &mut BinStream) {
        (**self).serialize(bin);
    }
    fn deserialize(bin: &mut BinStream) -> Self {
        Box::new(T::deserialize(bin))
    }
}

impl<T: Serialize> Serialize for Rc<T> {
    fn serialize(&self, bin: &mut BinStream) {
        (**self).serialize(bin);
    }
    fn deserialize(bin: &mut BinStream) -> Self {
        Rc::new(T::deserialize(bin))
    }
}

impl<T: Serialize> Serialize for Arc<T> {
    fn serialize(&self, bin: &mut BinStream) {
        (**self).serialize(bin);
    }
    fn deserialize(bin: &mut BinStream) -> Self {
        Arc::new(T::deserialize(bin))
    }
}

impl Serialize for BinStream {
    fn serialize(&self, bin: &mut BinStream) {
        bin.push(&self.size());
        bin.push_bytes(self.remaining());
    }
    fn deserialize(bin: &mut BinStream) -> Self {
        let len = bin.pop::<usize>();
        BinStream::from_vec(bin.pop_bytes(len).to_vec())
    }
}

/// Implements [`Serialize`] field-wise for a struct with named fields.
///
/// ```
/// use lockstep_bytes::{impl_serialize, BinStream};
///
/// #[derive(PartialEq, Debug)]
/// struct Vertex { id: u64, rank: f64, out: Vec<u64> }
/// impl_serialize!(Vertex { id, rank, out });
///
/// let v = Vertex { id: 4, rank: 0.25, out: vec![1, 2] };
/// let mut bin = BinStream::new();
/// bin.push(&v);
/// assert_eq!(bin.pop::<Vertex>(), v);
/// ```
#[macro_export]
macro_rules! impl_serialize {
    ($ty:ty { $($field:ident),* $(,)? }) => {
        impl $crate::Serialize for $ty {
            fn serialize(&self, bin: &mut $crate::BinStream) {
                $( $crate::Serialize::serialize(&self.$field, bin); )*
            }
            fn deserialize(bin: &mut $crate::BinStream) -> Self {
                $( let $field = $crate::Serialize::deserialize(bin); )*
                Self { $($field),* }
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip<T: Serialize + PartialEq + std::fmt::Debug>(value: T) {
        let mut bin = BinStream::new();
        bin.push(&value);
        assert_eq!(bin.pop::<T>(), value);
        assert_eq!(bin.size(), 0);
    }

    #[test]
    fn scalars() {
        round_trip(0u8);
        round_trip(-7i8);
        round_trip(419u32);
        round_trip(-419i64);
        round_trip(u64::MAX);
        round_trip(usize::MAX);
        round_trip(4.19f32);
        round_trip(-4.19f64);
        round_trip(true);
        round_trip(false);
        round_trip('汉');
    }

    #[test]
    fn strings_and_containers() {
        round_trip(String::from("hello lockstep"));
        round_trip(String::new());
        round_trip(vec![1u32, 2, 3]);
        round_trip(Vec::<u64>::new());
        round_trip(vec![String::from("a"), String::from("bb")]);
        round_trip(vec![true, false, true]);
        round_trip((3u32, String::from("x")));
        round_trip((1u8, 2u16, 3u32));
        round_trip(Some(9i32));
        round_trip(Option::<i32>::None);

        let mut map = HashMap::new();
        map.insert(String::from("k"), 1u64);
        map.insert(String::from("j"), 2u64);
        round_trip(map);

        let mut tree = BTreeMap::new();
        tree.insert(1u32, vec![2u32]);
        round_trip(tree);

        round_trip(vec![1u8, 2, 3].into_iter().collect::<HashSet<_>>());
    }

    #[test]
    fn pointees() {
        round_trip(Box::new(13u64));
        round_trip(Rc::new(String::from("shared")));
        round_trip(Arc::new(vec![1u32]));
    }

    #[test]
    fn nested_stream() {
        let mut inner = BinStream::new();
        inner.push(&5u32);
        inner.push(&6u32);

        let mut outer = BinStream::new();
        outer.push(&inner);
        outer.push(&7u32);

        let mut back = outer.pop::<BinStream>();
        assert_eq!(back.pop::<u32>(), 5);
        assert_eq!(back.pop::<u32>(), 6);
        assert_eq!(outer.pop::<u32>(), 7);
    }

    #[test]
    fn interleaved_types_in_order() {
        let mut bin = BinStream::new();
        bin.push(&419i32);
        bin.push(&4.19f32);
        bin.push(&String::from("mix"));
        assert_eq!(bin.pop::<i32>(), 419);
        assert_eq!(bin.pop::<f32>(), 4.19f32);
        assert_eq!(bin.pop::<String>(), "mix");
    }

    #[derive(PartialEq, Debug)]
    struct Sample {
        id: u64,
        weight: f64,
        tags: Vec<String>,
    }
    impl_serialize!(Sample { id, weight, tags });

    #[test]
    fn struct_macro() {
        round_trip(Sample { id: 18, weight: 0.5, tags: vec![String::from("t")] });
    }
}
