// Collections
// Arrays and maps with shared, lock-guarded backing storage. The backing
// allocations are recycled through the opportunistic buffer pools when the
// last reference is dropped.

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::mem;
use std::sync::Arc;

use super::pool::BufferPool;
use super::Object;

static ARRAY_BUFFERS: BufferPool<Vec<Object>> = BufferPool::new(64);
static MAP_BUFFERS: BufferPool<FxHashMap<String, (Object, Object)>> = BufferPool::new(32);

pub struct ArrayObject {
    values: Mutex<Vec<Object>>,
}

impl ArrayObject {
    pub fn create(values: impl IntoIterator<Item = Object>) -> Arc<Self> {
        let mut buffer = ARRAY_BUFFERS.acquire().unwrap_or_default();
        buffer.extend(values);
        Arc::new(Self {
            values: Mutex::new(buffer),
        })
    }

    pub fn empty() -> Arc<Self> {
        Self::create(std::iter::empty())
    }

    pub fn len(&self) -> usize {
        self.values.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.lock().is_empty()
    }

    pub fn push_back(&self, value: Object) {
        self.values.lock().push(value);
    }

    pub fn pop_back(&self) -> Option<Object> {
        self.values.lock().pop()
    }

    pub fn get(&self, index: usize) -> Option<Object> {
        self.values.lock().get(index).cloned()
    }

    pub fn set(&self, index: usize, value: Object) -> bool {
        let mut values = self.values.lock();
        match values.get_mut(index) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    pub fn to_vec(&self) -> Vec<Object> {
        self.values.lock().clone()
    }

    /// Element-wise copy; elements of call-by-value types are cloned.
    pub fn clone_object(&self) -> Arc<Self> {
        let elements: Vec<Object> = self
            .values
            .lock()
            .iter()
            .map(|value| value.get_ref_or_copy())
            .collect();
        Self::create(elements)
    }

    pub fn rt_is_equal(&self, other: &ArrayObject) -> bool {
        if std::ptr::eq(self, other) {
            return true;
        }
        let a = self.to_vec();
        let b = other.to_vec();
        a.len() == b.len()
            && a.iter()
                .zip(b.iter())
                .all(|(left, right)| left.rt_is_equal(right))
    }
}

impl Drop for ArrayObject {
    fn drop(&mut self) {
        let mut buffer = mem::take(&mut *self.values.lock());
        buffer.clear();
        ARRAY_BUFFERS.release(buffer);
    }
}

impl std::fmt::Debug for ArrayObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ArrayObject(len={})", self.len())
    }
}

/// Keyed by the key object's string representation; the original key object
/// is kept alongside the value.
pub struct MapObject {
    entries: Mutex<FxHashMap<String, (Object, Object)>>,
}

impl MapObject {
    pub fn create() -> Arc<Self> {
        let buffer = MAP_BUFFERS.acquire().unwrap_or_default();
        Arc::new(Self {
            entries: Mutex::new(buffer),
        })
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn set_value(&self, key: Object, value: Object) {
        self.entries
            .lock()
            .insert(key.to_string_repr(), (key, value));
    }

    pub fn get_value(&self, key: &Object) -> Option<Object> {
        self.entries
            .lock()
            .get(&key.to_string_repr())
            .map(|(_, value)| value.clone())
    }

    pub fn entries(&self) -> Vec<(Object, Object)> {
        self.entries.lock().values().cloned().collect()
    }

    pub fn clone_object(&self) -> Arc<Self> {
        let copy = Self::create();
        for (key, value) in self.entries() {
            copy.set_value(key.get_ref_or_copy(), value.get_ref_or_copy());
        }
        copy
    }
}

impl Drop for MapObject {
    fn drop(&mut self) {
        let mut buffer = mem::take(&mut *self.entries.lock());
        buffer.clear();
        MAP_BUFFERS.release(buffer);
    }
}

impl std::fmt::Debug for MapObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MapObject(len={})", self.len())
    }
}

/// Index-based iterator over a snapshot of a collection; shared by arrays
/// (key = index) and maps (key = key object).
pub struct CollectionIterator {
    entries: Vec<(Object, Object)>,
    cursor: Mutex<usize>,
}

impl CollectionIterator {
    pub fn over_array(array: &ArrayObject) -> Self {
        let entries = array
            .to_vec()
            .into_iter()
            .enumerate()
            .map(|(index, value)| (Object::number(index as f64), value))
            .collect();
        Self {
            entries,
            cursor: Mutex::new(0),
        }
    }

    pub fn over_map(map: &MapObject) -> Self {
        Self {
            entries: map.entries(),
            cursor: Mutex::new(0),
        }
    }

    pub fn end(&self) -> bool {
        *self.cursor.lock() >= self.entries.len()
    }

    pub fn next(&self) {
        let mut cursor = self.cursor.lock();
        if *cursor < self.entries.len() {
            *cursor += 1;
        }
    }

    pub fn key(&self) -> Option<Object> {
        self.entries
            .get(*self.cursor.lock())
            .map(|(key, _)| key.clone())
    }

    pub fn value(&self) -> Option<Object> {
        self.entries
            .get(*self.cursor.lock())
            .map(|(_, value)| value.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn array_push_and_index() {
        let array = ArrayObject::create([Object::number(1.0), Object::number(2.0)]);
        array.push_back(Object::number(3.0));
        assert_eq!(array.len(), 3);
        assert_eq!(array.get(2).unwrap().to_double(), 3.0);
        assert!(array.set(0, Object::number(9.0)));
        assert_eq!(array.get(0).unwrap().to_double(), 9.0);
        assert!(!array.set(99, Object::Void));
    }

    #[test]
    fn dropped_array_buffer_is_recycled() {
        let array = ArrayObject::create((0..32).map(|i| Object::number(i as f64)));
        drop(array);
        let recycled = ArrayObject::empty();
        // not guaranteed which buffer we get, but the pool path must keep
        // the recycled vector empty
        assert_eq!(recycled.len(), 0);
    }

    #[test]
    fn map_keys_follow_string_repr() {
        let map = MapObject::create();
        map.set_value(Object::string("a"), Object::number(1.0));
        map.set_value(Object::string("a"), Object::number(2.0));
        assert_eq!(map.len(), 1);
        assert_eq!(
            map.get_value(&Object::string("a")).unwrap().to_double(),
            2.0
        );
    }

    #[test]
    fn iterator_walks_array_in_order() {
        let array = ArrayObject::create([Object::number(5.0), Object::number(6.0)]);
        let iterator = CollectionIterator::over_array(&array);
        assert!(!iterator.end());
        assert_eq!(iterator.key().unwrap().to_double(), 0.0);
        assert_eq!(iterator.value().unwrap().to_double(), 5.0);
        iterator.next();
        assert_eq!(iterator.value().unwrap().to_double(), 6.0);
        iterator.next();
        assert!(iterator.end());
        assert!(iterator.value().is_none());
    }
}
