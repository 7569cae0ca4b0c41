use super::*;
use crate::error::KeyspaceResult;
use bytes::Bytes;

/// Which end of a list an operation works on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListEnd {
    Front,
    Back,
}

impl Database {
    /// Pushes `values` one by one onto `end` of the list at `key`, creating
    /// the list if needed. Returns the new length.
    ///
    /// Returns `Err(WrongType)` if the key holds a string.
    pub fn list_push(&mut self, key: &str, values: Vec<Bytes>, end: ListEnd) -> KeyspaceResult<usize> {
        match self.lookup(key, true) {
            Some(obj) => {
                obj.as_list()?;
            }
            None => self.insert_new(key, Object::list()),
        }

        self.track_mutation(key, |obj| {
            let list = obj.as_list_mut()?;
            for value in values {
                match end {
                    ListEnd::Front => list.push_front(value),
                    ListEnd::Back => list.push_back(value),
                }
            }
            Ok(list.len())
        })
        .unwrap_or(Ok(0))
    }

    /// Pops one element from `end`. Removes the key once the list is empty.
    pub fn list_pop(&mut self, key: &str, end: ListEnd) -> KeyspaceResult<Option<Bytes>> {
        match self.lookup(key, true) {
            Some(obj) => {
                obj.as_list()?;
            }
            None => return Ok(None),
        }

        let popped = self.track_mutation(key, |obj| {
            let list = obj.as_list_mut()?;
            let value = match end {
                ListEnd::Front => list.pop_front(),
                ListEnd::Back => list.pop_back(),
            };
            Ok((value, list.is_empty()))
        });

        match popped {
            Some(Ok((value, emptied))) => {
                if emptied {
                    self.delete_key(key);
                }
                Ok(value)
            }
            Some(Err(e)) => Err(e),
            None => Ok(None),
        }
    }

    /// Elements between `start` and `stop`, both inclusive. Negative indices
    /// count from the end and out-of-range indices are clamped. A missing key
    /// reads as an empty list.
    pub fn list_range(&mut self, key: &str, start: i64, stop: i64) -> KeyspaceResult<Vec<Bytes>> {
        let Some(obj) = self.lookup(key, true) else {
            return Ok(Vec::new());
        };
        let list = obj.as_list()?;

        let (start, stop) = normalize_range(start, stop, list.len() as i64);
        if start > stop {
            return Ok(Vec::new());
        }
        Ok(list
            .iter()
            .skip(start as usize)
            .take((stop - start + 1) as usize)
            .cloned()
            .collect())
    }

    /// Length of the list at `key`, 0 if missing.
    pub fn list_len(&mut self, key: &str) -> KeyspaceResult<usize> {
        match self.lookup(key, false) {
            Some(obj) => Ok(obj.as_list()?.len()),
            None => Ok(0),
        }
    }
}

/// Resolves negative indices against `len` and clamps to the list bounds.
/// An empty range comes back with `start > stop`.
fn normalize_range(start: i64, stop: i64, len: i64) -> (i64, i64) {
    let start = (if start < 0 { len + start } else { start }).max(0);
    let stop = (if stop < 0 { len + stop } else { stop }).min(len - 1);
    (start, stop)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::KeyspaceError;

    fn items(values: &[&'static str]) -> Vec<Bytes> {
        values.iter().map(|v| Bytes::from(*v)).collect()
    }

    #[test]
    fn test_push_and_range() {
        let mut db = Database::default();
        assert_eq!(db.list_push("l", items(&["b", "c"]), ListEnd::Back), Ok(2));
        assert_eq!(db.list_push("l", items(&["a"]), ListEnd::Front), Ok(3));

        assert_eq!(db.list_range("l", 0, -1), Ok(items(&["a", "b", "c"])));
        assert_eq!(db.list_range("l", -2, 10), Ok(items(&["b", "c"])));
        assert_eq!(db.list_range("l", 2, 1), Ok(vec![]));
        assert_eq!(db.list_range("l", 5, 10), Ok(vec![]));
        assert_eq!(db.list_range("missing", 0, -1), Ok(vec![]));
        assert_eq!(db.list_len("l"), Ok(3));
    }

    #[test]
    fn test_lpush_reverses_order() {
        let mut db = Database::default();
        db.list_push("l", items(&["a", "b", "c"]), ListEnd::Front)
            .unwrap();
        assert_eq!(db.list_range("l", 0, -1), Ok(items(&["c", "b", "a"])));
    }

    #[test]
    fn test_pop_last_element_deletes_key() {
        let mut db = Database::default();
        db.list_push("l", items(&["a", "b"]), ListEnd::Back).unwrap();

        assert_eq!(db.list_pop("l", ListEnd::Back), Ok(Some(Bytes::from("b"))));
        assert_eq!(db.list_pop("l", ListEnd::Front), Ok(Some(Bytes::from("a"))));
        assert!(!db.exists("l"));
        assert_eq!(db.list_pop("l", ListEnd::Front), Ok(None));
        assert_eq!(db.used_memory(), 0);
    }

    #[test]
    fn test_list_ops_on_string() {
        let mut db = Database::default();
        db.set_string("s", Bytes::from("v"));

        assert_eq!(
            db.list_push("s", items(&["a"]), ListEnd::Back),
            Err(KeyspaceError::WrongType)
        );
        assert_eq!(db.list_pop("s", ListEnd::Back), Err(KeyspaceError::WrongType));
        assert_eq!(db.list_range("s", 0, -1), Err(KeyspaceError::WrongType));
        assert_eq!(db.list_len("s"), Err(KeyspaceError::WrongType));
    }

    #[test]
    fn test_push_tracks_memory() {
        let mut db = Database::default();
        db.list_push("l", items(&["a"]), ListEnd::Back).unwrap();
        let one = db.used_memory();
        db.list_push("l", items(&["bbbb"]), ListEnd::Back).unwrap();
        assert!(db.used_memory() > one + 4);
    }
}
