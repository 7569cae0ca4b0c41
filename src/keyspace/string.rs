use super::*;
use crate::error::KeyspaceResult;
use bytes::Bytes;

impl Database {
    /// Reads the string at `key`, or `None` if missing or expired.
    ///
    /// Returns `Err(WrongType)` if the key holds a list. Counts as an access.
    pub fn get_string(&mut self, key: &str) -> KeyspaceResult<Option<Bytes>> {
        match self.lookup(key, true) {
            Some(obj) => obj.as_bytes().map(Some),
            None => Ok(None),
        }
    }

    /// Stores a string value, replacing whatever `key` held.
    pub fn set_string(&mut self, key: &str, value: Bytes) {
        self.set_key(key, Object::string(value));
    }

    /// Type name of the value at `key`, or `"none"` if missing.
    pub fn key_type(&mut self, key: &str) -> &'static str {
        self.lookup(key, false)
            .map(|obj| obj.obj_type().as_str())
            .unwrap_or("none")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::KeyspaceError;

    #[test]
    fn test_get_set_string() {
        let mut db = Database::default();
        assert_eq!(db.get_string("k"), Ok(None));

        db.set_string("k", Bytes::from("hello"));
        assert_eq!(db.get_string("k"), Ok(Some(Bytes::from("hello"))));

        db.set_string("n", Bytes::from("42"));
        assert_eq!(db.get_string("n"), Ok(Some(Bytes::from("42"))));
    }

    #[test]
    fn test_get_string_on_list() {
        let mut db = Database::default();
        db.list_push("l", vec![Bytes::from("a")], ListEnd::Back)
            .unwrap();
        assert_eq!(db.get_string("l"), Err(KeyspaceError::WrongType));
        assert_eq!(db.key_type("l"), "list");
    }

    #[test]
    fn test_set_string_replaces_list() {
        let mut db = Database::default();
        db.list_push("k", vec![Bytes::from("a")], ListEnd::Back)
            .unwrap();
        db.set_string("k", Bytes::from("v"));
        assert_eq!(db.key_type("k"), "string");
        assert_eq!(db.key_type("missing"), "none");
    }
}
