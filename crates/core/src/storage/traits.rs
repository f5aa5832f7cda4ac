use crate::errors::CoreError;

/// String key/value persistence, shaped like browser local storage.
///
/// Each call is atomic on its own. Read-modify-write sequences are not;
/// callers that need them go through [`KeyValueStore::compare_and_swap`].
pub trait KeyValueStore: Send + Sync {
    /// Read a value; `Ok(None)` if the key is absent.
    fn get(&self, key: &str) -> Result<Option<String>, CoreError>;

    /// Insert or overwrite a value.
    fn set(&self, key: &str, value: &str) -> Result<(), CoreError>;

    /// Delete a key. Removing an absent key is not an error.
    fn remove(&self, key: &str) -> Result<(), CoreError>;

    /// All keys currently stored, sorted.
    fn keys(&self) -> Result<Vec<String>, CoreError>;

    /// Write `new` only if the current value equals `expected`
    /// (`None` = key must be absent). Returns whether the write happened.
    fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&str>,
        new: &str,
    ) -> Result<bool, CoreError>;
}
