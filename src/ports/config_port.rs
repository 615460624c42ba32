//! Configuration access port trait.
//!
//! Typed getters fall back to the given default when the key is missing or
//! does not parse; `get_string` distinguishes missing keys with `None`.

pub trait ConfigPort {
    fn get_string(&self, section: &str, key: &str) -> Option<String>;
    fn get_int(&self, section: &str, key: &str, default: i64) -> i64;
    fn get_bool(&self, section: &str, key: &str, default: bool) -> bool;
}
