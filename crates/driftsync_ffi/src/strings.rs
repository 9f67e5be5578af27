//! Ownership helpers for strings crossing the C boundary.

use std::ffi::{c_char, CStr, CString};

/// Converts a Rust string into a C string the caller must free with
/// `driftsync_string_free`. Interior NULs yield a null pointer.
pub fn into_c_string(s: String) -> *mut c_char {
    CString::new(s)
        .map(CString::into_raw)
        .unwrap_or(std::ptr::null_mut())
}

/// Borrows a UTF-8 `&str` from a C string pointer.
///
/// # Safety
///
/// `ptr` must be non-null and point to a valid null-terminated string.
pub unsafe fn borrow_str<'a>(ptr: *const c_char) -> Result<&'a str, std::str::Utf8Error> {
    CStr::from_ptr(ptr).to_str()
}

/// Frees a string returned by driftsync.
///
/// # Safety
///
/// `ptr` must be null or a pointer previously returned by a driftsync function
/// documented to require this free. Freeing twice is undefined behavior.
#[no_mangle]
pub unsafe extern "C" fn driftsync_string_free(ptr: *mut c_char) {
    if !ptr.is_null() {
        drop(CString::from_raw(ptr));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_c() {
        let ptr = into_c_string("hello".to_owned());
        assert!(!ptr.is_null());
        let text = unsafe { borrow_str(ptr) }.unwrap();
        assert_eq!(text, "hello");
        unsafe { driftsync_string_free(ptr) };
    }

    #[test]
    fn interior_nul_becomes_null() {
        assert!(into_c_string("a\0b".to_owned()).is_null());
    }
}
