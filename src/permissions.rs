//! Process-wide, runtime-mutable permission policy.
//!
//! Modeled as a set of atomic booleans behind a struct, per the design
//! note: reads and writes of any individual flag are atomic and
//! independent of each other, but the table as a whole offers no
//! cross-flag consistency — a reader may observe any interleaving of an
//! operator's writes. Exposed only through methods, never raw field
//! access, so callers can't accidentally tear a read across two flags.

use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug)]
pub struct PermissionTable {
    all_user_get_message: AtomicBool,
    all_user_put_message: AtomicBool,
    distribute_message: AtomicBool,
    all_user_get_filelist: AtomicBool,
    all_user_download_file: AtomicBool,
    all_user_upload_file: AtomicBool,
}

impl Default for PermissionTable {
    fn default() -> Self {
        PermissionTable {
            all_user_get_message: AtomicBool::new(true),
            all_user_put_message: AtomicBool::new(false),
            distribute_message: AtomicBool::new(true),
            all_user_get_filelist: AtomicBool::new(true),
            all_user_download_file: AtomicBool::new(true),
            all_user_upload_file: AtomicBool::new(false),
        }
    }
}

macro_rules! flag_accessors {
    ($field:ident, $getter:ident, $setter:ident) => {
        pub fn $getter(&self) -> bool {
            self.$field.load(Ordering::Relaxed)
        }

        pub fn $setter(&self, value: bool) {
            self.$field.store(value, Ordering::Relaxed);
        }
    };
}

impl PermissionTable {
    flag_accessors!(
        all_user_get_message,
        all_user_get_message,
        set_all_user_get_message
    );
    flag_accessors!(
        all_user_put_message,
        all_user_put_message,
        set_all_user_put_message
    );
    flag_accessors!(distribute_message, distribute_message, set_distribute_message);
    flag_accessors!(
        all_user_get_filelist,
        all_user_get_filelist,
        set_all_user_get_filelist
    );
    flag_accessors!(
        all_user_download_file,
        all_user_download_file,
        set_all_user_download_file
    );
    flag_accessors!(
        all_user_upload_file,
        all_user_upload_file,
        set_all_user_upload_file
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let perms = PermissionTable::default();
        assert!(perms.all_user_get_message());
        assert!(!perms.all_user_put_message());
        assert!(perms.distribute_message());
        assert!(perms.all_user_get_filelist());
        assert!(perms.all_user_download_file());
        assert!(!perms.all_user_upload_file());
    }

    #[test]
    fn flags_are_independently_mutable() {
        let perms = PermissionTable::default();
        perms.set_all_user_get_message(false);
        assert!(!perms.all_user_get_message());
        // Unrelated flags are untouched.
        assert!(perms.distribute_message());
    }
}
