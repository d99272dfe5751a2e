//! Logical change kinds reported to observers.

use std::fmt;

bitflags::bitflags! {
    /// Set of logical changes carried by one notification.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ChangeFlags: u8 {
        /// The path came into existence.
        const CREATE = 1 << 0;
        /// Contents changed, or the entry list of a directory changed.
        const WRITE = 1 << 1;
        /// The path was removed.
        const DELETE = 1 << 2;
        /// The path was moved away.
        const RENAME = 1 << 3;
        /// Permissions, ownership, timestamps or link count changed.
        const ATTRIBUTE_CHANGE = 1 << 4;
    }
}

const NAMES: [(ChangeFlags, &str); 5] = [
    (ChangeFlags::RENAME, "rename"),
    (ChangeFlags::WRITE, "write"),
    (ChangeFlags::DELETE, "delete"),
    (ChangeFlags::ATTRIBUTE_CHANGE, "attribute change"),
    (ChangeFlags::CREATE, "create"),
];

impl ChangeFlags {
    /// Drop the attribute change that accompanies an unlink.
    ///
    /// inotify reports the link count drop of a deleted file as its own
    /// attribute event right before the delete; folded into one burst the
    /// pair means "deleted".
    pub fn normalized(self) -> Self {
        if self.contains(ChangeFlags::DELETE) {
            self - ChangeFlags::ATTRIBUTE_CHANGE
        } else {
            self
        }
    }
}

impl fmt::Display for ChangeFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("none");
        }

        let mut first = true;
        for (flag, name) in NAMES {
            if self.contains(flag) {
                if !first {
                    f.write_str(", ")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_lists_names_in_fixed_order() {
        let flags = ChangeFlags::CREATE | ChangeFlags::RENAME | ChangeFlags::WRITE;
        assert_eq!(flags.to_string(), "rename, write, create");
        assert_eq!(ChangeFlags::empty().to_string(), "none");
        assert_eq!(
            ChangeFlags::ATTRIBUTE_CHANGE.to_string(),
            "attribute change"
        );
    }

    #[test]
    fn test_normalized_drops_attrib_only_with_delete() {
        let unlink = ChangeFlags::ATTRIBUTE_CHANGE | ChangeFlags::DELETE;
        assert_eq!(unlink.normalized(), ChangeFlags::DELETE);

        let chmod = ChangeFlags::ATTRIBUTE_CHANGE | ChangeFlags::WRITE;
        assert_eq!(chmod.normalized(), chmod);
    }
}
