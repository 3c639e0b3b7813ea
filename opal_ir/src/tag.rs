//! Identity tokens for blocks and values.
//!
//! Tags are opaque: two tags are equal exactly when they were produced by
//! the same allocation, regardless of their display hint. The hint string
//! exists for humans reading dumps and diagnostics; renaming a tag never
//! changes its identity.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

// =============================================================================
// Tags
// =============================================================================

macro_rules! define_tag {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Clone)]
        pub struct $name {
            id: u32,
            hint: Arc<str>,
        }

        impl $name {
            /// Get the raw identity of this tag.
            #[inline]
            pub fn id(&self) -> u32 {
                self.id
            }

            /// Get the display hint.
            #[inline]
            pub fn hint(&self) -> &str {
                &self.hint
            }

            /// Produce a tag with the same identity but a different hint.
            pub fn with_hint(&self, hint: impl Into<Arc<str>>) -> Self {
                Self {
                    id: self.id,
                    hint: hint.into(),
                }
            }
        }

        // Identity comparison only; the hint is cosmetic.
        impl PartialEq for $name {
            #[inline]
            fn eq(&self, other: &Self) -> bool {
                self.id == other.id
            }
        }

        impl Eq for $name {}

        impl std::hash::Hash for $name {
            #[inline]
            fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
                self.id.hash(state);
            }
        }

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                if self.hint.is_empty() {
                    write!(f, "{}#{}", stringify!($name), self.id)
                } else {
                    write!(f, "{}#{}", self.hint, self.id)
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                if self.hint.is_empty() {
                    write!(f, "#{}", self.id)
                } else {
                    write!(f, "{}#{}", self.hint, self.id)
                }
            }
        }
    };
}

define_tag! {
    /// Identity of a basic block.
    BlockTag
}

define_tag! {
    /// Identity of a named value: a block parameter or an instruction result.
    ValueTag
}

// =============================================================================
// Tag Allocator
// =============================================================================

/// Allocator handing out fresh tag identities.
///
/// Block and value tags draw from the same counter, so an allocator shared
/// between graph snapshots never reissues an identity. Allocation is
/// lock-free; snapshots hold the allocator behind an `Arc`.
#[derive(Debug, Default)]
pub struct TagAllocator {
    next: AtomicU32,
}

impl TagAllocator {
    /// Create a new allocator starting at identity zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a fresh block tag.
    pub fn block(&self, hint: impl Into<Arc<str>>) -> BlockTag {
        BlockTag {
            id: self.next.fetch_add(1, Ordering::Relaxed),
            hint: hint.into(),
        }
    }

    /// Allocate a fresh value tag.
    pub fn value(&self, hint: impl Into<Arc<str>>) -> ValueTag {
        ValueTag {
            id: self.next.fetch_add(1, Ordering::Relaxed),
            hint: hint.into(),
        }
    }
}

// =============================================================================
// Qualified Names
// =============================================================================

/// A dot-separated path naming a type or member.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct QualifiedName {
    segments: Vec<Arc<str>>,
}

impl QualifiedName {
    /// Build a name from path segments.
    pub fn new(segments: impl IntoIterator<Item = impl Into<Arc<str>>>) -> Self {
        Self {
            segments: segments.into_iter().map(Into::into).collect(),
        }
    }

    /// Parse a dotted string into a qualified name.
    pub fn parse(dotted: &str) -> Self {
        Self::new(dotted.split('.'))
    }

    /// The unqualified (last) segment.
    pub fn simple_name(&self) -> &str {
        self.segments.last().map(|s| s.as_ref()).unwrap_or("")
    }

    /// All segments, outermost first.
    pub fn segments(&self) -> &[Arc<str>] {
        &self.segments
    }

    /// Extend this name with a nested segment.
    pub fn nested(&self, segment: impl Into<Arc<str>>) -> Self {
        let mut segments = self.segments.clone();
        segments.push(segment.into());
        Self { segments }
    }
}

impl std::fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, seg) in self.segments.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            f.write_str(seg)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for QualifiedName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self)
    }
}

// =============================================================================
// Tests
// =============================================================================
