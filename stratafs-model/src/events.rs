/// Kind of change carried by a filesystem event.
///
/// `Create`, `Delete`, and `Rename` are namespace changes; `Change` is a
/// content change. The split drives the watch manager's smart coalescing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum FsEventKind {
    Create,
    Change,
    Delete,
    Rename,
}

impl FsEventKind {
    pub fn is_namespace_change(&self) -> bool {
        matches!(self, FsEventKind::Create | FsEventKind::Delete | FsEventKind::Rename)
    }

    pub fn is_content_change(&self) -> bool {
        matches!(self, FsEventKind::Change)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FsEventKind::Create => "create",
            FsEventKind::Change => "change",
            FsEventKind::Delete => "delete",
            FsEventKind::Rename => "rename",
        }
    }
}

impl std::fmt::Display for FsEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A change notification for one absolute catalog path.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FsEvent {
    pub kind: FsEventKind,
    /// Full normalized affected path.
    pub path: String,
}

impl FsEvent {
    pub fn new(kind: FsEventKind, path: impl Into<String>) -> Self {
        Self { kind, path: path.into() }
    }
}
