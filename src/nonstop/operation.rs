//! Operation Kinds
//!
//! Every entry point of the guard carries one of these tags. The tag decides
//! which budget applies and whether the call may bypass the guard entirely.

/// How the guard treats an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Bounded by the per-operation budget
    Guarded,
    /// Bounded by the per-operation budget times the bulk multiplier
    Bulk,
    /// Served from local tiers, never waits on initialization
    LocalOnly,
}

/// A guarded store operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Get,
    GetQuiet,
    GetAll,
    GetAllQuiet,
    Put,
    PutAll,
    Remove,
    RemoveKeys,
    RemoveAll,
    PutIfAbsent,
    RemoveElement,
    ReplaceElement,
    ContainsKey,
    Keys,
    Size,
    ClusteredSize,
    SetNodeCoherent,
    IsNodeCoherent,
    IsClusterCoherent,
    WaitUntilClusterCoherent,
    Flush,
    ExpireElements,
    UnsafeGet,
    LocalKeys,
    ContainsKeyInMemory,
    ContainsKeyOffHeap,
    InMemorySize,
    InMemorySizeInBytes,
    OffHeapSize,
    OffHeapSizeInBytes,
}

impl OperationKind {
    pub const ALL: [OperationKind; 30] = [
        OperationKind::Get,
        OperationKind::GetQuiet,
        OperationKind::GetAll,
        OperationKind::GetAllQuiet,
        OperationKind::Put,
        OperationKind::PutAll,
        OperationKind::Remove,
        OperationKind::RemoveKeys,
        OperationKind::RemoveAll,
        OperationKind::PutIfAbsent,
        OperationKind::RemoveElement,
        OperationKind::ReplaceElement,
        OperationKind::ContainsKey,
        OperationKind::Keys,
        OperationKind::Size,
        OperationKind::ClusteredSize,
        OperationKind::SetNodeCoherent,
        OperationKind::IsNodeCoherent,
        OperationKind::IsClusterCoherent,
        OperationKind::WaitUntilClusterCoherent,
        OperationKind::Flush,
        OperationKind::ExpireElements,
        OperationKind::UnsafeGet,
        OperationKind::LocalKeys,
        OperationKind::ContainsKeyInMemory,
        OperationKind::ContainsKeyOffHeap,
        OperationKind::InMemorySize,
        OperationKind::InMemorySizeInBytes,
        OperationKind::OffHeapSize,
        OperationKind::OffHeapSizeInBytes,
    ];

    pub fn dispatch(self) -> Dispatch {
        use OperationKind::*;
        match self {
            Size | GetAll | GetAllQuiet | PutAll | RemoveKeys | SetNodeCoherent
            | ClusteredSize => Dispatch::Bulk,
            UnsafeGet | LocalKeys | ContainsKeyInMemory | ContainsKeyOffHeap | InMemorySize
            | InMemorySizeInBytes | OffHeapSize | OffHeapSizeInBytes => Dispatch::LocalOnly,
            _ => Dispatch::Guarded,
        }
    }

    /// Operations that change store contents or cluster state.
    pub fn is_write(self) -> bool {
        use OperationKind::*;
        matches!(
            self,
            Put | PutAll
                | Remove
                | RemoveKeys
                | RemoveAll
                | PutIfAbsent
                | RemoveElement
                | ReplaceElement
                | SetNodeCoherent
                | ExpireElements
        )
    }

    pub fn name(self) -> &'static str {
        use OperationKind::*;
        match self {
            Get => "get",
            GetQuiet => "get_quiet",
            GetAll => "get_all",
            GetAllQuiet => "get_all_quiet",
            Put => "put",
            PutAll => "put_all",
            Remove => "remove",
            RemoveKeys => "remove_keys",
            RemoveAll => "remove_all",
            PutIfAbsent => "put_if_absent",
            RemoveElement => "remove_element",
            ReplaceElement => "replace_element",
            ContainsKey => "contains_key",
            Keys => "keys",
            Size => "size",
            ClusteredSize => "clustered_size",
            SetNodeCoherent => "set_node_coherent",
            IsNodeCoherent => "is_node_coherent",
            IsClusterCoherent => "is_cluster_coherent",
            WaitUntilClusterCoherent => "wait_until_cluster_coherent",
            Flush => "flush",
            ExpireElements => "expire_elements",
            UnsafeGet => "unsafe_get",
            LocalKeys => "local_keys",
            ContainsKeyInMemory => "contains_key_in_memory",
            ContainsKeyOffHeap => "contains_key_off_heap",
            InMemorySize => "in_memory_size",
            InMemorySizeInBytes => "in_memory_size_in_bytes",
            OffHeapSize => "off_heap_size",
            OffHeapSizeInBytes => "off_heap_size_in_bytes",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_bulk_operations() {
        let bulk: Vec<_> = OperationKind::ALL
            .iter()
            .filter(|op| op.dispatch() == Dispatch::Bulk)
            .map(|op| op.name())
            .collect();
        assert_eq!(
            bulk,
            vec![
                "get_all",
                "get_all_quiet",
                "put_all",
                "remove_keys",
                "size",
                "clustered_size",
                "set_node_coherent"
            ]
        );
    }

    #[test]
    fn test_local_only_operations_never_write() {
        for op in OperationKind::ALL {
            if op.dispatch() == Dispatch::LocalOnly {
                assert!(!op.is_write(), "{} is local-only", op.name());
            }
        }
        assert_eq!(
            OperationKind::ALL
                .iter()
                .filter(|op| op.dispatch() == Dispatch::LocalOnly)
                .count(),
            8
        );
    }

    #[test]
    fn test_names_are_unique() {
        let names: HashSet<_> = OperationKind::ALL.iter().map(|op| op.name()).collect();
        assert_eq!(names.len(), OperationKind::ALL.len());
    }
}
