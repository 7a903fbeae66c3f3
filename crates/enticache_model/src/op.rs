//! Entity operations.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Every operation an `EntityAction` can request or report.
///
/// Request ops that need a server round trip have `_SUCCESS` and `_ERROR`
/// companions; the remaining ops act on the cache only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum EntityOp {
    CancelPersist,
    CanceledPersist,

    QueryAll,
    QueryAllSuccess,
    QueryAllError,
    QueryLoad,
    QueryLoadSuccess,
    QueryLoadError,
    QueryMany,
    QueryManySuccess,
    QueryManyError,
    QueryByKey,
    QueryByKeySuccess,
    QueryByKeyError,

    SaveAddMany,
    SaveAddManySuccess,
    SaveAddManyError,
    SaveAddOne,
    SaveAddOneSuccess,
    SaveAddOneError,
    SaveDeleteMany,
    SaveDeleteManySuccess,
    SaveDeleteManyError,
    SaveDeleteOne,
    SaveDeleteOneSuccess,
    SaveDeleteOneError,
    SaveUpdateMany,
    SaveUpdateManySuccess,
    SaveUpdateManyError,
    SaveUpdateOne,
    SaveUpdateOneSuccess,
    SaveUpdateOneError,
    SaveUpsertMany,
    SaveUpsertManySuccess,
    SaveUpsertManyError,
    SaveUpsertOne,
    SaveUpsertOneSuccess,
    SaveUpsertOneError,

    AddAll,
    AddMany,
    AddOne,
    RemoveAll,
    RemoveMany,
    RemoveOne,
    UpdateMany,
    UpdateOne,
    UpsertMany,
    UpsertOne,

    CommitAll,
    CommitMany,
    CommitOne,
    UndoAll,
    UndoMany,
    UndoOne,

    SetChangeState,
    SetCollection,
    SetFilter,
    SetLoaded,
    SetLoading,
}

impl EntityOp {
    /// All operations.
    pub const ALL: [EntityOp; 59] = [
        EntityOp::CancelPersist,
        EntityOp::CanceledPersist,
        EntityOp::QueryAll,
        EntityOp::QueryAllSuccess,
        EntityOp::QueryAllError,
        EntityOp::QueryLoad,
        EntityOp::QueryLoadSuccess,
        EntityOp::QueryLoadError,
        EntityOp::QueryMany,
        EntityOp::QueryManySuccess,
        EntityOp::QueryManyError,
        EntityOp::QueryByKey,
        EntityOp::QueryByKeySuccess,
        EntityOp::QueryByKeyError,
        EntityOp::SaveAddMany,
        EntityOp::SaveAddManySuccess,
        EntityOp::SaveAddManyError,
        EntityOp::SaveAddOne,
        EntityOp::SaveAddOneSuccess,
        EntityOp::SaveAddOneError,
        EntityOp::SaveDeleteMany,
        EntityOp::SaveDeleteManySuccess,
        EntityOp::SaveDeleteManyError,
        EntityOp::SaveDeleteOne,
        EntityOp::SaveDeleteOneSuccess,
        EntityOp::SaveDeleteOneError,
        EntityOp::SaveUpdateMany,
        EntityOp::SaveUpdateManySuccess,
        EntityOp::SaveUpdateManyError,
        EntityOp::SaveUpdateOne,
        EntityOp::SaveUpdateOneSuccess,
        EntityOp::SaveUpdateOneError,
        EntityOp::SaveUpsertMany,
        EntityOp::SaveUpsertManySuccess,
        EntityOp::SaveUpsertManyError,
        EntityOp::SaveUpsertOne,
        EntityOp::SaveUpsertOneSuccess,
        EntityOp::SaveUpsertOneError,
        EntityOp::AddAll,
        EntityOp::AddMany,
        EntityOp::AddOne,
        EntityOp::RemoveAll,
        EntityOp::RemoveMany,
        EntityOp::RemoveOne,
        EntityOp::UpdateMany,
        EntityOp::UpdateOne,
        EntityOp::UpsertMany,
        EntityOp::UpsertOne,
        EntityOp::CommitAll,
        EntityOp::CommitMany,
        EntityOp::CommitOne,
        EntityOp::UndoAll,
        EntityOp::UndoMany,
        EntityOp::UndoOne,
        EntityOp::SetChangeState,
        EntityOp::SetCollection,
        EntityOp::SetFilter,
        EntityOp::SetLoaded,
        EntityOp::SetLoading,
    ];

    /// Canonical string form.
    pub fn as_str(&self) -> &'static str {
        use EntityOp::*;
        match self {
            CancelPersist => "enticache/cancel-persist",
            CanceledPersist => "enticache/canceled-persist",

            QueryAll => "enticache/query-all",
            QueryAllSuccess => "enticache/query-all/success",
            QueryAllError => "enticache/query-all/error",
            QueryLoad => "enticache/query-load",
            QueryLoadSuccess => "enticache/query-load/success",
            QueryLoadError => "enticache/query-load/error",
            QueryMany => "enticache/query-many",
            QueryManySuccess => "enticache/query-many/success",
            QueryManyError => "enticache/query-many/error",
            QueryByKey => "enticache/query-by-key",
            QueryByKeySuccess => "enticache/query-by-key/success",
            QueryByKeyError => "enticache/query-by-key/error",

            SaveAddMany => "enticache/save/add-many",
            SaveAddManySuccess => "enticache/save/add-many/success",
            SaveAddManyError => "enticache/save/add-many/error",
            SaveAddOne => "enticache/save/add-one",
            SaveAddOneSuccess => "enticache/save/add-one/success",
            SaveAddOneError => "enticache/save/add-one/error",
            SaveDeleteMany => "enticache/save/delete-many",
            SaveDeleteManySuccess => "enticache/save/delete-many/success",
            SaveDeleteManyError => "enticache/save/delete-many/error",
            SaveDeleteOne => "enticache/save/delete-one",
            SaveDeleteOneSuccess => "enticache/save/delete-one/success",
            SaveDeleteOneError => "enticache/save/delete-one/error",
            SaveUpdateMany => "enticache/save/update-many",
            SaveUpdateManySuccess => "enticache/save/update-many/success",
            SaveUpdateManyError => "enticache/save/update-many/error",
            SaveUpdateOne => "enticache/save/update-one",
            SaveUpdateOneSuccess => "enticache/save/update-one/success",
            SaveUpdateOneError => "enticache/save/update-one/error",
            SaveUpsertMany => "enticache/save/upsert-many",
            SaveUpsertManySuccess => "enticache/save/upsert-many/success",
            SaveUpsertManyError => "enticache/save/upsert-many/error",
            SaveUpsertOne => "enticache/save/upsert-one",
            SaveUpsertOneSuccess => "enticache/save/upsert-one/success",
            SaveUpsertOneError => "enticache/save/upsert-one/error",

            AddAll => "enticache/add-all",
            AddMany => "enticache/add-many",
            AddOne => "enticache/add-one",
            RemoveAll => "enticache/remove-all",
            RemoveMany => "enticache/remove-many",
            RemoveOne => "enticache/remove-one",
            UpdateMany => "enticache/update-many",
            UpdateOne => "enticache/update-one",
            UpsertMany => "enticache/upsert-many",
            UpsertOne => "enticache/upsert-one",

            CommitAll => "enticache/commit-all",
            CommitMany => "enticache/commit-many",
            CommitOne => "enticache/commit-one",
            UndoAll => "enticache/undo-all",
            UndoMany => "enticache/undo-many",
            UndoOne => "enticache/undo-one",

            SetChangeState => "enticache/set-change-state",
            SetCollection => "enticache/set-collection",
            SetFilter => "enticache/set-filter",
            SetLoaded => "enticache/set-loaded",
            SetLoading => "enticache/set-loading",
        }
    }

    /// Parses the canonical string form.
    ///
    /// Unknown strings yield `None`; callers treat them as a no-op.
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|op| op.as_str() == s)
    }

    /// Returns the `_SUCCESS` companion of a request op.
    pub fn success_op(&self) -> Option<EntityOp> {
        use EntityOp::*;
        Some(match self {
            QueryAll => QueryAllSuccess,
            QueryLoad => QueryLoadSuccess,
            QueryMany => QueryManySuccess,
            QueryByKey => QueryByKeySuccess,
            SaveAddMany => SaveAddManySuccess,
            SaveAddOne => SaveAddOneSuccess,
            SaveDeleteMany => SaveDeleteManySuccess,
            SaveDeleteOne => SaveDeleteOneSuccess,
            SaveUpdateMany => SaveUpdateManySuccess,
            SaveUpdateOne => SaveUpdateOneSuccess,
            SaveUpsertMany => SaveUpsertManySuccess,
            SaveUpsertOne => SaveUpsertOneSuccess,
            _ => return None,
        })
    }

    /// Returns the `_ERROR` companion of a request op.
    pub fn error_op(&self) -> Option<EntityOp> {
        use EntityOp::*;
        Some(match self {
            QueryAll => QueryAllError,
            QueryLoad => QueryLoadError,
            QueryMany => QueryManyError,
            QueryByKey => QueryByKeyError,
            SaveAddMany => SaveAddManyError,
            SaveAddOne => SaveAddOneError,
            SaveDeleteMany => SaveDeleteManyError,
            SaveDeleteOne => SaveDeleteOneError,
            SaveUpdateMany => SaveUpdateManyError,
            SaveUpdateOne => SaveUpdateOneError,
            SaveUpsertMany => SaveUpsertManyError,
            SaveUpsertOne => SaveUpsertOneError,
            _ => return None,
        })
    }

    /// Returns true for ops the persistence orchestrator sends to the server.
    pub fn is_persist(&self) -> bool {
        use EntityOp::*;
        matches!(
            self,
            QueryAll
                | QueryLoad
                | QueryByKey
                | QueryMany
                | SaveAddOne
                | SaveDeleteOne
                | SaveUpdateOne
                | SaveUpsertOne
        )
    }

    /// Returns true for read-only requests, which are safe to repeat.
    pub fn is_query(&self) -> bool {
        use EntityOp::*;
        matches!(self, QueryAll | QueryLoad | QueryByKey | QueryMany)
    }

    /// Returns true for `_SUCCESS` ops.
    pub fn is_success(&self) -> bool {
        self.as_str().ends_with("/success")
    }

    /// Returns true for `_ERROR` ops.
    pub fn is_error(&self) -> bool {
        self.as_str().ends_with("/error")
    }
}

impl fmt::Display for EntityOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
