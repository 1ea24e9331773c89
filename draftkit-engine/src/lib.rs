//! 图层聚合：实体归属、引用完整性、变更通知与撤销/重做。

pub mod bus;
pub mod drawing;
pub mod events;
pub mod layer;
pub mod undo;

pub mod errors {
    use draftkit_core::entity::EntityId;
    use draftkit_core::errors::GeometryError;
    use thiserror::Error;

    use crate::events::Origin;

    #[derive(Debug, Error)]
    pub enum LayerError {
        #[error("invalid argument: {0}")]
        InvalidArgument(String),
        #[error("referenced entity {missing} is not a member of the layer")]
        MissingReference { missing: EntityId },
        #[error("entity {0} is not a member of the layer")]
        NotMember(EntityId),
        #[error("entity {id} is still used by {users} other entities")]
        InUse { id: EntityId, users: usize },
        #[error("entity {0} already has an attached undo log")]
        DuplicateUndoKey(EntityId),
        #[error("replay of {origin} failed: {source}")]
        Replay {
            origin: Origin,
            #[source]
            source: Box<LayerError>,
        },
        #[error("{0} not found")]
        NotFound(String),
        #[error("entity {0} is locked")]
        Locked(EntityId),
        #[error(transparent)]
        Geometry(#[from] GeometryError),
    }

    impl LayerError {
        /// 界面层可以提示用户后继续的错误；其余均表示不变量被破坏。
        pub fn is_recoverable(&self) -> bool {
            matches!(self, LayerError::Locked(_) | LayerError::Geometry(_))
        }
    }
}
