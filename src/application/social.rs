//! Follow, block and mute edges between users.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::{
    application::{
        pagination::{ConnectionCursor, CursorPage, PageRequest},
        repos::{BlockOutcome, FollowOutcome, RepoError, SocialGraphRepo, UserDirectory},
    },
    domain::{
        entities::{Connection, Relationship, SocialEdgeRecord},
        types::EdgeKind,
    },
    util::clock::Clock,
};

#[derive(Debug, Error)]
pub enum SocialGraphError {
    #[error("cannot {action} yourself")]
    SelfReference { action: &'static str },
    #[error("user `{user_id}` not found")]
    NotFound { user_id: Uuid },
    #[error("{message}")]
    Conflict {
        message: &'static str,
        existing: Relationship,
    },
    #[error("not following user `{target_id}`")]
    NotFollowing { target_id: Uuid },
    #[error(transparent)]
    Store(#[from] RepoError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockReport {
    pub edge: SocialEdgeRecord,
    /// Follow edges removed between the pair, in either direction.
    pub removed_follows: u32,
}

#[derive(Clone)]
pub struct SocialGraphService {
    edges: Arc<dyn SocialGraphRepo>,
    users: Arc<dyn UserDirectory>,
    clock: Arc<dyn Clock>,
}

impl SocialGraphService {
    pub fn new(
        edges: Arc<dyn SocialGraphRepo>,
        users: Arc<dyn UserDirectory>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            edges,
            users,
            clock,
        }
    }

    #[instrument(skip(self))]
    pub async fn follow(
        &self,
        user_id: Uuid,
        target_id: Uuid,
    ) -> Result<SocialEdgeRecord, SocialGraphError> {
        if user_id == target_id {
            return Err(SocialGraphError::SelfReference { action: "follow" });
        }
        self.ensure_exists(target_id).await?;

        match self
            .edges
            .insert_follow(user_id, target_id, self.clock.now())
            .await?
        {
            FollowOutcome::Created(edge) => Ok(edge),
            FollowOutcome::AlreadyFollowing(existing) => Err(SocialGraphError::Conflict {
                message: "already following",
                existing,
            }),
            FollowOutcome::Blocked(existing) => Err(SocialGraphError::Conflict {
                message: "a block exists between these users",
                existing,
            }),
        }
    }

    #[instrument(skip(self))]
    pub async fn unfollow(&self, user_id: Uuid, target_id: Uuid) -> Result<(), SocialGraphError> {
        if user_id == target_id {
            return Err(SocialGraphError::SelfReference { action: "unfollow" });
        }
        let removed = self
            .edges
            .remove_edge(user_id, target_id, EdgeKind::Follows)
            .await?;
        if !removed {
            return Err(SocialGraphError::NotFollowing { target_id });
        }
        Ok(())
    }

    /// Block `target_id`, dropping follow edges between the pair in the same step.
    #[instrument(skip(self))]
    pub async fn block(
        &self,
        user_id: Uuid,
        target_id: Uuid,
    ) -> Result<BlockReport, SocialGraphError> {
        if user_id == target_id {
            return Err(SocialGraphError::SelfReference { action: "block" });
        }
        self.ensure_exists(target_id).await?;

        match self
            .edges
            .insert_block(user_id, target_id, self.clock.now())
            .await?
        {
            BlockOutcome::Created {
                edge,
                removed_follows,
            } => {
                debug!(%user_id, %target_id, removed_follows, "block installed");
                Ok(BlockReport {
                    edge,
                    removed_follows,
                })
            }
            BlockOutcome::AlreadyBlocked => {
                let existing = self.edges.relationship(user_id, target_id).await?;
                Err(SocialGraphError::Conflict {
                    message: "already blocking",
                    existing,
                })
            }
        }
    }

    /// Returns false when no block existed.
    pub async fn unblock(&self, user_id: Uuid, target_id: Uuid) -> Result<bool, SocialGraphError> {
        if user_id == target_id {
            return Err(SocialGraphError::SelfReference { action: "unblock" });
        }
        Ok(self
            .edges
            .remove_edge(user_id, target_id, EdgeKind::Blocks)
            .await?)
    }

    pub async fn mute(&self, user_id: Uuid, target_id: Uuid) -> Result<(), SocialGraphError> {
        if user_id == target_id {
            return Err(SocialGraphError::SelfReference { action: "mute" });
        }
        self.ensure_exists(target_id).await?;
        let inserted = self
            .edges
            .insert_mute(user_id, target_id, self.clock.now())
            .await?;
        if !inserted {
            let existing = self.edges.relationship(user_id, target_id).await?;
            return Err(SocialGraphError::Conflict {
                message: "already muting",
                existing,
            });
        }
        Ok(())
    }

    /// Returns false when no mute existed.
    pub async fn unmute(&self, user_id: Uuid, target_id: Uuid) -> Result<bool, SocialGraphError> {
        if user_id == target_id {
            return Err(SocialGraphError::SelfReference { action: "unmute" });
        }
        Ok(self
            .edges
            .remove_edge(user_id, target_id, EdgeKind::Mutes)
            .await?)
    }

    pub async fn relationship(
        &self,
        user_id: Uuid,
        target_id: Uuid,
    ) -> Result<Relationship, SocialGraphError> {
        Ok(self.edges.relationship(user_id, target_id).await?)
    }

    pub async fn followers(
        &self,
        user_id: Uuid,
        page: PageRequest<ConnectionCursor>,
    ) -> Result<CursorPage<Connection>, SocialGraphError> {
        self.ensure_exists(user_id).await?;
        Ok(self.edges.list_followers(user_id, page).await?)
    }

    pub async fn following(
        &self,
        user_id: Uuid,
        page: PageRequest<ConnectionCursor>,
    ) -> Result<CursorPage<Connection>, SocialGraphError> {
        self.ensure_exists(user_id).await?;
        Ok(self.edges.list_following(user_id, page).await?)
    }

    async fn ensure_exists(&self, user_id: Uuid) -> Result<(), SocialGraphError> {
        if self.users.user_exists(user_id).await? {
            Ok(())
        } else {
            Err(SocialGraphError::NotFound { user_id })
        }
    }
}
