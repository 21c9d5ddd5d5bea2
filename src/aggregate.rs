//! Mutation engine for the embedded comment/reply tree of a [`Post`].
//!
//! Every operation takes the whole aggregate by `&mut` and runs to
//! completion in memory; the repository layer is responsible for writing
//! the mutated document back. Lookup failures short-circuit outer to
//! inner (post, then comment, then reply) and authorization is checked
//! only once the target exists.

use chrono::Utc;

use crate::models::{new_id, Comment, LikeOutcome, Post, Reply};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Post,
    Comment,
    Reply,
}

impl Entity {
    pub fn name(self) -> &'static str {
        match self {
            Entity::Post => "Post",
            Entity::Comment => "Comment",
            Entity::Reply => "Reply",
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DomainError {
    #[error("{} not found", .0.name())]
    NotFound(Entity),
    #[error("Unauthorized")]
    Forbidden,
}

pub type DomainResult<T> = Result<T, DomainError>;

impl Post {
    pub fn create(content: String, author_username: String, image_url: Option<String>) -> Self {
        Post {
            id: new_id(),
            content,
            author_username,
            image_url,
            created_at: Utc::now(),
            updated_at: None,
            likes: 0,
            liked_by: Vec::new(),
            comments: Vec::new(),
        }
    }

    fn comment_mut(&mut self, comment_id: &str) -> DomainResult<&mut Comment> {
        self.comments
            .iter_mut()
            .find(|c| c.id == comment_id)
            .ok_or(DomainError::NotFound(Entity::Comment))
    }

    /// Edit the post body. Sets `updated_at`; author-gated.
    pub fn edit(&mut self, content: String, author: &str) -> DomainResult<()> {
        if self.author_username != author {
            return Err(DomainError::Forbidden);
        }
        self.content = content;
        self.updated_at = Some(Utc::now());
        Ok(())
    }

    /// Flip `user_id`'s membership in the like set. Not a set-to-value
    /// operation: each call toggles relative to current state.
    pub fn toggle_like(&mut self, user_id: &str) -> LikeOutcome {
        let has_liked = match self.liked_by.iter().position(|u| u == user_id) {
            Some(idx) => {
                self.liked_by.remove(idx);
                false
            }
            None => {
                self.liked_by.push(user_id.to_string());
                true
            }
        };
        self.likes = self.liked_by.len() as u64;
        LikeOutcome { likes: self.likes, has_liked }
    }

    /// Append a comment; insertion order is display order.
    pub fn add_comment(&mut self, content: String, author_username: String) -> Comment {
        let comment = Comment {
            id: new_id(),
            content,
            author_username,
            created_at: Utc::now(),
            replies: Vec::new(),
        };
        self.comments.push(comment.clone());
        comment
    }

    pub fn edit_comment(
        &mut self,
        comment_id: &str,
        content: String,
        author: &str,
    ) -> DomainResult<Comment> {
        let comment = self.comment_mut(comment_id)?;
        if comment.author_username != author {
            return Err(DomainError::Forbidden);
        }
        comment.content = content;
        Ok(comment.clone())
    }

    /// Remove a comment and, with it, every reply it owns.
    pub fn delete_comment(&mut self, comment_id: &str, author: &str) -> DomainResult<()> {
        let idx = self
            .comments
            .iter()
            .position(|c| c.id == comment_id)
            .ok_or(DomainError::NotFound(Entity::Comment))?;
        if self.comments[idx].author_username != author {
            return Err(DomainError::Forbidden);
        }
        self.comments.remove(idx);
        Ok(())
    }

    pub fn add_reply(
        &mut self,
        comment_id: &str,
        content: String,
        author_username: String,
    ) -> DomainResult<Reply> {
        let comment = self.comment_mut(comment_id)?;
        let reply = Reply {
            id: new_id(),
            content,
            author_username,
            created_at: Utc::now(),
        };
        comment.replies.push(reply.clone());
        Ok(reply)
    }

    pub fn edit_reply(
        &mut self,
        comment_id: &str,
        reply_id: &str,
        content: String,
        author: &str,
    ) -> DomainResult<Reply> {
        let comment = self.comment_mut(comment_id)?;
        let reply = comment
            .replies
            .iter_mut()
            .find(|r| r.id == reply_id)
            .ok_or(DomainError::NotFound(Entity::Reply))?;
        if reply.author_username != author {
            return Err(DomainError::Forbidden);
        }
        reply.content = content;
        Ok(reply.clone())
    }

    pub fn delete_reply(
        &mut self,
        comment_id: &str,
        reply_id: &str,
        author: &str,
    ) -> DomainResult<()> {
        let comment = self.comment_mut(comment_id)?;
        let idx = comment
            .replies
            .iter()
            .position(|r| r.id == reply_id)
            .ok_or(DomainError::NotFound(Entity::Reply))?;
        if comment.replies[idx].author_username != author {
            return Err(DomainError::Forbidden);
        }
        comment.replies.remove(idx);
        Ok(())
    }

    /// True when any embedded comment carries `comment_id`. Used by the
    /// post-unscoped reply path to locate the owning aggregate.
    pub fn contains_comment(&self, comment_id: &str) -> bool {
        self.comments.iter().any(|c| c.id == comment_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn post() -> Post {
        Post::create("hello".into(), "Fox1".into(), None)
    }

    #[test]
    fn toggle_like_is_its_own_inverse() {
        let mut p = post();
        let first = p.toggle_like("u1");
        assert_eq!(first, LikeOutcome { likes: 1, has_liked: true });
        assert_eq!(p.likes, p.liked_by.len() as u64);

        let second = p.toggle_like("u1");
        assert_eq!(second, LikeOutcome { likes: 0, has_liked: false });
        assert!(p.liked_by.is_empty());
    }

    #[test]
    fn like_count_tracks_set_size_across_users() {
        let mut p = post();
        p.toggle_like("u1");
        p.toggle_like("u2");
        p.toggle_like("u3");
        p.toggle_like("u2");
        assert_eq!(p.likes, 2);
        assert_eq!(p.liked_by, vec!["u1".to_string(), "u3".to_string()]);
    }

    #[test]
    fn edit_by_non_author_is_forbidden_and_leaves_content() {
        let mut p = post();
        let err = p.edit("tampered".into(), "Bear2").unwrap_err();
        assert_eq!(err, DomainError::Forbidden);
        assert_eq!(p.content, "hello");
        assert!(p.updated_at.is_none());
    }

    #[test]
    fn deleting_comment_cascades_to_replies() {
        let mut p = post();
        let c = p.add_comment("hi".into(), "Bear2".into());
        let r = p.add_reply(&c.id, "yo".into(), "Fox1".into()).unwrap();

        p.delete_comment(&c.id, "Bear2").unwrap();
        assert!(p.comments.is_empty());
        // the reply went with its parent
        assert!(p
            .comments
            .iter()
            .flat_map(|c| &c.replies)
            .all(|x| x.id != r.id));
    }

    #[test]
    fn reply_lookup_failure_is_scoped_to_the_innermost_entity() {
        let mut p = post();
        let c = p.add_comment("hi".into(), "Bear2".into());

        let err = p.add_reply("missing", "yo".into(), "Fox1".into()).unwrap_err();
        assert_eq!(err, DomainError::NotFound(Entity::Comment));

        let err = p
            .edit_reply(&c.id, "missing", "yo".into(), "Fox1")
            .unwrap_err();
        assert_eq!(err, DomainError::NotFound(Entity::Reply));
    }

    #[test]
    fn existence_is_checked_before_authorization() {
        let mut p = post();
        let c = p.add_comment("hi".into(), "Bear2".into());
        // wrong author *and* wrong reply id: NotFound wins
        let err = p
            .delete_reply(&c.id, "missing", "Nobody")
            .unwrap_err();
        assert_eq!(err, DomainError::NotFound(Entity::Reply));
    }

    #[test]
    fn comment_edit_requires_matching_author() {
        let mut p = post();
        let c = p.add_comment("hi".into(), "Bear2".into());
        let err = p.edit_comment(&c.id, "changed".into(), "Fox1").unwrap_err();
        assert_eq!(err, DomainError::Forbidden);
        assert_eq!(p.comments[0].content, "hi");
    }
}
